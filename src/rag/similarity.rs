/// Cosine similarity in `[-1, 1]`; a zero-length or all-zero vector scores 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot = dot(a, b);
    let norm_a = dot_self(a).sqrt();
    let norm_b = dot_self(b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn dot_self(a: &[f32]) -> f32 {
    dot(a, a)
}

/// Full-block bar proportional to `score`, twenty blocks for a perfect match.
pub fn similarity_bar(score: f32) -> String {
    let blocks = (score.max(0.0) * 20.0).floor() as usize;
    "█".repeat(blocks.min(20))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_are_fully_similar() {
        let v = [0.3, -1.2, 4.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_and_zero_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn bar_length_tracks_score() {
        assert_eq!(similarity_bar(1.0).chars().count(), 20);
        assert_eq!(similarity_bar(0.49).chars().count(), 9);
        assert!(similarity_bar(-0.3).is_empty());
    }
}
