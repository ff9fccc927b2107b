//! Structured course plans requested from the chat model as JSON.

use serde::{Deserialize, Serialize};

use crate::errors::{RagError, RagResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoursePlan {
    pub topic: String,
    pub weeks: u32,
    pub difficulty_level: String,
    pub modules: Vec<String>,
}

impl CoursePlan {
    pub fn validate(&self) -> RagResult<()> {
        if self.topic.trim().is_empty() {
            return Err(RagError::LlmProvider("course plan has an empty topic".into()));
        }
        if self.weeks == 0 {
            return Err(RagError::LlmProvider("course plan must last at least one week".into()));
        }
        if self.modules.iter().all(|m| m.trim().is_empty()) {
            return Err(RagError::LlmProvider("course plan has no modules".into()));
        }
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "Topic: {}\nLevel: {} ({} weeks)\nModules:\n",
            self.topic, self.difficulty_level, self.weeks
        );
        for module in &self.modules {
            out.push_str(&format!("  [+] {module}\n"));
        }
        out
    }
}

pub fn plan_prompt(topic: &str) -> String {
    format!(
        "Act as a senior solutions architect. Design a study plan for: {topic}\n\n\
         Reply with a single JSON object and nothing else, shaped as \
         {{\"topic\": string, \"weeks\": integer, \"difficulty_level\": string, \"modules\": [string]}}."
    )
}

/// Parses the model reply, tolerating a surrounding markdown code fence.
pub fn parse_course_plan(reply: &str) -> RagResult<CoursePlan> {
    let body = strip_code_fence(reply.trim());
    let plan: CoursePlan = serde_json::from_str(body)
        .map_err(|e| RagError::LlmProvider(format!("course plan is not valid JSON: {e}")))?;
    plan.validate()?;
    Ok(plan)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_fenced_json() {
        let json = r#"{"topic":"Python automation","weeks":6,"difficulty_level":"Intermediate","modules":["Scripting","APIs"]}"#;
        let plan = parse_course_plan(json).unwrap();
        assert_eq!(plan.weeks, 6);

        let fenced = format!("```json\n{json}\n```");
        assert_eq!(parse_course_plan(&fenced).unwrap(), plan);

        let shown = plan.render();
        assert!(shown.contains("Level: Intermediate (6 weeks)"));
        assert!(shown.contains("  [+] APIs\n"));
    }

    #[test]
    fn invalid_plans_are_rejected() {
        assert!(parse_course_plan(r#"{"topic":"x","weeks":0,"difficulty_level":"a","modules":["m"]}"#).is_err());
        assert!(parse_course_plan(r#"{"topic":"x","weeks":2,"difficulty_level":"a","modules":[]}"#).is_err());
        assert!(parse_course_plan(r#"{"topic":"x","weeks":"two","difficulty_level":"a","modules":["m"]}"#).is_err());
        assert!(parse_course_plan("Sure! Here is your plan.").is_err());
    }
}
