use crate::agent_engine::state::LoopConfig;

/// Bounds one agent run by model calls and tool failures.
pub struct LoopController {
    config: LoopConfig,
    steps: u32,
    failure_count: u32,
}

impl LoopController {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            steps: 0,
            failure_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.steps = 0;
        self.failure_count = 0;
    }

    pub fn record_step(&mut self) {
        self.steps += 1;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Reason to stop before the next model call, if any.
    pub fn should_stop(&self) -> Option<String> {
        if self.config.max_failures > 0 && self.failure_count >= self.config.max_failures {
            return Some(format!("{} tool calls failed", self.failure_count));
        }
        if self.steps >= self.config.max_steps {
            return Some(format!("no answer after {} model calls", self.steps));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_on_step_budget() {
        let mut ctrl = LoopController::new(LoopConfig {
            max_steps: 2,
            max_failures: 3,
        });
        assert!(ctrl.should_stop().is_none());
        ctrl.record_step();
        ctrl.record_step();
        assert!(ctrl.should_stop().unwrap().contains("2 model calls"));
        ctrl.reset();
        assert!(ctrl.should_stop().is_none());
    }

    #[test]
    fn stops_on_failures_unless_disabled() {
        let mut ctrl = LoopController::new(LoopConfig {
            max_steps: 10,
            max_failures: 1,
        });
        ctrl.record_failure();
        assert!(ctrl.should_stop().is_some());

        let mut lenient = LoopController::new(LoopConfig {
            max_steps: 10,
            max_failures: 0,
        });
        lenient.record_failure();
        assert!(lenient.should_stop().is_none());
    }
}
