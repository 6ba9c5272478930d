//! Debug-only environment knobs.
//!
//! Both knobs exist for deterministic testing: they hold the worker
//! threads back until enough payloads have accumulated, so a test can
//! pre-load a known queue shape before the first batch is assembled.

use tracing::info;

/// Name of the per-worker delay knob.
pub const DELAY_SCHEDULER_VAR: &str = "TRTSERVER_DELAY_SCHEDULER";

/// Name of the coordinator backlog delay knob.
pub const BACKLOG_DELAY_SCHEDULER_VAR: &str = "TRTSERVER_BACKLOG_DELAY_SCHEDULER";

/// Debug-delay settings for the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerEnv {
    /// Each worker delays batch assembly until its own queues hold at
    /// least this many payloads.
    pub delay_scheduler: Option<usize>,

    /// Workers additionally delay until the coordinator's backlog holds at
    /// least this many payloads in total.
    pub backlog_delay_scheduler: Option<usize>,
}

impl SchedulerEnv {
    /// Read the delay knobs from the process environment.
    pub fn from_env() -> Self {
        let env = Self::parse(
            std::env::var(DELAY_SCHEDULER_VAR).ok().as_deref(),
            std::env::var(BACKLOG_DELAY_SCHEDULER_VAR).ok().as_deref(),
        );
        if let Some(count) = env.delay_scheduler {
            info!(count, "delaying scheduler workers until queues fill");
        }
        if let Some(count) = env.backlog_delay_scheduler {
            info!(count, "delaying scheduler workers until backlog fills");
        }
        env
    }

    /// No delays; normal operation.
    pub fn disabled() -> Self {
        Self::default()
    }

    fn parse(delay: Option<&str>, backlog_delay: Option<&str>) -> Self {
        let parse_count = |v: Option<&str>| v.and_then(|s| s.parse().ok()).filter(|&n| n > 0);
        Self {
            delay_scheduler: parse_count(delay),
            backlog_delay_scheduler: parse_count(backlog_delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values() {
        let env = SchedulerEnv::parse(Some("4"), Some("2"));
        assert_eq!(env.delay_scheduler, Some(4));
        assert_eq!(env.backlog_delay_scheduler, Some(2));
    }

    #[test]
    fn test_parse_absent_or_invalid() {
        assert_eq!(SchedulerEnv::parse(None, None), SchedulerEnv::disabled());
        assert_eq!(SchedulerEnv::parse(Some("nope"), Some("")), SchedulerEnv::disabled());
        // Zero disables the knob rather than delaying forever.
        assert_eq!(SchedulerEnv::parse(Some("0"), Some("0")), SchedulerEnv::disabled());
    }
}
