//! Run loop configuration.
//!
//! # Grounding
//! Validate-at-construction rather than panic-on-misuse, the same shape
//! as `spark-core::governance::timeout::profile::Timeout::try_new`: a
//! config built from bad inputs never exists as a value, so downstream
//! code never has to re-check invariants the constructor already proved.

use std::time::Duration;

use crate::error::RunLoopError;

/// Per-task scheduling parameters. One `RunLoopConfig` is shared by every
/// task registered on a [`crate::run_loop::RunLoopBuilder`] unless a task
/// is registered with its own override via
/// [`crate::run_loop::RunLoopBuilder::task_with_config`].
#[derive(Clone, Debug)]
pub struct RunLoopConfig {
    max_concurrency: usize,
    window: Option<Duration>,
    commit: Option<Duration>,
    callback_timeout: Option<Duration>,
    stuck_dispatch_warning: Option<Duration>,
}

impl RunLoopConfig {
    /// Builds a config with the given concurrency ceiling and every
    /// optional interval disabled. Fails if `max_concurrency` is zero —
    /// a task that can never have an in-flight message can never make
    /// progress.
    pub fn try_new(max_concurrency: usize) -> Result<Self, RunLoopError> {
        if max_concurrency == 0 {
            return Err(RunLoopError::InvalidConfig(
                "max_concurrency must be at least 1".into(),
            ));
        }
        Ok(Self {
            max_concurrency,
            window: None,
            commit: None,
            callback_timeout: None,
            stuck_dispatch_warning: None,
        })
    }

    pub fn with_window(mut self, interval: Duration) -> Self {
        self.window = Some(interval);
        self
    }

    pub fn with_commit(mut self, interval: Duration) -> Self {
        self.commit = Some(interval);
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = Some(timeout);
        self
    }

    /// Enables a metrics-only warning (never a synthesized completion)
    /// logged when a dispatched callback has been outstanding longer than
    /// `threshold` without a `callback_timeout` having fired. Disabled by
    /// default.
    pub fn with_stuck_dispatch_warning(mut self, threshold: Duration) -> Self {
        self.stuck_dispatch_warning = Some(threshold);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    pub fn commit(&self) -> Option<Duration> {
        self.commit
    }

    pub fn callback_timeout(&self) -> Option<Duration> {
        self.callback_timeout
    }

    pub fn stuck_dispatch_warning(&self) -> Option<Duration> {
        self.stuck_dispatch_warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_concurrency() {
        let err = RunLoopConfig::try_new(0).unwrap_err();
        assert!(matches!(err, RunLoopError::InvalidConfig(_)));
    }

    #[test]
    fn builder_methods_compose() {
        let config = RunLoopConfig::try_new(4)
            .unwrap()
            .with_window(Duration::from_secs(1))
            .with_commit(Duration::from_secs(60))
            .with_callback_timeout(Duration::from_millis(500));
        assert_eq!(config.max_concurrency(), 4);
        assert_eq!(config.window(), Some(Duration::from_secs(1)));
        assert_eq!(config.commit(), Some(Duration::from_secs(60)));
        assert_eq!(config.callback_timeout(), Some(Duration::from_millis(500)));
    }
}
