use crate::error::{PipelineError, Result};
use std::time::Duration;
use typed_builder::TypedBuilder;

pub const DEFAULT_QUEUE_CAPACITY: usize = 50;
pub const DEFAULT_FLUSH_THRESHOLD: usize = 20;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Tuning knobs of the deletion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct BatchSettings {
    /// Capacity of the task queue. Submitters block while it is full.
    #[builder(default = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
    /// Number of submissions since the last flush that triggers a flush.
    #[builder(default = DEFAULT_FLUSH_THRESHOLD)]
    pub flush_threshold: usize,
    /// Longest time between two flushes while tasks are pending.
    #[builder(default = DEFAULT_FLUSH_INTERVAL)]
    pub flush_interval: Duration,
    /// Number of dispatcher workers; one per CPU by default.
    #[builder(default = num_cpus::get())]
    pub dispatchers: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BatchSettings {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::InvalidSettings(
                "queue capacity must be greater than zero".to_string(),
            ));
        }
        if self.flush_threshold == 0 {
            return Err(PipelineError::InvalidSettings(
                "flush threshold must be greater than zero".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(PipelineError::InvalidSettings(
                "flush interval must be greater than zero".to_string(),
            ));
        }
        if self.dispatchers == 0 {
            return Err(PipelineError::InvalidSettings(
                "at least one dispatcher is required".to_string(),
            ));
        }
        Ok(())
    }
}
