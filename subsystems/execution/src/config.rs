//! # Scheduler Configuration

use crate::{ExecError, ExecResult};

/// Configuration for the scheduler and control-block store
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Timer ticks between two tick-driven reschedules
    pub schedule_interval: u64,
    /// Size of every thread's kernel stack, in bytes
    pub kernel_stack_size: usize,
    /// Maximum number of allocated thread control blocks
    pub max_threads: usize,
    /// Maximum number of live processes
    pub max_processes: usize,
}

impl SchedulerConfig {
    /// Default reschedule cadence: every 100 ticks
    pub const DEFAULT_SCHEDULE_INTERVAL: u64 = 100;
    /// Default kernel stack: one page
    pub const DEFAULT_KERNEL_STACK_SIZE: usize = 4096;
    /// Default thread limit
    pub const DEFAULT_MAX_THREADS: usize = 1024;
    /// Default process limit
    pub const DEFAULT_MAX_PROCESSES: usize = 256;

    /// Create default configuration
    pub fn new() -> Self {
        Self {
            schedule_interval: Self::DEFAULT_SCHEDULE_INTERVAL,
            kernel_stack_size: Self::DEFAULT_KERNEL_STACK_SIZE,
            max_threads: Self::DEFAULT_MAX_THREADS,
            max_processes: Self::DEFAULT_MAX_PROCESSES,
        }
    }

    /// Reschedule ten times as often as the default
    pub fn responsive() -> Self {
        Self {
            schedule_interval: 10,
            ..Self::new()
        }
    }

    /// Set the reschedule cadence
    pub fn with_schedule_interval(mut self, ticks: u64) -> Self {
        self.schedule_interval = ticks;
        self
    }

    /// Set the kernel stack size
    pub fn with_kernel_stack_size(mut self, bytes: usize) -> Self {
        self.kernel_stack_size = bytes;
        self
    }

    /// Set the thread limit
    pub fn with_max_threads(mut self, count: usize) -> Self {
        self.max_threads = count;
        self
    }

    /// Set the process limit
    pub fn with_max_processes(mut self, count: usize) -> Self {
        self.max_processes = count;
        self
    }

    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> ExecResult<()> {
        if self.schedule_interval == 0
            || self.kernel_stack_size == 0
            || self.max_threads == 0
            || self.max_processes == 0
        {
            return Err(ExecError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.schedule_interval, 100);
        assert_eq!(config.kernel_stack_size, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_and_builders() {
        assert_eq!(SchedulerConfig::responsive().schedule_interval, 10);

        let config = SchedulerConfig::new()
            .with_schedule_interval(5)
            .with_kernel_stack_size(8192)
            .with_max_threads(4)
            .with_max_processes(2);
        assert_eq!(config.schedule_interval, 5);
        assert_eq!(config.kernel_stack_size, 8192);
        assert_eq!(config.max_threads, 4);
        assert_eq!(config.max_processes, 2);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let zero_interval = SchedulerConfig::new().with_schedule_interval(0);
        assert_eq!(zero_interval.validate(), Err(ExecError::InvalidArgument));

        let zero_stack = SchedulerConfig::new().with_kernel_stack_size(0);
        assert_eq!(zero_stack.validate(), Err(ExecError::InvalidArgument));
    }
}
