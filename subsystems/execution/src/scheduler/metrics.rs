//! # Scheduler Metrics
//!
//! Counters for scheduler activity.

use core::sync::atomic::{AtomicU64, Ordering};

/// Scheduler metrics
pub struct SchedulerMetrics {
    /// Total context switches
    context_switches: AtomicU64,
    /// Switches that entered a thread for the first time
    first_runs: AtomicU64,
    /// Total timer ticks
    ticks: AtomicU64,
    /// Tick-driven reschedules
    preemptions: AtomicU64,
    /// Total voluntary yields
    voluntary_yields: AtomicU64,
    /// Blocked threads made runnable
    wakeups: AtomicU64,
    /// Signals handed to the delivery hook
    signals_delivered: AtomicU64,
}

impl SchedulerMetrics {
    /// Create new metrics
    pub const fn new() -> Self {
        Self {
            context_switches: AtomicU64::new(0),
            first_runs: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            voluntary_yields: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
            signals_delivered: AtomicU64::new(0),
        }
    }

    /// Record a context switch
    pub fn record_context_switch(&self) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a first run
    pub fn record_first_run(&self) {
        self.first_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a timer tick
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a preemption
    pub fn record_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a voluntary yield
    pub fn record_yield(&self) {
        self.voluntary_yields.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a wakeup
    pub fn record_wakeup(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delivered signal
    pub fn record_signal_delivered(&self) {
        self.signals_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total context switches
    pub fn context_switches(&self) -> u64 {
        self.context_switches.load(Ordering::Relaxed)
    }

    /// Get first runs
    pub fn first_runs(&self) -> u64 {
        self.first_runs.load(Ordering::Relaxed)
    }

    /// Get total ticks
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Get preemptions
    pub fn preemptions(&self) -> u64 {
        self.preemptions.load(Ordering::Relaxed)
    }

    /// Get voluntary yields
    pub fn voluntary_yields(&self) -> u64 {
        self.voluntary_yields.load(Ordering::Relaxed)
    }

    /// Get wakeups
    pub fn wakeups(&self) -> u64 {
        self.wakeups.load(Ordering::Relaxed)
    }

    /// Get delivered signals
    pub fn signals_delivered(&self) -> u64 {
        self.signals_delivered.load(Ordering::Relaxed)
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.context_switches.store(0, Ordering::Relaxed);
        self.first_runs.store(0, Ordering::Relaxed);
        self.ticks.store(0, Ordering::Relaxed);
        self.preemptions.store(0, Ordering::Relaxed);
        self.voluntary_yields.store(0, Ordering::Relaxed);
        self.wakeups.store(0, Ordering::Relaxed);
        self.signals_delivered.store(0, Ordering::Relaxed);
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total context switches
    pub context_switches: u64,
    /// First runs
    pub first_runs: u64,
    /// Timer ticks
    pub ticks: u64,
    /// Tick-driven reschedules
    pub preemptions: u64,
    /// Voluntary yields
    pub voluntary_yields: u64,
    /// Wakeups
    pub wakeups: u64,
    /// Delivered signals
    pub signals_delivered: u64,
    /// Threads on the ready queue
    pub ready_threads: usize,
    /// Threads on the blocked queue
    pub blocked_threads: usize,
    /// Allocated thread control blocks
    pub threads: usize,
    /// Live processes
    pub processes: usize,
}
