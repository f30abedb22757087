//! # Timer Tick Handler
//!
//! Per-tick alarm bookkeeping and the periodic reschedule.

use crate::kernel::Kernel;
use crate::signals::Signal;
use crate::thread::Thread;
use crate::{ExecResult, Target};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use kestrel_hal::{HardwareAbstractionLayer, InterruptGuard};

/// Which alarm clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    /// Counts ticks while the thread is running
    Virtual,
    /// Counts every tick
    Real,
}

impl AlarmKind {
    /// Signal raised on expiry
    pub fn signal(self) -> Signal {
        match self {
            AlarmKind::Virtual => Signal::VirtualAlarm,
            AlarmKind::Real => Signal::Alarm,
        }
    }
}

/// Period/counter pair; period zero is off
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlarmTimer {
    period: u64,
    counter: u64,
}

impl AlarmTimer {
    /// Set the period and restart the count; returns the old period
    pub fn arm(&mut self, period: u64) -> u64 {
        let old = self.period;
        self.period = period;
        self.counter = 0;
        old
    }

    /// Count one tick; true when the counter wraps
    pub fn advance(&mut self) -> bool {
        if self.period == 0 {
            return false;
        }
        self.counter = (self.counter + 1) % self.period;
        self.counter == 0
    }
}

impl<H: HardwareAbstractionLayer> Kernel<H> {
    /// Timer upcall, once per hardware tick
    pub fn tick(&self) {
        let _irq = InterruptGuard::new(self.hal.cpu());
        let now = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.record_tick();

        let mut expired: Vec<(Arc<Thread>, Signal)> = Vec::new();
        if let Some(current) = self.current_thread() {
            if current.advance_alarm(AlarmKind::Virtual) {
                expired.push((current, Signal::VirtualAlarm));
            }
        }
        for thread in self.alarm_list.lock().iter() {
            if thread.advance_alarm(AlarmKind::Real) {
                expired.push((thread.clone(), Signal::Alarm));
            }
        }
        for (thread, signal) in expired {
            self.raise(&thread, signal, None);
        }

        if now % self.config.schedule_interval == 0 {
            self.metrics.record_preemption();
            self.schedule(Target::Any);
        }
    }

    /// Arm or disarm an alarm of the running thread; returns the old period
    pub fn set_alarm(&self, kind: AlarmKind, period: u64) -> ExecResult<u64> {
        let thread = self.current()?;
        let _irq = InterruptGuard::new(self.hal.cpu());

        let old = thread.arm_alarm(kind, period);
        if kind == AlarmKind::Real {
            if period != 0 && !thread.in_alarm_list() {
                thread.set_in_alarm_list(true);
                self.alarm_list.lock().push(thread.clone());
            } else if period == 0 {
                self.unregister_alarm(&thread);
            }
        }
        log::debug!("{}: {:?} alarm period {} -> {}", thread.id(), kind, old, period);
        Ok(old)
    }

    /// Drop a thread from the alarm list
    pub(crate) fn unregister_alarm(&self, thread: &Thread) {
        if thread.in_alarm_list() {
            self.alarm_list.lock().retain(|t| t.id() != thread.id());
            thread.set_in_alarm_list(false);
        }
    }
}
