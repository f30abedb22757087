//! # Blocking and Waking
//!
//! Syscall-facing ways for the running thread to give up the processor,
//! and for someone else to hand it back.

use super::Target;
use crate::kernel::Kernel;
use crate::thread::{BlockReason, ThreadState};
use crate::{ExecError, ExecResult, ThreadId};
use kestrel_hal::{HardwareAbstractionLayer, InterruptGuard};

impl<H: HardwareAbstractionLayer> Kernel<H> {
    /// Block the running thread unless `reject` says otherwise
    ///
    /// `reject` is evaluated under the deschedule gate, so a concurrent
    /// [`Kernel::make_runnable`] is either seen by it or finds the thread on
    /// the blocked queue. Returns once made runnable and dispatched again.
    pub fn deschedule(&self, reject: impl FnOnce() -> bool) -> ExecResult<()> {
        let thread = self.current()?;
        if thread.is_idle() {
            return Err(ExecError::InvalidState);
        }

        let irq = InterruptGuard::new(self.hal.cpu());
        let gate = self.deschedule_gate.lock();
        if reject() {
            return Ok(());
        }

        log::trace!("{}: descheduled", thread.id());
        thread.set_state(ThreadState::Blocked);
        drop(thread);
        self.schedule_with(Target::Any, Some(gate));
        drop(irq);
        Ok(())
    }

    /// Make a descheduled thread runnable
    pub fn make_runnable(&self, tid: ThreadId) -> ExecResult<()> {
        let _irq = InterruptGuard::new(self.hal.cpu());
        let _gate = self.deschedule_gate.lock();

        let thread = self.threads.get(tid).ok_or(ExecError::ThreadNotFound)?;
        if thread.state() != ThreadState::Blocked {
            return Err(ExecError::InvalidState);
        }
        self.unblock(tid);
        Ok(())
    }

    /// Suspend the running thread for more than `ticks` ticks
    pub fn sleep(&self, ticks: i64) -> ExecResult<()> {
        if ticks < 0 {
            return Err(ExecError::InvalidArgument);
        }
        if ticks == 0 {
            return Ok(());
        }

        let thread = self.current()?;
        if thread.is_idle() {
            return Err(ExecError::InvalidState);
        }

        let irq = InterruptGuard::new(self.hal.cpu());
        thread.start_sleep(self.ticks(), ticks as u64);
        thread.set_state(ThreadState::Sleeping);
        log::trace!("{}: sleeping {} ticks", thread.id(), ticks);
        drop(thread);
        self.schedule(Target::Any);
        drop(irq);
        Ok(())
    }

    /// Give up the processor, optionally to a specific ready thread
    pub fn yield_now(&self, target: Option<ThreadId>) -> ExecResult<()> {
        let current = self.current()?;
        let _irq = InterruptGuard::new(self.hal.cpu());

        let target = match target {
            None => Target::Any,
            Some(tid) if tid == current.id() => return Ok(()),
            Some(tid) => {
                if !self.ready.lock().contains(tid) {
                    return Err(ExecError::ThreadNotFound);
                }
                Target::Thread(tid)
            }
        };
        drop(current);

        if self.schedule_with(target, None) {
            self.metrics.record_yield();
        }
        Ok(())
    }

    /// Block the running thread for console input or a signal
    pub fn block_current(&self, reason: BlockReason) -> ExecResult<()> {
        if !matches!(reason, BlockReason::Input | BlockReason::Signal) {
            return Err(ExecError::InvalidArgument);
        }
        let thread = self.current()?;
        if thread.is_idle() {
            return Err(ExecError::InvalidState);
        }

        let irq = InterruptGuard::new(self.hal.cpu());
        thread.set_state(reason.state());
        drop(thread);
        self.schedule(Target::Any);
        drop(irq);
        Ok(())
    }

    /// Wake a thread blocked for `reason`
    pub fn wake(&self, tid: ThreadId, reason: BlockReason) -> ExecResult<()> {
        let _irq = InterruptGuard::new(self.hal.cpu());
        let thread = self.threads.get(tid).ok_or(ExecError::ThreadNotFound)?;
        if thread.state() != reason.state() {
            return Err(ExecError::InvalidState);
        }
        self.unblock(tid);
        Ok(())
    }

    /// Move a thread from the blocked queue to the ready tail
    ///
    /// Interrupts must be masked by the caller.
    ///
    /// # Panics
    /// If the thread is not on the blocked queue.
    pub(crate) fn unblock(&self, tid: ThreadId) {
        let thread = match self.blocked.lock().remove(tid) {
            Some(thread) => thread,
            None => panic!("{} is in a blocked state but not on the blocked queue", tid),
        };
        thread.set_state(ThreadState::Runnable);
        self.metrics.record_wakeup();
        log::trace!("{}: woken", tid);
        self.ready.lock().push_back(thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::SchedulerConfig;

    #[test]
    fn test_deschedule_then_make_runnable() {
        let kernel = testing::boot();
        let t = testing::start_process(&kernel, "init");

        let k = kernel.clone();
        kernel.hal().on_switch(move || {
            let thread = k.thread(t).unwrap();
            assert_eq!(thread.state(), ThreadState::Blocked);
            assert_eq!(k.blocked_ids(), vec![t]);
            // The gate is open again once the thread is queued.
            assert!(k.deschedule_gate.try_lock().is_some());

            k.make_runnable(t).unwrap();
            assert_eq!(thread.state(), ThreadState::Runnable);
            k.schedule(Target::Thread(t));
        });

        kernel.deschedule(|| false).unwrap();
        assert_eq!(kernel.current_thread().unwrap().id(), t);
        assert_eq!(kernel.thread(t).unwrap().state(), ThreadState::Running);
        assert_eq!(kernel.stats().wakeups, 1);
        testing::assert_queue_invariant(&kernel);
    }

    #[test]
    fn test_deschedule_rejected() {
        let kernel = testing::boot();
        let t = testing::start_process(&kernel, "init");
        let switches = kernel.stats().context_switches;

        kernel.deschedule(|| true).unwrap();

        assert_eq!(kernel.current_thread().unwrap().id(), t);
        assert_eq!(kernel.stats().context_switches, switches);
    }

    #[test]
    fn test_make_runnable_requires_blocked() {
        let kernel = testing::boot();
        let t = testing::start_process(&kernel, "init");
        assert_eq!(kernel.make_runnable(t), Err(ExecError::InvalidState));
        assert_eq!(
            kernel.make_runnable(ThreadId::from_raw(999)),
            Err(ExecError::ThreadNotFound)
        );
    }

    #[test]
    fn test_sleep_wakes_strictly_after_deadline() {
        let (kernel, _memory) =
            testing::boot_with(SchedulerConfig::new().with_schedule_interval(1000));
        let t = testing::start_process(&kernel, "init");

        let k = kernel.clone();
        kernel.hal().on_switch(move || {
            k.tick();
            k.tick();
            // start 0 + duration 2 is not yet < 2
            k.schedule(Target::Any);
            assert_eq!(k.thread(t).unwrap().state(), ThreadState::Sleeping);

            k.tick();
            k.schedule(Target::Any);
        });

        kernel.sleep(2).unwrap();
        assert_eq!(kernel.current_thread().unwrap().id(), t);
        assert_eq!(kernel.ticks(), 3);
        testing::assert_queue_invariant(&kernel);
    }

    #[test]
    fn test_sleep_arguments() {
        let kernel = testing::boot();
        testing::start_process(&kernel, "init");
        let switches = kernel.stats().context_switches;

        assert_eq!(kernel.sleep(-1), Err(ExecError::InvalidArgument));
        assert_eq!(kernel.sleep(0), Ok(()));
        assert_eq!(kernel.stats().context_switches, switches);
    }

    #[test]
    fn test_yield_to_specific_thread() {
        let kernel = testing::boot();
        let t = testing::start_process(&kernel, "init");
        let other = kernel.spawn_process(None, "init").unwrap();
        let other_t = kernel.process(other).unwrap().threads()[0].id();

        assert_eq!(kernel.yield_now(Some(t)), Ok(()));
        assert_eq!(
            kernel.yield_now(Some(ThreadId::from_raw(999))),
            Err(ExecError::ThreadNotFound)
        );

        kernel.yield_now(Some(other_t)).unwrap();
        assert_eq!(kernel.current_thread().unwrap().id(), other_t);
        assert_eq!(kernel.stats().voluntary_yields, 1);
        testing::assert_queue_invariant(&kernel);
    }

    #[test]
    fn test_idle_yield_without_switch_is_not_counted() {
        let kernel = testing::boot();
        kernel.yield_now(None).unwrap();

        assert!(kernel.current_thread().unwrap().is_idle());
        assert_eq!(kernel.stats().voluntary_yields, 0);
        assert_eq!(kernel.stats().context_switches, 0);
        testing::assert_queue_invariant(&kernel);
    }

    #[test]
    fn test_input_block_and_wake() {
        let kernel = testing::boot();
        let t = testing::start_process(&kernel, "init");

        let k = kernel.clone();
        kernel.hal().on_switch(move || {
            assert_eq!(k.thread(t).unwrap().state(), ThreadState::InputBlocked);
            assert_eq!(k.wake(t, BlockReason::Signal), Err(ExecError::InvalidState));
            k.wake(t, BlockReason::Input).unwrap();
            k.schedule(Target::Thread(t));
        });

        kernel.block_current(BlockReason::Input).unwrap();
        assert_eq!(kernel.current_thread().unwrap().id(), t);
        assert_eq!(
            kernel.block_current(BlockReason::Child),
            Err(ExecError::InvalidArgument)
        );
        testing::assert_queue_invariant(&kernel);
    }
}
