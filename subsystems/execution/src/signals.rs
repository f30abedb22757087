//! # Signals
//!
//! Pending-signal bookkeeping and the delivery hook run when a thread
//! resumes. Handler installation and user-stack frame construction belong
//! to the embedding kernel, behind [`SignalDelivery`].

use crate::kernel::Kernel;
use crate::thread::{BlockReason, Thread, ThreadFlags, ThreadState};
use crate::{ExecError, ExecResult, ThreadId};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use bitflags::bitflags;
use kestrel_hal::{HardwareAbstractionLayer, InterruptGuard};

/// Signal kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Real-time alarm expired
    Alarm,
    /// Virtual (run-time) alarm expired
    VirtualAlarm,
    /// A child process exited
    Child,
    /// User-defined
    User1,
    /// User-defined
    User2,
    /// Termination request
    Terminate,
}

impl Signal {
    /// Mask bit for this signal
    pub fn bit(self) -> SignalSet {
        match self {
            Signal::Alarm => SignalSet::ALARM,
            Signal::VirtualAlarm => SignalSet::VIRTUAL_ALARM,
            Signal::Child => SignalSet::CHILD,
            Signal::User1 => SignalSet::USER1,
            Signal::User2 => SignalSet::USER2,
            Signal::Terminate => SignalSet::TERMINATE,
        }
    }
}

bitflags! {
    /// Set of signals (used as a mask: a set bit blocks delivery)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SignalSet: u32 {
        /// Real-time alarm
        const ALARM = 1 << 0;
        /// Virtual alarm
        const VIRTUAL_ALARM = 1 << 1;
        /// Child exited
        const CHILD = 1 << 2;
        /// User-defined 1
        const USER1 = 1 << 3;
        /// User-defined 2
        const USER2 = 1 << 4;
        /// Termination request
        const TERMINATE = 1 << 5;
    }
}

/// A signal waiting for delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSignal {
    /// What was raised
    pub signal: Signal,
    /// Raising thread, `None` for the kernel (alarms)
    pub sender: Option<ThreadId>,
}

/// Per-thread pending collection and mask
#[derive(Debug, Default)]
pub struct SignalState {
    pending: VecDeque<PendingSignal>,
    mask: SignalSet,
}

impl SignalState {
    /// Queue a signal
    pub fn post(&mut self, pending: PendingSignal) {
        self.pending.push_back(pending);
    }

    /// Remove the oldest signal the mask lets through
    pub fn take_deliverable(&mut self) -> Option<PendingSignal> {
        let pos = self
            .pending
            .iter()
            .position(|p| !self.mask.contains(p.signal.bit()))?;
        self.pending.remove(pos)
    }

    /// Whether any pending signal is not masked
    pub fn has_deliverable(&self) -> bool {
        self.pending.iter().any(|p| !self.mask.contains(p.signal.bit()))
    }

    /// Count pending signals of one kind
    pub fn count(&self, signal: Signal) -> usize {
        self.pending.iter().filter(|p| p.signal == signal).count()
    }

    /// Current mask
    pub fn mask(&self) -> SignalSet {
        self.mask
    }

    /// Replace the mask, returning the old one
    pub fn set_mask(&mut self, mask: SignalSet) -> SignalSet {
        core::mem::replace(&mut self.mask, mask)
    }
}

/// Delivery hook invoked for each deliverable signal of a resumed thread
///
/// Returning must leave `thread` able to continue where it was suspended.
pub trait SignalDelivery: Send + Sync {
    /// Deliver one signal
    fn deliver(&self, thread: &Arc<Thread>, signal: PendingSignal);
}

impl<H: HardwareAbstractionLayer> Kernel<H> {
    /// Install the delivery hook
    pub fn set_signal_handler(&self, handler: Arc<dyn SignalDelivery>) {
        *self.signal_handler.write() = Some(handler);
    }

    /// Raise `signal` on thread `tid` on behalf of the current thread
    pub fn send_signal(&self, tid: ThreadId, signal: Signal) -> ExecResult<()> {
        let target = self.threads.get(tid).ok_or(ExecError::ThreadNotFound)?;
        if target.state().is_exited() {
            return Err(ExecError::InvalidState);
        }
        let sender = self.current_thread().map(|t| t.id());
        let _irq = InterruptGuard::new(self.hal.cpu());
        self.raise(&target, signal, sender);
        Ok(())
    }

    /// Replace the current thread's mask, returning the old one
    pub fn set_signal_mask(&self, mask: SignalSet) -> ExecResult<SignalSet> {
        let thread = self.current()?;
        let old = thread.signals().set_mask(mask);
        Ok(old)
    }

    /// Block until a deliverable signal is pending
    pub fn await_signal(&self) -> ExecResult<()> {
        let thread = self.current()?;
        if thread.is_idle() {
            return Err(ExecError::InvalidState);
        }

        let irq = InterruptGuard::new(self.hal.cpu());
        if thread.signals().has_deliverable() {
            return Ok(());
        }
        thread.set_state(ThreadState::SignalBlocked);
        drop(thread);
        self.schedule(crate::Target::Any);
        drop(irq);
        Ok(())
    }

    /// Post a signal and wake the target if it is waiting for one
    ///
    /// Interrupts must be masked by the caller.
    pub(crate) fn raise(&self, thread: &Arc<Thread>, signal: Signal, sender: Option<ThreadId>) {
        let wake = {
            let mut signals = thread.signals();
            signals.post(PendingSignal { signal, sender });
            !signals.mask().contains(signal.bit())
        };
        log::trace!("signal {:?} raised on {}", signal, thread.id());

        if wake && thread.state() == ThreadState::SignalBlocked {
            // Only fails if the state changed underneath, which masked
            // interrupts rule out.
            let _ = self.wake(thread.id(), BlockReason::Signal);
        }
    }

    /// Run the delivery hook for every deliverable signal of the running thread
    pub(crate) fn deliver_pending_signals(&self) {
        let Some(thread) = self.current_thread() else {
            return;
        };
        let handler = self.signal_handler.read().clone();

        loop {
            let next = thread.signals().take_deliverable();
            let Some(pending) = next else {
                break;
            };
            match &handler {
                Some(handler) => {
                    thread.set_flag(ThreadFlags::IN_SIGNAL);
                    handler.deliver(&thread, pending);
                    thread.clear_flag(ThreadFlags::IN_SIGNAL);
                    self.metrics.record_signal_delivered();
                }
                None => log::warn!(
                    "{}: no signal handler installed, dropping {:?}",
                    thread.id(),
                    pending.signal
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::Target;
    use alloc::vec::Vec;
    use spin::Mutex;

    struct Recorder {
        seen: Mutex<Vec<(ThreadId, Signal)>>,
    }

    impl SignalDelivery for Recorder {
        fn deliver(&self, thread: &Arc<Thread>, signal: PendingSignal) {
            assert!(thread.flags().contains(ThreadFlags::IN_SIGNAL));
            self.seen.lock().push((thread.id(), signal.signal));
        }
    }

    #[test]
    fn test_mask_holds_signals_back() {
        let mut state = SignalState::default();
        state.set_mask(SignalSet::USER1);
        state.post(PendingSignal { signal: Signal::User1, sender: None });
        assert!(!state.has_deliverable());

        state.post(PendingSignal { signal: Signal::User2, sender: None });
        assert_eq!(state.take_deliverable().map(|p| p.signal), Some(Signal::User2));
        assert_eq!(state.take_deliverable(), None);
        assert_eq!(state.count(Signal::User1), 1);

        assert_eq!(state.set_mask(SignalSet::empty()), SignalSet::USER1);
        assert_eq!(state.take_deliverable().map(|p| p.signal), Some(Signal::User1));
    }

    #[test]
    fn test_signals_delivered_after_resume() {
        let kernel = testing::boot();
        let t = testing::start_process(&kernel, "init");
        let recorder = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
        kernel.set_signal_handler(recorder.clone());

        kernel.send_signal(t, Signal::User1).unwrap();
        assert!(recorder.seen.lock().is_empty());

        // Switch away and back; delivery happens on the way back.
        let k = kernel.clone();
        kernel.hal().on_switch(move || k.schedule(Target::Thread(t)));
        kernel.schedule(Target::Any);

        assert_eq!(*recorder.seen.lock(), vec![(t, Signal::User1)]);
        assert_eq!(kernel.stats().signals_delivered, 1);
        assert!(!kernel.thread(t).unwrap().flags().contains(ThreadFlags::IN_SIGNAL));
    }

    #[test]
    fn test_await_signal_blocks_until_raised() {
        let kernel = testing::boot();
        let t = testing::start_process(&kernel, "init");

        let k = kernel.clone();
        kernel.hal().on_switch(move || {
            let waiter = k.thread(t).unwrap();
            assert_eq!(waiter.state(), ThreadState::SignalBlocked);
            assert!(k.blocked_ids().contains(&t));

            k.send_signal(t, Signal::User2).unwrap();
            assert_eq!(waiter.state(), ThreadState::Runnable);
            k.schedule(Target::Thread(t));
        });
        kernel.await_signal().unwrap();

        assert_eq!(kernel.current_thread().unwrap().id(), t);
    }

    #[test]
    fn test_await_signal_returns_when_already_pending() {
        let kernel = testing::boot();
        let t = testing::start_process(&kernel, "init");
        kernel.send_signal(t, Signal::Terminate).unwrap();

        let switches = kernel.stats().context_switches;
        kernel.await_signal().unwrap();
        assert_eq!(kernel.stats().context_switches, switches);
    }

    #[test]
    fn test_masked_signal_does_not_wake() {
        let kernel = testing::boot();
        let t = testing::start_process(&kernel, "init");
        kernel.set_signal_mask(SignalSet::USER1).unwrap();

        let k = kernel.clone();
        kernel.hal().on_switch(move || {
            k.send_signal(t, Signal::User1).unwrap();
            assert_eq!(k.thread(t).unwrap().state(), ThreadState::SignalBlocked);
            k.send_signal(t, Signal::User2).unwrap();
            k.schedule(Target::Thread(t));
        });
        kernel.await_signal().unwrap();
        assert_eq!(kernel.thread(t).unwrap().signals().count(Signal::User1), 1);
    }

    #[test]
    fn test_set_signal_mask_returns_previous() {
        let kernel = testing::boot();
        let t = testing::start_process(&kernel, "init");

        assert_eq!(kernel.set_signal_mask(SignalSet::CHILD), Ok(SignalSet::empty()));
        assert_eq!(
            kernel.set_signal_mask(SignalSet::ALARM | SignalSet::USER2),
            Ok(SignalSet::CHILD)
        );
        assert_eq!(
            kernel.thread(t).unwrap().signals().mask(),
            SignalSet::ALARM | SignalSet::USER2
        );
    }

    #[test]
    fn test_send_signal_unknown_thread() {
        let kernel = testing::boot();
        assert_eq!(
            kernel.send_signal(ThreadId::from_raw(999), Signal::User1),
            Err(ExecError::ThreadNotFound)
        );
    }
}
