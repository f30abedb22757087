//! # Scheduler / Dispatcher
//!
//! Strict FIFO admission: `schedule(Target::Any)` runs the head of the
//! ready queue, `schedule(Target::Thread(id))` pulls a named thread out of
//! it. The outgoing thread is filed according to its state, then the
//! context switch hands the processor over.

pub mod blocking;
pub mod metrics;
pub mod queue;

use crate::kernel::Kernel;
use crate::thread::ThreadState;
use crate::ThreadId;
use kestrel_hal::{HardwareAbstractionLayer, InterruptGuard};
use spin::MutexGuard;

/// Which thread `schedule` should run next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Head of the ready queue
    Any,
    /// A specific thread, which must be on the ready queue
    Thread(ThreadId),
}

impl<H: HardwareAbstractionLayer> Kernel<H> {
    /// Pick the next thread and switch to it
    ///
    /// Returns once the calling thread is dispatched again.
    ///
    /// # Panics
    /// If `target` names a thread that is not on the ready queue, or the
    /// ready queue is empty while a thread other than idle is running.
    pub fn schedule(&self, target: Target) {
        self.schedule_with(target, None);
    }

    /// [`Kernel::schedule`], releasing `gate` once a blocked outgoing
    /// thread is on the blocked queue
    ///
    /// Returns false when idle kept the processor without a switch.
    pub(crate) fn schedule_with(
        &self,
        target: Target,
        gate: Option<MutexGuard<'_, ()>>,
    ) -> bool {
        let irq = InterruptGuard::new(self.hal.cpu());
        self.wake_sleepers();

        let outgoing = match self.current_thread() {
            Some(thread) => thread,
            None => panic!("schedule before boot: no running thread"),
        };

        let incoming = {
            let mut ready = self.ready.lock();
            if outgoing.is_idle() && ready.is_empty() {
                return false;
            }
            match target {
                Target::Any => ready.pop_front(),
                Target::Thread(id) => ready.remove(id),
            }
        };
        let incoming = match incoming {
            Some(thread) => thread,
            None => panic!(
                "schedule({:?}) from {}: no such thread on the ready queue",
                target,
                outgoing.id()
            ),
        };

        match outgoing.state() {
            ThreadState::Exited => {}
            ThreadState::Blocked
            | ThreadState::Waiting
            | ThreadState::InputBlocked
            | ThreadState::Sleeping
            | ThreadState::SignalBlocked => {
                self.blocked.lock().push_back(outgoing.clone());
            }
            _ => {
                outgoing.set_state(ThreadState::Runnable);
                self.ready.lock().push_back(outgoing.clone());
            }
        }
        // A waker holding the gate now finds the thread on the blocked queue.
        drop(gate);

        log::trace!("dispatch {} -> {}", outgoing.id(), incoming.id());
        self.switch_to(outgoing, incoming);

        self.deliver_pending_signals();
        drop(irq);
        true
    }

    /// Move every sleeper whose deadline has passed to the ready queue
    fn wake_sleepers(&self) {
        let now = self.ticks();
        let woken = self
            .blocked
            .lock()
            .drain_where(|t| t.state() == ThreadState::Sleeping && t.sleep_expired(now));
        if woken.is_empty() {
            return;
        }

        let mut ready = self.ready.lock();
        for thread in woken {
            log::trace!("{}: sleep over at tick {}", thread.id(), now);
            thread.set_state(ThreadState::Runnable);
            self.metrics.record_wakeup();
            ready.push_back(thread);
        }
    }
}
