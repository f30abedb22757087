//! # Context Switching
//!
//! The handoff between two threads. Two cases:
//!
//! - steady state: the incoming thread was suspended inside an earlier
//!   switch, so its kernel context is resumed and that switch returns
//! - first run: the incoming thread is in `Init` and has no kernel context
//!   yet, so it enters user mode at its program entry with interrupts on
//!
//! Either way the incoming address space is activated and the privileged
//! stack pointer programmed before the register swap.

use crate::kernel::Kernel;
use crate::thread::{Thread, ThreadState};
use alloc::sync::Arc;
use kestrel_hal::{CpuAbstraction, HardwareAbstractionLayer, MmuAbstraction};

impl<H: HardwareAbstractionLayer> Kernel<H> {
    /// Suspend `outgoing` and run `incoming`
    ///
    /// The caller has filed `outgoing` on its queue (or left it unqueued if
    /// it exited) and holds interrupts masked. Returns when `outgoing` is
    /// dispatched again; an exited thread never returns here.
    pub(crate) fn switch_to(&self, outgoing: Arc<Thread>, incoming: Arc<Thread>) {
        let first_run = incoming.state() == ThreadState::Init;
        let stack_top = match incoming.kernel_stack_top() {
            Some(top) => top,
            None => panic!("{} dispatched without a kernel stack", incoming.id()),
        };
        let root = incoming.process().and_then(|p| p.address_space_root());
        let registers = incoming.registers();
        let from = outgoing.context_ptr();
        let to = incoming.context_ptr();

        incoming.set_state(ThreadState::Running);
        *self.current.lock() = Some(incoming.clone());
        self.settle_processes(&outgoing, &incoming);

        self.metrics.record_context_switch();
        if first_run {
            self.metrics.record_first_run();
        }

        if let Some(root) = root {
            // SAFETY: roots come from the address-space provider and map
            // the kernel.
            unsafe { self.hal.mmu().switch_address_space(root) };
        }
        self.hal.cpu().set_kernel_stack(stack_top);

        // Both threads stay reachable through `current`, a queue or their
        // process, so the raw contexts outlive the switch. Local references
        // are dropped because an exited thread never comes back to free them.
        drop(outgoing);
        drop(incoming);

        // SAFETY: interrupts are masked, both contexts are live, and `to`
        // was filled by an earlier switch unless this is a first run.
        unsafe {
            if first_run {
                self.hal.cpu().enter_user(from, &registers, stack_top);
            } else {
                self.hal.cpu().switch_context(from, to);
            }
        }
    }

    fn settle_processes(&self, outgoing: &Thread, incoming: &Thread) {
        let out = outgoing.process();
        let inc = incoming.process();
        if let Some(process) = &out {
            process.settle_state();
        }
        if let Some(process) = &inc {
            let same = out.as_ref().is_some_and(|o| Arc::ptr_eq(o, process));
            if !same {
                process.settle_state();
            }
        }
    }
}
