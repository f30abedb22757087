//! # Lifecycle Manager
//!
//! Process and thread creation, voluntary exit and reaping.
//!
//! ## Orphans
//!
//! A process never outlives its record. When a process exits, its children
//! (running or already exited) are re-parented to the reaper, and a process
//! whose parent is gone is handed to the reaper once it exits. Until a
//! reaper is spawned, exited orphans are parked and adopted by the reaper
//! when it arrives.

use crate::kernel::Kernel;
use crate::loader::build_address_space;
use crate::memory::AddressSpace;
use crate::process::{Process, ProcessState};
use crate::signals::Signal;
use crate::thread::{Thread, ThreadFlags, ThreadState};
use crate::{ExecError, ExecResult, ProcessId, Target, ThreadId};
use alloc::sync::Arc;
use kestrel_hal::{
    CpuAbstraction, HardwareAbstractionLayer, InterruptGuard, MmuAbstraction, UserRegisters,
};

impl<H: HardwareAbstractionLayer> Kernel<H> {
    // =========================================================================
    // Boot
    // =========================================================================

    /// Create the idle process and make its thread the running thread
    pub fn boot_idle(&self, image: &str) -> ExecResult<ThreadId> {
        if self.current_thread().is_some() {
            return Err(ExecError::AlreadyExists);
        }

        let (process, thread) = self.load_process(None, image)?;
        process.set_state(ProcessState::Idle);
        thread.set_flag(ThreadFlags::IDLE);
        thread.set_state(ThreadState::Running);

        if let Some(root) = process.address_space_root() {
            // SAFETY: provider-built root
            unsafe { self.hal.mmu().switch_address_space(root) };
        }
        if let Some(top) = thread.kernel_stack_top() {
            self.hal.cpu().set_kernel_stack(top);
        }

        *self.current.lock() = Some(thread.clone());
        *self.idle.write() = Some(process.clone());
        log::info!("boot: idle process {} running as {}", process.id(), thread.id());
        Ok(thread.id())
    }

    /// Create the reaper process and adopt every parked orphan
    ///
    /// An exited reaper is replaced; the new one adopts its predecessor.
    pub fn spawn_reaper(&self, image: &str) -> ExecResult<ProcessId> {
        if self.live_reaper().is_some() {
            return Err(ExecError::AlreadyExists);
        }

        let (process, thread) = self.load_process(None, image)?;
        thread.set_flag(ThreadFlags::REAPER);
        *self.reaper.write() = Some(process.clone());

        let _irq = InterruptGuard::new(self.hal.cpu());
        let parked = core::mem::take(&mut *self.orphans.lock());
        for orphan in parked {
            self.adopt(orphan);
        }
        self.ready.lock().push_back(thread);

        log::info!("boot: reaper process {}", process.id());
        Ok(process.id())
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Load `image` into a new process, linked as a child of `parent`
    ///
    /// The process's thread starts in `Init` on the ready queue.
    pub fn spawn_process(&self, parent: Option<ProcessId>, image: &str) -> ExecResult<ProcessId> {
        let parent = match parent {
            Some(pid) => Some(self.processes.get(pid).ok_or(ExecError::ProcessNotFound)?),
            None => None,
        };

        let (process, thread) = self.load_process(parent.as_ref(), image)?;
        if let Some(parent) = &parent {
            parent.add_child(process.clone());
        }
        self.enqueue_ready(thread);

        log::debug!(
            "spawn: {} ({}) parent {:?}",
            process.id(),
            process.name(),
            parent.as_ref().map(|p| p.id())
        );
        Ok(process.id())
    }

    /// Copy the running process; the child thread resumes with `regs` and a
    /// zero return value
    pub fn fork(&self, regs: &UserRegisters) -> ExecResult<ProcessId> {
        let (_thread, parent) = self.current_process()?;
        if parent.live_threads() > 1 {
            return Err(ExecError::InvalidState);
        }

        let pid = self.alloc_pid()?;
        let space = parent.with_address_space(|space| self.memory.duplicate(space))?;

        let mut child_regs = *regs;
        child_regs.set_return_value(0);
        let (child, thread) =
            self.start_process(pid, Some(&parent), parent.name(), space, child_regs)?;
        parent.add_child(child.clone());
        self.enqueue_ready(thread);

        log::debug!("fork: {} -> {}", parent.id(), child.id());
        Ok(child.id())
    }

    /// Start a peer thread in the running process
    ///
    /// The new thread resumes with `regs` and a zero return value; the
    /// caller gets the new thread's ID.
    pub fn thread_fork(&self, regs: &UserRegisters) -> ExecResult<ThreadId> {
        let (_thread, process) = self.current_process()?;

        let mut peer_regs = *regs;
        peer_regs.set_return_value(0);
        let peer = self.create_thread(&process, peer_regs)?;
        let id = peer.id();
        self.enqueue_ready(peer);

        log::debug!("thread_fork: {} gains {}", process.id(), id);
        Ok(id)
    }

    fn load_process(
        &self,
        parent: Option<&Arc<Process>>,
        image: &str,
    ) -> ExecResult<(Arc<Process>, Arc<Thread>)> {
        let pid = self.alloc_pid()?;
        let image = self.loader.load(image)?;
        let space = build_address_space(self.memory.as_ref(), self.loader.as_ref(), &image)?;
        self.start_process(pid, parent, &image.name, space, image.registers)
    }

    /// Register a process around `space` with one `Init` thread
    ///
    /// On failure nothing stays registered and `space` is destroyed.
    fn start_process(
        &self,
        pid: ProcessId,
        parent: Option<&Arc<Process>>,
        name: &str,
        space: AddressSpace,
        registers: UserRegisters,
    ) -> ExecResult<(Arc<Process>, Arc<Thread>)> {
        let process = Arc::new(Process::new(pid, name, parent, space));
        if let Err(err) = self.processes.register(process.clone()) {
            self.discard_process(process);
            return Err(err);
        }

        match self.create_thread(&process, registers) {
            Ok(thread) => Ok((process, thread)),
            Err(err) => {
                let _ = self.processes.unregister(pid);
                self.discard_process(process);
                Err(err)
            }
        }
    }

    /// Tear down a process that never ran
    fn discard_process(&self, process: Arc<Process>) {
        for thread in process.take_threads() {
            thread.set_state(ThreadState::Exited);
            self.release_thread(thread);
        }
        process.set_state(ProcessState::Exited);
        if let Some(space) = process.take_address_space() {
            self.memory.destroy(space);
        }
    }

    // =========================================================================
    // Exit
    // =========================================================================

    /// Record the running process's exit status
    pub fn set_status(&self, status: i32) -> ExecResult<()> {
        let (thread, process) = self.current_process()?;
        let _guard = thread.lock();
        process.set_return_state(status);
        Ok(())
    }

    /// Terminate the running thread
    ///
    /// If it is the last live thread of its process, the process exits too:
    /// exited peers are released, children go to the reaper, and one thread
    /// of the parent waiting in [`Kernel::wait`] is made runnable. Never
    /// returns to the caller on real hardware.
    ///
    /// # Panics
    /// If called by the idle thread.
    pub fn vanish(&self) {
        let thread = match self.current_thread() {
            Some(thread) => thread,
            None => panic!("vanish with no running thread"),
        };
        assert!(!thread.is_idle(), "the idle thread cannot vanish");
        let process = match thread.process() {
            Some(process) => process,
            None => panic!("{} has no process", thread.id()),
        };

        let irq = InterruptGuard::new(self.hal.cpu());
        let last = {
            let _guard = thread.lock();
            let last = process.live_threads() == 1;
            thread.set_state(ThreadState::Exited);
            last
        };
        self.unregister_alarm(&thread);
        log::debug!("vanish: {} of {} (last: {})", thread.id(), process.id(), last);

        if last {
            self.exit_process(&process, &thread);
        }

        drop(process);
        drop(thread);
        self.schedule(Target::Any);
        drop(irq);
    }

    fn exit_process(&self, process: &Arc<Process>, last: &Thread) {
        for peer in process.threads() {
            if peer.id() != last.id() {
                process.remove_thread(peer.id());
                self.release_thread(peer);
            }
        }

        process.set_state(ProcessState::Exited);
        let _ = self.processes.unregister(process.id());

        for child in process.take_children() {
            child.clear_parent();
            if child.state() == ProcessState::Exited {
                self.adopt(child);
            }
            // Live children are adopted when they exit.
            else if let Some(reaper) = self.live_reaper() {
                child.set_parent(&reaper);
                reaper.add_child(child);
            }
        }

        match process.parent() {
            Some(parent) if parent.state() != ProcessState::Exited => {
                self.notify_parent(&parent, Some(last.id()));
            }
            _ => self.adopt(process.clone()),
        }
    }

    fn live_reaper(&self) -> Option<Arc<Process>> {
        self.reaper
            .read()
            .clone()
            .filter(|r| r.state() != ProcessState::Exited)
    }

    /// Hand an exited, parentless process to the reaper
    fn adopt(&self, orphan: Arc<Process>) {
        let reaper = match self.live_reaper() {
            Some(reaper) if !Arc::ptr_eq(&reaper, &orphan) => reaper,
            _ => {
                log::warn!("{}: orphaned with no reaper, parking", orphan.id());
                self.orphans.lock().push(orphan);
                return;
            }
        };

        log::debug!("{}: adopted by reaper {}", orphan.id(), reaper.id());
        orphan.set_parent(&reaper);
        reaper.add_child(orphan);
        self.notify_parent(&reaper, None);
    }

    /// Wake one thread of `parent` waiting for a child
    fn notify_parent(&self, parent: &Process, sender: Option<ThreadId>) {
        let Some(waiter) = parent.find_thread(ThreadState::Waiting) else {
            return;
        };
        self.unblock(waiter.id());
        self.raise(&waiter, Signal::Child, sender);
    }

    // =========================================================================
    // Reaping
    // =========================================================================

    /// Reap one exited child of the running process
    ///
    /// Blocks until a child exits. Fails with [`ExecError::NoChildren`] when
    /// nothing is left to reap.
    pub fn wait(&self) -> ExecResult<(ProcessId, i32)> {
        let (thread, process) = self.current_process()?;
        if thread.is_idle() {
            return Err(ExecError::InvalidState);
        }

        loop {
            let irq = InterruptGuard::new(self.hal.cpu());
            if process.children_count() == 0 {
                return Err(ExecError::NoChildren);
            }

            if let Some(child) = process.take_exited_child() {
                let pid = child.id();
                let status = child.return_state();
                self.release_process(child);
                log::debug!("wait: {} reaped {} (status {})", process.id(), pid, status);
                return Ok((pid, status));
            }

            thread.set_state(ThreadState::Waiting);
            self.schedule(Target::Any);
            drop(irq);
        }
    }
}
