//! # Kernel Scheduler State
//!
//! [`Kernel`] owns every piece of scheduler state: the running-thread
//! pointer, the ready and blocked queues, the alarm list, both control-block
//! registries and the collaborators. Operations live next to the component
//! they belong to (`scheduler`, `context`, `timer`, `lifecycle`, `signals`)
//! as further `impl Kernel` blocks.
//!
//! ## Locking
//!
//! Single core. Every queue or registry mutation runs with interrupts
//! masked through an [`InterruptGuard`](kestrel_hal::InterruptGuard), so the
//! tick handler never observes a half-moved thread. A per-thread guard is
//! always taken before a global queue lock, and no spin lock is held across
//! a context switch.

use crate::config::SchedulerConfig;
use crate::loader::ImageLoader;
use crate::memory::AddressSpaceProvider;
use crate::process::{Process, ProcessRegistry, ProcessState};
use crate::scheduler::metrics::{SchedulerMetrics, SchedulerStats};
use crate::scheduler::queue::{QueueTag, ThreadQueue};
use crate::signals::SignalDelivery;
use crate::thread::{Thread, ThreadRegistry, ThreadState};
use crate::{ExecError, ExecResult, ProcessId, ThreadId};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use kestrel_hal::{HardwareAbstractionLayer, UserRegisters};
use spin::{Mutex, RwLock};

/// Scheduler and lifecycle state for one processor
pub struct Kernel<H: HardwareAbstractionLayer> {
    pub(crate) hal: H,
    pub(crate) config: SchedulerConfig,
    pub(crate) memory: Arc<dyn AddressSpaceProvider>,
    pub(crate) loader: Arc<dyn ImageLoader>,

    /// Thread executing right now
    pub(crate) current: Mutex<Option<Arc<Thread>>>,
    pub(crate) ready: Mutex<ThreadQueue>,
    pub(crate) blocked: Mutex<ThreadQueue>,
    /// Threads with a real-time alarm armed
    pub(crate) alarm_list: Mutex<Vec<Arc<Thread>>>,
    pub(crate) threads: ThreadRegistry,
    pub(crate) processes: ProcessRegistry,
    /// Brackets the deschedule/make-runnable pair
    pub(crate) deschedule_gate: Mutex<()>,

    next_tid: AtomicU32,
    next_pid: AtomicU32,
    pub(crate) ticks: AtomicU64,
    pub(crate) metrics: SchedulerMetrics,

    pub(crate) idle: RwLock<Option<Arc<Process>>>,
    pub(crate) reaper: RwLock<Option<Arc<Process>>>,
    /// Exited orphans waiting for a reaper to be spawned
    pub(crate) orphans: Mutex<Vec<Arc<Process>>>,
    pub(crate) signal_handler: RwLock<Option<Arc<dyn SignalDelivery>>>,
}

impl<H: HardwareAbstractionLayer> Kernel<H> {
    /// Create the scheduler state; nothing runs until [`Kernel::boot_idle`]
    pub fn new(
        hal: H,
        memory: Arc<dyn AddressSpaceProvider>,
        loader: Arc<dyn ImageLoader>,
        config: SchedulerConfig,
    ) -> ExecResult<Self> {
        config.validate()?;
        log::info!(
            "execution: {} backend, reschedule every {} ticks, {} byte kernel stacks",
            hal.arch_name(),
            config.schedule_interval,
            config.kernel_stack_size
        );

        Ok(Self {
            hal,
            config,
            memory,
            loader,
            current: Mutex::new(None),
            ready: Mutex::new(ThreadQueue::new(QueueTag::Ready)),
            blocked: Mutex::new(ThreadQueue::new(QueueTag::Blocked)),
            alarm_list: Mutex::new(Vec::new()),
            threads: ThreadRegistry::new(),
            processes: ProcessRegistry::new(),
            deschedule_gate: Mutex::new(()),
            next_tid: AtomicU32::new(1),
            next_pid: AtomicU32::new(1),
            ticks: AtomicU64::new(0),
            metrics: SchedulerMetrics::new(),
            idle: RwLock::new(None),
            reaper: RwLock::new(None),
            orphans: Mutex::new(Vec::new()),
            signal_handler: RwLock::new(None),
        })
    }

    /// Get the HAL
    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// Get the configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Thread executing right now
    pub fn current_thread(&self) -> Option<Arc<Thread>> {
        self.current.lock().clone()
    }

    pub(crate) fn current(&self) -> ExecResult<Arc<Thread>> {
        self.current_thread().ok_or(ExecError::InvalidState)
    }

    pub(crate) fn current_process(&self) -> ExecResult<(Arc<Thread>, Arc<Process>)> {
        let thread = self.current()?;
        let process = thread.process().ok_or(ExecError::ProcessNotFound)?;
        Ok((thread, process))
    }

    /// ID of the running thread
    pub fn gettid(&self) -> ExecResult<ThreadId> {
        self.current().map(|t| t.id())
    }

    /// Ticks since boot
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Look up a thread control block
    pub fn thread(&self, id: ThreadId) -> Option<Arc<Thread>> {
        self.threads.get(id)
    }

    /// Look up a live process
    pub fn process(&self, id: ProcessId) -> Option<Arc<Process>> {
        self.processes.get(id)
    }

    /// The idle process
    pub fn idle_process(&self) -> Option<Arc<Process>> {
        self.idle.read().clone()
    }

    /// The reaper process
    pub fn reaper_process(&self) -> Option<Arc<Process>> {
        self.reaper.read().clone()
    }

    /// Ready queue contents, head first
    pub fn ready_ids(&self) -> Vec<ThreadId> {
        self.ready.lock().ids()
    }

    /// Blocked queue contents, head first
    pub fn blocked_ids(&self) -> Vec<ThreadId> {
        self.blocked.lock().ids()
    }

    /// Snapshot of the scheduler counters
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            context_switches: self.metrics.context_switches(),
            first_runs: self.metrics.first_runs(),
            ticks: self.metrics.ticks(),
            preemptions: self.metrics.preemptions(),
            voluntary_yields: self.metrics.voluntary_yields(),
            wakeups: self.metrics.wakeups(),
            signals_delivered: self.metrics.signals_delivered(),
            ready_threads: self.ready.lock().len(),
            blocked_threads: self.blocked.lock().len(),
            threads: self.threads.count(),
            processes: self.processes.count(),
        }
    }

    // =========================================================================
    // Control block allocation
    // =========================================================================

    pub(crate) fn alloc_pid(&self) -> ExecResult<ProcessId> {
        if self.processes.count() >= self.config.max_processes {
            return Err(ExecError::OutOfResources);
        }
        Ok(ProcessId::from_raw(self.next_pid.fetch_add(1, Ordering::SeqCst)))
    }

    fn alloc_tid(&self) -> ExecResult<ThreadId> {
        if self.threads.count() >= self.config.max_threads {
            return Err(ExecError::OutOfResources);
        }
        Ok(ThreadId::from_raw(self.next_tid.fetch_add(1, Ordering::SeqCst)))
    }

    /// Allocate a thread in `Init` and link it into `process`
    ///
    /// The thread is on no queue yet.
    pub(crate) fn create_thread(
        &self,
        process: &Arc<Process>,
        registers: UserRegisters,
    ) -> ExecResult<Arc<Thread>> {
        let id = self.alloc_tid()?;
        let thread = Arc::new(Thread::new(
            id,
            process,
            registers,
            self.config.kernel_stack_size,
        )?);
        self.threads.register(thread.clone())?;
        process.add_thread(thread.clone());
        Ok(thread)
    }

    /// Put a thread on the ready queue
    pub(crate) fn enqueue_ready(&self, thread: Arc<Thread>) {
        let _irq = kestrel_hal::InterruptGuard::new(self.hal.cpu());
        self.ready.lock().push_back(thread);
    }

    // =========================================================================
    // Destruction
    // =========================================================================

    /// Free a thread control block
    ///
    /// # Panics
    /// If the thread is still linked anywhere.
    pub(crate) fn release_thread(&self, thread: Arc<Thread>) {
        let id = thread.id();
        assert_eq!(thread.state(), ThreadState::Exited, "{} released while live", id);
        assert_eq!(thread.queue_tag(), QueueTag::None, "{} released while queued", id);
        assert!(!thread.in_alarm_list(), "{} released while in the alarm list", id);
        if let Some(process) = thread.process() {
            assert!(!process.has_thread(id), "{} released while linked to {}", id, process.id());
        }

        // Not registered when rolling back a half-built thread.
        let _ = self.threads.unregister(id);
        drop(thread.release_kernel_stack());
        log::trace!("{}: released", id);
    }

    /// Free a process control block, its threads and its address space
    ///
    /// # Panics
    /// If the process has live threads, unreaped children, or is still
    /// registered.
    pub(crate) fn release_process(&self, process: Arc<Process>) {
        let id = process.id();
        assert_eq!(process.state(), ProcessState::Exited, "{} released while live", id);
        assert_eq!(process.children_count(), 0, "{} released with unreaped children", id);
        assert!(self.processes.get(id).is_none(), "{} released while registered", id);

        for thread in process.take_threads() {
            self.release_thread(thread);
        }
        if let Some(space) = process.take_address_space() {
            self.memory.destroy(space);
        }
        log::trace!("{}: released", id);
    }
}
