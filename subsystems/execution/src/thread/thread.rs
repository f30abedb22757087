//! # Thread Structure
//!
//! The thread control block.

use super::ThreadState;
use crate::process::Process;
use crate::scheduler::queue::QueueTag;
use crate::signals::SignalState;
use crate::timer::{AlarmKind, AlarmTimer};
use crate::{ExecError, ExecResult, ProcessId, ThreadId};
use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use kestrel_hal::{KernelContext, UserRegisters, VirtAddr};
use spin::{Mutex, MutexGuard, RwLock};

/// Thread flags
pub mod flags {
    use bitflags::bitflags;

    bitflags! {
        /// Thread flags
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct ThreadFlags: u32 {
            /// Thread is the idle thread
            const IDLE = 1 << 0;
            /// Thread belongs to the reaper process
            const REAPER = 1 << 1;
            /// Thread is running a signal handler
            const IN_SIGNAL = 1 << 2;
        }
    }
}

pub use flags::ThreadFlags;

/// Thread structure
pub struct Thread {
    /// Unique identifier
    id: ThreadId,
    /// Owning process (non-owning back-reference)
    process: Weak<Process>,
    /// Owning process ID, valid after the process is gone
    pid: ProcessId,
    /// Current state
    state: AtomicU32,
    /// Flags
    flags: RwLock<ThreadFlags>,
    /// Per-thread guard for state/status updates
    guard: Mutex<()>,
    /// Saved kernel context, written only by the context switch
    context: UnsafeCell<KernelContext>,
    /// User register snapshot used for the first run
    registers: Mutex<UserRegisters>,
    /// Kernel stack, `None` once released
    kernel_stack: Mutex<Option<KernelStack>>,
    /// Queue currently holding this thread
    queue: AtomicU8,
    /// Sleep start tick and duration
    sleep: Mutex<(u64, u64)>,
    /// Virtual and real alarm timers
    alarms: Mutex<Alarms>,
    /// Registered in the kernel alarm list
    in_alarm_list: AtomicBool,
    /// Pending signals and mask
    signals: Mutex<SignalState>,
}

// SAFETY: `context` is only read and written by the context switch, which
// runs with interrupts masked on a single core.
unsafe impl Sync for Thread {}

#[derive(Debug, Default)]
struct Alarms {
    virtual_timer: AlarmTimer,
    real_timer: AlarmTimer,
}

impl Alarms {
    fn get_mut(&mut self, kind: AlarmKind) -> &mut AlarmTimer {
        match kind {
            AlarmKind::Virtual => &mut self.virtual_timer,
            AlarmKind::Real => &mut self.real_timer,
        }
    }
}

impl Thread {
    /// Create a new thread in `Init` with a fresh kernel stack
    pub fn new(
        id: ThreadId,
        process: &Arc<Process>,
        registers: UserRegisters,
        stack_size: usize,
    ) -> ExecResult<Self> {
        let kernel_stack = KernelStack::allocate(stack_size)?;

        Ok(Self {
            id,
            process: Arc::downgrade(process),
            pid: process.id(),
            state: AtomicU32::new(ThreadState::Init as u32),
            flags: RwLock::new(ThreadFlags::empty()),
            guard: Mutex::new(()),
            context: UnsafeCell::new(KernelContext::default()),
            registers: Mutex::new(registers),
            kernel_stack: Mutex::new(Some(kernel_stack)),
            queue: AtomicU8::new(QueueTag::None as u8),
            sleep: Mutex::new((0, 0)),
            alarms: Mutex::new(Alarms::default()),
            in_alarm_list: AtomicBool::new(false),
            signals: Mutex::new(SignalState::default()),
        })
    }

    /// Get thread ID
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Get owning process ID
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Get owning process, if still alive
    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.upgrade()
    }

    /// Get current state
    pub fn state(&self) -> ThreadState {
        let val = self.state.load(Ordering::SeqCst);
        ThreadState::from_u32(val).unwrap_or(ThreadState::Exited)
    }

    /// Set thread state
    pub fn set_state(&self, state: ThreadState) {
        self.state.store(state.as_u32(), Ordering::SeqCst);
    }

    /// Get flags
    pub fn flags(&self) -> ThreadFlags {
        *self.flags.read()
    }

    /// Set a flag
    pub fn set_flag(&self, flag: ThreadFlags) {
        self.flags.write().insert(flag);
    }

    /// Clear a flag
    pub fn clear_flag(&self, flag: ThreadFlags) {
        self.flags.write().remove(flag);
    }

    /// Check if this is the idle thread
    pub fn is_idle(&self) -> bool {
        self.flags.read().contains(ThreadFlags::IDLE)
    }

    /// Take the per-thread guard
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock()
    }

    /// Snapshot of the user registers
    pub fn registers(&self) -> UserRegisters {
        *self.registers.lock()
    }

    /// Get kernel stack top, `None` once released
    pub fn kernel_stack_top(&self) -> Option<VirtAddr> {
        self.kernel_stack.lock().as_ref().map(KernelStack::top)
    }

    /// Pointer to the saved kernel context
    pub(crate) fn context_ptr(&self) -> *mut KernelContext {
        self.context.get()
    }

    /// Free the kernel stack
    pub(crate) fn release_kernel_stack(&self) -> Option<KernelStack> {
        self.kernel_stack.lock().take()
    }

    /// Queue currently holding this thread
    pub fn queue_tag(&self) -> QueueTag {
        QueueTag::from_u8(self.queue.load(Ordering::SeqCst))
    }

    pub(crate) fn set_queue_tag(&self, tag: QueueTag) {
        self.queue.store(tag as u8, Ordering::SeqCst);
    }

    /// Record a sleep starting at tick `now`
    pub fn start_sleep(&self, now: u64, duration: u64) {
        *self.sleep.lock() = (now, duration);
    }

    /// Whether the sleep deadline has passed at tick `now`
    pub fn sleep_expired(&self, now: u64) -> bool {
        let (start, duration) = *self.sleep.lock();
        start.saturating_add(duration) < now
    }

    /// Arm (or, with period 0, disarm) an alarm; returns the old period
    pub fn arm_alarm(&self, kind: AlarmKind, period: u64) -> u64 {
        self.alarms.lock().get_mut(kind).arm(period)
    }

    /// Count one tick on an alarm; true when it expires
    pub fn advance_alarm(&self, kind: AlarmKind) -> bool {
        self.alarms.lock().get_mut(kind).advance()
    }

    /// Whether the thread is in the kernel alarm list
    pub fn in_alarm_list(&self) -> bool {
        self.in_alarm_list.load(Ordering::SeqCst)
    }

    pub(crate) fn set_in_alarm_list(&self, listed: bool) {
        self.in_alarm_list.store(listed, Ordering::SeqCst);
    }

    /// Lock the pending-signal state
    pub fn signals(&self) -> MutexGuard<'_, SignalState> {
        self.signals.lock()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .field("queue", &self.queue_tag())
            .finish()
    }
}

/// Kernel stack
pub struct KernelStack {
    memory: Box<[u8]>,
}

impl KernelStack {
    /// Allocate a zeroed kernel stack
    pub fn allocate(size: usize) -> ExecResult<Self> {
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(size)
            .map_err(|_| ExecError::OutOfResources)?;
        memory.resize(size, 0u8);

        Ok(Self {
            memory: memory.into_boxed_slice(),
        })
    }

    /// Get stack base (lowest address)
    pub fn base(&self) -> VirtAddr {
        VirtAddr::from_ptr(self.memory.as_ptr())
    }

    /// Get stack top (highest address, 16-byte aligned)
    pub fn top(&self) -> VirtAddr {
        self.base().add(self.size() as u64).align_down(16)
    }

    /// Get stack size
    pub fn size(&self) -> usize {
        self.memory.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_hal::PhysAddr;

    fn process() -> Arc<Process> {
        Arc::new(Process::new(
            ProcessId::from_raw(1),
            "test",
            None,
            crate::memory::AddressSpace::new(PhysAddr::new(0x1000)),
        ))
    }

    #[test]
    fn test_new_thread_defaults() {
        let process = process();
        let thread = Thread::new(ThreadId::from_raw(5), &process, UserRegisters::default(), 4096).unwrap();

        assert_eq!(thread.state(), ThreadState::Init);
        assert_eq!(thread.queue_tag(), QueueTag::None);
        assert_eq!(thread.pid(), process.id());
        assert!(!thread.in_alarm_list());
        assert!(Arc::ptr_eq(&thread.process().unwrap(), &process));
    }

    #[test]
    fn test_kernel_stack_bounds() {
        let stack = KernelStack::allocate(4096).unwrap();
        assert_eq!(stack.size(), 4096);
        assert!(stack.top().is_aligned(16));
        assert!(stack.top() > stack.base());
        assert!(stack.top().as_u64() - stack.base().as_u64() <= 4096);
    }

    #[test]
    fn test_kernel_stack_exhaustion() {
        assert!(matches!(
            KernelStack::allocate(usize::MAX),
            Err(ExecError::OutOfResources)
        ));
    }

    #[test]
    fn test_release_kernel_stack() {
        let process = process();
        let thread = Thread::new(ThreadId::from_raw(1), &process, UserRegisters::default(), 1024).unwrap();
        assert!(thread.kernel_stack_top().is_some());
        assert!(thread.release_kernel_stack().is_some());
        assert!(thread.kernel_stack_top().is_none());
    }

    #[test]
    fn test_sleep_deadline_is_strict() {
        let process = process();
        let thread = Thread::new(ThreadId::from_raw(1), &process, UserRegisters::default(), 1024).unwrap();
        thread.start_sleep(10, 5);
        assert!(!thread.sleep_expired(15));
        assert!(thread.sleep_expired(16));
    }
}
