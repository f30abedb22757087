//! # Stub HAL
//!
//! A hosted stand-in for real hardware. Every call the execution core makes
//! is appended to a shared [`HalEvent`] log, so the ordering contract of a
//! context switch can be checked from a test.
//!
//! A stub cannot really suspend the caller. Instead, each switch pops the
//! next queued switch hook (if any) and runs it before returning: the hook
//! plays the part of "everything the rest of the system does until the
//! outgoing thread is resumed". With no hook queued the switch returns at
//! once, as if the outgoing thread were resumed immediately.

use crate::cpu::{CpuAbstraction, KernelContext, UserRegisters};
use crate::mmu::MmuAbstraction;
use crate::{HardwareAbstractionLayer, PhysAddr, VirtAddr};
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;

/// Architecture name constant
pub const ARCH_NAME: &str = "stub";

/// One recorded hardware interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalEvent {
    /// Address space activated
    AddressSpace(PhysAddr),
    /// Privileged stack pointer programmed
    KernelStack(VirtAddr),
    /// Kernel context swap
    Switch,
    /// First-run transfer to user mode at this instruction pointer
    EnterUser(VirtAddr),
}

/// Work run in place of the suspended thread during a switch
pub type SwitchHook = Box<dyn FnOnce() + Send>;

type EventLog = Arc<Mutex<Vec<HalEvent>>>;

/// Stub HAL
pub struct StubHal {
    cpu: StubCpu,
    mmu: StubMmu,
}

impl StubHal {
    /// Create a new stub HAL instance with interrupts enabled
    pub fn new() -> Self {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let cpu = StubCpu::with_log(log.clone());
        // SAFETY: stub
        unsafe { cpu.enable_interrupts() };
        Self {
            cpu,
            mmu: StubMmu::with_log(log),
        }
    }

    /// Queue a hook for the next switch that finds none queued ahead of it
    pub fn on_switch(&self, hook: impl FnOnce() + Send + 'static) {
        self.cpu.hooks.lock().push_back(Box::new(hook));
    }

    /// Snapshot of every recorded event
    pub fn events(&self) -> Vec<HalEvent> {
        self.cpu.log.lock().clone()
    }

    /// Drop the recorded events
    pub fn clear_events(&self) {
        self.cpu.log.lock().clear();
    }

    /// Number of hooks still waiting for a switch
    pub fn pending_hooks(&self) -> usize {
        self.cpu.hooks.lock().len()
    }
}

impl Default for StubHal {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for StubHal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StubHal")
            .field("interrupts", &self.cpu.interrupts_enabled())
            .field("events", &self.cpu.log.lock().len())
            .finish()
    }
}

impl HardwareAbstractionLayer for StubHal {
    type Cpu = StubCpu;
    type Mmu = StubMmu;

    fn cpu(&self) -> &Self::Cpu {
        &self.cpu
    }

    fn mmu(&self) -> &Self::Mmu {
        &self.mmu
    }

    fn arch_name(&self) -> &'static str {
        ARCH_NAME
    }
}

// =============================================================================
// Stub CPU Implementation
// =============================================================================

/// Stub CPU implementation
pub struct StubCpu {
    interrupts: AtomicBool,
    kernel_stack: AtomicU64,
    log: EventLog,
    hooks: Mutex<VecDeque<SwitchHook>>,
}

impl StubCpu {
    /// Create a standalone stub CPU (interrupts disabled, private log)
    pub fn new() -> Self {
        Self::with_log(Arc::new(Mutex::new(Vec::new())))
    }

    fn with_log(log: EventLog) -> Self {
        Self {
            interrupts: AtomicBool::new(false),
            kernel_stack: AtomicU64::new(0),
            log,
            hooks: Mutex::new(VecDeque::new()),
        }
    }

    /// Last value programmed with `set_kernel_stack`
    pub fn kernel_stack(&self) -> VirtAddr {
        VirtAddr::new(self.kernel_stack.load(Ordering::SeqCst))
    }

    fn record(&self, event: HalEvent) {
        self.log.lock().push(event);
    }

    fn run_next_hook(&self) {
        // Pop first: the hook may itself switch and queue more hooks.
        let hook = self.hooks.lock().pop_front();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl Default for StubCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuAbstraction for StubCpu {
    unsafe fn enable_interrupts(&self) {
        self.interrupts.store(true, Ordering::SeqCst);
    }

    unsafe fn disable_interrupts(&self) {
        self.interrupts.store(false, Ordering::SeqCst);
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst)
    }

    fn set_kernel_stack(&self, top: VirtAddr) {
        self.kernel_stack.store(top.as_u64(), Ordering::SeqCst);
        self.record(HalEvent::KernelStack(top));
    }

    unsafe fn switch_context(&self, _from: *mut KernelContext, _to: *const KernelContext) {
        self.record(HalEvent::Switch);
        self.run_next_hook();
    }

    unsafe fn enter_user(&self, _from: *mut KernelContext, regs: &UserRegisters, _stack_top: VirtAddr) {
        self.record(HalEvent::EnterUser(regs.instruction_pointer()));
        // The new thread runs with interrupts on.
        let was_enabled = self.interrupts.swap(true, Ordering::SeqCst);
        self.run_next_hook();
        self.interrupts.store(was_enabled, Ordering::SeqCst);
    }

    fn halt(&self) {
        core::hint::spin_loop();
    }
}

// =============================================================================
// Stub MMU Implementation
// =============================================================================

/// Stub MMU implementation
pub struct StubMmu {
    current: AtomicU64,
    log: EventLog,
}

impl StubMmu {
    fn with_log(log: EventLog) -> Self {
        Self {
            current: AtomicU64::new(0),
            log,
        }
    }
}

impl MmuAbstraction for StubMmu {
    unsafe fn switch_address_space(&self, root: PhysAddr) {
        self.current.store(root.as_u64(), Ordering::SeqCst);
        self.log.lock().push(HalEvent::AddressSpace(root));
    }

    fn current_address_space(&self) -> PhysAddr {
        PhysAddr::new(self.current.load(Ordering::SeqCst))
    }
}
