//! # CPU Abstraction
//!
//! Interrupt control, privileged stack programming and the two execution
//! handoffs the scheduler needs: resuming a suspended kernel context, and
//! entering user mode for a thread that has never run.

use crate::VirtAddr;

/// CPU abstraction trait
///
/// Single-core: there is exactly one interrupt flag and one privileged
/// stack pointer.
pub trait CpuAbstraction: Send + Sync {
    /// Enable interrupts
    ///
    /// # Safety
    /// Enabling interrupts when the system is not ready can cause undefined behavior.
    unsafe fn enable_interrupts(&self);

    /// Disable interrupts
    ///
    /// # Safety
    /// Disabling interrupts for too long can cause system hangs.
    unsafe fn disable_interrupts(&self);

    /// Check if interrupts are enabled
    fn interrupts_enabled(&self) -> bool;

    /// Execute with interrupts disabled
    fn without_interrupts<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
        Self: Sized,
    {
        let _guard = InterruptGuard::new(self);
        f()
    }

    /// Program the stack pointer loaded on a user-to-kernel transition
    fn set_kernel_stack(&self, top: VirtAddr);

    /// Suspend the calling kernel context into `from` and resume `to`
    ///
    /// Returns only when some later switch names `from` as its target.
    ///
    /// # Safety
    /// Both pointers must reference live contexts; `to` must have been
    /// filled by an earlier call to this function. Interrupts must be
    /// disabled.
    unsafe fn switch_context(&self, from: *mut KernelContext, to: *const KernelContext);

    /// Suspend the calling kernel context into `from`, switch to the kernel
    /// stack at `stack_top` and enter user mode with `regs`
    ///
    /// Interrupts become enabled atomically with the transfer. Returns only
    /// when some later switch names `from` as its target.
    ///
    /// # Safety
    /// `from` must reference a live context, `stack_top` the top of an
    /// owned kernel stack, and the address space holding `regs.rip` must
    /// already be active.
    unsafe fn enter_user(&self, from: *mut KernelContext, regs: &UserRegisters, stack_top: VirtAddr);

    /// Halt the CPU until an interrupt occurs
    fn halt(&self);
}

/// Scoped interrupt masking
///
/// Disables interrupts on creation and restores the previous state on drop,
/// so nested critical sections compose and every exit path (including a
/// panic unwinding through the scope) releases exactly once.
pub struct InterruptGuard<'a, C: CpuAbstraction + ?Sized> {
    cpu: &'a C,
    was_enabled: bool,
}

impl<'a, C: CpuAbstraction + ?Sized> InterruptGuard<'a, C> {
    /// Mask interrupts until the guard is dropped
    pub fn new(cpu: &'a C) -> Self {
        let was_enabled = cpu.interrupts_enabled();
        // SAFETY: restored on drop
        unsafe { cpu.disable_interrupts() };
        Self { cpu, was_enabled }
    }

    /// Whether interrupts were enabled when the guard was taken
    pub fn was_enabled(&self) -> bool {
        self.was_enabled
    }
}

impl<C: CpuAbstraction + ?Sized> Drop for InterruptGuard<'_, C> {
    fn drop(&mut self) {
        if self.was_enabled {
            // SAFETY: the guard only re-enables what it disabled
            unsafe { self.cpu.enable_interrupts() };
        }
    }
}

impl<C: CpuAbstraction + ?Sized> core::fmt::Debug for InterruptGuard<'_, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InterruptGuard")
            .field("was_enabled", &self.was_enabled)
            .finish()
    }
}

/// Saved kernel execution context
///
/// Everything else a suspended thread needs lives on its own kernel stack,
/// pushed there by [`CpuAbstraction::switch_context`].
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct KernelContext {
    /// Kernel stack pointer at the suspension point
    pub sp: u64,
}

/// User-mode register snapshot
///
/// Captured at syscall entry and used to start a thread for the first time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct UserRegisters {
    /// Return-value register
    pub rax: u64,
    #[allow(missing_docs)]
    pub rbx: u64,
    #[allow(missing_docs)]
    pub rcx: u64,
    #[allow(missing_docs)]
    pub rdx: u64,
    #[allow(missing_docs)]
    pub rsi: u64,
    #[allow(missing_docs)]
    pub rdi: u64,
    #[allow(missing_docs)]
    pub rbp: u64,
    #[allow(missing_docs)]
    pub r8: u64,
    #[allow(missing_docs)]
    pub r9: u64,
    #[allow(missing_docs)]
    pub r10: u64,
    #[allow(missing_docs)]
    pub r11: u64,
    #[allow(missing_docs)]
    pub r12: u64,
    #[allow(missing_docs)]
    pub r13: u64,
    #[allow(missing_docs)]
    pub r14: u64,
    #[allow(missing_docs)]
    pub r15: u64,
    /// Instruction pointer
    pub rip: u64,
    /// Code segment selector
    pub cs: u64,
    /// Flags register
    pub rflags: u64,
    /// User stack pointer
    pub rsp: u64,
    /// Stack segment selector
    pub ss: u64,
}

impl UserRegisters {
    /// User code segment (ring 3)
    pub const USER_CS: u64 = 0x23;
    /// User data segment (ring 3)
    pub const USER_SS: u64 = 0x1B;
    /// Interrupt-enable flag
    pub const FLAG_IF: u64 = 1 << 9;

    /// Create the register set for a fresh user program
    pub fn new_user(entry: VirtAddr, stack: VirtAddr) -> Self {
        Self {
            rip: entry.as_u64(),
            rsp: stack.as_u64(),
            cs: Self::USER_CS,
            ss: Self::USER_SS,
            rflags: Self::FLAG_IF | 0x2,
            ..Self::default()
        }
    }

    /// Get the instruction pointer
    pub fn instruction_pointer(&self) -> VirtAddr {
        VirtAddr::new(self.rip)
    }

    /// Get the user stack pointer
    pub fn stack_pointer(&self) -> VirtAddr {
        VirtAddr::new(self.rsp)
    }

    /// Get the syscall return value
    pub fn return_value(&self) -> u64 {
        self.rax
    }

    /// Set the syscall return value
    pub fn set_return_value(&mut self, value: u64) {
        self.rax = value;
    }
}
