//! # x86_64 Architecture HAL Implementation
//!
//! Interrupt flag control, CR3 switching, TSS `rsp0` programming and the
//! context-switch assembly. GDT/IDT/TSS construction and the timer are set
//! up by the boot code; this backend is handed the TSS `rsp0` slot.

pub mod context;
pub mod cpu;

use crate::cpu::{CpuAbstraction, KernelContext, UserRegisters};
use crate::mmu::MmuAbstraction;
use crate::{HardwareAbstractionLayer, PhysAddr, VirtAddr};
use core::sync::atomic::{AtomicPtr, Ordering};

/// x86_64 HAL Implementation
pub struct X86_64Hal {
    cpu: X86_64Cpu,
    mmu: X86_64Mmu,
}

impl X86_64Hal {
    /// Create the x86_64 HAL
    ///
    /// # Safety
    /// `rsp0` must point at the `rsp0` field of the loaded TSS and stay
    /// valid for the lifetime of the kernel.
    pub unsafe fn new(rsp0: *mut u64) -> Self {
        log::info!("x86_64 HAL: execution backend ready");
        Self {
            cpu: X86_64Cpu { rsp0: AtomicPtr::new(rsp0) },
            mmu: X86_64Mmu,
        }
    }
}

impl HardwareAbstractionLayer for X86_64Hal {
    type Cpu = X86_64Cpu;
    type Mmu = X86_64Mmu;

    fn cpu(&self) -> &Self::Cpu {
        &self.cpu
    }

    fn mmu(&self) -> &Self::Mmu {
        &self.mmu
    }

    fn arch_name(&self) -> &'static str {
        "x86_64"
    }
}

/// x86_64 CPU
pub struct X86_64Cpu {
    rsp0: AtomicPtr<u64>,
}

impl CpuAbstraction for X86_64Cpu {
    unsafe fn enable_interrupts(&self) {
        unsafe { cpu::enable_interrupts() }
    }

    unsafe fn disable_interrupts(&self) {
        unsafe { cpu::disable_interrupts() }
    }

    fn interrupts_enabled(&self) -> bool {
        cpu::are_interrupts_enabled()
    }

    fn set_kernel_stack(&self, top: VirtAddr) {
        // SAFETY: slot validity is the contract of `X86_64Hal::new`
        unsafe { self.rsp0.load(Ordering::Relaxed).write_volatile(top.as_u64()) }
    }

    unsafe fn switch_context(&self, from: *mut KernelContext, to: *const KernelContext) {
        unsafe { context::kestrel_switch_context(from, to) }
    }

    unsafe fn enter_user(&self, from: *mut KernelContext, regs: &UserRegisters, stack_top: VirtAddr) {
        unsafe { context::kestrel_enter_user(from, regs, stack_top.as_u64()) }
    }

    fn halt(&self) {
        cpu::halt();
    }
}

/// x86_64 MMU
pub struct X86_64Mmu;

impl MmuAbstraction for X86_64Mmu {
    unsafe fn switch_address_space(&self, root: PhysAddr) {
        if cpu::read_cr3() != root.as_u64() {
            unsafe { cpu::write_cr3(root.as_u64()) }
        }
    }

    fn current_address_space(&self) -> PhysAddr {
        PhysAddr::new(cpu::read_cr3())
    }
}
