//! # Kestrel HAL - Hardware Abstraction Layer
//!
//! This crate defines the hardware seams the execution core is written
//! against. The scheduler never touches a control register directly; it
//! asks the HAL to:
//!
//! - mask and unmask interrupts (and scope that with [`cpu::InterruptGuard`])
//! - program the privileged-mode stack pointer for the next thread
//! - activate the next thread's address space
//! - swap kernel execution contexts, or enter user mode for a first run
//!
//! ## Backends
//!
//! - [`arch::x86_64`]: bare-metal implementation (only on `target_os = "none"`)
//! - [`arch_stubs`]: recording stub used on hosted builds and in tests

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod cpu;
pub mod mmu;

// Architecture-specific implementations
pub mod arch;

// Stub implementation (hosted builds, tests)
pub mod arch_stubs;

pub use cpu::{CpuAbstraction, InterruptGuard, KernelContext, UserRegisters};
pub use mmu::MmuAbstraction;

/// The main HAL trait that architecture implementations must provide
///
/// The execution core is generic over this trait, so a kernel image is
/// monomorphized for exactly one backend.
pub trait HardwareAbstractionLayer: Send + Sync + 'static {
    /// The CPU abstraction type
    type Cpu: cpu::CpuAbstraction;

    /// The MMU abstraction type
    type Mmu: mmu::MmuAbstraction;

    /// Get the CPU abstraction
    fn cpu(&self) -> &Self::Cpu;

    /// Get the MMU abstraction
    fn mmu(&self) -> &Self::Mmu;

    /// Get the architecture name
    fn arch_name(&self) -> &'static str;
}

/// Physical address type (architecture-independent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    /// Create a new physical address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if the address is aligned to the given alignment
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 % align == 0
    }
}

/// Virtual address type (architecture-independent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(u64);

impl VirtAddr {
    /// Create a new virtual address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if the address is aligned to the given alignment
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 % align == 0
    }

    /// Align the address down to the given alignment
    #[inline]
    pub const fn align_down(self, align: u64) -> Self {
        Self(self.0 & !(align - 1))
    }

    /// Add an offset to the address
    #[inline]
    pub const fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }

    /// Build an address from a pointer
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virt_addr_alignment() {
        let addr = VirtAddr::new(0x1234);
        assert!(!addr.is_aligned(0x1000));
        assert_eq!(addr.align_down(0x1000), VirtAddr::new(0x1000));
        assert_eq!(addr.add(0x10).as_u64(), 0x1244);
    }

    #[test]
    fn test_phys_addr_alignment() {
        assert!(PhysAddr::new(0x2000).is_aligned(0x1000));
        assert!(!PhysAddr::new(0x2004).is_aligned(8));
    }
}
