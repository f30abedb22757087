//! # CPU Control
//!
//! Low-level CPU control functions for x86_64.

use core::arch::asm;

/// Disable interrupts (CLI)
///
/// # Safety
/// Disabling interrupts can cause the system to hang if not re-enabled.
#[inline]
pub unsafe fn disable_interrupts() {
    unsafe { asm!("cli", options(nomem, nostack, preserves_flags)); }
}

/// Enable interrupts (STI)
///
/// # Safety
/// Interrupts should only be enabled when the system is ready to handle them.
#[inline]
pub unsafe fn enable_interrupts() {
    unsafe { asm!("sti", options(nomem, nostack, preserves_flags)); }
}

/// Check if interrupts are enabled
#[inline]
pub fn are_interrupts_enabled() -> bool {
    let flags: u64;
    unsafe {
        asm!("pushfq; pop {}", out(reg) flags, options(nomem, preserves_flags));
    }
    (flags & (1 << 9)) != 0
}

/// Halt the CPU until the next interrupt
#[inline]
pub fn halt() {
    unsafe {
        asm!("hlt", options(nomem, nostack, preserves_flags));
    }
}

/// Read CR3 (page-table root)
#[inline]
pub fn read_cr3() -> u64 {
    let value: u64;
    unsafe {
        asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// Write CR3, flushing non-global TLB entries
///
/// # Safety
/// `value` must be the physical address of a valid PML4 that maps the kernel.
#[inline]
pub unsafe fn write_cr3(value: u64) {
    unsafe { asm!("mov cr3, {}", in(reg) value, options(nostack, preserves_flags)); }
}
