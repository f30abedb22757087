//! # Context Switch
//!
//! The two handoffs used by the scheduler, in assembly.
//!
//! A suspended thread's callee-saved registers and flags live on its own
//! kernel stack; [`KernelContext`] only records where that stack stopped.
//! Resuming pops them back and `ret`s into the suspended `switch_context`
//! call, so from the thread's point of view the call simply returned.

use crate::cpu::{KernelContext, UserRegisters};
use core::arch::global_asm;
use core::mem::{offset_of, size_of};
use static_assertions::const_assert_eq;

const_assert_eq!(size_of::<KernelContext>(), 8);
const_assert_eq!(offset_of!(KernelContext, sp), 0x00);

const_assert_eq!(size_of::<UserRegisters>(), 20 * 8);
const_assert_eq!(offset_of!(UserRegisters, rax), 0x00);
const_assert_eq!(offset_of!(UserRegisters, rsi), 0x20);
const_assert_eq!(offset_of!(UserRegisters, rip), 0x78);
const_assert_eq!(offset_of!(UserRegisters, cs), 0x80);
const_assert_eq!(offset_of!(UserRegisters, rflags), 0x88);
const_assert_eq!(offset_of!(UserRegisters, rsp), 0x90);
const_assert_eq!(offset_of!(UserRegisters, ss), 0x98);

extern "C" {
    /// Save the running kernel context into `from` and resume `to`
    pub fn kestrel_switch_context(from: *mut KernelContext, to: *const KernelContext);

    /// Save the running kernel context into `from`, move to `stack_top` and
    /// `iretq` into user mode with `regs`
    pub fn kestrel_enter_user(from: *mut KernelContext, regs: *const UserRegisters, stack_top: u64);
}

global_asm!(
    ".global kestrel_switch_context",
    "kestrel_switch_context:",
    // rdi = from, rsi = to
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "pushfq",
    "mov [rdi], rsp",
    "mov rsp, [rsi]",
    "popfq",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "ret",
);

global_asm!(
    ".global kestrel_enter_user",
    "kestrel_enter_user:",
    // rdi = from, rsi = regs, rdx = stack_top
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "pushfq",
    "mov [rdi], rsp",
    // Fresh kernel stack for the new thread; build the iretq frame there.
    "mov rsp, rdx",
    "push qword ptr [rsi + 0x98]",
    "push qword ptr [rsi + 0x90]",
    "mov rax, [rsi + 0x88]",
    "or rax, 0x200",
    "push rax",
    "push qword ptr [rsi + 0x80]",
    "push qword ptr [rsi + 0x78]",
    "mov rax, [rsi + 0x00]",
    "mov rbx, [rsi + 0x08]",
    "mov rcx, [rsi + 0x10]",
    "mov rdx, [rsi + 0x18]",
    "mov rdi, [rsi + 0x28]",
    "mov rbp, [rsi + 0x30]",
    "mov r8,  [rsi + 0x38]",
    "mov r9,  [rsi + 0x40]",
    "mov r10, [rsi + 0x48]",
    "mov r11, [rsi + 0x50]",
    "mov r12, [rsi + 0x58]",
    "mov r13, [rsi + 0x60]",
    "mov r14, [rsi + 0x68]",
    "mov r15, [rsi + 0x70]",
    "mov rsi, [rsi + 0x20]",
    "iretq",
);
