//! # Kestrel Execution Subsystem
//!
//! The execution subsystem manages:
//! - Thread and process control blocks
//! - The ready/blocked queue discipline
//! - Timer-driven rescheduling and per-thread alarms
//! - Context switching
//! - Thread/process lifecycle (fork, vanish, wait) and orphan adoption
//!
//! ## Model
//!
//! Single core, one address space per process, many threads per process.
//! All scheduler state lives in one [`Kernel`] value; there is no global
//! mutable state. Every queue mutation happens with interrupts masked, and
//! the only point where a thread stops executing is the context switch.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod context;
pub mod kernel;
pub mod lifecycle;
pub mod loader;
pub mod memory;
pub mod process;
pub mod scheduler;
pub mod signals;
pub mod thread;
pub mod timer;

#[cfg(test)]
mod testing;

pub use config::SchedulerConfig;
pub use kernel::Kernel;
pub use process::{Process, ProcessState};
pub use scheduler::Target;
pub use signals::{Signal, SignalDelivery, SignalSet};
pub use thread::{BlockReason, Thread, ThreadState};
pub use timer::AlarmKind;

use core::fmt;

/// Unique identifier for threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u32);

impl ThreadId {
    /// Wrap a raw thread ID
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Unique identifier for processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Wrap a raw process ID
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Execution result type
pub type ExecResult<T> = Result<T, ExecError>;

/// Execution errors
///
/// Only recoverable conditions are reported here. A broken control-block
/// invariant is a kernel bug and panics instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// Thread not found
    ThreadNotFound,
    /// Process not found
    ProcessNotFound,
    /// Invalid state
    InvalidState,
    /// Invalid argument
    InvalidArgument,
    /// Caller has no children to wait for
    NoChildren,
    /// Out of resources (control blocks, kernel stacks)
    OutOfResources,
    /// Address-space collaborator failed
    AddressSpace,
    /// Program image not found
    ImageNotFound,
    /// Already exists
    AlreadyExists,
    /// Internal error
    Internal,
}

impl ExecError {
    /// Negative status handed back to the syscall layer
    pub const fn as_errno(self) -> i32 {
        match self {
            ExecError::ThreadNotFound => -1,
            ExecError::ProcessNotFound => -2,
            ExecError::InvalidState => -3,
            ExecError::InvalidArgument => -4,
            ExecError::NoChildren => -5,
            ExecError::OutOfResources => -6,
            ExecError::AddressSpace => -7,
            ExecError::ImageNotFound => -8,
            ExecError::AlreadyExists => -9,
            ExecError::Internal => -10,
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExecError::ThreadNotFound => "thread not found",
            ExecError::ProcessNotFound => "process not found",
            ExecError::InvalidState => "invalid state",
            ExecError::InvalidArgument => "invalid argument",
            ExecError::NoChildren => "no children",
            ExecError::OutOfResources => "out of resources",
            ExecError::AddressSpace => "address space failure",
            ExecError::ImageNotFound => "image not found",
            ExecError::AlreadyExists => "already exists",
            ExecError::Internal => "internal error",
        };
        f.write_str(text)
    }
}
