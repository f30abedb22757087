//! # Thread Management
//!
//! Thread control blocks, their state machine, and the thread index.

#[allow(clippy::module_inception)]
pub mod thread;
pub mod registry;
pub mod states;

pub use registry::*;
pub use states::*;
pub use thread::*;
