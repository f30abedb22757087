//! # Architecture-Specific HAL Modules
//!
//! Real backends only build for bare-metal targets; hosted builds (and the
//! test suite) use [`crate::arch_stubs`].

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;

// Re-export the current architecture's HAL
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use x86_64 as current;

// Future architectures
// #[cfg(all(target_arch = "aarch64", target_os = "none"))]
// pub mod aarch64;
