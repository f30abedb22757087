//! # MMU Abstraction
//!
//! Page-table construction is the memory subsystem's business. The
//! scheduler only needs to make an already-built address space current.

use crate::PhysAddr;

/// MMU abstraction trait
pub trait MmuAbstraction: Send + Sync {
    /// Make the address space rooted at `root` the active one
    ///
    /// # Safety
    /// `root` must be the root of a valid page-table hierarchy that maps the
    /// kernel, including every kernel stack.
    unsafe fn switch_address_space(&self, root: PhysAddr);

    /// Root of the currently active address space
    fn current_address_space(&self) -> PhysAddr;
}
