//! # Address Spaces
//!
//! The scheduler never builds page tables. It holds one [`AddressSpace`]
//! handle per process and asks an [`AddressSpaceProvider`] to create, copy,
//! grow, shrink and destroy it.

use crate::ExecResult;
use alloc::vec::Vec;
use kestrel_hal::{PhysAddr, VirtAddr};

/// A reserved virtual range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// First address
    pub start: VirtAddr,
    /// Length in bytes
    pub len: u64,
}

/// Handle to one process's address space
#[derive(Debug, PartialEq, Eq)]
pub struct AddressSpace {
    root: PhysAddr,
    regions: Vec<Region>,
}

impl AddressSpace {
    /// Wrap a page-table root with no reserved ranges
    pub fn new(root: PhysAddr) -> Self {
        Self {
            root,
            regions: Vec::new(),
        }
    }

    /// Page-table root to activate on switch
    pub fn root(&self) -> PhysAddr {
        self.root
    }

    /// Reserved ranges, in reservation order
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Record a reserved range
    pub fn insert_region(&mut self, start: VirtAddr, len: u64) {
        self.regions.push(Region { start, len });
    }

    /// Forget a reserved range; false if it was not recorded
    pub fn remove_region(&mut self, start: VirtAddr, len: u64) -> bool {
        match self
            .regions
            .iter()
            .position(|r| r.start == start && r.len == len)
        {
            Some(pos) => {
                self.regions.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Whether `[start, start + len)` overlaps a reserved range
    pub fn overlaps(&self, start: VirtAddr, len: u64) -> bool {
        let end = start.as_u64().saturating_add(len);
        self.regions.iter().any(|r| {
            let r_end = r.start.as_u64().saturating_add(r.len);
            start.as_u64() < r_end && r.start.as_u64() < end
        })
    }
}

/// Address-space collaborator
pub trait AddressSpaceProvider: Send + Sync {
    /// Build an empty address space that maps the kernel
    fn create(&self) -> ExecResult<AddressSpace>;

    /// Build a copy of `source` (for fork)
    fn duplicate(&self, source: &AddressSpace) -> ExecResult<AddressSpace>;

    /// Reserve and map `[start, start + len)`
    ///
    /// A failed reservation must leave `space` unchanged.
    fn reserve(&self, space: &mut AddressSpace, start: VirtAddr, len: u64) -> ExecResult<()>;

    /// Unmap and free a range previously reserved
    fn release(&self, space: &mut AddressSpace, start: VirtAddr, len: u64);

    /// Free the page tables and every remaining range
    fn destroy(&self, space: AddressSpace);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_bookkeeping() {
        let mut space = AddressSpace::new(PhysAddr::new(0x5000));
        space.insert_region(VirtAddr::new(0x1000), 0x1000);
        space.insert_region(VirtAddr::new(0x8000), 0x2000);

        assert!(space.overlaps(VirtAddr::new(0x1800), 0x10));
        assert!(space.overlaps(VirtAddr::new(0x0800), 0x1000));
        assert!(!space.overlaps(VirtAddr::new(0x2000), 0x1000));

        assert!(space.remove_region(VirtAddr::new(0x1000), 0x1000));
        assert!(!space.remove_region(VirtAddr::new(0x1000), 0x1000));
        assert_eq!(space.regions().len(), 1);
    }
}
