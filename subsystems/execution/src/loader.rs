//! # Program Images
//!
//! The image loader collaborator and the helper that turns a loaded image
//! into a populated address space.

use crate::memory::{AddressSpace, AddressSpaceProvider};
use crate::ExecResult;
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;
use kestrel_hal::{UserRegisters, VirtAddr};

bitflags! {
    /// Segment permissions
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        /// Readable
        const READ = 1 << 0;
        /// Writable
        const WRITE = 1 << 1;
        /// Executable
        const EXEC = 1 << 2;
    }
}

/// One loadable range of an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Load address
    pub start: VirtAddr,
    /// Length in bytes
    pub len: u64,
    /// Permissions
    pub flags: SegmentFlags,
}

/// A loaded program image
#[derive(Debug, Clone)]
pub struct ProgramImage {
    /// Image name
    pub name: String,
    /// Entry point
    pub entry: VirtAddr,
    /// Ranges to reserve before populating
    pub segments: Vec<Segment>,
    /// Registers for the first run
    pub registers: UserRegisters,
}

/// Image loader collaborator
pub trait ImageLoader: Send + Sync {
    /// Look up and parse an image
    fn load(&self, name: &str) -> ExecResult<ProgramImage>;

    /// Copy the image contents into a space whose segments are reserved
    fn populate(&self, image: &ProgramImage, space: &AddressSpace) -> ExecResult<()>;
}

/// Create an address space for `image`, reserve its segments and populate it
///
/// On failure every reserved range is released and the space destroyed
/// before the error is returned.
pub fn build_address_space(
    memory: &dyn AddressSpaceProvider,
    loader: &dyn ImageLoader,
    image: &ProgramImage,
) -> ExecResult<AddressSpace> {
    let mut space = memory.create()?;

    let mut reserved = 0;
    let result = image
        .segments
        .iter()
        .try_for_each(|segment| {
            memory.reserve(&mut space, segment.start, segment.len)?;
            reserved += 1;
            Ok(())
        })
        .and_then(|()| loader.populate(image, &space));

    if let Err(err) = result {
        for segment in image.segments[..reserved].iter().rev() {
            memory.release(&mut space, segment.start, segment.len);
        }
        memory.destroy(space);
        log::debug!("image {}: address space setup failed: {:?}", image.name, err);
        return Err(err);
    }

    Ok(space)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubLoader, StubMemory};
    use crate::ExecError;

    #[test]
    fn test_build_reserves_every_segment() {
        let memory = StubMemory::new();
        let loader = StubLoader;
        let image = loader.load("init").unwrap();

        let space = build_address_space(&memory, &loader, &image).unwrap();
        assert_eq!(space.regions().len(), image.segments.len());
        assert!(memory.destroyed().is_empty());
    }

    #[test]
    fn test_failed_reserve_rolls_back() {
        let memory = StubMemory::new();
        let loader = StubLoader;
        let mut image = loader.load("init").unwrap();
        // Second segment collides with the first.
        image.segments.push(image.segments[0].clone());

        let err = build_address_space(&memory, &loader, &image).unwrap_err();
        assert_eq!(err, ExecError::AddressSpace);
        assert_eq!(memory.released(), image.segments.len() - 1);
        assert_eq!(memory.destroyed().len(), 1);
    }

    #[test]
    fn test_unknown_image() {
        assert_eq!(StubLoader.load("missing").unwrap_err(), ExecError::ImageNotFound);
    }
}
