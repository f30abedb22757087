//! Test doubles for the collaborators and a booted kernel to drive them.

use crate::kernel::Kernel;
use crate::loader::{ImageLoader, ProgramImage, Segment, SegmentFlags};
use crate::memory::{AddressSpace, AddressSpaceProvider};
use crate::scheduler::queue::QueueTag;
use crate::thread::{Thread, ThreadState};
use crate::{ExecError, ExecResult, SchedulerConfig, Target, ThreadId};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use kestrel_hal::arch_stubs::StubHal;
use kestrel_hal::{HardwareAbstractionLayer, InterruptGuard, PhysAddr, UserRegisters, VirtAddr};
use spin::Mutex;

pub(crate) const ENTRY: u64 = 0x100_0000;
const STACK_BASE: u64 = 0x7FFF_E000;
const STACK_LEN: u64 = 0x2000;

/// Address-space provider that hands out fake roots and counts calls
pub(crate) struct StubMemory {
    next_root: AtomicU64,
    duplicated: AtomicUsize,
    released: AtomicUsize,
    destroyed: Mutex<Vec<PhysAddr>>,
}

impl StubMemory {
    pub(crate) fn new() -> Self {
        Self {
            next_root: AtomicU64::new(0x10_0000),
            duplicated: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            destroyed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn duplicated(&self) -> usize {
        self.duplicated.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub(crate) fn destroyed(&self) -> Vec<PhysAddr> {
        self.destroyed.lock().clone()
    }

    fn fresh_root(&self) -> PhysAddr {
        PhysAddr::new(self.next_root.fetch_add(0x1000, Ordering::SeqCst))
    }
}

impl AddressSpaceProvider for StubMemory {
    fn create(&self) -> ExecResult<AddressSpace> {
        Ok(AddressSpace::new(self.fresh_root()))
    }

    fn duplicate(&self, source: &AddressSpace) -> ExecResult<AddressSpace> {
        let mut copy = AddressSpace::new(self.fresh_root());
        for region in source.regions() {
            copy.insert_region(region.start, region.len);
        }
        self.duplicated.fetch_add(1, Ordering::SeqCst);
        Ok(copy)
    }

    fn reserve(&self, space: &mut AddressSpace, start: VirtAddr, len: u64) -> ExecResult<()> {
        if space.overlaps(start, len) {
            return Err(ExecError::AddressSpace);
        }
        space.insert_region(start, len);
        Ok(())
    }

    fn release(&self, space: &mut AddressSpace, start: VirtAddr, len: u64) {
        space.remove_region(start, len);
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy(&self, space: AddressSpace) {
        self.destroyed.lock().push(space.root());
    }
}

/// Loader that knows every image except `"missing"`
pub(crate) struct StubLoader;

impl ImageLoader for StubLoader {
    fn load(&self, name: &str) -> ExecResult<ProgramImage> {
        if name == "missing" {
            return Err(ExecError::ImageNotFound);
        }
        let entry = VirtAddr::new(ENTRY);
        Ok(ProgramImage {
            name: String::from(name),
            entry,
            segments: vec![
                Segment {
                    start: entry,
                    len: 0x1000,
                    flags: SegmentFlags::READ | SegmentFlags::EXEC,
                },
                Segment {
                    start: VirtAddr::new(STACK_BASE),
                    len: STACK_LEN,
                    flags: SegmentFlags::READ | SegmentFlags::WRITE,
                },
            ],
            registers: UserRegisters::new_user(entry, VirtAddr::new(STACK_BASE + STACK_LEN)),
        })
    }

    fn populate(&self, _image: &ProgramImage, _space: &AddressSpace) -> ExecResult<()> {
        Ok(())
    }
}

/// A kernel with the idle thread running
pub(crate) fn boot() -> Arc<Kernel<StubHal>> {
    boot_with(SchedulerConfig::default()).0
}

pub(crate) fn boot_with(config: SchedulerConfig) -> (Arc<Kernel<StubHal>>, Arc<StubMemory>) {
    let memory = Arc::new(StubMemory::new());
    let kernel = Kernel::new(StubHal::new(), memory.clone(), Arc::new(StubLoader), config).unwrap();
    kernel.boot_idle("idle").unwrap();
    (Arc::new(kernel), memory)
}

/// Spawn a parentless process and run its thread; idle goes to the ready queue
pub(crate) fn start_process(kernel: &Kernel<StubHal>, name: &str) -> ThreadId {
    let pid = kernel.spawn_process(None, name).unwrap();
    let tid = kernel.process(pid).unwrap().threads()[0].id();
    kernel.schedule(Target::Thread(tid));
    assert_eq!(kernel.current_thread().unwrap().id(), tid);
    tid
}

/// Pull the idle thread off the ready queue
pub(crate) fn take_idle_from_ready(kernel: &Kernel<StubHal>) -> Arc<Thread> {
    let _irq = InterruptGuard::new(kernel.hal().cpu());
    let idle = kernel.idle_process().unwrap().threads()[0].id();
    kernel.ready.lock().remove(idle).unwrap()
}

/// Move a ready thread to the blocked queue in `state`
pub(crate) fn park(kernel: &Kernel<StubHal>, tid: ThreadId, state: ThreadState) {
    let _irq = InterruptGuard::new(kernel.hal().cpu());
    let thread = kernel.ready.lock().remove(tid).unwrap();
    thread.set_state(state);
    kernel.blocked.lock().push_back(thread);
}

/// Check that every registered thread sits on the queue its state calls for
///
/// The running thread must be `Running` and on no queue.
pub(crate) fn assert_queue_invariant(kernel: &Kernel<StubHal>) {
    let _irq = InterruptGuard::new(kernel.hal().cpu());
    let current = kernel.current_thread().map(|t| t.id());
    for thread in kernel.threads.all() {
        if Some(thread.id()) == current {
            assert_eq!(thread.state(), ThreadState::Running, "running {:?}", thread);
            assert_eq!(thread.queue_tag(), QueueTag::None, "running {:?}", thread);
            continue;
        }
        assert_eq!(
            thread.queue_tag(),
            thread.state().home_queue(),
            "{:?} on the wrong queue",
            thread
        );
    }

    let ready = kernel.ready_ids();
    let blocked = kernel.blocked_ids();
    assert!(ready.iter().all(|id| !blocked.contains(id)));
}
