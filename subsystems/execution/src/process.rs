//! # Process Management
//!
//! The process control block and the registry of live processes.
//!
//! A process owns its threads, its unreaped children and its address
//! space. Parent links are weak, so ownership always points down the tree.

use crate::memory::AddressSpace;
use crate::thread::{Thread, ThreadState};
use crate::{ExecError, ExecResult, ProcessId, ThreadId};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};
use kestrel_hal::PhysAddr;
use spin::{Mutex, RwLock};

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ProcessState {
    /// One of its threads is executing
    Running = 0,
    /// Some thread is ready, none executing
    Runnable = 1,
    /// Every live thread is blocked
    Blocked = 2,
    /// The idle process
    Idle = 3,
    /// Every thread has exited
    Exited = 4,
}

impl ProcessState {
    fn from_u32(value: u32) -> Self {
        match value {
            0 => ProcessState::Running,
            1 => ProcessState::Runnable,
            2 => ProcessState::Blocked,
            3 => ProcessState::Idle,
            _ => ProcessState::Exited,
        }
    }
}

/// Process structure
pub struct Process {
    /// Process ID
    id: ProcessId,
    /// Program name
    name: String,
    /// Parent process (non-owning)
    parent: RwLock<Weak<Process>>,
    /// Current state
    state: AtomicU32,
    /// Exit status handed to the reaper
    return_state: AtomicI32,
    /// All threads (peer threads)
    threads: RwLock<Vec<Arc<Thread>>>,
    /// Child processes not yet reaped
    children: RwLock<Vec<Arc<Process>>>,
    /// Count of unreaped children
    children_count: AtomicUsize,
    /// Address space, `None` once destroyed
    address_space: Mutex<Option<AddressSpace>>,
}

impl Process {
    /// Create a new process
    pub fn new(
        id: ProcessId,
        name: impl Into<String>,
        parent: Option<&Arc<Process>>,
        address_space: AddressSpace,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            parent: RwLock::new(parent.map(Arc::downgrade).unwrap_or_default()),
            state: AtomicU32::new(ProcessState::Runnable as u32),
            return_state: AtomicI32::new(0),
            threads: RwLock::new(Vec::new()),
            children: RwLock::new(Vec::new()),
            children_count: AtomicUsize::new(0),
            address_space: Mutex::new(Some(address_space)),
        }
    }

    /// Get process ID
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Get program name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get parent process, if it is still around
    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.read().upgrade()
    }

    /// Point the parent link at `parent`
    pub fn set_parent(&self, parent: &Arc<Process>) {
        *self.parent.write() = Arc::downgrade(parent);
    }

    /// Drop the parent link
    pub fn clear_parent(&self) {
        *self.parent.write() = Weak::new();
    }

    /// Get state
    pub fn state(&self) -> ProcessState {
        ProcessState::from_u32(self.state.load(Ordering::SeqCst))
    }

    /// Set state
    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u32, Ordering::SeqCst);
    }

    /// Recompute `Running`/`Runnable`/`Blocked` from the threads
    ///
    /// `Idle` and `Exited` are sticky.
    pub fn settle_state(&self) {
        if matches!(self.state(), ProcessState::Idle | ProcessState::Exited) {
            return;
        }
        let threads = self.threads.read();
        let state = if threads.iter().any(|t| t.state() == ThreadState::Running) {
            ProcessState::Running
        } else if threads.iter().any(|t| t.state().is_runnable()) {
            ProcessState::Runnable
        } else {
            ProcessState::Blocked
        };
        self.set_state(state);
    }

    /// Exit status
    pub fn return_state(&self) -> i32 {
        self.return_state.load(Ordering::SeqCst)
    }

    /// Record the exit status
    pub fn set_return_state(&self, status: i32) {
        self.return_state.store(status, Ordering::SeqCst);
    }

    /// Add a thread
    pub fn add_thread(&self, thread: Arc<Thread>) {
        self.threads.write().push(thread);
    }

    /// Remove a thread
    pub fn remove_thread(&self, id: ThreadId) -> Option<Arc<Thread>> {
        let mut threads = self.threads.write();
        let pos = threads.iter().position(|t| t.id() == id)?;
        Some(threads.remove(pos))
    }

    /// Remove every thread
    pub fn take_threads(&self) -> Vec<Arc<Thread>> {
        core::mem::take(&mut *self.threads.write())
    }

    /// Snapshot of the threads
    pub fn threads(&self) -> Vec<Arc<Thread>> {
        self.threads.read().clone()
    }

    /// Whether `id` is one of this process's threads
    pub fn has_thread(&self, id: ThreadId) -> bool {
        self.threads.read().iter().any(|t| t.id() == id)
    }

    /// Get thread count
    pub fn thread_count(&self) -> usize {
        self.threads.read().len()
    }

    /// Count threads that have not exited
    pub fn live_threads(&self) -> usize {
        self.threads
            .read()
            .iter()
            .filter(|t| !t.state().is_exited())
            .count()
    }

    /// First thread in `state`
    pub fn find_thread(&self, state: ThreadState) -> Option<Arc<Thread>> {
        self.threads.read().iter().find(|t| t.state() == state).cloned()
    }

    /// Add a child process
    pub fn add_child(&self, child: Arc<Process>) {
        let mut children = self.children.write();
        children.push(child);
        self.children_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Unlink the first exited child
    pub fn take_exited_child(&self) -> Option<Arc<Process>> {
        let mut children = self.children.write();
        let pos = children
            .iter()
            .position(|c| c.state() == ProcessState::Exited)?;
        self.children_count.fetch_sub(1, Ordering::SeqCst);
        Some(children.remove(pos))
    }

    /// Unlink every child
    pub fn take_children(&self) -> Vec<Arc<Process>> {
        let mut children = self.children.write();
        self.children_count.store(0, Ordering::SeqCst);
        core::mem::take(&mut *children)
    }

    /// Snapshot of the children
    pub fn children(&self) -> Vec<Arc<Process>> {
        self.children.read().clone()
    }

    /// Count of unreaped children
    pub fn children_count(&self) -> usize {
        self.children_count.load(Ordering::SeqCst)
    }

    /// Root of the address space, `None` once destroyed
    pub fn address_space_root(&self) -> Option<PhysAddr> {
        self.address_space.lock().as_ref().map(AddressSpace::root)
    }

    /// Run `f` against the address space
    pub fn with_address_space<R>(
        &self,
        f: impl FnOnce(&AddressSpace) -> ExecResult<R>,
    ) -> ExecResult<R> {
        let space = self.address_space.lock();
        f(space.as_ref().ok_or(ExecError::AddressSpace)?)
    }

    /// Hand the address space back for destruction
    pub fn take_address_space(&self) -> Option<AddressSpace> {
        self.address_space.lock().take()
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("threads", &self.thread_count())
            .field("children", &self.children_count())
            .finish()
    }
}

/// Process registry
pub struct ProcessRegistry {
    /// All live processes
    processes: RwLock<BTreeMap<ProcessId, Arc<Process>>>,
}

impl ProcessRegistry {
    /// Create a new registry
    pub const fn new() -> Self {
        Self {
            processes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a process
    pub fn register(&self, process: Arc<Process>) -> ExecResult<()> {
        let id = process.id();
        let mut processes = self.processes.write();

        if processes.contains_key(&id) {
            return Err(ExecError::AlreadyExists);
        }

        processes.insert(id, process);
        Ok(())
    }

    /// Unregister a process
    pub fn unregister(&self, id: ProcessId) -> ExecResult<Arc<Process>> {
        self.processes
            .write()
            .remove(&id)
            .ok_or(ExecError::ProcessNotFound)
    }

    /// Get a process
    pub fn get(&self, id: ProcessId) -> Option<Arc<Process>> {
        self.processes.read().get(&id).cloned()
    }

    /// Get process count
    pub fn count(&self) -> usize {
        self.processes.read().len()
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_hal::UserRegisters;

    fn process(id: u32) -> Arc<Process> {
        Arc::new(Process::new(
            ProcessId::from_raw(id),
            "p",
            None,
            AddressSpace::new(PhysAddr::new(0x1000 * id as u64)),
        ))
    }

    #[test]
    fn test_children_counter_tracks_unreaped() {
        let parent = process(1);
        let c1 = process(2);
        let c2 = process(3);
        parent.add_child(c1.clone());
        parent.add_child(c2.clone());
        assert_eq!(parent.children_count(), 2);

        assert!(parent.take_exited_child().is_none());
        c2.set_state(ProcessState::Exited);

        let reaped = parent.take_exited_child().unwrap();
        assert_eq!(reaped.id(), c2.id());
        assert_eq!(parent.children_count(), 1);
        assert!(parent.take_exited_child().is_none());

        assert_eq!(parent.take_children().len(), 1);
        assert_eq!(parent.children_count(), 0);
    }

    #[test]
    fn test_parent_link_is_weak() {
        let parent = process(1);
        let child = Process::new(
            ProcessId::from_raw(2),
            "c",
            Some(&parent),
            AddressSpace::new(PhysAddr::new(0x2000)),
        );
        assert_eq!(child.parent().map(|p| p.id()), Some(parent.id()));
        drop(parent);
        assert!(child.parent().is_none());
    }

    #[test]
    fn test_settle_state() {
        let p = process(1);
        let t = Arc::new(Thread::new(ThreadId::from_raw(1), &p, UserRegisters::default(), 256).unwrap());
        p.add_thread(t.clone());

        p.settle_state();
        assert_eq!(p.state(), ProcessState::Runnable);

        t.set_state(ThreadState::Running);
        p.settle_state();
        assert_eq!(p.state(), ProcessState::Running);

        t.set_state(ThreadState::Waiting);
        p.settle_state();
        assert_eq!(p.state(), ProcessState::Blocked);

        p.set_state(ProcessState::Exited);
        t.set_state(ThreadState::Running);
        p.settle_state();
        assert_eq!(p.state(), ProcessState::Exited);
    }

    #[test]
    fn test_registry() {
        let registry = ProcessRegistry::new();
        registry.register(process(1)).unwrap();
        assert_eq!(registry.register(process(1)), Err(ExecError::AlreadyExists));
        assert_eq!(registry.count(), 1);
        assert!(registry.unregister(ProcessId::from_raw(1)).is_ok());
        assert!(registry.get(ProcessId::from_raw(1)).is_none());
    }
}
