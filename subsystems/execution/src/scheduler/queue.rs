//! # Thread Queues
//!
//! The ready and blocked queues. Each queue stamps its tag on the threads
//! it holds, which is what makes double membership detectable.

use crate::thread::Thread;
use crate::ThreadId;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use static_assertions::const_assert_eq;

/// Which queue holds a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueueTag {
    /// On no queue (running, exited, or in transit)
    None = 0,
    /// Ready queue
    Ready = 1,
    /// Blocked queue
    Blocked = 2,
}

// Stored in the thread's `AtomicU8`.
const_assert_eq!(core::mem::size_of::<QueueTag>(), 1);

impl QueueTag {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => QueueTag::Ready,
            2 => QueueTag::Blocked,
            _ => QueueTag::None,
        }
    }
}

/// FIFO of threads
pub struct ThreadQueue {
    tag: QueueTag,
    queue: VecDeque<Arc<Thread>>,
}

impl ThreadQueue {
    /// Create an empty queue that stamps `tag` on its members
    pub const fn new(tag: QueueTag) -> Self {
        Self {
            tag,
            queue: VecDeque::new(),
        }
    }

    /// Insert at the tail
    ///
    /// # Panics
    /// If the thread is already on a queue.
    pub fn push_back(&mut self, thread: Arc<Thread>) {
        let held = thread.queue_tag();
        assert!(
            held == QueueTag::None,
            "{} inserted into {:?} queue while on {:?} queue",
            thread.id(),
            self.tag,
            held
        );
        thread.set_queue_tag(self.tag);
        self.queue.push_back(thread);
    }

    /// Remove the head
    pub fn pop_front(&mut self) -> Option<Arc<Thread>> {
        let thread = self.queue.pop_front()?;
        thread.set_queue_tag(QueueTag::None);
        Some(thread)
    }

    /// Remove a thread by ID
    pub fn remove(&mut self, id: ThreadId) -> Option<Arc<Thread>> {
        let pos = self.queue.iter().position(|t| t.id() == id)?;
        let thread = self.queue.remove(pos)?;
        thread.set_queue_tag(QueueTag::None);
        Some(thread)
    }

    /// Remove every thread matching `pred`, keeping queue order
    pub fn drain_where(&mut self, mut pred: impl FnMut(&Thread) -> bool) -> Vec<Arc<Thread>> {
        let mut taken = Vec::new();
        self.queue.retain(|t| {
            if pred(&**t) {
                taken.push(t.clone());
                false
            } else {
                true
            }
        });
        for thread in &taken {
            thread.set_queue_tag(QueueTag::None);
        }
        taken
    }

    /// Search by ID
    pub fn find(&self, id: ThreadId) -> Option<&Arc<Thread>> {
        self.queue.iter().find(|t| t.id() == id)
    }

    /// Whether a thread is queued here
    pub fn contains(&self, id: ThreadId) -> bool {
        self.find(id).is_some()
    }

    /// IDs in queue order
    pub fn ids(&self) -> Vec<ThreadId> {
        self.queue.iter().map(|t| t.id()).collect()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Get length
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AddressSpace;
    use crate::process::Process;
    use crate::thread::ThreadState;
    use crate::ProcessId;
    use kestrel_hal::{PhysAddr, UserRegisters};

    fn threads(n: u32) -> (Arc<Process>, Vec<Arc<Thread>>) {
        let process = Arc::new(Process::new(
            ProcessId::from_raw(1),
            "p",
            None,
            AddressSpace::new(PhysAddr::new(0x1000)),
        ));
        let threads = (1..=n)
            .map(|i| {
                Arc::new(Thread::new(ThreadId::from_raw(i), &process, UserRegisters::default(), 256).unwrap())
            })
            .collect();
        (process, threads)
    }

    #[test]
    fn test_fifo_order_and_tags() {
        let (_p, t) = threads(3);
        let mut ready = ThreadQueue::new(QueueTag::Ready);
        for thread in &t {
            ready.push_back(thread.clone());
        }
        assert_eq!(t[0].queue_tag(), QueueTag::Ready);

        let head = ready.pop_front().unwrap();
        assert_eq!(head.id(), t[0].id());
        assert_eq!(head.queue_tag(), QueueTag::None);

        let middle = ready.remove(t[2].id()).unwrap();
        assert_eq!(middle.queue_tag(), QueueTag::None);
        assert_eq!(ready.ids(), vec![t[1].id()]);
        assert!(ready.remove(t[2].id()).is_none());
    }

    #[test]
    fn test_drain_where_keeps_order() {
        let (_p, t) = threads(4);
        let mut blocked = ThreadQueue::new(QueueTag::Blocked);
        for (i, thread) in t.iter().enumerate() {
            if i % 2 == 0 {
                thread.set_state(ThreadState::Sleeping);
            }
            blocked.push_back(thread.clone());
        }

        let woken = blocked.drain_where(|t| t.state() == ThreadState::Sleeping);
        let ids: Vec<_> = woken.iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![t[0].id(), t[2].id()]);
        assert!(woken.iter().all(|t| t.queue_tag() == QueueTag::None));
        assert_eq!(blocked.ids(), vec![t[1].id(), t[3].id()]);
    }

    #[test]
    #[should_panic(expected = "while on Ready queue")]
    fn test_double_membership_is_fatal() {
        let (_p, t) = threads(1);
        let mut ready = ThreadQueue::new(QueueTag::Ready);
        let mut blocked = ThreadQueue::new(QueueTag::Blocked);
        ready.push_back(t[0].clone());
        blocked.push_back(t[0].clone());
    }
}
