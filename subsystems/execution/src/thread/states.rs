//! # Thread States
//!
//! Thread state machine definition.

use crate::scheduler::queue::QueueTag;
use static_assertions::const_assert_eq;

/// Thread state (unit-only for atomic storage)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ThreadState {
    /// Created, never run; first dispatch enters user mode directly
    #[default]
    Init = 0,
    /// Currently executing
    Running = 1,
    /// Ready to run
    Runnable = 2,
    /// Descheduled by its own request
    Blocked = 3,
    /// Waiting for a child process to exit
    Waiting = 4,
    /// Sleeping until a tick deadline
    Sleeping = 5,
    /// Waiting for a signal
    SignalBlocked = 6,
    /// Waiting for console input
    InputBlocked = 7,
    /// Terminated, waiting to be reaped
    Exited = 8,
}

const_assert_eq!(core::mem::size_of::<ThreadState>(), core::mem::size_of::<u32>());

impl ThreadState {
    /// Convert from u32
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Init),
            1 => Some(Self::Running),
            2 => Some(Self::Runnable),
            3 => Some(Self::Blocked),
            4 => Some(Self::Waiting),
            5 => Some(Self::Sleeping),
            6 => Some(Self::SignalBlocked),
            7 => Some(Self::InputBlocked),
            8 => Some(Self::Exited),
            _ => None,
        }
    }

    /// Convert to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Check if thread can be dispatched
    pub fn is_runnable(&self) -> bool {
        matches!(self, ThreadState::Init | ThreadState::Runnable)
    }

    /// Check if thread is waiting for an external wakeup
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            ThreadState::Blocked
                | ThreadState::Waiting
                | ThreadState::Sleeping
                | ThreadState::SignalBlocked
                | ThreadState::InputBlocked
        )
    }

    /// Check if thread is terminated
    pub fn is_exited(&self) -> bool {
        matches!(self, ThreadState::Exited)
    }

    /// The queue a thread in this state belongs to while not running
    ///
    /// `Running` and `Exited` threads are on no queue.
    pub fn home_queue(&self) -> QueueTag {
        if self.is_runnable() {
            QueueTag::Ready
        } else if self.is_blocked() {
            QueueTag::Blocked
        } else {
            QueueTag::None
        }
    }
}

/// Reason for blocking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Explicit deschedule
    Deschedule,
    /// Waiting for child process
    Child,
    /// Waiting for timer
    Timer,
    /// Waiting for console input
    Input,
    /// Waiting for a signal
    Signal,
}

impl BlockReason {
    /// State a thread blocked for this reason is in
    pub fn state(self) -> ThreadState {
        match self {
            BlockReason::Deschedule => ThreadState::Blocked,
            BlockReason::Child => ThreadState::Waiting,
            BlockReason::Timer => ThreadState::Sleeping,
            BlockReason::Input => ThreadState::InputBlocked,
            BlockReason::Signal => ThreadState::SignalBlocked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_round_trip_covers_every_state() {
        for raw in 0..9 {
            let state = ThreadState::from_u32(raw).unwrap();
            assert_eq!(state.as_u32(), raw);
        }
        assert_eq!(ThreadState::from_u32(9), None);
    }

    #[test]
    fn test_home_queue_mapping() {
        assert_eq!(ThreadState::Init.home_queue(), QueueTag::Ready);
        assert_eq!(ThreadState::Runnable.home_queue(), QueueTag::Ready);
        assert_eq!(ThreadState::Running.home_queue(), QueueTag::None);
        assert_eq!(ThreadState::Exited.home_queue(), QueueTag::None);
        for blocked in [
            ThreadState::Blocked,
            ThreadState::Waiting,
            ThreadState::Sleeping,
            ThreadState::SignalBlocked,
            ThreadState::InputBlocked,
        ] {
            assert_eq!(blocked.home_queue(), QueueTag::Blocked);
        }
    }

    #[test]
    fn test_block_reason_states() {
        assert_eq!(BlockReason::Child.state(), ThreadState::Waiting);
        assert_eq!(BlockReason::Input.state(), ThreadState::InputBlocked);
        assert!(BlockReason::Signal.state().is_blocked());
    }
}
