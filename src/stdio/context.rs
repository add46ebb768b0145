//! Execution-context identity
//!
//! Bindings are keyed by the OS thread that performs the lookup. The standard
//! library guarantees a `ThreadId` is never handed out twice during the life of
//! the process, so a binding left behind by a finished worker can never be
//! picked up by an unrelated thread.

use std::fmt;
use std::thread::{self, ThreadId};

/// Identity of the execution context a stream lookup is performed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(ThreadId);

impl ContextId {
    /// Identity of the calling thread
    pub fn current() -> Self {
        Self(thread::current().id())
    }

    /// Identity of an arbitrary thread
    pub fn of(thread: &thread::Thread) -> Self {
        Self(thread.id())
    }
}

impl From<ThreadId> for ContextId {
    fn from(id: ThreadId) -> Self {
        Self(id)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_is_stable_within_thread() {
        assert_eq!(ContextId::current(), ContextId::current());
    }

    #[test]
    fn test_distinct_threads_have_distinct_ids() {
        let here = ContextId::current();
        let there = thread::spawn(ContextId::current).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_finished_thread_ids_are_not_reused() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..32 {
            let id = thread::spawn(ContextId::current).join().unwrap();
            assert!(seen.insert(id), "identity {id} was handed out twice");
        }
    }
}
