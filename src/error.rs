//! Error types for stream virtualization
//!
//! Groups the failures the proxy, pipe and stream layers can surface. Worker
//! and file-opening failures live next to their modules and wrap these.

use std::io;

use crate::stdio::{ContextId, Slot};

/// Errors raised by stream objects, pipes and proxies
#[derive(Debug, thiserror::Error)]
pub enum StdioError {
    /// `resolve`/`unbind` on a context that has no binding
    #[error("No {slot} binding for execution context {identity}")]
    UnboundIdentity { slot: Slot, identity: ContextId },

    /// Read, write or flush on a stream that was already closed
    #[error("Stream is closed")]
    Closed,

    /// Closing a stream or pipe endpoint failed at the OS level
    #[error("Failed to close {what}: {source}")]
    ResourceClose {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StdioError {
    /// Whether this error reports a missing binding
    pub fn is_unbound(&self) -> bool {
        matches!(self, StdioError::UnboundIdentity { .. })
    }
}

impl From<StdioError> for io::Error {
    fn from(error: StdioError) -> Self {
        match error {
            StdioError::Io(e) => e,
            StdioError::ResourceClose { source, .. } => source,
            StdioError::Closed => io::Error::new(io::ErrorKind::BrokenPipe, error.to_string()),
            StdioError::UnboundIdentity { .. } => {
                io::Error::new(io::ErrorKind::NotFound, error.to_string())
            }
        }
    }
}
