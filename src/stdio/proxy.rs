//! Per-context stream proxy
//!
//! A `StreamProxy` stands in for one of the process-wide standard streams.
//! Every operation on it is routed to the stream bound for the calling
//! execution context, so a single global reference can serve many concurrent
//! owners without any call site knowing.

use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::error::StdioError;
use crate::stdio::context::ContextId;
use crate::stdio::stream::StreamHandle;
use crate::stdio::table::Slot;

/// Stand-in for a standard stream that dispatches by execution context
#[derive(Debug)]
pub struct StreamProxy {
    slot: Slot,
    /// At most one binding per context
    bindings: Mutex<HashMap<ContextId, StreamHandle>>,
}

impl StreamProxy {
    /// Create a proxy whose only binding is `initial` for the calling context
    pub fn new(slot: Slot, initial: StreamHandle) -> Self {
        let proxy = Self {
            slot,
            bindings: Mutex::new(HashMap::new()),
        };
        proxy.bind(initial);
        proxy
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Bind `stream` for the calling context, replacing any earlier binding
    pub fn bind(&self, stream: StreamHandle) -> Option<StreamHandle> {
        self.bind_for(ContextId::current(), stream)
    }

    /// Bind `stream` for `identity`, returning the binding it replaced
    pub fn bind_for(&self, identity: ContextId, stream: StreamHandle) -> Option<StreamHandle> {
        trace!("StreamProxy({}): bind {}", self.slot, identity);
        self.lock().insert(identity, stream)
    }

    /// Remove the calling context's binding
    pub fn unbind(&self) -> Result<StreamHandle, StdioError> {
        self.unbind_for(ContextId::current())
    }

    /// Remove the binding for `identity`, returning the stream that was bound
    pub fn unbind_for(&self, identity: ContextId) -> Result<StreamHandle, StdioError> {
        trace!("StreamProxy({}): unbind {}", self.slot, identity);
        self.lock()
            .remove(&identity)
            .ok_or(StdioError::UnboundIdentity {
                slot: self.slot,
                identity,
            })
    }

    /// Stream bound for the calling context
    pub fn resolve(&self) -> Result<StreamHandle, StdioError> {
        self.resolve_for(ContextId::current())
    }

    /// Stream bound for `identity`
    pub fn resolve_for(&self, identity: ContextId) -> Result<StreamHandle, StdioError> {
        self.lock()
            .get(&identity)
            .cloned()
            .ok_or(StdioError::UnboundIdentity {
                slot: self.slot,
                identity,
            })
    }

    pub fn is_bound(&self, identity: ContextId) -> bool {
        self.lock().contains_key(&identity)
    }

    /// Number of live bindings
    pub fn binding_count(&self) -> usize {
        self.lock().len()
    }

    /// Read through the calling context's binding
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, StdioError> {
        // The lock is released before the potentially blocking read
        self.resolve()?.read(buf)
    }

    /// Write through the calling context's binding
    pub fn write(&self, buf: &[u8]) -> Result<usize, StdioError> {
        self.resolve()?.write(buf)
    }

    pub fn flush(&self) -> Result<(), StdioError> {
        self.resolve()?.flush()
    }

    /// Descriptor of the calling context's binding
    pub fn descriptor(&self) -> Result<Option<i32>, StdioError> {
        Ok(self.resolve()?.descriptor_for(self.slot))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ContextId, StreamHandle>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl io::Read for &StreamProxy {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(StreamProxy::read(self, buf)?)
    }
}

impl io::Write for &StreamProxy {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(StreamProxy::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(StreamProxy::flush(self)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
