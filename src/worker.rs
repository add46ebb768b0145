//! Managed worker threads with private standard streams
//!
//! A `ManagedWorker` runs its body on a new OS thread. Before the body runs,
//! each private stream the worker was given is bound into the matching
//! proxied slot for the worker's own context. When the body finishes, whether
//! it returns or panics, the bindings are removed and the private streams are
//! closed, except for streams that are the real OS stdin/stdout/stderr.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::error::StdioError;
use crate::stdio::{
    ContextId, Slot, StdioTable, StreamHandle, StreamProxy, close_input, close_output, global,
    is_real_standard_stream,
};

// ============================================================================
// Errors
// ============================================================================

/// A cleanup step that failed for one slot
#[derive(Debug)]
pub struct SlotFailure {
    pub slot: Slot,
    pub error: StdioError,
}

/// Every failure collected while tearing down a worker's IO
#[derive(Debug, thiserror::Error)]
#[error("Worker cleanup failed for {} slot(s)", .failures.len())]
pub struct CleanupError {
    pub failures: Vec<SlotFailure>,
}

impl CleanupError {
    pub fn failed_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.failures.iter().map(|failure| failure.slot)
    }
}

/// Error types for worker execution
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    /// The body panicked; cleanup still ran and may have failed too
    #[error("Worker panicked: {message}")]
    Panicked {
        message: String,
        cleanup: Option<CleanupError>,
    },

    #[error(transparent)]
    Cleanup(#[from] CleanupError),
}

// ============================================================================
// IO Registration
// ============================================================================

/// The bindings one worker holds in the proxied slots of a table
///
/// Released explicitly with [`IoRegistration::release`]; a registration that
/// is dropped unreleased cleans up in `Drop` and logs any failure.
#[derive(Debug)]
pub struct IoRegistration {
    identity: ContextId,
    bound: Vec<(Slot, Arc<StreamProxy>)>,
    released: bool,
}

impl IoRegistration {
    /// Bind the given private streams for the calling context
    ///
    /// Slots of `table` that are plain are skipped: the body will see the
    /// shared stream, whose lifetime belongs to its owner.
    pub fn setup(table: &StdioTable, streams: [Option<StreamHandle>; 3]) -> Self {
        let identity = ContextId::current();
        let mut bound = Vec::new();

        for (slot, stream) in Slot::ALL.into_iter().zip(streams) {
            let Some(stream) = stream else {
                continue;
            };
            match table.proxy(slot) {
                Some(proxy) => {
                    proxy.bind_for(identity, stream);
                    bound.push((slot, proxy));
                }
                None => trace!("IoRegistration: {} is not virtualized, skipping", slot),
            }
        }

        debug!(
            "IoRegistration: {} bound {} private stream(s)",
            identity,
            bound.len()
        );
        Self {
            identity,
            bound,
            released: false,
        }
    }

    pub fn identity(&self) -> ContextId {
        self.identity
    }

    /// Slots this registration holds a binding in
    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.bound.iter().map(|(slot, _)| *slot)
    }

    /// Close the private streams and remove every binding
    pub fn release(mut self) -> Result<(), CleanupError> {
        self.cleanup()
    }

    fn cleanup(&mut self) -> Result<(), CleanupError> {
        self.released = true;
        let mut failures = Vec::new();

        for (slot, proxy) in self.bound.drain(..) {
            // The stream to close is whatever is bound now, looked up before unbinding
            let stream = match proxy.resolve_for(self.identity) {
                Ok(stream) => stream,
                Err(error) => {
                    failures.push(SlotFailure { slot, error });
                    continue;
                }
            };

            if is_real_standard_stream(&stream, slot) {
                trace!("IoRegistration: keeping real {} open", slot);
            } else {
                let closed = match slot {
                    Slot::Input => close_input(&stream),
                    Slot::Output | Slot::Error => close_output(&stream),
                };
                if let Err(error) = closed {
                    failures.push(SlotFailure { slot, error });
                }
            }

            if let Err(error) = proxy.unbind_for(self.identity) {
                failures.push(SlotFailure { slot, error });
            }
        }

        debug!(
            "IoRegistration: {} released with {} failure(s)",
            self.identity,
            failures.len()
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CleanupError { failures })
        }
    }
}

impl Drop for IoRegistration {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.cleanup() {
            warn!("IoRegistration dropped without release: {}", e);
        }
    }
}

// ============================================================================
// Managed Worker
// ============================================================================

/// Builder for a worker thread that owns private standard streams
#[derive(Debug)]
pub struct ManagedWorker {
    table: Arc<StdioTable>,
    name: Option<String>,
    streams: [Option<StreamHandle>; 3],
}

impl Default for ManagedWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagedWorker {
    /// Worker bound against the process-wide table
    pub fn new() -> Self {
        Self::with_table(Arc::clone(global()))
    }

    pub fn with_table(table: Arc<StdioTable>) -> Self {
        Self {
            table,
            name: None,
            streams: [None, None, None],
        }
    }

    /// Thread name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn stdin(self, stream: impl Into<StreamHandle>) -> Self {
        self.stream(Slot::Input, stream)
    }

    pub fn stdout(self, stream: impl Into<StreamHandle>) -> Self {
        self.stream(Slot::Output, stream)
    }

    pub fn stderr(self, stream: impl Into<StreamHandle>) -> Self {
        self.stream(Slot::Error, stream)
    }

    /// Set the private stream for any slot
    pub fn stream(mut self, slot: Slot, stream: impl Into<StreamHandle>) -> Self {
        self.streams[slot.descriptor() as usize] = Some(stream.into());
        self
    }

    /// Start the body on a new thread
    pub fn spawn<F, T>(self, body: F) -> Result<WorkerHandle<T>, WorkerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut builder = thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }

        let Self { table, streams, .. } = self;
        let inner = builder
            .spawn(move || Self::run_body(&table, streams, body))
            .map_err(WorkerError::Spawn)?;

        Ok(WorkerHandle {
            identity: ContextId::of(inner.thread()),
            inner,
        })
    }

    /// Spawn and wait for the result
    pub fn run<F, T>(self, body: F) -> Result<T, WorkerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(body)?.join()
    }

    fn run_body<F, T>(
        table: &StdioTable,
        streams: [Option<StreamHandle>; 3],
        body: F,
    ) -> Result<T, WorkerError>
    where
        F: FnOnce() -> T,
    {
        let registration = IoRegistration::setup(table, streams);
        let outcome = panic::catch_unwind(AssertUnwindSafe(body));
        let cleanup = registration.release();

        match (outcome, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(WorkerError::Cleanup(e)),
            (Err(payload), cleanup) => Err(WorkerError::Panicked {
                message: panic_message(payload.as_ref()),
                cleanup: cleanup.err(),
            }),
        }
    }
}

/// Handle to a running managed worker
#[derive(Debug)]
pub struct WorkerHandle<T> {
    identity: ContextId,
    inner: JoinHandle<Result<T, WorkerError>>,
}

impl<T> WorkerHandle<T> {
    /// Identity the worker's bindings are keyed by
    pub fn identity(&self) -> ContextId {
        self.identity
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the body and its cleanup to finish
    pub fn join(self) -> Result<T, WorkerError> {
        match self.inner.join() {
            Ok(result) => result,
            Err(payload) => Err(WorkerError::Panicked {
                message: panic_message(payload.as_ref()),
                cleanup: None,
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdio::{ByteStream, MemoryStream, Pipe, StdStream};
    use crate::test_utils::fixtures::MemoryStdio;
    use std::io::{Read, Write};

    #[cfg(feature = "test-logging")]
    crate::setup_test_logging!();

    fn proxied_table() -> (Arc<MemoryStream>, Arc<StdioTable>) {
        let stdio = MemoryStdio::proxied("");
        (stdio.stdout, stdio.table)
    }

    /// Stream whose close always fails
    #[derive(Debug, Default)]
    struct UncloseableStream;

    impl ByteStream for UncloseableStream {
        fn read(&self, _buf: &mut [u8]) -> Result<usize, StdioError> {
            Ok(0)
        }
        fn write(&self, buf: &[u8]) -> Result<usize, StdioError> {
            Ok(buf.len())
        }
        fn flush(&self) -> Result<(), StdioError> {
            Ok(())
        }
        fn close(&self) -> Result<(), StdioError> {
            Err(StdioError::ResourceClose {
                what: "test stream",
                source: io::Error::other("refusing to close"),
            })
        }
        fn is_closed(&self) -> bool {
            false
        }
        fn descriptor(&self) -> Option<i32> {
            None
        }
    }

    #[test]
    fn test_private_output_is_captured_and_closed() {
        let (parent_out, table) = proxied_table();
        let private = Arc::new(MemoryStream::new());

        let handle = ManagedWorker::with_table(table.clone())
            .stdout(private.clone())
            .spawn({
                let table = table.clone();
                move || write!(table.writer(Slot::Output), "from worker").unwrap()
            })
            .unwrap();
        let identity = handle.identity();
        handle.join().unwrap();

        assert_eq!(private.contents_lossy(), "from worker");
        assert!(private.is_closed());
        assert!(parent_out.contents().is_empty());
        assert!(!parent_out.is_closed());

        let proxy = table.proxy(Slot::Output).unwrap();
        assert!(proxy.resolve_for(identity).unwrap_err().is_unbound());
        assert_eq!(proxy.binding_count(), 1);
    }

    #[test]
    fn test_real_stdout_is_not_closed() {
        let (_parent_out, table) = proxied_table();
        let real = Arc::new(StdStream::stdout());

        ManagedWorker::with_table(table.clone())
            .stdout(real.clone())
            .run(|| ())
            .unwrap();

        assert!(!real.is_closed());
        assert!(real.write(b"").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_private_stdin_pipe_closes_only_read_end() {
        let (_parent_out, table) = proxied_table();
        let pipe = Arc::new(Pipe::new().unwrap());
        pipe.output().write(b"line one\n").unwrap();
        pipe.output().close().unwrap();

        let text = ManagedWorker::with_table(table.clone())
            .stdin(pipe.clone())
            .run({
                let table = table.clone();
                move || {
                    let mut text = String::new();
                    table.reader().read_to_string(&mut text).unwrap();
                    text
                }
            })
            .unwrap();

        assert_eq!(text, "line one\n");
        assert!(pipe.input().is_closed());
    }

    #[test]
    fn test_pipe_output_keeps_read_end_for_parent() {
        let (_parent_out, table) = proxied_table();
        let reader = Arc::new(MemoryStream::new());
        let writer = Arc::new(MemoryStream::new());
        let pipe = Arc::new(Pipe::from_parts(reader.clone(), writer.clone()));

        ManagedWorker::with_table(table.clone())
            .stdout(pipe)
            .run(|| ())
            .unwrap();

        assert!(writer.is_closed());
        assert!(!reader.is_closed());
    }

    #[test]
    fn test_plain_slots_are_left_alone() {
        let MemoryStdio {
            stdout: shared,
            table,
            ..
        } = MemoryStdio::plain("");
        let private = Arc::new(MemoryStream::new());

        ManagedWorker::with_table(table.clone())
            .stdout(private.clone())
            .run({
                let table = table.clone();
                move || write!(table.writer(Slot::Output), "shared").unwrap()
            })
            .unwrap();

        assert_eq!(shared.contents_lossy(), "shared");
        assert!(private.contents().is_empty());
        assert!(!private.is_closed());
    }

    #[test]
    fn test_cleanup_runs_after_panic() {
        let (_parent_out, table) = proxied_table();
        let private = Arc::new(MemoryStream::new());

        let handle = ManagedWorker::with_table(table.clone())
            .stderr(private.clone())
            .spawn::<_, ()>(|| panic!("body failed"))
            .unwrap();
        let identity = handle.identity();
        let err = handle.join().unwrap_err();

        match err {
            WorkerError::Panicked { message, cleanup } => {
                assert_eq!(message, "body failed");
                assert!(cleanup.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(private.is_closed());
        assert!(!table.proxy(Slot::Error).unwrap().is_bound(identity));
    }

    #[test]
    fn test_panic_and_close_failure_are_both_reported() {
        let (_parent_out, table) = proxied_table();

        let handle = ManagedWorker::with_table(table.clone())
            .stdout(Arc::new(UncloseableStream))
            .spawn::<_, ()>(|| panic!("body failed"))
            .unwrap();
        let identity = handle.identity();
        let err = handle.join().unwrap_err();

        let WorkerError::Panicked { message, cleanup } = err else {
            panic!("expected panic, got {err:?}");
        };
        assert_eq!(message, "body failed");
        let cleanup = cleanup.expect("close failure should be reported with the panic");
        assert_eq!(cleanup.failed_slots().collect::<Vec<_>>(), vec![Slot::Output]);
        assert!(!table.proxy(Slot::Output).unwrap().is_bound(identity));
    }

    #[test]
    fn test_close_failure_does_not_stop_other_slots() {
        let (_parent_out, table) = proxied_table();
        let private_err = Arc::new(MemoryStream::new());

        let handle = ManagedWorker::with_table(table.clone())
            .stdout(Arc::new(UncloseableStream))
            .stderr(private_err.clone())
            .spawn(|| ())
            .unwrap();
        let identity = handle.identity();
        let err = handle.join().unwrap_err();

        let WorkerError::Cleanup(cleanup) = err else {
            panic!("expected cleanup failure, got {err:?}");
        };
        assert_eq!(cleanup.failed_slots().collect::<Vec<_>>(), vec![Slot::Output]);
        assert!(private_err.is_closed());
        for slot in [Slot::Output, Slot::Error] {
            assert!(!table.proxy(slot).unwrap().is_bound(identity));
        }
    }

    #[test]
    fn test_body_unbinding_itself_surfaces_unbound_identity() {
        let (_parent_out, table) = proxied_table();

        let err = ManagedWorker::with_table(table.clone())
            .stdout(StreamHandle::plain(MemoryStream::new()))
            .run({
                let table = table.clone();
                move || {
                    table.proxy(Slot::Output).unwrap().unbind().unwrap();
                }
            })
            .unwrap_err();

        let WorkerError::Cleanup(cleanup) = err else {
            panic!("expected cleanup failure, got {err:?}");
        };
        assert_eq!(cleanup.failures.len(), 1);
        assert!(cleanup.failures[0].error.is_unbound());
    }

    #[test]
    fn test_dropped_registration_still_cleans_up() {
        let (_parent_out, table) = proxied_table();
        let private = Arc::new(MemoryStream::new());

        let identity = thread::spawn({
            let table = table.clone();
            let private = private.clone();
            move || {
                let registration =
                    IoRegistration::setup(&table, [None, Some(private.into()), None]);
                assert_eq!(registration.slots().collect::<Vec<_>>(), vec![Slot::Output]);
                registration.identity()
            }
        })
        .join()
        .unwrap();

        assert!(private.is_closed());
        assert!(!table.proxy(Slot::Output).unwrap().is_bound(identity));
    }

    #[test]
    fn test_concurrent_workers_are_isolated() {
        let (parent_out, table) = proxied_table();

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let private = Arc::new(MemoryStream::new());
                let handle = ManagedWorker::with_table(table.clone())
                    .name(format!("worker-{i}"))
                    .stdout(private.clone())
                    .spawn({
                        let table = table.clone();
                        move || {
                            let mut out = table.writer(Slot::Output);
                            for line in 0..50 {
                                writeln!(out, "{i}:{line}").unwrap();
                            }
                        }
                    })
                    .unwrap();
                (i, private, handle)
            })
            .collect();

        for (i, private, handle) in workers {
            handle.join().unwrap();
            let text = private.contents_lossy();
            assert_eq!(text.lines().count(), 50);
            assert!(text.lines().all(|line| line.starts_with(&format!("{i}:"))));
        }
        assert!(parent_out.contents().is_empty());
        assert_eq!(table.proxy(Slot::Output).unwrap().binding_count(), 1);
    }
}
