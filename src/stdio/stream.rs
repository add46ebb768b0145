//! Stream objects that can be bound into a proxy slot
//!
//! Every stream is used through a shared reference because the same object is
//! reachable from the worker that owns it and from the proxy it is bound into.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::trace;

use crate::error::StdioError;
use crate::stdio::pipe::Pipe;
use crate::stdio::table::Slot;

// ============================================================================
// Byte Stream Trait
// ============================================================================

/// A readable and/or writable byte stream with an explicit close
pub trait ByteStream: fmt::Debug + Send + Sync {
    /// Read into `buf`, returning 0 at end of stream
    fn read(&self, buf: &mut [u8]) -> Result<usize, StdioError>;

    /// Write from `buf`, returning the number of bytes accepted
    fn write(&self, buf: &[u8]) -> Result<usize, StdioError>;

    fn flush(&self) -> Result<(), StdioError>;

    /// Release the stream. Closing twice is a no-op.
    fn close(&self) -> Result<(), StdioError>;

    fn is_closed(&self) -> bool;

    /// OS descriptor backing this stream, if any
    fn descriptor(&self) -> Option<i32>;
}

// ============================================================================
// Memory Stream
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    data: Vec<u8>,
    read_pos: usize,
    closed: bool,
}

/// In-memory stream: writes append, reads consume from the front
#[derive(Debug, Default)]
pub struct MemoryStream {
    state: Mutex<MemoryState>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream pre-filled with `data`, typically used as a private stdin
    pub fn with_contents(data: impl Into<Vec<u8>>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                data: data.into(),
                ..MemoryState::default()
            }),
        }
    }

    /// Everything written so far, including bytes already read
    ///
    /// Still available after the stream is closed.
    pub fn contents(&self) -> Vec<u8> {
        self.lock().data.clone()
    }

    /// Lossy UTF-8 view of [`MemoryStream::contents`]
    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&self.lock().data).into_owned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ByteStream for MemoryStream {
    fn read(&self, buf: &mut [u8]) -> Result<usize, StdioError> {
        let mut state = self.lock();
        if state.closed {
            return Err(StdioError::Closed);
        }
        let available = &state.data[state.read_pos..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        state.read_pos += count;
        Ok(count)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, StdioError> {
        let mut state = self.lock();
        if state.closed {
            return Err(StdioError::Closed);
        }
        state.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&self) -> Result<(), StdioError> {
        if self.lock().closed {
            return Err(StdioError::Closed);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StdioError> {
        self.lock().closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn descriptor(&self) -> Option<i32> {
        None
    }
}

// ============================================================================
// File Stream
// ============================================================================

/// Stream over an owned OS descriptor (file or pipe endpoint)
///
/// Reads, writes and flushes hold a shared lock on the descriptor for their
/// whole duration. A `close` from another thread therefore waits until a
/// blocking read on the same stream returns (for a pipe read end, until the
/// writer sends data or closes its end).
#[derive(Debug)]
pub struct FileStream {
    /// `None` once closed
    file: RwLock<Option<File>>,
    descriptor: Option<i32>,
}

impl FileStream {
    pub fn new(file: File) -> Self {
        Self {
            descriptor: raw_descriptor(&file),
            file: RwLock::new(Some(file)),
        }
    }

    fn with_file<T>(&self, op: impl FnOnce(&File) -> io::Result<T>) -> Result<T, StdioError> {
        let guard = self.file.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(file) => Ok(op(file)?),
            None => Err(StdioError::Closed),
        }
    }
}

impl From<File> for FileStream {
    fn from(file: File) -> Self {
        Self::new(file)
    }
}

impl ByteStream for FileStream {
    fn read(&self, buf: &mut [u8]) -> Result<usize, StdioError> {
        self.with_file(|mut file| file.read(buf))
    }

    fn write(&self, buf: &[u8]) -> Result<usize, StdioError> {
        self.with_file(|mut file| file.write(buf))
    }

    fn flush(&self) -> Result<(), StdioError> {
        self.with_file(|mut file| file.flush())
    }

    fn close(&self) -> Result<(), StdioError> {
        let taken = self
            .file
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(file) => {
                trace!("FileStream: closing descriptor {:?}", self.descriptor);
                release_file(file).map_err(|source| StdioError::ResourceClose {
                    what: "file descriptor",
                    source,
                })
            }
            None => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.file
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn descriptor(&self) -> Option<i32> {
        self.descriptor
    }
}

#[cfg(unix)]
fn raw_descriptor(file: &File) -> Option<i32> {
    use std::os::fd::AsRawFd;
    Some(file.as_raw_fd())
}

#[cfg(not(unix))]
fn raw_descriptor(_file: &File) -> Option<i32> {
    None
}

/// Close the descriptor explicitly so the OS error is not lost in `Drop`
#[cfg(unix)]
fn release_file(file: File) -> io::Result<()> {
    use std::os::fd::IntoRawFd;
    let fd = file.into_raw_fd();
    // SAFETY: `fd` was just released from an owning `File` and is closed exactly once.
    if unsafe { libc::close(fd) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn release_file(file: File) -> io::Result<()> {
    drop(file);
    Ok(())
}

// ============================================================================
// Real Standard Streams
// ============================================================================

/// The process's real stdin, stdout or stderr
///
/// Closing only marks this handle closed. The OS descriptor belongs to the
/// process and stays open.
#[derive(Debug)]
pub struct StdStream {
    slot: Slot,
    closed: AtomicBool,
}

impl StdStream {
    pub fn stdin() -> Self {
        Self::for_slot(Slot::Input)
    }

    pub fn stdout() -> Self {
        Self::for_slot(Slot::Output)
    }

    pub fn stderr() -> Self {
        Self::for_slot(Slot::Error)
    }

    pub fn for_slot(slot: Slot) -> Self {
        Self {
            slot,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), StdioError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StdioError::Closed);
        }
        Ok(())
    }

    fn unsupported(&self, op: &str) -> StdioError {
        StdioError::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{op} is not supported on standard {}", self.slot),
        ))
    }
}

impl ByteStream for StdStream {
    fn read(&self, buf: &mut [u8]) -> Result<usize, StdioError> {
        self.ensure_open()?;
        match self.slot {
            Slot::Input => Ok(io::stdin().lock().read(buf)?),
            Slot::Output | Slot::Error => Err(self.unsupported("read")),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, StdioError> {
        self.ensure_open()?;
        match self.slot {
            Slot::Input => Err(self.unsupported("write")),
            Slot::Output => Ok(io::stdout().lock().write(buf)?),
            Slot::Error => Ok(io::stderr().lock().write(buf)?),
        }
    }

    fn flush(&self) -> Result<(), StdioError> {
        self.ensure_open()?;
        match self.slot {
            Slot::Input => Ok(()),
            Slot::Output => Ok(io::stdout().flush()?),
            Slot::Error => Ok(io::stderr().flush()?),
        }
    }

    fn close(&self) -> Result<(), StdioError> {
        if self.slot == Slot::Output && !self.closed.load(Ordering::Acquire) {
            io::stdout().flush()?;
        }
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn descriptor(&self) -> Option<i32> {
        Some(self.slot.descriptor())
    }
}

// ============================================================================
// Stream Handle
// ============================================================================

/// A concrete stream as stored in a slot or a proxy binding
///
/// Pipes are kept distinct from plain streams so the selective-close helpers
/// can tell which endpoint to release.
#[derive(Debug, Clone)]
pub enum StreamHandle {
    Plain(Arc<dyn ByteStream>),
    Pipe(Arc<Pipe>),
}

impl StreamHandle {
    pub fn plain<S: ByteStream + 'static>(stream: S) -> Self {
        StreamHandle::Plain(Arc::new(stream))
    }

    pub fn pipe(pipe: Pipe) -> Self {
        StreamHandle::Pipe(Arc::new(pipe))
    }

    /// Reads come from the input endpoint of a pipe
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, StdioError> {
        match self {
            StreamHandle::Plain(stream) => stream.read(buf),
            StreamHandle::Pipe(pipe) => pipe.input().read(buf),
        }
    }

    /// Writes go to the output endpoint of a pipe
    pub fn write(&self, buf: &[u8]) -> Result<usize, StdioError> {
        match self {
            StreamHandle::Plain(stream) => stream.write(buf),
            StreamHandle::Pipe(pipe) => pipe.output().write(buf),
        }
    }

    pub fn flush(&self) -> Result<(), StdioError> {
        match self {
            StreamHandle::Plain(stream) => stream.flush(),
            StreamHandle::Pipe(pipe) => pipe.output().flush(),
        }
    }

    /// Descriptor this handle presents when it sits in `slot`
    pub fn descriptor_for(&self, slot: Slot) -> Option<i32> {
        match (self, slot) {
            (StreamHandle::Plain(stream), _) => stream.descriptor(),
            (StreamHandle::Pipe(pipe), Slot::Input) => pipe.input().descriptor(),
            (StreamHandle::Pipe(pipe), Slot::Output | Slot::Error) => pipe.output().descriptor(),
        }
    }

    pub fn is_pipe(&self) -> bool {
        matches!(self, StreamHandle::Pipe(_))
    }

    /// Whether both handles refer to the same underlying object
    pub fn same_as(&self, other: &StreamHandle) -> bool {
        match (self, other) {
            (StreamHandle::Plain(a), StreamHandle::Plain(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (StreamHandle::Pipe(a), StreamHandle::Pipe(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<S: ByteStream + 'static> From<Arc<S>> for StreamHandle {
    fn from(stream: Arc<S>) -> Self {
        StreamHandle::Plain(stream)
    }
}

impl From<Arc<Pipe>> for StreamHandle {
    fn from(pipe: Arc<Pipe>) -> Self {
        StreamHandle::Pipe(pipe)
    }
}

// ============================================================================
// Tests
// ============================================================================
