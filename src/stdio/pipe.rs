//! Half-duplex pipes and the selective-close helpers
//!
//! The two ends of a pipe usually have different owners, so the helpers here
//! close only the end the caller is responsible for. A plain stream has a
//! single owner and is closed fully.

use std::sync::Arc;

use tracing::trace;

use crate::error::StdioError;
use crate::stdio::stream::{ByteStream, StreamHandle};

/// One pipe with independently closable endpoints
#[derive(Debug)]
pub struct Pipe {
    /// Read end
    input: Arc<dyn ByteStream>,
    /// Write end
    output: Arc<dyn ByteStream>,
}

impl Pipe {
    /// Create a connected OS pipe
    #[cfg(unix)]
    pub fn new() -> Result<Self, StdioError> {
        use crate::stdio::stream::FileStream;
        use std::fs::File;
        use std::os::fd::FromRawFd;

        let mut fds: [libc::c_int; 2] = [-1, -1];
        // SAFETY: `fds` has room for the two descriptors `pipe` writes.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
            return Err(std::io::Error::last_os_error().into());
        }
        // SAFETY: both descriptors are freshly created and owned by nothing else.
        let (reader, writer) = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
        trace!("Pipe: created read={} write={}", fds[0], fds[1]);

        Ok(Self {
            input: Arc::new(FileStream::new(reader)),
            output: Arc::new(FileStream::new(writer)),
        })
    }

    #[cfg(not(unix))]
    pub fn new() -> Result<Self, StdioError> {
        Err(StdioError::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "OS pipes are only available on unix targets",
        )))
    }

    /// Pair two existing streams as the ends of a pipe
    pub fn from_parts(input: Arc<dyn ByteStream>, output: Arc<dyn ByteStream>) -> Self {
        Self { input, output }
    }

    pub fn input(&self) -> &dyn ByteStream {
        self.input.as_ref()
    }

    pub fn output(&self) -> &dyn ByteStream {
        self.output.as_ref()
    }

    /// Close both endpoints
    ///
    /// The output end is closed even when closing the input end fails; the
    /// first failure is returned.
    pub fn close(&self) -> Result<(), StdioError> {
        let input = self.input.close();
        let output = self.output.close();
        input.and(output)
    }
}

/// Close the read side of `stream`
///
/// For a pipe only its input endpoint is closed; anything else is closed fully.
pub fn close_input(stream: &StreamHandle) -> Result<(), StdioError> {
    match stream {
        StreamHandle::Pipe(pipe) => {
            trace!("close_input: closing pipe read end");
            pipe.input.close()
        }
        StreamHandle::Plain(plain) => plain.close(),
    }
}

/// Close the write side of `stream`
///
/// For a pipe only its output endpoint is closed; anything else is closed fully.
pub fn close_output(stream: &StreamHandle) -> Result<(), StdioError> {
    match stream {
        StreamHandle::Pipe(pipe) => {
            trace!("close_output: closing pipe write end");
            pipe.output.close()
        }
        StreamHandle::Plain(plain) => plain.close(),
    }
}
