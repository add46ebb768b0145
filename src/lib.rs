//! Per-thread virtualization of the standard streams
//!
//! Code that writes to "stdout" through [`stdio::stdout`] (or reads
//! [`stdio::stdin`], or writes [`stdio::stderr`]) keeps working unchanged when
//! several workers each need their own copy of those streams:
//!
//! - [`stdio::StreamProxy`] routes every operation to the stream bound for the
//!   calling thread
//! - [`worker::ManagedWorker`] binds a worker's private streams around its body
//!   and tears them down afterwards, never closing the real OS streams
//! - [`stdio::Pipe`] and the `close_input`/`close_output` helpers close only the
//!   endpoint a caller owns
//! - [`text::safe_open`] opens a file bound to its detected encoding with any
//!   byte-order mark already skipped

pub mod completion;
pub mod error;
pub mod logging;
pub mod stdio;
pub mod text;
pub mod worker;

#[cfg(test)]
mod test_utils;

pub use error::StdioError;
pub use stdio::{Pipe, Slot, StdioTable, StreamHandle, StreamProxy, global};
pub use text::{OpenMode, SafeFile, safe_open};
pub use worker::{ManagedWorker, WorkerError, WorkerHandle};
