//! Stream virtualization core
//!
//! - **Context**: execution-context identity used as the binding key
//! - **Stream**: concrete stream objects and the tagged `StreamHandle`
//! - **Pipe**: paired endpoints with selective close
//! - **Proxy**: per-context dispatch for one standard stream
//! - **Table**: the process-wide stdin/stdout/stderr slots

pub mod context;
pub mod pipe;
pub mod platform;
pub mod proxy;
pub mod stream;
pub mod table;

// Re-export main types for convenience
pub use context::ContextId;
pub use pipe::{Pipe, close_input, close_output};
pub use platform::is_real_standard_stream;
pub use proxy::StreamProxy;
pub use stream::{ByteStream, FileStream, MemoryStream, StdStream, StreamHandle};
pub use table::{Slot, SlotReader, SlotState, SlotWriter, StdioTable, global, stderr, stdin, stdout};
