//! Encoding-safe text files
//!
//! - **Encoding**: BOM sniffing, incremental detection and transcoding
//! - **Safe open**: opening a file bound to its detected encoding

pub mod encoding;
pub mod safe_open;

pub use encoding::{Detection, EncodingDetector, TextEncoding, sniff_bom};
pub use safe_open::{OpenMode, SafeFile, SafeOpenError, safe_open};
