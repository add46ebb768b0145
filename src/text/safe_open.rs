//! Encoding-aware file opening
//!
//! [`safe_open`] sniffs a file's encoding before handing it back, and skips a
//! leading byte-order mark so readers never see one.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::text::encoding::{
    DETECTION_CHUNK_SIZE, EncodingDetector, TextDecoder, TextEncoding, sniff_bom,
};

// ============================================================================
// Errors
// ============================================================================

/// Error types for encoding-aware file opening
#[derive(Debug, thiserror::Error)]
pub enum SafeOpenError {
    #[error("Cannot open {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid open mode: {0:?}")]
    InvalidMode(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Open Mode
// ============================================================================

/// How the returned handle is opened, after the conventional mode strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// `r`
    #[default]
    Read,
    /// `r+`
    ReadWrite,
    /// `w`: truncate or create
    Write,
    /// `w+`
    WriteRead,
    /// `a`: append, create if missing
    Append,
    /// `a+`
    AppendRead,
}

impl OpenMode {
    pub fn reads(self) -> bool {
        matches!(
            self,
            OpenMode::Read | OpenMode::ReadWrite | OpenMode::WriteRead | OpenMode::AppendRead
        )
    }

    pub fn truncates(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::WriteRead)
    }

    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            OpenMode::Read => options.read(true),
            OpenMode::ReadWrite => options.read(true).write(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::WriteRead => options.read(true).write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true).create(true),
            OpenMode::AppendRead => options.read(true).append(true).create(true),
        };
        options
    }
}

impl FromStr for OpenMode {
    type Err = SafeOpenError;

    /// Accepts `r`, `r+`, `w`, `w+`, `a`, `a+`; a `t` text marker is ignored
    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        let normalized: String = mode.chars().filter(|c| *c != 't').collect();
        match normalized.as_str() {
            "r" => Ok(OpenMode::Read),
            "r+" => Ok(OpenMode::ReadWrite),
            "w" => Ok(OpenMode::Write),
            "w+" => Ok(OpenMode::WriteRead),
            "a" => Ok(OpenMode::Append),
            "a+" => Ok(OpenMode::AppendRead),
            _ => Err(SafeOpenError::InvalidMode(mode.to_string())),
        }
    }
}

// ============================================================================
// Safe Open
// ============================================================================

/// Open `path` with its encoding detected and any BOM already consumed
///
/// Low detection confidence is not an error: the detector's best guess is used.
pub fn safe_open(path: impl AsRef<Path>, mode: OpenMode) -> Result<SafeFile, SafeOpenError> {
    let path = path.as_ref();
    let access = |source: io::Error| SafeOpenError::FileAccess {
        path: path.to_path_buf(),
        source,
    };

    let mut raw = File::open(path).map_err(access)?;
    let mut detector = EncodingDetector::new();
    let mut chunk = vec![0u8; DETECTION_CHUNK_SIZE];
    let mut first: Option<Vec<u8>> = None;
    loop {
        let n = raw.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        if first.is_none() {
            first = Some(chunk[..n].to_vec());
        }
        if detector.feed(&chunk[..n]) {
            break;
        }
    }
    drop(raw);

    let Some(first) = first else {
        debug!("safe_open: {} is empty, opening without encoding", path.display());
        let file = mode.options().open(path).map_err(access)?;
        return Ok(SafeFile::new(file, None, 0));
    };

    let detection = detector.finish();
    debug!(
        "safe_open: {} detected as {} (confident: {})",
        path.display(),
        detection.encoding.name(),
        detection.confident
    );

    let mut file = mode.options().open(path).map_err(access)?;
    // A truncated file has no BOM left to skip
    let bom_len = match sniff_bom(&first) {
        Some((_, len)) if !mode.truncates() => {
            file.seek(SeekFrom::Start(len as u64))?;
            len
        }
        _ => 0,
    };

    Ok(SafeFile::new(file, Some(detection.encoding), bom_len))
}

// ============================================================================
// Safe File
// ============================================================================

/// A file handle bound to one text encoding
///
/// Reading yields UTF-8 decoded from the file's encoding; writing takes UTF-8
/// and stores it in the file's encoding at the current OS file position.
#[derive(Debug)]
pub struct SafeFile {
    file: File,
    encoding: Option<TextEncoding>,
    bom_len: usize,
    decoder: TextDecoder,
    /// Decoded text not yet handed to the reader
    decoded: Vec<u8>,
    decoded_pos: usize,
    raw_eof: bool,
    /// Tail of an incomplete UTF-8 sequence from the previous write
    pending_utf8: Vec<u8>,
}

impl SafeFile {
    fn new(file: File, encoding: Option<TextEncoding>, bom_len: usize) -> Self {
        let codec = encoding.unwrap_or_else(TextEncoding::utf8);
        Self {
            file,
            encoding,
            bom_len,
            decoder: codec.new_decoder(),
            decoded: Vec::new(),
            decoded_pos: 0,
            raw_eof: false,
            pending_utf8: Vec::new(),
        }
    }

    /// Detected encoding; `None` for a file that was empty when opened
    pub fn encoding(&self) -> Option<TextEncoding> {
        self.encoding
    }

    /// Number of BOM bytes skipped at open
    pub fn bom_len(&self) -> usize {
        self.bom_len
    }

    pub fn get_ref(&self) -> &File {
        &self.file
    }

    pub fn into_inner(self) -> File {
        self.file
    }

    fn codec(&self) -> TextEncoding {
        self.encoding.unwrap_or_else(TextEncoding::utf8)
    }

    fn fill_decoded(&mut self) -> io::Result<()> {
        self.decoded.clear();
        self.decoded_pos = 0;
        let mut raw = [0u8; DETECTION_CHUNK_SIZE];
        // A chunk can decode to nothing (e.g. half a UTF-16 unit); keep going
        while self.decoded.is_empty() && !self.raw_eof {
            let n = self.file.read(&mut raw)?;
            if n == 0 {
                self.raw_eof = true;
                self.decoder.decode(&[], true, &mut self.decoded);
            } else {
                self.decoder.decode(&raw[..n], false, &mut self.decoded);
            }
        }
        Ok(())
    }
}

impl Read for SafeFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.decoded_pos == self.decoded.len() {
            self.fill_decoded()?;
        }
        let available = &self.decoded[self.decoded_pos..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.decoded_pos += count;
        Ok(count)
    }
}

impl Write for SafeFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let previous = self.pending_utf8.len();
        self.pending_utf8.extend_from_slice(buf);

        let complete = match std::str::from_utf8(&self.pending_utf8) {
            Ok(text) => text,
            Err(e) if e.error_len().is_none() => {
                // Incomplete trailing sequence: encode the valid prefix, keep the rest
                let valid = e.valid_up_to();
                std::str::from_utf8(&self.pending_utf8[..valid])
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            }
            Err(e) => {
                self.pending_utf8.truncate(previous);
                return Err(io::Error::new(io::ErrorKind::InvalidData, e));
            }
        };

        let mut encoded = Vec::with_capacity(complete.len());
        self.codec().encode_into(complete, &mut encoded);
        let consumed = complete.len();
        self.file.write_all(&encoded)?;
        self.pending_utf8.drain(..consumed);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

// ============================================================================
// Tests
// ============================================================================
