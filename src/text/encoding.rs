//! Text encoding detection and transcoding
//!
//! Detection is incremental: a leading byte-order mark settles the question at
//! once, otherwise every chunk goes to `chardetng` and its guess is taken at
//! end of input. UTF-32 is only recognised by its BOM because neither
//! `chardetng` nor `encoding_rs` handle it.

use encoding_rs::{Decoder, Encoding, UTF_8, UTF_16BE, UTF_16LE};

// ============================================================================
// Constants
// ============================================================================

/// Size of each chunk handed to the detector
pub const DETECTION_CHUNK_SIZE: usize = 0x1000;

/// Longest byte-order mark
const MAX_BOM_LEN: usize = 4;

const BOM_UTF32_BE: &[u8] = &[0x00, 0x00, 0xFE, 0xFF];
const BOM_UTF32_LE: &[u8] = &[0xFF, 0xFE, 0x00, 0x00];
const BOM_UTF8: &[u8] = &[0xEF, 0xBB, 0xBF];
const BOM_UTF16_BE: &[u8] = &[0xFE, 0xFF];
const BOM_UTF16_LE: &[u8] = &[0xFF, 0xFE];

/// Known byte-order marks, most specific first (UTF-32LE starts with the UTF-16LE mark)
fn known_boms() -> [(TextEncoding, &'static [u8]); 5] {
    [
        (TextEncoding::Utf32Be, BOM_UTF32_BE),
        (TextEncoding::Utf32Le, BOM_UTF32_LE),
        (TextEncoding::Standard(UTF_8), BOM_UTF8),
        (TextEncoding::Standard(UTF_16BE), BOM_UTF16_BE),
        (TextEncoding::Standard(UTF_16LE), BOM_UTF16_LE),
    ]
}

// ============================================================================
// Text Encoding
// ============================================================================

/// An encoding a file can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// Any encoding from the WHATWG set
    Standard(&'static Encoding),
    Utf32Le,
    Utf32Be,
}

impl TextEncoding {
    pub fn utf8() -> Self {
        TextEncoding::Standard(UTF_8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Standard(encoding) => encoding.name(),
            TextEncoding::Utf32Le => "UTF-32LE",
            TextEncoding::Utf32Be => "UTF-32BE",
        }
    }

    /// Resolve a label such as `"utf-8"`, `"latin1"` or `"utf-32le"`
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-32le" | "utf32le" => Some(TextEncoding::Utf32Le),
            "utf-32be" | "utf32be" => Some(TextEncoding::Utf32Be),
            other => Encoding::for_label(other.as_bytes()).map(TextEncoding::Standard),
        }
    }

    /// Fresh decoder; BOM handling is left to the caller
    pub fn new_decoder(&self) -> TextDecoder {
        match self {
            TextEncoding::Standard(encoding) => {
                TextDecoder::Standard(encoding.new_decoder_without_bom_handling())
            }
            TextEncoding::Utf32Le => TextDecoder::Utf32 {
                big_endian: false,
                pending: Vec::new(),
            },
            TextEncoding::Utf32Be => TextDecoder::Utf32 {
                big_endian: true,
                pending: Vec::new(),
            },
        }
    }

    /// Append the encoded form of `text` to `out`
    ///
    /// Characters the target cannot represent become numeric character
    /// references, as `encoding_rs` does.
    pub fn encode_into(&self, text: &str, out: &mut Vec<u8>) {
        match *self {
            TextEncoding::Standard(encoding) if encoding == UTF_16LE => {
                out.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
            }
            TextEncoding::Standard(encoding) if encoding == UTF_16BE => {
                out.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
            }
            TextEncoding::Standard(encoding) => {
                let (bytes, _, _) = encoding.encode(text);
                out.extend_from_slice(&bytes);
            }
            TextEncoding::Utf32Le => {
                out.extend(text.chars().flat_map(|c| u32::from(c).to_le_bytes()));
            }
            TextEncoding::Utf32Be => {
                out.extend(text.chars().flat_map(|c| u32::from(c).to_be_bytes()));
            }
        }
    }
}

/// Match the leading bytes against the known byte-order marks
///
/// Returns the encoding and BOM length of the most specific match.
pub fn sniff_bom(bytes: &[u8]) -> Option<(TextEncoding, usize)> {
    known_boms()
        .into_iter()
        .find(|(_, bom)| bytes.starts_with(bom))
        .map(|(encoding, bom)| (encoding, bom.len()))
}

// ============================================================================
// Decoder
// ============================================================================

/// Incremental decoder producing UTF-8
pub enum TextDecoder {
    Standard(Decoder),
    Utf32 { big_endian: bool, pending: Vec<u8> },
}

impl std::fmt::Debug for TextDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextDecoder::Standard(decoder) => f
                .debug_tuple("Standard")
                .field(&decoder.encoding().name())
                .finish(),
            TextDecoder::Utf32 { big_endian, .. } => f
                .debug_struct("Utf32")
                .field("big_endian", big_endian)
                .finish_non_exhaustive(),
        }
    }
}

impl TextDecoder {
    /// Decode `src` and append the UTF-8 result to `out`
    ///
    /// `last` must be set on the final call; malformed input becomes U+FFFD.
    pub fn decode(&mut self, src: &[u8], last: bool, out: &mut Vec<u8>) {
        match self {
            TextDecoder::Standard(decoder) => {
                let start = out.len();
                let needed = decoder
                    .max_utf8_buffer_length(src.len())
                    .unwrap_or_else(|| src.len().saturating_mul(3).saturating_add(16));
                out.resize(start + needed, 0);
                let (_, _, written, _) = decoder.decode_to_utf8(src, &mut out[start..], last);
                out.truncate(start + written);
            }
            TextDecoder::Utf32 {
                big_endian,
                pending,
            } => {
                pending.extend_from_slice(src);
                let whole = pending.len() - pending.len() % 4;
                let mut buf = [0u8; 4];
                for unit in pending[..whole].chunks_exact(4) {
                    let bytes = [unit[0], unit[1], unit[2], unit[3]];
                    let value = if *big_endian {
                        u32::from_be_bytes(bytes)
                    } else {
                        u32::from_le_bytes(bytes)
                    };
                    let c = char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER);
                    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
                pending.drain(..whole);
                if last && !pending.is_empty() {
                    pending.clear();
                    let c = char::REPLACEMENT_CHARACTER;
                    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }
}

// ============================================================================
// Detector
// ============================================================================

/// Outcome of encoding detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub encoding: TextEncoding,
    /// False when the result is only the detector's best effort
    pub confident: bool,
}

/// Incremental encoding detector
pub struct EncodingDetector {
    inner: chardetng::EncodingDetector,
    /// First bytes of input, kept until the BOM question is settled
    head: Vec<u8>,
    bom: Option<TextEncoding>,
    bom_checked: bool,
    non_ascii: bool,
}

impl Default for EncodingDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EncodingDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodingDetector")
            .field("bom", &self.bom)
            .field("bom_checked", &self.bom_checked)
            .field("non_ascii", &self.non_ascii)
            .finish_non_exhaustive()
    }
}

impl EncodingDetector {
    pub fn new() -> Self {
        Self {
            inner: chardetng::EncodingDetector::new(),
            head: Vec::with_capacity(MAX_BOM_LEN),
            bom: None,
            bom_checked: false,
            non_ascii: false,
        }
    }

    /// Feed the next chunk; returns true once more input would not change the answer
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        if self.is_done() {
            return true;
        }
        if !self.bom_checked {
            let wanted = (MAX_BOM_LEN - self.head.len()).min(chunk.len());
            self.head.extend_from_slice(&chunk[..wanted]);
            if self.head.len() == MAX_BOM_LEN {
                self.check_bom();
                if self.bom.is_some() {
                    return true;
                }
            }
        }
        self.non_ascii |= self.inner.feed(chunk, false);
        false
    }

    pub fn is_done(&self) -> bool {
        self.bom.is_some()
    }

    /// Settle on an encoding; never fails
    pub fn finish(mut self) -> Detection {
        if !self.bom_checked {
            self.check_bom();
        }
        if let Some(encoding) = self.bom {
            return Detection {
                encoding,
                confident: true,
            };
        }

        self.non_ascii |= self.inner.feed(&[], true);
        if !self.non_ascii {
            // Pure ASCII reads the same under UTF-8
            return Detection {
                encoding: TextEncoding::utf8(),
                confident: true,
            };
        }
        let guess = self.inner.guess(None, true);
        Detection {
            encoding: TextEncoding::Standard(guess),
            confident: guess == UTF_8,
        }
    }

    fn check_bom(&mut self) {
        self.bom_checked = true;
        self.bom = sniff_bom(&self.head).map(|(encoding, _)| encoding);
    }
}

// ============================================================================
// Tests
// ============================================================================
