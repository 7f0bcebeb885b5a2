// SPDX-License-Identifier: MIT
//! Codec plugins and the adapter that dispatches to them
//!
//! Every chunk of a RAC file is compressed independently by one codec. Codecs
//! differ in what they can do beyond plain compress/decompress, so each plugin
//! reports its capabilities and callers ask before relying on them:
//!
//! | Codec | CSpace sizing | Resource dictionaries |
//! |-------|---------------|-----------------------|
//! | zlib  | yes           | yes (preset dictionary) |
//! | zstd  | no            | yes (raw content dictionary) |
//! | lz4   | no            | no                    |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output reserved up front; larger chunks grow as bytes are produced
const EAGER_RESERVE: usize = 1 << 20;

/// Codec identifier as stored in each leaf entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CodecId {
    Zlib = 0x01,
    Lz4 = 0x02,
    Zstd = 0x03,
}

impl CodecId {
    /// All codec identifiers known to the format
    pub fn all() -> &'static [CodecId] {
        &[CodecId::Zlib, CodecId::Lz4, CodecId::Zstd]
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodecId::Zlib => "zlib",
            CodecId::Lz4 => "lz4",
            CodecId::Zstd => "zstd",
        }
    }

    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            0x01 => Ok(CodecId::Zlib),
            0x02 => Ok(CodecId::Lz4),
            0x03 => Ok(CodecId::Zstd),
            other => Err(CodecError::UnknownId(other)),
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CodecId::all()
            .iter()
            .copied()
            .find(|id| id.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CodecError::UnknownName(s.to_string()))
    }
}

/// Errors raised by codec plugins
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown codec id {0:#04x}")]
    UnknownId(u8),

    #[error("unknown codec {0:?} (expected zlib, lz4 or zstd)")]
    UnknownName(String),

    #[error("codec {0} is not available in this build")]
    Unavailable(CodecId),

    #[error("codec {0} does not support resource dictionaries")]
    DictionaryUnsupported(CodecId),

    #[error("compression failed: {0}")]
    Compress(String),

    #[error("corrupt compressed data: {0}")]
    Corrupt(String),

    #[error("decompressed length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("{compressed} compressed bytes cannot expand to the declared {declared} bytes")]
    ImplausibleLength { declared: usize, compressed: usize },
}

/// A compression plugin
///
/// Implementations must be stateless so a single instance can serve every
/// decode worker at once.
pub trait Codec: Send + Sync {
    fn id(&self) -> CodecId;

    /// Whether the planner may target chunk sizes in CSpace with this codec
    fn supports_cspace_sizing(&self) -> bool {
        false
    }

    /// Whether chunks may be compressed against a resource dictionary
    fn supports_dictionaries(&self) -> bool {
        false
    }

    /// Upper bound on plain bytes per compressed byte, if the format has one
    fn max_expansion(&self) -> Option<usize> {
        None
    }

    fn compress(&self, dict: Option<&[u8]>, plain: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Decompress one chunk; `expected_len` sizes the output buffer
    fn decompress(
        &self,
        dict: Option<&[u8]>,
        compressed: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>, CodecError>;
}

/// zlib (RFC 1950) via flate2
#[derive(Debug, Clone, Copy)]
pub struct ZlibCodec {
    level: u32,
}

impl ZlibCodec {
    pub const fn new(level: u32) -> Self {
        Self { level }
    }
}

impl Codec for ZlibCodec {
    fn id(&self) -> CodecId {
        CodecId::Zlib
    }

    fn supports_cspace_sizing(&self) -> bool {
        true
    }

    fn supports_dictionaries(&self) -> bool {
        true
    }

    /// A DEFLATE match emits at most 258 bytes from 2 bits
    fn max_expansion(&self) -> Option<usize> {
        Some(1032)
    }

    fn compress(&self, dict: Option<&[u8]>, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        use flate2::{Compress, Compression, FlushCompress, Status};

        let mut encoder = Compress::new(Compression::new(self.level), true);
        if let Some(dict) = dict {
            encoder
                .set_dictionary(dict)
                .map_err(|e| CodecError::Compress(e.to_string()))?;
        }

        let mut out = Vec::with_capacity(plain.len() / 2 + 64);
        loop {
            if out.capacity() - out.len() < 1024 {
                out.reserve(plain.len().max(1024));
            }
            let consumed = encoder.total_in() as usize;
            let produced = encoder.total_out();
            let status = encoder
                .compress_vec(&plain[consumed..], &mut out, FlushCompress::Finish)
                .map_err(|e| CodecError::Compress(e.to_string()))?;
            if status == Status::StreamEnd {
                return Ok(out);
            }
            if encoder.total_in() as usize == consumed && encoder.total_out() == produced {
                return Err(CodecError::Compress("zlib encoder made no progress".into()));
            }
        }
    }

    fn decompress(
        &self,
        dict: Option<&[u8]>,
        compressed: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>, CodecError> {
        use flate2::{Decompress, FlushDecompress, Status};

        let mut decoder = Decompress::new(true);
        // One spare byte so an overlong stream shows up as a length mismatch
        let limit = expected_len.saturating_add(1);
        let mut out = Vec::with_capacity(limit.min(EAGER_RESERVE));
        loop {
            if out.len() == out.capacity() {
                out.reserve(out.len().max(4096).min(limit - out.len()));
            }
            let consumed = decoder.total_in() as usize;
            let produced = out.len();
            match decoder.decompress_vec(&compressed[consumed..], &mut out, FlushDecompress::Finish)
            {
                Ok(Status::StreamEnd) => {
                    if decoder.total_in() as usize != compressed.len() {
                        return Err(CodecError::Corrupt(format!(
                            "{} trailing bytes after the zlib stream",
                            compressed.len() - decoder.total_in() as usize
                        )));
                    }
                    return Ok(out);
                }
                Ok(_) => {
                    if out.len() > expected_len {
                        return Err(CodecError::LengthMismatch {
                            expected: expected_len,
                            actual: out.len(),
                        });
                    }
                    if decoder.total_in() as usize == consumed && out.len() == produced {
                        return Err(CodecError::Corrupt("truncated zlib stream".into()));
                    }
                }
                Err(e) => match (e.needs_dictionary(), dict) {
                    (Some(_), Some(dict)) => {
                        decoder
                            .set_dictionary(dict)
                            .map_err(|e| CodecError::Corrupt(e.to_string()))?;
                    }
                    (Some(_), None) => {
                        return Err(CodecError::Corrupt(
                            "zlib stream requires a preset dictionary".into(),
                        ))
                    }
                    (None, _) => return Err(CodecError::Corrupt(e.to_string())),
                },
            }
        }
    }
}

/// Zstandard via the zstd crate
#[cfg(feature = "zstd")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

#[cfg(feature = "zstd")]
impl ZstdCodec {
    pub const fn new(level: i32) -> Self {
        Self { level }
    }
}

#[cfg(feature = "zstd")]
impl Codec for ZstdCodec {
    fn id(&self) -> CodecId {
        CodecId::Zstd
    }

    fn supports_dictionaries(&self) -> bool {
        true
    }

    fn compress(&self, dict: Option<&[u8]>, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        let compressor = match dict {
            Some(dict) => zstd::bulk::Compressor::with_dictionary(self.level, dict),
            None => zstd::bulk::Compressor::new(self.level),
        };
        compressor
            .and_then(|mut c| c.compress(plain))
            .map_err(|e| CodecError::Compress(e.to_string()))
    }

    fn decompress(
        &self,
        dict: Option<&[u8]>,
        compressed: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>, CodecError> {
        use std::io::Read;

        // Frame headers may claim any content size, so let the output grow
        // with what the stream actually produces
        let decoder = match dict {
            Some(dict) => zstd::stream::read::Decoder::with_dictionary(compressed, dict),
            None => zstd::stream::read::Decoder::with_buffer(compressed),
        }
        .map_err(|e| CodecError::Corrupt(e.to_string()))?;
        let mut out = Vec::with_capacity(expected_len.min(EAGER_RESERVE));
        decoder
            .take(expected_len as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Corrupt(e.to_string()))?;
        Ok(out)
    }
}

/// LZ4 block format via lz4_flex
#[cfg(feature = "lz4")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

#[cfg(feature = "lz4")]
impl Codec for Lz4Codec {
    fn id(&self) -> CodecId {
        CodecId::Lz4
    }

    /// Each extra match-length byte adds at most 255 bytes of output
    fn max_expansion(&self) -> Option<usize> {
        Some(255)
    }

    fn compress(&self, _dict: Option<&[u8]>, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::block::compress(plain))
    }

    fn decompress(
        &self,
        _dict: Option<&[u8]>,
        compressed: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>, CodecError> {
        lz4_flex::block::decompress(compressed, expected_len)
            .map_err(|e| CodecError::Corrupt(e.to_string()))
    }
}

static ZLIB: ZlibCodec = ZlibCodec::new(6);

#[cfg(feature = "zstd")]
static ZSTD: ZstdCodec = ZstdCodec::new(15);

#[cfg(feature = "lz4")]
static LZ4: Lz4Codec = Lz4Codec;

/// Find the plugin for a codec id
pub fn lookup(id: CodecId) -> Result<&'static dyn Codec, CodecError> {
    match id {
        CodecId::Zlib => Ok(&ZLIB),
        #[cfg(feature = "zstd")]
        CodecId::Zstd => Ok(&ZSTD),
        #[cfg(feature = "lz4")]
        CodecId::Lz4 => Ok(&LZ4),
        #[allow(unreachable_patterns)]
        other => Err(CodecError::Unavailable(other)),
    }
}

/// Compress `plain` with the given codec, optionally against a dictionary
pub fn compress(id: CodecId, dict: Option<&[u8]>, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
    let codec = lookup(id)?;
    if dict.is_some() && !codec.supports_dictionaries() {
        return Err(CodecError::DictionaryUnsupported(id));
    }
    codec.compress(dict, plain)
}

/// Decompress one chunk and insist on exactly `expected_len` plain bytes
pub fn decompress(
    id: CodecId,
    dict: Option<&[u8]>,
    compressed: &[u8],
    expected_len: usize,
) -> Result<Vec<u8>, CodecError> {
    let codec = lookup(id)?;
    if dict.is_some() && !codec.supports_dictionaries() {
        return Err(CodecError::DictionaryUnsupported(id));
    }
    if let Some(ratio) = codec.max_expansion() {
        if expected_len > compressed.len().saturating_mul(ratio) {
            return Err(CodecError::ImplausibleLength {
                declared: expected_len,
                compressed: compressed.len(),
            });
        }
    }
    let plain = codec.decompress(dict, compressed, expected_len)?;
    if plain.len() != expected_len {
        return Err(CodecError::LengthMismatch {
            expected: expected_len,
            actual: plain.len(),
        });
    }
    Ok(plain)
}
