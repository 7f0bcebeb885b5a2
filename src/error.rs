// SPDX-License-Identifier: MIT
//! Error types shared by the encoder, the index reader and the decode scheduler

use crate::codec::CodecError;

/// Errors that can occur while encoding or decoding a RAC file
#[derive(Debug, thiserror::Error)]
pub enum RacError {
    /// A requested option cannot be honored (nothing has been produced yet)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The file is structurally invalid
    #[error("Invalid RAC file: {0}")]
    Format(String),

    /// A chunk failed to decompress to exactly its declared length
    #[error("Corrupt chunk at DOffset {doffset} (COffset {coffset}): {source}")]
    CorruptChunk {
        doffset: u64,
        coffset: u64,
        #[source]
        source: CodecError,
    },

    /// Compression failed while encoding
    #[error("Compression error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid range: start {start} is greater than end {end}")]
    InvertedRange { start: u64, end: u64 },

    #[error("Range {start}..{end} is outside the decompressed size 0..{total}")]
    OutOfRange { start: u64, end: u64, total: u64 },

    /// Reading the source failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing to the output sink failed
    #[error("Output write failed: {0}")]
    Sink(#[source] std::io::Error),

    #[error("Decode cancelled")]
    Cancelled,
}

/// Coarse classification used to pick process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Format,
    Range,
    Io,
    Cancelled,
}

impl RacError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RacError::Config(_) => ErrorKind::Config,
            RacError::Format(_) | RacError::CorruptChunk { .. } | RacError::Codec(_) => {
                ErrorKind::Format
            }
            RacError::InvertedRange { .. } | RacError::OutOfRange { .. } => ErrorKind::Range,
            RacError::Io(_) | RacError::Sink(_) => ErrorKind::Io,
            RacError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn format(message: impl Into<String>) -> Self {
        RacError::Format(message.into())
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        RacError::Config(message.into())
    }

    /// Prefix a format error with where it was found
    pub(crate) fn in_context(self, context: impl std::fmt::Display) -> Self {
        match self {
            RacError::Format(message) => RacError::Format(format!("{}: {}", context, message)),
            other => other,
        }
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, RacError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(RacError::config("x").kind(), ErrorKind::Config);
        assert_eq!(RacError::format("x").kind(), ErrorKind::Format);
        assert_eq!(
            RacError::InvertedRange { start: 5, end: 1 }.kind(),
            ErrorKind::Range
        );
        assert_eq!(
            RacError::Sink(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).kind(),
            ErrorKind::Io
        );
        assert_eq!(RacError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_in_context_only_touches_format_errors() {
        let err = RacError::format("bad tag").in_context("index node at offset 64");
        assert_eq!(
            err.to_string(),
            "Invalid RAC file: index node at offset 64: bad tag"
        );
        assert!(matches!(
            RacError::Cancelled.in_context("anything"),
            RacError::Cancelled
        ));
    }

    #[test]
    fn test_corrupt_chunk_message_names_location() {
        let err = RacError::CorruptChunk {
            doffset: 40,
            coffset: 1234,
            source: CodecError::LengthMismatch {
                expected: 10,
                actual: 9,
            },
        };
        let message = err.to_string();
        assert!(message.contains("DOffset 40"));
        assert!(message.contains("COffset 1234"));
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
