// SPDX-License-Identifier: MIT
//! Explicit encode and decode configuration values
//!
//! Command-line flags and environment variables are folded into these values
//! once; the library entry points never look at process state themselves.

use serde::{Deserialize, Serialize};

use crate::codec::CodecId;
use crate::error::{RacError, Result};
use crate::format::{IndexLocation, MAX_NODE_ENTRIES};
use crate::planner::{ChunkSize, MAX_CHUNK_DLENGTH};
use crate::range::{DRange, DecodeMode, DecodeRequest};

/// Default number of entries per index node
pub const DEFAULT_NODE_CAPACITY: usize = 1024;

/// Environment variable overriding the parallel decode worker count
pub const WORKERS_ENV: &str = "RACTOOL_WORKERS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeConfig {
    pub codec: CodecId,
    pub chunk_size: ChunkSize,
    /// CSpace page size for padding; zero disables padding
    pub page_size: u64,
    pub index_location: IndexLocation,
    pub node_capacity: usize,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            chunk_size: ChunkSize::default(),
            page_size: 0,
            index_location: IndexLocation::Start,
            node_capacity: DEFAULT_NODE_CAPACITY,
        }
    }
}

#[cfg(feature = "zstd")]
fn default_codec() -> CodecId {
    CodecId::Zstd
}

#[cfg(not(feature = "zstd"))]
fn default_codec() -> CodecId {
    CodecId::Zlib
}

impl EncodeConfig {
    pub fn with_codec(mut self, codec: CodecId) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: ChunkSize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_index_location(mut self, location: IndexLocation) -> Self {
        self.index_location = location;
        self
    }

    pub fn with_node_capacity(mut self, node_capacity: usize) -> Self {
        self.node_capacity = node_capacity;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, size) in [
            ("dspace", self.chunk_size.dspace),
            ("cspace", self.chunk_size.cspace),
        ] {
            match size {
                Some(0) => {
                    return Err(RacError::config(format!(
                        "{} chunk size must be positive",
                        name
                    )))
                }
                Some(n) if n > MAX_CHUNK_DLENGTH as u64 => {
                    return Err(RacError::config(format!(
                        "{} chunk size {} exceeds the maximum of {}",
                        name, n, MAX_CHUNK_DLENGTH
                    )))
                }
                _ => {}
            }
        }

        if self.node_capacity < 2 || self.node_capacity > MAX_NODE_ENTRIES {
            return Err(RacError::config(format!(
                "index node capacity must be between 2 and {}, got {}",
                MAX_NODE_ENTRIES, self.node_capacity
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodeConfig {
    pub range: DRange,
    pub single_threaded: bool,
    /// Parallel worker count; zero means one per available core
    pub workers: usize,
}

impl DecodeConfig {
    /// Defaults plus the worker count from `RACTOOL_WORKERS`, if set
    pub fn from_env() -> Self {
        Self {
            workers: std::env::var(WORKERS_ENV)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            ..Self::default()
        }
    }

    pub fn request(&self) -> DecodeRequest {
        let mode = if self.single_threaded {
            DecodeMode::SingleThreaded
        } else {
            DecodeMode::Parallel {
                workers: self.workers,
            }
        };
        DecodeRequest::new(self.range, mode)
    }
}

/// Parse a byte count such as `4096`, `256k` or `1M` (binary units)
pub fn parse_byte_size(text: &str) -> Result<u64> {
    let text = text.trim();
    let (digits, multiplier) = match text.char_indices().last() {
        Some((i, 'k' | 'K')) => (&text[..i], 1u64 << 10),
        Some((i, 'm' | 'M')) => (&text[..i], 1u64 << 20),
        Some(_) => (text, 1),
        None => return Err(RacError::config("empty byte size")),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| RacError::config(format!("invalid byte size {:?}", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_encode_config_is_valid() {
        assert!(EncodeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = EncodeConfig::default().with_chunk_size(ChunkSize::dspace(0));
        assert!(matches!(config.validate(), Err(RacError::Config(_))));
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let config =
            EncodeConfig::default().with_chunk_size(ChunkSize::dspace(u32::MAX as u64 + 1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_capacity_bounds() {
        assert!(EncodeConfig::default()
            .with_node_capacity(1)
            .validate()
            .is_err());
        assert!(EncodeConfig::default()
            .with_node_capacity(2)
            .validate()
            .is_ok());
        assert!(EncodeConfig::default()
            .with_node_capacity(MAX_NODE_ENTRIES + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_encode_config_serializes() {
        let config = EncodeConfig::default()
            .with_codec(CodecId::Zlib)
            .with_index_location(IndexLocation::End);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"zlib\""));
        assert!(json.contains("\"end\""));
        let back: EncodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_decode_request_modes() {
        let config = DecodeConfig {
            single_threaded: true,
            ..DecodeConfig::default()
        };
        assert_eq!(config.request().mode, DecodeMode::SingleThreaded);

        let config = DecodeConfig {
            workers: 3,
            ..DecodeConfig::default()
        };
        assert_eq!(config.request().mode, DecodeMode::Parallel { workers: 3 });
    }

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("4096").unwrap(), 4096);
        assert_eq!(parse_byte_size("256k").unwrap(), 262_144);
        assert_eq!(parse_byte_size("256K").unwrap(), 262_144);
        assert_eq!(parse_byte_size("1m").unwrap(), 1_048_576);
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("k").is_err());
        assert!(parse_byte_size("12x").is_err());
    }
}
