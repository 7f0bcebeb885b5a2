// SPDX-License-Identifier: MIT
//! # RAC: Random Access Compression
//!
//! A container format that splits its input into independently compressed
//! chunks and records them in an index, so any byte range of the decompressed
//! content can be reconstructed without decompressing what precedes it, and
//! chunks can be decoded in parallel.
//!
//! ## Key Features
//!
//! - **Random access**: a DSpace range touches only the index nodes and chunks that cover it
//! - **Parallel decode**: chunks decode on a worker pool and are written strictly in order
//! - **Pluggable codecs**: zlib, zstd and lz4, each reporting its own capabilities
//! - **Index placement**: at the start (one seek to find it) or at the end (streaming encode)
//! - **Page padding**: optional alignment so each chunk spans as few pages as possible
//! - **Resource dictionaries**: shared blobs that prime the compressor for small chunks
//!
//! ## Format Specification
//!
//! ```text
//! RAC Format v1
//! =============
//!
//! Header (32 bytes, little-endian):
//! - Magic: "RAC\x1A\x00\x00\x00\x00" (8 bytes)
//! - Version: 1 (4 bytes)
//! - Flags: bit 0 = index at end (4 bytes)
//! - Index offset: directory position, 0 if at end (8 bytes)
//! - Reserved: 0 (8 bytes)
//!
//! Index directory (24 + 16 * R bytes):
//! - Tag "RIDX", resource count u16, reserved u16
//! - Total DSize u64, root node offset u64
//! - R resource records: COffset u64, CLength u32, reserved u32
//!
//! Index node (24-byte header + records):
//! - Kind 'L' or 'B', height u8, count u16, reserved u32, DBase u64, DSize u64
//! - Leaf entry (20 bytes): COffset u64, CLength u32, DLength u32,
//!   codec u8, resource u8 (0xFF = none), reserved u16
//! - Branch child (16 bytes): DOffset lower bound u64, node offset u64
//!
//! Index at start: header | directory | nodes | resources | chunks
//! Index at end:   header | resources | chunks | directory | nodes | trailer
//!
//! Trailer (16 bytes, index at end only):
//! - Index offset u64, magic "RAC\x1ATAIL"
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use rac::{ChunkSize, CodecId, DRange, EncodeConfig, MemorySource, RacReader};
//! use rac::ResourceDictionaryStore;
//!
//! let data = b"0123456789".repeat(100);
//! let config = EncodeConfig::default()
//!     .with_codec(CodecId::Zlib)
//!     .with_chunk_size(ChunkSize::dspace(64));
//!
//! let mut file = Vec::new();
//! rac::encode(&config, &ResourceDictionaryStore::new(), &data, &mut file).unwrap();
//!
//! let mut reader = RacReader::open(MemorySource::from(file)).unwrap();
//! let slice = reader.read_range(DRange::new(100, 120)).unwrap();
//! assert_eq!(slice, &data[100..120]);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod index;
pub mod padding;
pub mod planner;
pub mod range;
pub mod reader;
pub mod resources;
pub mod scheduler;
pub mod source;
pub mod writer;

// Re-export main types
pub use codec::{Codec, CodecError, CodecId};
pub use config::{parse_byte_size, DecodeConfig, EncodeConfig};
pub use error::{ErrorKind, RacError, Result};
pub use format::IndexLocation;
pub use index::{Chunk, IndexBuilder, IndexReader, RangeResolver, ResolvedRange};
pub use padding::PagePadder;
pub use planner::{ChunkPlanner, ChunkSize, ChunkTarget};
pub use range::{DRange, DecodeMode, DecodeRequest};
pub use reader::{decode, RacReader};
pub use resources::{ResourceDictionaryStore, ResourceId};
pub use scheduler::{DecodeScheduler, DecodeSummary};
pub use source::{ChunkSource, FileSource, MemorySource};
pub use writer::{encode, EncodeSummary, RacWriter};

pub use tokio_util::sync::CancellationToken;
