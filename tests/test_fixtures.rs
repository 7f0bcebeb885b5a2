// SPDX-License-Identifier: MIT
//! Shared helpers for the integration and property tests

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use rac::{
    encode, CancellationToken, ChunkSize, ChunkSource, CodecId, DRange, DecodeMode,
    DecodeRequest, EncodeConfig, EncodeSummary, IndexLocation, MemorySource, RacReader, Result,
    ResourceDictionaryStore,
};

/// Ten-digit pattern repeated to `len` bytes
pub fn digits(len: usize) -> Vec<u8> {
    b"0123456789".iter().cycle().take(len).copied().collect()
}

/// Text-like data that compresses but not trivially
pub fn prose(len: usize) -> Vec<u8> {
    const WORDS: [&str; 12] = [
        "random", "access", "compression", "chunk", "index", "leaf", "branch", "codec",
        "dictionary", "page", "range", "decode",
    ];
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    let mut out = Vec::with_capacity(len + 16);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(WORDS[(state % WORDS.len() as u64) as usize].as_bytes());
        out.push(if state & 0x30 == 0 { b'\n' } else { b' ' });
    }
    out.truncate(len);
    out
}

pub fn zlib_config(dchunk: u64, location: IndexLocation) -> EncodeConfig {
    EncodeConfig::default()
        .with_codec(CodecId::Zlib)
        .with_chunk_size(ChunkSize::dspace(dchunk))
        .with_index_location(location)
}

pub fn encode_to_vec(
    config: &EncodeConfig,
    resources: &ResourceDictionaryStore,
    data: &[u8],
) -> (Vec<u8>, EncodeSummary) {
    let mut file = Vec::new();
    let summary = encode(config, resources, data, &mut file).unwrap();
    (file, summary)
}

pub fn encode_plain(config: &EncodeConfig, data: &[u8]) -> MemorySource {
    let (file, _) = encode_to_vec(config, &ResourceDictionaryStore::new(), data);
    MemorySource::from(file)
}

pub fn decode_range<S: ChunkSource>(
    source: S,
    range: DRange,
    mode: DecodeMode,
) -> Result<Vec<u8>> {
    let mut reader = RacReader::open(source)?;
    let mut out = Vec::new();
    reader.decode(
        &DecodeRequest::new(range, mode),
        &mut out,
        &CancellationToken::new(),
    )?;
    Ok(out)
}

/// Source wrapper that counts positioned reads
pub struct CountingSource<S> {
    inner: S,
    reads: AtomicUsize,
}

impl<S: ChunkSource> CountingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl<S: ChunkSource> ChunkSource for CountingSource<S> {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_exact_at(offset, buf)
    }
}
