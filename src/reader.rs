// SPDX-License-Identifier: MIT
//! RAC file reader
//!
//! Opens a file through any [`ChunkSource`], loads its resource dictionaries
//! and decodes DSpace ranges with the [`DecodeScheduler`].

use bytes::Bytes;
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::codec;
use crate::error::{RacError, Result};
use crate::format::IndexLocation;
use crate::index::{Chunk, IndexReader, RangeResolver, ResolvedRange};
use crate::range::{DRange, DecodeRequest};
use crate::resources::ResourceDictionaryStore;
use crate::scheduler::{ChunkDecoder, DecodeScheduler, DecodeSummary};
use crate::source::ChunkSource;

/// An open RAC file
pub struct RacReader<S: ChunkSource> {
    source: S,
    index: IndexReader,
    resources: ResourceDictionaryStore,
}

impl<S: ChunkSource> RacReader<S> {
    /// Validate the header and index directory and load every resource
    pub fn open(source: S) -> Result<Self> {
        let index = IndexReader::open(&source)?;
        let regions = index
            .resources()
            .iter()
            .map(|record| {
                source
                    .read_vec_at(record.coffset, record.clength as usize)
                    .map(Bytes::from)
                    .map_err(RacError::from)
            })
            .collect::<Result<Vec<_>>>()?;
        let resources = ResourceDictionaryStore::from_file_regions(regions)?;
        Ok(Self {
            source,
            index,
            resources,
        })
    }

    pub fn total_dsize(&self) -> u64 {
        self.index.total_dsize()
    }

    pub fn index_location(&self) -> IndexLocation {
        self.index.location()
    }

    pub fn index(&self) -> &IndexReader {
        &self.index
    }

    pub fn resources(&self) -> &ResourceDictionaryStore {
        &self.resources
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Chunks covering `range`, loading index nodes as needed
    pub fn resolve(&mut self, range: DRange) -> Result<ResolvedRange> {
        RangeResolver::new(&mut self.index, &self.source).resolve(range)
    }

    /// Fetch and decompress one chunk
    pub fn decode_chunk(&self, chunk: &Chunk) -> Result<Vec<u8>> {
        let compressed = self
            .source
            .read_vec_at(chunk.coffset, chunk.clength as usize)?;
        let dict = match chunk.resource {
            Some(id) => Some(self.resources.get(id).map(|d| d.bytes()).ok_or_else(|| {
                RacError::format(format!(
                    "chunk at DOffset {} references missing resource {}",
                    chunk.doffset, id.0
                ))
            })?),
            None => None,
        };
        codec::decompress(chunk.codec, dict, &compressed, chunk.dlength as usize).map_err(
            |source| RacError::CorruptChunk {
                doffset: chunk.doffset,
                coffset: chunk.coffset,
                source,
            },
        )
    }

    /// Decode `request.range` into `sink`
    ///
    /// Output already written when an error occurs stays written.
    pub fn decode<W: Write + ?Sized>(
        &mut self,
        request: &DecodeRequest,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<DecodeSummary> {
        let plan = self.resolve(request.range)?;
        let summary = DecodeScheduler::new(&*self, request.mode, cancel.clone()).run(&plan, sink)?;
        info!(
            "Decoded DSpace [{}, {}): {} chunks, {} bytes, {} worker(s)",
            plan.start, plan.end, summary.chunks, summary.bytes_written, summary.workers
        );
        Ok(summary)
    }

    /// Decode a range into a new buffer
    pub fn read_range(&mut self, range: DRange) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.decode(
            &DecodeRequest {
                range,
                ..DecodeRequest::default()
            },
            &mut out,
            &CancellationToken::new(),
        )?;
        Ok(out)
    }
}

impl<S: ChunkSource> ChunkDecoder for RacReader<S> {
    fn decode_chunk(&self, chunk: &Chunk) -> Result<Vec<u8>> {
        RacReader::decode_chunk(self, chunk)
    }
}

/// Open `source` and decode one request into `sink`
pub fn decode<S: ChunkSource, W: Write + ?Sized>(
    source: S,
    request: &DecodeRequest,
    sink: &mut W,
    cancel: &CancellationToken,
) -> Result<DecodeSummary> {
    RacReader::open(source)?.decode(request, sink, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::config::EncodeConfig;
    use crate::planner::ChunkSize;
    use crate::range::DecodeMode;
    use crate::source::MemorySource;
    use crate::writer::encode;

    fn sample() -> Vec<u8> {
        (0..5000u32).flat_map(|i| i.to_le_bytes()).collect()
    }

    fn encoded(config: &EncodeConfig) -> MemorySource {
        let mut file = Vec::new();
        encode(config, &ResourceDictionaryStore::new(), &sample(), &mut file).unwrap();
        MemorySource::from(file)
    }

    #[test]
    fn test_read_full_and_partial() {
        let config = EncodeConfig::default()
            .with_codec(CodecId::Zlib)
            .with_chunk_size(ChunkSize::dspace(1000));
        let mut reader = RacReader::open(encoded(&config)).unwrap();
        let data = sample();
        assert_eq!(reader.total_dsize(), data.len() as u64);
        assert_eq!(reader.read_range(DRange::full()).unwrap(), data);
        assert_eq!(
            reader.read_range(DRange::new(999, 3001)).unwrap(),
            &data[999..3001]
        );
    }

    #[test]
    fn test_decode_chunk_detects_corruption() {
        let config = EncodeConfig::default()
            .with_codec(CodecId::Zlib)
            .with_chunk_size(ChunkSize::dspace(1000));
        let source = encoded(&config);
        let mut reader = RacReader::open(source.clone()).unwrap();
        let chunk = reader.resolve(DRange::new(0, 1)).unwrap().chunks[0];

        let mut bytes = source.as_bytes().to_vec();
        let at = chunk.coffset as usize + chunk.clength as usize / 2;
        bytes[at] ^= 0x55;
        let mut reader = RacReader::open(MemorySource::from(bytes)).unwrap();
        let err = reader.read_range(DRange::new(0, 10)).unwrap_err();
        assert!(matches!(err, RacError::CorruptChunk { doffset: 0, .. }));
    }

    #[test]
    fn test_decode_free_function() {
        let config = EncodeConfig::default()
            .with_codec(CodecId::Zlib)
            .with_chunk_size(ChunkSize::dspace(512));
        let request = DecodeRequest::new(DRange::new(10, 20), DecodeMode::SingleThreaded);
        let mut out = Vec::new();
        let summary =
            decode(encoded(&config), &request, &mut out, &CancellationToken::new()).unwrap();
        assert_eq!(out, &sample()[10..20]);
        assert_eq!(summary.bytes_written, 10);
    }
}
