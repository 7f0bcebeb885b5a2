// SPDX-License-Identifier: MIT
//! RAC file writer
//!
//! With the index at the end, chunks stream straight to the output and the
//! index plus trailer follow. With the index at the start, every chunk is
//! compressed first; the index size follows from the chunk count, so chunk
//! offsets can be fixed before anything is written.

use serde::Serialize;
use std::io::Write;
use tracing::{debug, info};

use crate::codec::{self, CodecId};
use crate::config::EncodeConfig;
use crate::error::{RacError, Result};
use crate::format::{FileHeader, IndexLocation, ResourceRecord, Trailer, HEADER_SIZE};
use crate::index::{Chunk, IndexBuilder};
use crate::padding::PagePadder;
use crate::planner::{ChunkPlanner, ChunkTarget, PlannedChunk};
use crate::resources::ResourceDictionaryStore;

/// What an encode run produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodeSummary {
    pub codec: CodecId,
    pub index_location: IndexLocation,
    pub chunks: usize,
    pub dsize: u64,
    pub file_size: u64,
    pub index_nodes: usize,
    pub index_bytes: u64,
    pub padding_bytes: u64,
    pub resources: usize,
}

/// Output wrapper tracking the absolute file position
struct PositionedWriter<W> {
    inner: W,
    pos: u64,
}

impl<W: Write> PositionedWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, pos: 0 }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    fn pad(&mut self, mut len: u64) -> Result<()> {
        const ZEROS: [u8; 4096] = [0; 4096];
        while len > 0 {
            let n = len.min(ZEROS.len() as u64) as usize;
            self.write_all(&ZEROS[..n])?;
            len -= n as u64;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<u64> {
        self.inner.flush()?;
        Ok(self.pos)
    }
}

/// Encodes whole inputs under one validated configuration
#[derive(Debug)]
pub struct RacWriter<'a> {
    config: EncodeConfig,
    target: ChunkTarget,
    resources: &'a ResourceDictionaryStore,
}

impl<'a> RacWriter<'a> {
    /// Check the configuration against the codec's capabilities
    ///
    /// Fails before any chunk is compressed.
    pub fn new(config: EncodeConfig, resources: &'a ResourceDictionaryStore) -> Result<Self> {
        config.validate()?;
        let codec = codec::lookup(config.codec).map_err(|e| RacError::config(e.to_string()))?;
        if !resources.is_empty() && !codec.supports_dictionaries() {
            return Err(RacError::config(format!(
                "codec {} does not support resource dictionaries",
                config.codec
            )));
        }
        let target = config.chunk_size.resolve(codec)?;
        debug!("Chunk target for {}: {:?}", config.codec, target);
        Ok(Self {
            config,
            target,
            resources,
        })
    }

    pub fn config(&self) -> &EncodeConfig {
        &self.config
    }

    /// Encode `input` as one RAC file written to `out`
    pub fn encode<W: Write>(&self, input: &[u8], out: W) -> Result<EncodeSummary> {
        let planner = ChunkPlanner::new(input, self.target, self.config.codec, self.resources)?;
        let summary = match self.config.index_location {
            IndexLocation::Start => self.encode_head(planner, out)?,
            IndexLocation::End => self.encode_tail(planner, out)?,
        };
        info!(
            "Encoded {} bytes into {} {} chunks: {} byte file, index of {} nodes at the {}",
            summary.dsize,
            summary.chunks,
            summary.codec,
            summary.file_size,
            summary.index_nodes,
            summary.index_location
        );
        Ok(summary)
    }

    fn encode_tail<W: Write>(&self, planner: ChunkPlanner<'_>, out: W) -> Result<EncodeSummary> {
        let padder = PagePadder::new(self.config.page_size);
        let mut out = PositionedWriter::new(out);
        let mut builder = IndexBuilder::new(self.config.node_capacity)?;
        let mut padding_bytes = 0;

        out.write_all(&FileHeader::new(IndexLocation::End, 0).to_bytes())?;
        let records = self.write_resources(&mut out)?;

        for planned in planner {
            let planned = planned?;
            let padding = padder.padding_for(out.pos, planned.payload.len() as u64);
            out.pad(padding)?;
            padding_bytes += padding;
            builder.push(self.chunk(&planned, out.pos)?)?;
            out.write_all(&planned.payload)?;
        }

        let index_offset = out.pos;
        let index = builder.serialize(index_offset, &records)?;
        out.write_all(&index)?;
        out.write_all(&Trailer::new(index_offset).to_bytes())?;

        Ok(EncodeSummary {
            codec: self.config.codec,
            index_location: IndexLocation::End,
            chunks: builder.len(),
            dsize: builder.total_dsize(),
            index_nodes: builder.node_count()?,
            index_bytes: index.len() as u64,
            padding_bytes,
            resources: records.len(),
            file_size: out.finish()?,
        })
    }

    fn encode_head<W: Write>(&self, planner: ChunkPlanner<'_>, out: W) -> Result<EncodeSummary> {
        let planned = planner.collect::<Result<Vec<PlannedChunk>>>()?;
        let padder = PagePadder::new(self.config.page_size);
        let index_len = IndexBuilder::serialized_len(
            planned.len(),
            self.resources.len(),
            self.config.node_capacity,
        )?;

        // Lay out resources and chunks behind the index before writing anything
        let mut pos = HEADER_SIZE as u64 + index_len;
        let mut records = Vec::with_capacity(self.resources.len());
        for dict in self.resources.iter() {
            records.push(ResourceRecord {
                coffset: pos,
                clength: dict.len() as u32,
            });
            pos += dict.len() as u64;
        }
        let mut builder = IndexBuilder::new(self.config.node_capacity)?;
        let mut paddings = Vec::with_capacity(planned.len());
        for chunk in &planned {
            let padding = padder.padding_for(pos, chunk.payload.len() as u64);
            pos += padding;
            builder.push(self.chunk(chunk, pos)?)?;
            pos += chunk.payload.len() as u64;
            paddings.push(padding);
        }
        let index = builder.serialize(HEADER_SIZE as u64, &records)?;
        debug_assert_eq!(index.len() as u64, index_len);

        let mut out = PositionedWriter::new(out);
        out.write_all(&FileHeader::new(IndexLocation::Start, HEADER_SIZE as u64).to_bytes())?;
        out.write_all(&index)?;
        for dict in self.resources.iter() {
            out.write_all(dict.bytes())?;
        }
        for (chunk, &padding) in planned.iter().zip(&paddings) {
            out.pad(padding)?;
            out.write_all(&chunk.payload)?;
        }

        Ok(EncodeSummary {
            codec: self.config.codec,
            index_location: IndexLocation::Start,
            chunks: builder.len(),
            dsize: builder.total_dsize(),
            index_nodes: builder.node_count()?,
            index_bytes: index_len,
            padding_bytes: paddings.iter().sum(),
            resources: records.len(),
            file_size: out.finish()?,
        })
    }

    fn write_resources<W: Write>(
        &self,
        out: &mut PositionedWriter<W>,
    ) -> Result<Vec<ResourceRecord>> {
        let mut records = Vec::with_capacity(self.resources.len());
        for dict in self.resources.iter() {
            records.push(ResourceRecord {
                coffset: out.pos,
                clength: dict.len() as u32,
            });
            out.write_all(dict.bytes())?;
        }
        Ok(records)
    }

    fn chunk(&self, planned: &PlannedChunk, coffset: u64) -> Result<Chunk> {
        let clength = u32::try_from(planned.payload.len()).map_err(|_| {
            RacError::config(format!(
                "chunk at DOffset {} compressed to {} bytes, too large for the index",
                planned.doffset,
                planned.payload.len()
            ))
        })?;
        Ok(Chunk {
            doffset: planned.doffset,
            dlength: planned.dlength,
            coffset,
            clength,
            codec: self.config.codec,
            resource: planned.resource,
        })
    }
}

/// Encode `input` with `config` and the given dictionaries
pub fn encode<W: Write>(
    config: &EncodeConfig,
    resources: &ResourceDictionaryStore,
    input: &[u8],
    out: W,
) -> Result<EncodeSummary> {
    RacWriter::new(config.clone(), resources)?.encode(input, out)
}
