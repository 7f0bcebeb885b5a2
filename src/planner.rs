// SPDX-License-Identifier: MIT
//! Chunk boundary planning
//!
//! The planner walks the input once and yields compressed chunks in DOffset
//! order. Chunk sizes are targeted either in DSpace (cut every N plain bytes)
//! or in CSpace (grow each chunk until its compressed form reaches N bytes),
//! the latter only for codecs that report CSpace sizing support.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::{self, Codec, CodecId};
use crate::error::{RacError, Result};
use crate::resources::{ResourceDictionaryStore, ResourceId};

/// Default DSpace chunk size
pub const DEFAULT_DCHUNK_SIZE: u64 = 64 * 1024;

/// Largest DLength a leaf entry can hold
pub const MAX_CHUNK_DLENGTH: usize = u32::MAX as usize;

/// Requested chunk size, in one or both address spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkSize {
    pub dspace: Option<u64>,
    pub cspace: Option<u64>,
}

impl ChunkSize {
    pub fn dspace(size: u64) -> Self {
        Self {
            dspace: Some(size),
            cspace: None,
        }
    }

    pub fn cspace(size: u64) -> Self {
        Self {
            dspace: None,
            cspace: Some(size),
        }
    }

    /// Decide the effective target for a codec
    ///
    /// A CSpace target on a codec without CSpace sizing falls back to the
    /// DSpace target when one was given and is a config error otherwise.
    pub fn resolve(&self, codec: &dyn Codec) -> Result<ChunkTarget> {
        match (self.dspace, self.cspace) {
            (None, None) => Ok(ChunkTarget::DSpace(DEFAULT_DCHUNK_SIZE)),
            (Some(d), None) => Ok(ChunkTarget::DSpace(d)),
            (_, Some(c)) if codec.supports_cspace_sizing() => Ok(ChunkTarget::CSpace(c)),
            (Some(d), Some(c)) => {
                warn!(
                    "Codec {} cannot size chunks in CSpace; \
                     using {}-byte DSpace chunks instead of {}-byte CSpace chunks",
                    codec.id(),
                    d,
                    c
                );
                Ok(ChunkTarget::DSpace(d))
            }
            (None, Some(_)) => Err(RacError::config(format!(
                "codec {} does not support CSpace chunk sizing",
                codec.id()
            ))),
        }
    }
}

/// Effective chunk size target after capability checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkTarget {
    DSpace(u64),
    CSpace(u64),
}

/// One compressed chunk, not yet placed in the file
#[derive(Debug, Clone)]
pub struct PlannedChunk {
    pub doffset: u64,
    pub dlength: u32,
    pub payload: Vec<u8>,
    pub resource: Option<ResourceId>,
}

/// Iterator over the compressed chunks of an input
pub struct ChunkPlanner<'a> {
    input: &'a [u8],
    pos: usize,
    target: ChunkTarget,
    codec: CodecId,
    resources: &'a ResourceDictionaryStore,
    use_dictionaries: bool,
}

impl<'a> ChunkPlanner<'a> {
    pub fn new(
        input: &'a [u8],
        target: ChunkTarget,
        codec: CodecId,
        resources: &'a ResourceDictionaryStore,
    ) -> Result<Self> {
        let use_dictionaries =
            !resources.is_empty() && codec::lookup(codec)?.supports_dictionaries();
        Ok(Self {
            input,
            pos: 0,
            target,
            codec,
            resources,
            use_dictionaries,
        })
    }

    /// Compress without a dictionary and with each loaded one, keep the smallest
    fn compress_best(&self, plain: &[u8]) -> Result<(Vec<u8>, Option<ResourceId>)> {
        let mut best = (codec::compress(self.codec, None, plain)?, None);
        if self.use_dictionaries {
            for dict in self.resources.iter() {
                let payload = codec::compress(self.codec, Some(dict.bytes()), plain)?;
                if payload.len() < best.0.len() {
                    best = (payload, Some(dict.id()));
                }
            }
        }
        Ok(best)
    }

    fn plan_dspace(&self, size: u64) -> Result<(usize, Vec<u8>, Option<ResourceId>)> {
        let remaining = self.input.len() - self.pos;
        let len = usize::try_from(size).unwrap_or(usize::MAX).min(remaining);
        let (payload, resource) = self.compress_best(&self.input[self.pos..self.pos + len])?;
        Ok((len, payload, resource))
    }

    /// Find the longest prefix of the remaining input whose compressed form
    /// fits in `target` bytes, to within about 1.5%
    fn plan_cspace(&self, target: u64) -> Result<(usize, Vec<u8>, Option<ResourceId>)> {
        let start = self.pos;
        let limit = (self.input.len() - start).min(MAX_CHUNK_DLENGTH);
        let resource = self.use_dictionaries.then_some(ResourceId(0));
        let dict = self.resources.bytes_for(resource);
        let fit = |len: usize| -> Result<Option<Vec<u8>>> {
            let payload = codec::compress(self.codec, dict, &self.input[start..start + len])?;
            Ok((payload.len() as u64 <= target).then_some(payload))
        };

        let mut best: Option<(usize, Vec<u8>)> = None;
        let mut too_long = None;
        let mut probe = usize::try_from(target).unwrap_or(usize::MAX).clamp(1, limit);
        loop {
            match fit(probe)? {
                Some(payload) => {
                    best = Some((probe, payload));
                    if probe == limit {
                        break;
                    }
                    probe = probe.saturating_mul(2).min(limit);
                }
                None => {
                    too_long = Some(probe);
                    break;
                }
            }
        }

        if let Some(mut hi) = too_long {
            let mut lo = best.as_ref().map_or(0, |(len, _)| *len);
            while hi - lo > (lo >> 6).max(1) {
                let mid = lo + (hi - lo) / 2;
                match fit(mid)? {
                    Some(payload) => {
                        lo = mid;
                        best = Some((mid, payload));
                    }
                    None => hi = mid,
                }
            }
        }

        match best {
            Some((len, payload)) => Ok((len, payload, resource)),
            None => {
                // Even one byte overflows the target; a chunk is never empty
                let payload = codec::compress(self.codec, dict, &self.input[start..start + 1])?;
                Ok((1, payload, resource))
            }
        }
    }
}

impl Iterator for ChunkPlanner<'_> {
    type Item = Result<PlannedChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.input.len() {
            return None;
        }

        let planned = match self.target {
            ChunkTarget::DSpace(size) => self.plan_dspace(size),
            ChunkTarget::CSpace(size) => self.plan_cspace(size),
        };
        match planned {
            Ok((len, payload, resource)) => {
                let doffset = self.pos as u64;
                self.pos += len;
                debug!(
                    "Planned chunk at DOffset {}: {} -> {} bytes",
                    doffset,
                    len,
                    payload.len()
                );
                Some(Ok(PlannedChunk {
                    doffset,
                    dlength: len as u32,
                    payload,
                    resource,
                }))
            }
            Err(e) => {
                self.pos = self.input.len();
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn text(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_4f6c_dd1du64;
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                b'a' + (state >> 59) as u8
            })
            .collect()
    }

    fn plan(input: &[u8], target: ChunkTarget, codec: CodecId) -> Vec<PlannedChunk> {
        let store = ResourceDictionaryStore::new();
        ChunkPlanner::new(input, target, codec, &store)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_default_target_is_64k() {
        let zlib = codec::lookup(CodecId::Zlib).unwrap();
        assert_eq!(
            ChunkSize::default().resolve(zlib).unwrap(),
            ChunkTarget::DSpace(DEFAULT_DCHUNK_SIZE)
        );
    }

    #[test]
    fn test_dspace_final_chunk_shorter() {
        let input = text(64);
        let chunks = plan(&input, ChunkTarget::DSpace(10), CodecId::Zlib);
        assert_eq!(chunks.len(), 7);
        assert!(chunks[..6].iter().all(|c| c.dlength == 10));
        assert_eq!(chunks[6].dlength, 4);
        assert_eq!(chunks[6].doffset, 60);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(plan(&[], ChunkTarget::DSpace(10), CodecId::Zlib).is_empty());
        assert!(plan(&[], ChunkTarget::CSpace(10), CodecId::Zlib).is_empty());
    }

    #[test]
    fn test_cspace_chunks_fit_target() {
        let input = text(20_000);
        let chunks = plan(&input, ChunkTarget::CSpace(512), CodecId::Zlib);
        assert!(chunks.len() > 1);
        let mut next = 0u64;
        for chunk in &chunks {
            assert_eq!(chunk.doffset, next);
            assert!(chunk.payload.len() <= 512);
            next += chunk.dlength as u64;
        }
        assert_eq!(next, input.len() as u64);
    }

    #[test]
    fn test_cspace_tiny_target_still_progresses() {
        let input = text(40);
        let chunks = plan(&input, ChunkTarget::CSpace(1), CodecId::Zlib);
        assert_eq!(chunks.len(), 40);
        assert!(chunks.iter().all(|c| c.dlength == 1));
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn test_cspace_only_on_unsupported_codec_is_config_error() {
        let zstd = codec::lookup(CodecId::Zstd).unwrap();
        let result = ChunkSize::cspace(4096).resolve(zstd);
        assert!(matches!(result, Err(RacError::Config(_))));
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn test_cspace_falls_back_to_dspace() {
        let zstd = codec::lookup(CodecId::Zstd).unwrap();
        let size = ChunkSize {
            dspace: Some(1000),
            cspace: Some(4096),
        };
        assert_eq!(size.resolve(zstd).unwrap(), ChunkTarget::DSpace(1000));
    }

    #[test]
    fn test_dictionary_selection_prefers_smaller_output() {
        let input = b"alpha beta gamma delta epsilon zeta eta theta".repeat(2);
        let mut store = ResourceDictionaryStore::new();
        store
            .insert(Bytes::from_static(b"0000000000000000000000000"))
            .unwrap();
        store.insert(Bytes::from(input.clone())).unwrap();

        let target = ChunkTarget::DSpace(1 << 20);
        let chunks: Vec<_> = ChunkPlanner::new(&input, target, CodecId::Zlib, &store)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].resource, Some(ResourceId(1)));
    }
}
