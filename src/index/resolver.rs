// SPDX-License-Identifier: MIT
//! DSpace range to chunk list resolution

use std::ops::Range;

use super::{Chunk, IndexNode, IndexReader, NodeId};
use crate::error::Result;
use crate::range::DRange;
use crate::source::ChunkSource;

/// The chunks covering a request, in DOffset order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
    pub chunks: Vec<Chunk>,
}

impl ResolvedRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The part of chunk `chunk`'s plain bytes that falls inside the range
    pub fn trim(&self, chunk: &Chunk) -> Range<usize> {
        let from = self.start.max(chunk.doffset) - chunk.doffset;
        let to = self.end.min(chunk.dend()) - chunk.doffset;
        from as usize..to as usize
    }
}

/// Descends the index tree, loading only the nodes a range touches
pub struct RangeResolver<'r, S: ChunkSource + ?Sized> {
    index: &'r mut IndexReader,
    source: &'r S,
}

impl<'r, S: ChunkSource + ?Sized> RangeResolver<'r, S> {
    pub fn new(index: &'r mut IndexReader, source: &'r S) -> Self {
        Self { index, source }
    }

    /// Bounds are checked before any node is read
    pub fn resolve(&mut self, range: DRange) -> Result<ResolvedRange> {
        let Range { start, end } = range.resolve(self.index.total_dsize())?;
        let mut chunks = Vec::new();
        if start < end {
            let root = self.index.root(self.source)?;
            self.collect(root, start, end, &mut chunks)?;
        }
        Ok(ResolvedRange { start, end, chunks })
    }

    fn collect(&mut self, node: NodeId, start: u64, end: u64, out: &mut Vec<Chunk>) -> Result<()> {
        let slots = match self.index.node(node) {
            IndexNode::Leaf(leaf) => {
                let first = leaf.chunks.partition_point(|c| c.dend() <= start);
                out.extend(
                    leaf.chunks[first..]
                        .iter()
                        .take_while(|c| c.doffset < end)
                        .copied(),
                );
                return Ok(());
            }
            IndexNode::Branch(branch) => {
                // Last child starting at or before `start`, up to the last starting before `end`
                let first = branch
                    .children
                    .partition_point(|c| c.dlower <= start)
                    .saturating_sub(1);
                let last = branch.children.partition_point(|c| c.dlower < end);
                first..last
            }
        };
        for slot in slots {
            let child = self.index.child(self.source, node, slot)?;
            self.collect(child, start, end, out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::error::RacError;
    use crate::format::{FileHeader, IndexLocation, HEADER_SIZE};
    use crate::index::IndexBuilder;
    use crate::source::MemorySource;

    fn build(dlengths: &[u32], cap: usize) -> MemorySource {
        let mut builder = IndexBuilder::new(cap).unwrap();
        let index_len = IndexBuilder::serialized_len(dlengths.len(), 0, cap).unwrap();
        let mut coffset = HEADER_SIZE as u64 + index_len;
        let mut doffset = 0;
        for &dlength in dlengths {
            builder
                .push(Chunk {
                    doffset,
                    dlength,
                    coffset,
                    clength: 3,
                    codec: CodecId::Zlib,
                    resource: None,
                })
                .unwrap();
            doffset += dlength as u64;
            coffset += 3;
        }
        let mut file = Vec::new();
        FileHeader::new(IndexLocation::Start, HEADER_SIZE as u64).write_to_buffer(&mut file);
        file.extend(builder.serialize(HEADER_SIZE as u64, &[]).unwrap());
        file.resize(coffset as usize, 0);
        MemorySource::from(file)
    }

    fn doffsets(source: &MemorySource, range: DRange) -> Vec<u64> {
        let mut index = IndexReader::open(source).unwrap();
        RangeResolver::new(&mut index, source)
            .resolve(range)
            .unwrap()
            .chunks
            .iter()
            .map(|c| c.doffset)
            .collect()
    }

    #[test]
    fn test_minimal_cover_in_single_leaf() {
        let source = build(&[10; 7], 16);
        assert_eq!(doffsets(&source, DRange::new(12, 18)), vec![10]);
        assert_eq!(doffsets(&source, DRange::new(12, 21)), vec![10, 20]);
        assert_eq!(doffsets(&source, DRange::new(10, 20)), vec![10]);
        assert_eq!(doffsets(&source, DRange::new(60, 64)), vec![60]);
        assert_eq!(doffsets(&source, DRange::full()).len(), 7);
    }

    #[test]
    fn test_minimal_cover_through_branches() {
        let source = build(&[10; 50], 3);
        assert_eq!(doffsets(&source, DRange::new(295, 305)), vec![290, 300]);
        assert_eq!(doffsets(&source, DRange::new(0, 1)), vec![0]);
        assert_eq!(doffsets(&source, DRange::new(499, 500)), vec![490]);
        let all = doffsets(&source, DRange::full());
        assert_eq!(all, (0..50).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn test_uneven_chunks() {
        let source = build(&[1, 100, 2, 7, 50], 2);
        assert_eq!(doffsets(&source, DRange::new(0, 2)), vec![0, 1]);
        assert_eq!(doffsets(&source, DRange::new(101, 110)), vec![101, 103]);
    }

    #[test]
    fn test_small_range_loads_few_nodes() {
        let source = build(&[10; 64], 4);
        let mut index = IndexReader::open(&source).unwrap();
        RangeResolver::new(&mut index, &source)
            .resolve(DRange::new(300, 305))
            .unwrap();
        // root plus one node per level below it
        assert_eq!(index.loaded_nodes(), 3);
    }

    #[test]
    fn test_empty_range_reads_nothing() {
        let source = build(&[10; 4], 4);
        let mut index = IndexReader::open(&source).unwrap();
        let resolved = RangeResolver::new(&mut index, &source)
            .resolve(DRange::new(15, 15))
            .unwrap();
        assert!(resolved.chunks.is_empty());
        assert!(resolved.is_empty());
        assert_eq!(index.loaded_nodes(), 0);
    }

    #[test]
    fn test_bad_ranges_rejected_before_loading() {
        let source = build(&[10; 4], 4);
        let mut index = IndexReader::open(&source).unwrap();
        let mut resolver = RangeResolver::new(&mut index, &source);
        assert!(matches!(
            resolver.resolve(DRange::new(30, 20)),
            Err(RacError::InvertedRange { .. })
        ));
        assert!(matches!(
            resolver.resolve(DRange::new(0, 41)),
            Err(RacError::OutOfRange { .. })
        ));
        assert_eq!(index.loaded_nodes(), 0);
    }

    #[test]
    fn test_trim() {
        let resolved = ResolvedRange {
            start: 12,
            end: 18,
            chunks: Vec::new(),
        };
        let chunk = Chunk {
            doffset: 10,
            dlength: 10,
            coffset: 0,
            clength: 1,
            codec: CodecId::Zlib,
            resource: None,
        };
        assert_eq!(resolved.trim(&chunk), 2..8);
    }
}
