// SPDX-License-Identifier: MIT
//! Index construction
//!
//! Chunks are accumulated in DOffset order and serialized as a directory
//! followed by the node tree, root first and each level top-down. Node sizes
//! depend only on entry counts, so the index length is known before any
//! chunk offset is, which lets the writer reserve room for a head index.

use tracing::debug;

use super::Chunk;
use crate::error::{RacError, Result};
use crate::format::{
    BranchRecord, IndexDirectory, NodeHeader, NodeKind, ResourceRecord, MAX_NODE_ENTRIES,
    MAX_TREE_HEIGHT, NODE_HEADER_SIZE,
};

/// Number of nodes on each tree level, leaves first
#[derive(Debug, Clone, PartialEq, Eq)]
struct TreeShape {
    levels: Vec<usize>,
}

impl TreeShape {
    fn new(chunk_count: usize, node_capacity: usize) -> Result<Self> {
        let mut levels = vec![chunk_count.div_ceil(node_capacity).max(1)];
        let mut width = levels[0];
        while width > 1 {
            width = width.div_ceil(node_capacity);
            levels.push(width);
        }
        if levels.len() - 1 > MAX_TREE_HEIGHT as usize {
            return Err(RacError::config(format!(
                "{} chunks need an index deeper than {} levels",
                chunk_count, MAX_TREE_HEIGHT
            )));
        }
        Ok(Self { levels })
    }

    fn height(&self) -> usize {
        self.levels.len() - 1
    }

    fn node_count(&self) -> usize {
        self.levels.iter().sum()
    }

    /// Records held by node `i` of `level`, given the width of the level below
    fn span(
        &self,
        level: usize,
        i: usize,
        chunk_count: usize,
        cap: usize,
    ) -> std::ops::Range<usize> {
        let below = if level == 0 {
            chunk_count
        } else {
            self.levels[level - 1]
        };
        (i * cap).min(below)..((i + 1) * cap).min(below)
    }

    /// Encoded size of every node, in bytes
    fn nodes_len(&self, chunk_count: usize) -> usize {
        self.levels
            .iter()
            .enumerate()
            .map(|(level, &width)| {
                let records = if level == 0 {
                    chunk_count
                } else {
                    self.levels[level - 1]
                };
                let kind = if level == 0 {
                    NodeKind::Leaf
                } else {
                    NodeKind::Branch
                };
                width * NODE_HEADER_SIZE + records * kind.record_size()
            })
            .sum()
    }
}

/// Accumulates chunks and serializes the index tree
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    node_capacity: usize,
    chunks: Vec<Chunk>,
}

impl IndexBuilder {
    pub fn new(node_capacity: usize) -> Result<Self> {
        if !(2..=MAX_NODE_ENTRIES).contains(&node_capacity) {
            return Err(RacError::config(format!(
                "index node capacity must be between 2 and {}, got {}",
                MAX_NODE_ENTRIES, node_capacity
            )));
        }
        Ok(Self {
            node_capacity,
            chunks: Vec::new(),
        })
    }

    /// Append the next chunk; it must start where the previous one ended
    pub fn push(&mut self, chunk: Chunk) -> Result<()> {
        let (dnext, cnext) = self
            .chunks
            .last()
            .map_or((0, 0), |last| (last.dend(), last.cend()));
        if chunk.doffset != dnext {
            return Err(RacError::format(format!(
                "chunk at DOffset {} does not follow DOffset {}",
                chunk.doffset, dnext
            )));
        }
        if chunk.dlength == 0 || chunk.clength == 0 {
            return Err(RacError::format(format!(
                "chunk at DOffset {} is empty",
                chunk.doffset
            )));
        }
        if chunk.coffset < cnext {
            return Err(RacError::format(format!(
                "chunk at DOffset {} overlaps the previous chunk in CSpace",
                chunk.doffset
            )));
        }
        self.chunks.push(chunk);
        Ok(())
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_dsize(&self) -> u64 {
        self.chunks.last().map_or(0, Chunk::dend)
    }

    /// Number of nodes the serialized tree will have
    pub fn node_count(&self) -> Result<usize> {
        Ok(TreeShape::new(self.chunks.len(), self.node_capacity)?.node_count())
    }

    /// Size of the serialized index (directory plus nodes) for the given counts
    pub fn serialized_len(
        chunk_count: usize,
        resource_count: usize,
        node_capacity: usize,
    ) -> Result<u64> {
        let shape = TreeShape::new(chunk_count, node_capacity)?;
        Ok((IndexDirectory::encoded_len(resource_count) + shape.nodes_len(chunk_count)) as u64)
    }

    /// Serialize the directory and node tree to be written at file offset `base`
    pub fn serialize(&self, base: u64, resources: &[ResourceRecord]) -> Result<Vec<u8>> {
        let cap = self.node_capacity;
        let count = self.chunks.len();
        let shape = TreeShape::new(count, cap)?;

        // DBase and DSize of each node, level by level from the leaves up
        let mut bounds: Vec<Vec<(u64, u64)>> = Vec::with_capacity(shape.levels.len());
        for (level, &width) in shape.levels.iter().enumerate() {
            let nodes = (0..width)
                .map(|i| {
                    let span = shape.span(level, i, count, cap);
                    if level == 0 {
                        match &self.chunks[span] {
                            [] => (0, 0),
                            [first, .., last] => (first.doffset, last.dend() - first.doffset),
                            [only] => (only.doffset, only.dlength as u64),
                        }
                    } else {
                        let children = &bounds[level - 1][span];
                        let dbase = children.first().map_or(0, |c| c.0);
                        (dbase, children.iter().map(|c| c.1).sum())
                    }
                })
                .collect();
            bounds.push(nodes);
        }

        // Absolute offsets, in write order: top level first
        let mut offsets: Vec<Vec<u64>> = vec![Vec::new(); shape.levels.len()];
        let mut pos = base + IndexDirectory::encoded_len(resources.len()) as u64;
        for level in (0..shape.levels.len()).rev() {
            let kind = if level == 0 {
                NodeKind::Leaf
            } else {
                NodeKind::Branch
            };
            for i in 0..shape.levels[level] {
                offsets[level].push(pos);
                pos += NodeHeader::encoded_len(kind, shape.span(level, i, count, cap).len()) as u64;
            }
        }

        let mut buffer = Vec::with_capacity((pos - base) as usize);
        IndexDirectory {
            total_dsize: self.total_dsize(),
            root_offset: offsets[shape.height()][0],
            resources: resources.to_vec(),
        }
        .write_to_buffer(&mut buffer);

        for level in (0..shape.levels.len()).rev() {
            for i in 0..shape.levels[level] {
                let span = shape.span(level, i, count, cap);
                let (dbase, dsize) = bounds[level][i];
                NodeHeader {
                    kind: if level == 0 {
                        NodeKind::Leaf
                    } else {
                        NodeKind::Branch
                    },
                    height: level as u8,
                    count: span.len() as u16,
                    dbase,
                    dsize,
                }
                .write_to_buffer(&mut buffer);

                if level == 0 {
                    for chunk in &self.chunks[span] {
                        chunk.to_record().write_to_buffer(&mut buffer);
                    }
                } else {
                    for child in span {
                        BranchRecord {
                            dlower: bounds[level - 1][child].0,
                            offset: offsets[level - 1][child],
                        }
                        .write_to_buffer(&mut buffer);
                    }
                }
            }
        }

        debug_assert_eq!(buffer.len() as u64, pos - base);
        debug!(
            "Serialized index: {} chunks, {} nodes, height {}, {} bytes",
            count,
            shape.node_count(),
            shape.height(),
            buffer.len()
        );
        Ok(buffer)
    }
}
