// SPDX-License-Identifier: MIT
//! The chunk index: a shallow tree of fixed-width nodes
//!
//! Leaves hold chunk entries, branches hold the DOffset lower bound and file
//! offset of each child. A file with at most one node's worth of chunks has a
//! single leaf as its root.

pub mod builder;
pub mod reader;
pub mod resolver;

pub use builder::IndexBuilder;
pub use reader::{BranchNode, ChildLink, IndexNode, IndexReader, LeafNode};
pub use resolver::{RangeResolver, ResolvedRange};

use crate::codec::CodecId;
use crate::format::LeafRecord;
use crate::resources::ResourceId;

/// Position of a loaded node in the reader's arena
pub type NodeId = usize;

/// One chunk: its DSpace range, its CSpace range and how it was compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub doffset: u64,
    pub dlength: u32,
    pub coffset: u64,
    pub clength: u32,
    pub codec: CodecId,
    pub resource: Option<ResourceId>,
}

impl Chunk {
    /// End of the chunk in DSpace (exclusive)
    #[inline]
    pub fn dend(&self) -> u64 {
        self.doffset + self.dlength as u64
    }

    /// End of the chunk in CSpace (exclusive)
    #[inline]
    pub fn cend(&self) -> u64 {
        self.coffset + self.clength as u64
    }

    pub(crate) fn to_record(self) -> LeafRecord {
        LeafRecord {
            coffset: self.coffset,
            clength: self.clength,
            dlength: self.dlength,
            codec: self.codec.as_byte(),
            resource: ResourceId::to_byte(self.resource),
        }
    }
}
