// SPDX-License-Identifier: MIT
//! Index parsing and validation
//!
//! The reader locates the index through the header (or the trailer when the
//! index is at the end), parses the directory eagerly and loads tree nodes
//! on demand into an arena addressed by [`NodeId`]. Every node is checked
//! against the bounds its parent promised before it is accepted.

use tracing::debug;

use super::{Chunk, NodeId};
use crate::codec::CodecId;
use crate::error::{RacError, Result};
use crate::format::{
    BranchRecord, FileHeader, IndexDirectory, IndexLocation, LeafRecord, NodeHeader, NodeKind,
    ResourceRecord, Trailer, BRANCH_CHILD_SIZE, DIRECTORY_FIXED_SIZE, HEADER_SIZE,
    LEAF_ENTRY_SIZE, MAX_NODE_ENTRIES, MAX_TREE_HEIGHT, NODE_HEADER_SIZE, RESOURCE_RECORD_SIZE,
    TRAILER_SIZE,
};
use crate::range::DRange;
use crate::resources::{ResourceId, MAX_RESOURCES};
use crate::source::ChunkSource;

/// A loaded index node
#[derive(Debug, Clone)]
pub enum IndexNode {
    Leaf(LeafNode),
    Branch(BranchNode),
}

impl IndexNode {
    pub fn offset(&self) -> u64 {
        match self {
            IndexNode::Leaf(leaf) => leaf.offset,
            IndexNode::Branch(branch) => branch.offset,
        }
    }

    pub fn dbase(&self) -> u64 {
        match self {
            IndexNode::Leaf(leaf) => leaf.dbase,
            IndexNode::Branch(branch) => branch.dbase,
        }
    }

    pub fn dsize(&self) -> u64 {
        match self {
            IndexNode::Leaf(leaf) => leaf.dsize,
            IndexNode::Branch(branch) => branch.dsize,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeafNode {
    pub offset: u64,
    pub dbase: u64,
    pub dsize: u64,
    /// Entries with their DOffsets filled in from the running DLength sum
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone)]
pub struct BranchNode {
    pub offset: u64,
    pub height: u8,
    pub dbase: u64,
    pub dsize: u64,
    pub children: Vec<ChildLink>,
}

/// Pointer from a branch to a child, resolved to an arena slot once loaded
#[derive(Debug, Clone, Copy)]
pub struct ChildLink {
    pub dlower: u64,
    pub offset: u64,
    loaded: Option<NodeId>,
}

impl ChildLink {
    pub fn loaded(&self) -> Option<NodeId> {
        self.loaded
    }
}

/// What a parent says about the node it points to
#[derive(Debug, Clone, Copy)]
struct Expected {
    dbase: u64,
    dsize: u64,
    /// None for the root, whose height is only bounded
    height: Option<u8>,
}

/// Lazily loaded view of a RAC file's index
#[derive(Debug, Clone)]
pub struct IndexReader {
    location: IndexLocation,
    index_offset: u64,
    file_len: u64,
    /// Nodes must end before this offset (the trailer, if any)
    node_limit: u64,
    total_dsize: u64,
    root_offset: u64,
    resources: Vec<ResourceRecord>,
    arena: Vec<IndexNode>,
    root: Option<NodeId>,
}

impl IndexReader {
    /// Read and validate the header, trailer and index directory
    pub fn open<S: ChunkSource + ?Sized>(source: &S) -> Result<Self> {
        let file_len = source.len();
        if file_len < HEADER_SIZE as u64 {
            return Err(RacError::format(format!(
                "file is {} bytes, shorter than the {}-byte header",
                file_len, HEADER_SIZE
            )));
        }

        let mut head = [0u8; HEADER_SIZE];
        source.read_exact_at(0, &mut head)?;
        let header = FileHeader::from_bytes(&head)?;
        header.validate()?;

        let location = header.index_location();
        let (index_offset, node_limit) = match location {
            IndexLocation::Start => (header.index_offset, file_len),
            IndexLocation::End => {
                let limit = file_len
                    .checked_sub(TRAILER_SIZE as u64)
                    .filter(|&l| l >= HEADER_SIZE as u64)
                    .ok_or_else(|| RacError::format("file too short for a trailer"))?;
                let mut tail = [0u8; TRAILER_SIZE];
                source.read_exact_at(limit, &mut tail)?;
                let trailer = Trailer::from_bytes(&tail)?;
                if trailer.index_offset < HEADER_SIZE as u64 {
                    return Err(RacError::format(format!(
                        "trailer index offset {} overlaps the header",
                        trailer.index_offset
                    )));
                }
                (trailer.index_offset, limit)
            }
        };

        let fixed = read_region(source, index_offset, DIRECTORY_FIXED_SIZE, node_limit)
            .map_err(|e| e.in_context(format!("index directory at offset {}", index_offset)))?;
        let (resource_count, total_dsize, root_offset) = IndexDirectory::parse_fixed(&fixed)?;
        if resource_count > MAX_RESOURCES {
            return Err(RacError::format(format!(
                "{} resources exceed the maximum of {}",
                resource_count, MAX_RESOURCES
            )));
        }

        let table_offset = index_offset + DIRECTORY_FIXED_SIZE as u64;
        let table = read_region(
            source,
            table_offset,
            resource_count * RESOURCE_RECORD_SIZE,
            node_limit,
        )?;
        let resources = IndexDirectory::parse_resources(&table, resource_count)?;
        for (i, record) in resources.iter().enumerate() {
            let end = record.coffset.checked_add(record.clength as u64);
            if record.clength == 0
                || record.coffset < HEADER_SIZE as u64
                || end.map_or(true, |end| end > file_len)
            {
                return Err(RacError::format(format!(
                    "resource {} region [{}, +{}) lies outside the file",
                    i, record.coffset, record.clength
                )));
            }
        }

        debug!(
            "Opened RAC index at offset {} ({}): DSize {}, {} resources",
            index_offset, location, total_dsize, resource_count
        );

        Ok(Self {
            location,
            index_offset,
            file_len,
            node_limit,
            total_dsize,
            root_offset,
            resources,
            arena: Vec::new(),
            root: None,
        })
    }

    pub fn location(&self) -> IndexLocation {
        self.location
    }

    pub fn index_offset(&self) -> u64 {
        self.index_offset
    }

    pub fn total_dsize(&self) -> u64 {
        self.total_dsize
    }

    pub fn resources(&self) -> &[ResourceRecord] {
        &self.resources
    }

    /// How many nodes have been parsed so far
    pub fn loaded_nodes(&self) -> usize {
        self.arena.len()
    }

    pub fn node(&self, id: NodeId) -> &IndexNode {
        &self.arena[id]
    }

    /// Load (once) and return the root node
    pub fn root<S: ChunkSource + ?Sized>(&mut self, source: &S) -> Result<NodeId> {
        if let Some(id) = self.root {
            return Ok(id);
        }
        let expected = Expected {
            dbase: 0,
            dsize: self.total_dsize,
            height: None,
        };
        let id = self.load_node(source, self.root_offset, expected)?;
        self.root = Some(id);
        Ok(id)
    }

    /// Load (once) and return child `slot` of a branch node
    pub fn child<S: ChunkSource + ?Sized>(
        &mut self,
        source: &S,
        parent: NodeId,
        slot: usize,
    ) -> Result<NodeId> {
        let (offset, expected) = match &self.arena[parent] {
            IndexNode::Branch(branch) => {
                let link = branch.children.get(slot).ok_or_else(|| {
                    RacError::format(format!(
                        "index node at offset {} has no child {}",
                        branch.offset, slot
                    ))
                })?;
                if let Some(id) = link.loaded {
                    return Ok(id);
                }
                let dend = branch
                    .children
                    .get(slot + 1)
                    .map_or(branch.dbase + branch.dsize, |next| next.dlower);
                (
                    link.offset,
                    Expected {
                        dbase: link.dlower,
                        dsize: dend - link.dlower,
                        height: Some(branch.height - 1),
                    },
                )
            }
            IndexNode::Leaf(leaf) => {
                return Err(RacError::format(format!(
                    "index node at offset {} is a leaf",
                    leaf.offset
                )))
            }
        };

        let id = self.load_node(source, offset, expected)?;
        if let IndexNode::Branch(branch) = &mut self.arena[parent] {
            branch.children[slot].loaded = Some(id);
        }
        Ok(id)
    }

    /// Load the whole tree and return every chunk in DOffset order
    pub fn chunk_table<S: ChunkSource + ?Sized>(&mut self, source: &S) -> Result<Vec<Chunk>> {
        super::RangeResolver::new(self, source)
            .resolve(DRange::full())
            .map(|resolved| resolved.chunks)
    }

    fn load_node<S: ChunkSource + ?Sized>(
        &mut self,
        source: &S,
        offset: u64,
        expected: Expected,
    ) -> Result<NodeId> {
        let fail =
            |msg: String| RacError::format(format!("index node at offset {}: {}", offset, msg));

        if offset < HEADER_SIZE as u64 {
            return Err(fail("overlaps the file header".into()));
        }
        let raw = read_region(source, offset, NODE_HEADER_SIZE, self.node_limit)
            .map_err(|e| e.in_context(format!("index node at offset {}", offset)))?;
        let header = NodeHeader::from_bytes(&raw)
            .map_err(|e| e.in_context(format!("index node at offset {}", offset)))?;

        let count = header.count as usize;
        if count > MAX_NODE_ENTRIES {
            return Err(fail(format!(
                "{} entries exceed the maximum of {}",
                count, MAX_NODE_ENTRIES
            )));
        }
        match header.kind {
            NodeKind::Leaf if header.height != 0 => {
                return Err(fail(format!("leaf with height {}", header.height)))
            }
            NodeKind::Branch if header.height == 0 || header.height > MAX_TREE_HEIGHT => {
                return Err(fail(format!("branch with height {}", header.height)))
            }
            _ => {}
        }
        if let Some(height) = expected.height {
            if header.height != height {
                return Err(fail(format!(
                    "height {} where the parent expects {}",
                    header.height, height
                )));
            }
        }
        if header.dbase != expected.dbase || header.dsize != expected.dsize {
            return Err(fail(format!(
                "covers DSpace [{}, +{}) where the parent expects [{}, +{})",
                header.dbase, header.dsize, expected.dbase, expected.dsize
            )));
        }
        let dend = header
            .dbase
            .checked_add(header.dsize)
            .ok_or_else(|| fail("DSpace range overflows".into()))?;
        if count == 0 && (header.kind == NodeKind::Branch || header.dsize != 0) {
            return Err(fail("no entries".into()));
        }

        let body = read_region(
            source,
            offset + NODE_HEADER_SIZE as u64,
            header.body_len(),
            self.node_limit,
        )
        .map_err(|e| e.in_context(format!("index node at offset {}", offset)))?;

        let node = match header.kind {
            NodeKind::Leaf => {
                let mut chunks = Vec::with_capacity(count);
                let mut dpos = header.dbase;
                let mut cmin = HEADER_SIZE as u64;
                for (i, raw) in body.chunks_exact(LEAF_ENTRY_SIZE).enumerate() {
                    let record = LeafRecord::from_bytes(raw)
                        .map_err(|e| e.in_context(format!("index node at offset {}", offset)))?;
                    let codec = CodecId::from_byte(record.codec)
                        .map_err(|e| fail(format!("entry {}: {}", i, e)))?;
                    let resource = ResourceId::from_byte(record.resource);
                    if let Some(id) = resource {
                        if id.index() >= self.resources.len() {
                            return Err(fail(format!(
                                "entry {} references missing resource {}",
                                i, id.0
                            )));
                        }
                    }
                    if record.dlength == 0 || record.clength == 0 {
                        return Err(fail(format!("entry {} is empty", i)));
                    }
                    let cend = record
                        .coffset
                        .checked_add(record.clength as u64)
                        .filter(|&end| end <= self.file_len)
                        .ok_or_else(|| {
                            fail(format!(
                                "entry {} CSpace range [{}, +{}) overflows the {}-byte file",
                                i, record.coffset, record.clength, self.file_len
                            ))
                        })?;
                    if record.coffset < cmin {
                        return Err(fail(format!(
                            "entry {} at COffset {} overlaps the preceding data",
                            i, record.coffset
                        )));
                    }
                    let doffset = dpos;
                    dpos = dpos
                        .checked_add(record.dlength as u64)
                        .filter(|&d| d <= dend)
                        .ok_or_else(|| {
                            fail(format!("entry {} extends past the node's DSpace range", i))
                        })?;
                    cmin = cend;
                    chunks.push(Chunk {
                        doffset,
                        dlength: record.dlength,
                        coffset: record.coffset,
                        clength: record.clength,
                        codec,
                        resource,
                    });
                }
                if dpos != dend {
                    return Err(fail(format!(
                        "entries cover {} bytes but the node declares {}",
                        dpos - header.dbase,
                        header.dsize
                    )));
                }
                IndexNode::Leaf(LeafNode {
                    offset,
                    dbase: header.dbase,
                    dsize: header.dsize,
                    chunks,
                })
            }
            NodeKind::Branch => {
                let mut children: Vec<ChildLink> = Vec::with_capacity(count);
                for (i, raw) in body.chunks_exact(BRANCH_CHILD_SIZE).enumerate() {
                    let record = BranchRecord::from_bytes(raw);
                    let in_order = match children.last() {
                        None => record.dlower == header.dbase,
                        Some(prev) => record.dlower > prev.dlower,
                    };
                    if !in_order || record.dlower >= dend {
                        return Err(fail(format!(
                            "child {} lower bound {} is out of order",
                            i, record.dlower
                        )));
                    }
                    children.push(ChildLink {
                        dlower: record.dlower,
                        offset: record.offset,
                        loaded: None,
                    });
                }
                IndexNode::Branch(BranchNode {
                    offset,
                    height: header.height,
                    dbase: header.dbase,
                    dsize: header.dsize,
                    children,
                })
            }
        };

        debug!(
            "Loaded index node at offset {}: {:?} with {} entries",
            offset, header.kind, count
        );
        self.arena.push(node);
        Ok(self.arena.len() - 1)
    }
}

/// Read `len` bytes at `offset`, which must end at or before `limit`
fn read_region<S: ChunkSource + ?Sized>(
    source: &S,
    offset: u64,
    len: usize,
    limit: u64,
) -> Result<Vec<u8>> {
    let in_bounds = offset
        .checked_add(len as u64)
        .map_or(false, |end| end <= limit);
    if !in_bounds {
        return Err(RacError::format(format!(
            "{} bytes at offset {} extend past byte {}",
            len, offset, limit
        )));
    }
    Ok(source.read_vec_at(offset, len)?)
}
