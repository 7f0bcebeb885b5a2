// SPDX-License-Identifier: MIT
//! RAC on-disk records
//!
//! All integers are little-endian and every record has a fixed width, so the
//! size of an index can be computed from its entry counts alone.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RacError, Result};

/// RAC magic bytes: "RAC\x1A\x00\x00\x00\x00"
pub const RAC_MAGIC: [u8; 8] = [0x52, 0x41, 0x43, 0x1A, 0, 0, 0, 0];

/// RAC format version
pub const RAC_VERSION: u32 = 1;

/// File header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Trailer magic: "RAC\x1ATAIL"
pub const TRAILER_MAGIC: [u8; 8] = *b"RAC\x1ATAIL";

/// Trailer size in bytes (only present when the index is at the end)
pub const TRAILER_SIZE: usize = 16;

pub const DIRECTORY_TAG: [u8; 4] = *b"RIDX";
pub const DIRECTORY_FIXED_SIZE: usize = 24;
pub const RESOURCE_RECORD_SIZE: usize = 16;

pub const NODE_HEADER_SIZE: usize = 24;
pub const LEAF_ENTRY_SIZE: usize = 20;
pub const BRANCH_CHILD_SIZE: usize = 16;

/// Hard upper bound on entries (or children) per index node
pub const MAX_NODE_ENTRIES: usize = 4096;

/// Hard upper bound on the height of the index tree (a lone leaf has height 0)
pub const MAX_TREE_HEIGHT: u8 = 16;

/// Header flags
pub mod flags {
    /// The index follows the chunks and is located through the trailer
    pub const INDEX_AT_END: u32 = 0x0000_0001;

    pub const KNOWN: u32 = INDEX_AT_END;
}

#[inline]
pub(crate) fn le_u16(bytes: &[u8], at: usize) -> u16 {
    let mut buf = [0u8; 2];
    buf.copy_from_slice(&bytes[at..at + 2]);
    u16::from_le_bytes(buf)
}

#[inline]
pub(crate) fn le_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

#[inline]
pub(crate) fn le_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Where the index lives in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexLocation {
    /// Right after the header; needs every chunk buffered before writing
    #[default]
    Start,
    /// After the chunks, found through a fixed-size trailer; chunks stream out
    End,
}

impl IndexLocation {
    pub fn name(&self) -> &'static str {
        match self {
            IndexLocation::Start => "start",
            IndexLocation::End => "end",
        }
    }
}

impl fmt::Display for IndexLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexLocation {
    type Err = RacError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(IndexLocation::Start),
            "end" => Ok(IndexLocation::End),
            other => Err(RacError::config(format!(
                "index location must be \"start\" or \"end\", got {:?}",
                other
            ))),
        }
    }
}

/// File header (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Magic bytes: "RAC\x1A\x00\x00\x00\x00"
    pub magic: [u8; 8],

    /// Format version (currently 1)
    pub version: u32,

    pub flags: u32,

    /// Offset of the index directory, zero when the trailer holds it
    pub index_offset: u64,

    pub reserved: u64,
}

impl FileHeader {
    pub fn new(location: IndexLocation, index_offset: u64) -> Self {
        let (flags, index_offset) = match location {
            IndexLocation::Start => (0, index_offset),
            IndexLocation::End => (flags::INDEX_AT_END, 0),
        };
        Self {
            magic: RAC_MAGIC,
            version: RAC_VERSION,
            flags,
            index_offset,
            reserved: 0,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(RacError::format(format!(
                "file is {} bytes, shorter than the {}-byte header",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        Ok(Self {
            magic,
            version: le_u32(bytes, 8),
            flags: le_u32(bytes, 12),
            index_offset: le_u64(bytes, 16),
            reserved: le_u64(bytes, 24),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != RAC_MAGIC {
            return Err(RacError::format(format!(
                "invalid magic bytes: expected {:?}, got {:?}",
                RAC_MAGIC, self.magic
            )));
        }

        if self.version != RAC_VERSION {
            return Err(RacError::format(format!(
                "unsupported version: expected {}, got {}",
                RAC_VERSION, self.version
            )));
        }

        if self.flags & !flags::KNOWN != 0 {
            return Err(RacError::format(format!(
                "unknown header flags {:#010x}",
                self.flags
            )));
        }

        if self.reserved != 0 {
            return Err(RacError::format("non-zero reserved header bytes"));
        }

        match self.index_location() {
            IndexLocation::Start if self.index_offset < HEADER_SIZE as u64 => Err(
                RacError::format(format!("index offset {} overlaps the header", self.index_offset)),
            ),
            IndexLocation::End if self.index_offset != 0 => Err(RacError::format(
                "header carries an index offset although the index is at the end",
            )),
            _ => Ok(()),
        }
    }

    #[inline]
    pub fn index_location(&self) -> IndexLocation {
        if self.flags & flags::INDEX_AT_END != 0 {
            IndexLocation::End
        } else {
            IndexLocation::Start
        }
    }

    #[inline]
    pub fn write_to_buffer(&self, buffer: &mut Vec<u8>) {
        buffer.reserve(HEADER_SIZE);
        buffer.extend_from_slice(&self.magic);
        buffer.extend_from_slice(&self.version.to_le_bytes());
        buffer.extend_from_slice(&self.flags.to_le_bytes());
        buffer.extend_from_slice(&self.index_offset.to_le_bytes());
        buffer.extend_from_slice(&self.reserved.to_le_bytes());
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(&self.magic);
        bytes[8..12].copy_from_slice(&self.version.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.flags.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.index_offset.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.reserved.to_le_bytes());
        bytes
    }
}

/// End-of-file pointer to the index (16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub index_offset: u64,
    pub magic: [u8; 8],
}

impl Trailer {
    pub fn new(index_offset: u64) -> Self {
        Self {
            index_offset,
            magic: TRAILER_MAGIC,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != TRAILER_SIZE {
            return Err(RacError::format(format!(
                "trailer must be {} bytes, got {}",
                TRAILER_SIZE,
                bytes.len()
            )));
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[8..16]);
        let trailer = Self {
            index_offset: le_u64(bytes, 0),
            magic,
        };
        if trailer.magic != TRAILER_MAGIC {
            return Err(RacError::format("invalid trailer magic"));
        }
        Ok(trailer)
    }

    pub fn to_bytes(&self) -> [u8; TRAILER_SIZE] {
        let mut bytes = [0u8; TRAILER_SIZE];
        bytes[0..8].copy_from_slice(&self.index_offset.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.magic);
        bytes
    }
}

/// Location of one resource dictionary inside the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRecord {
    pub coffset: u64,
    pub clength: u32,
}

/// Entry point of the index: resource table plus root node pointer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDirectory {
    pub total_dsize: u64,
    pub root_offset: u64,
    pub resources: Vec<ResourceRecord>,
}

impl IndexDirectory {
    pub fn encoded_len(resource_count: usize) -> usize {
        DIRECTORY_FIXED_SIZE + resource_count * RESOURCE_RECORD_SIZE
    }

    /// Parse the fixed part, returning (resource count, total DSize, root offset)
    pub fn parse_fixed(bytes: &[u8]) -> Result<(usize, u64, u64)> {
        if bytes.len() < DIRECTORY_FIXED_SIZE {
            return Err(RacError::format("truncated index directory"));
        }
        if bytes[0..4] != DIRECTORY_TAG {
            return Err(RacError::format("invalid index directory tag"));
        }
        if le_u16(bytes, 6) != 0 {
            return Err(RacError::format("non-zero reserved index directory bytes"));
        }
        Ok((le_u16(bytes, 4) as usize, le_u64(bytes, 8), le_u64(bytes, 16)))
    }

    pub fn parse_resources(bytes: &[u8], count: usize) -> Result<Vec<ResourceRecord>> {
        if bytes.len() < count * RESOURCE_RECORD_SIZE {
            return Err(RacError::format("truncated resource table"));
        }
        (0..count)
            .map(|i| {
                let at = i * RESOURCE_RECORD_SIZE;
                if le_u32(bytes, at + 12) != 0 {
                    return Err(RacError::format(format!(
                        "non-zero reserved bytes in resource record {}",
                        i
                    )));
                }
                Ok(ResourceRecord {
                    coffset: le_u64(bytes, at),
                    clength: le_u32(bytes, at + 8),
                })
            })
            .collect()
    }

    pub fn write_to_buffer(&self, buffer: &mut Vec<u8>) {
        buffer.reserve(Self::encoded_len(self.resources.len()));
        buffer.extend_from_slice(&DIRECTORY_TAG);
        buffer.extend_from_slice(&(self.resources.len() as u16).to_le_bytes());
        buffer.extend_from_slice(&0u16.to_le_bytes());
        buffer.extend_from_slice(&self.total_dsize.to_le_bytes());
        buffer.extend_from_slice(&self.root_offset.to_le_bytes());
        for record in &self.resources {
            buffer.extend_from_slice(&record.coffset.to_le_bytes());
            buffer.extend_from_slice(&record.clength.to_le_bytes());
            buffer.extend_from_slice(&0u32.to_le_bytes());
        }
    }
}

/// Index node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Branch,
}

impl NodeKind {
    fn tag(self) -> u8 {
        match self {
            NodeKind::Leaf => b'L',
            NodeKind::Branch => b'B',
        }
    }

    /// Width of one record in a node of this kind
    pub fn record_size(self) -> usize {
        match self {
            NodeKind::Leaf => LEAF_ENTRY_SIZE,
            NodeKind::Branch => BRANCH_CHILD_SIZE,
        }
    }
}

/// Index node header (24 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub kind: NodeKind,
    pub height: u8,
    pub count: u16,
    pub dbase: u64,
    pub dsize: u64,
}

impl NodeHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NODE_HEADER_SIZE {
            return Err(RacError::format("truncated index node header"));
        }
        let kind = match bytes[0] {
            b'L' => NodeKind::Leaf,
            b'B' => NodeKind::Branch,
            other => {
                return Err(RacError::format(format!(
                    "unknown index node kind {:#04x}",
                    other
                )))
            }
        };
        if le_u32(bytes, 4) != 0 {
            return Err(RacError::format("non-zero reserved index node bytes"));
        }
        Ok(Self {
            kind,
            height: bytes[1],
            count: le_u16(bytes, 2),
            dbase: le_u64(bytes, 8),
            dsize: le_u64(bytes, 16),
        })
    }

    /// Size of the records that follow the header
    pub fn body_len(&self) -> usize {
        self.count as usize * self.kind.record_size()
    }

    pub fn encoded_len(kind: NodeKind, count: usize) -> usize {
        NODE_HEADER_SIZE + count * kind.record_size()
    }

    pub fn write_to_buffer(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.kind.tag());
        buffer.push(self.height);
        buffer.extend_from_slice(&self.count.to_le_bytes());
        buffer.extend_from_slice(&0u32.to_le_bytes());
        buffer.extend_from_slice(&self.dbase.to_le_bytes());
        buffer.extend_from_slice(&self.dsize.to_le_bytes());
    }
}

/// Raw leaf entry, exactly as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafRecord {
    pub coffset: u64,
    pub clength: u32,
    pub dlength: u32,
    pub codec: u8,
    pub resource: u8,
}

impl LeafRecord {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if le_u16(bytes, 18) != 0 {
            return Err(RacError::format("non-zero reserved leaf entry bytes"));
        }
        Ok(Self {
            coffset: le_u64(bytes, 0),
            clength: le_u32(bytes, 8),
            dlength: le_u32(bytes, 12),
            codec: bytes[16],
            resource: bytes[17],
        })
    }

    pub fn write_to_buffer(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.coffset.to_le_bytes());
        buffer.extend_from_slice(&self.clength.to_le_bytes());
        buffer.extend_from_slice(&self.dlength.to_le_bytes());
        buffer.push(self.codec);
        buffer.push(self.resource);
        buffer.extend_from_slice(&0u16.to_le_bytes());
    }
}

/// Raw branch child pointer, exactly as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchRecord {
    pub dlower: u64,
    pub offset: u64,
}

impl BranchRecord {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            dlower: le_u64(bytes, 0),
            offset: le_u64(bytes, 8),
        }
    }

    pub fn write_to_buffer(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.dlower.to_le_bytes());
        buffer.extend_from_slice(&self.offset.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_new() {
        let header = FileHeader::new(IndexLocation::Start, HEADER_SIZE as u64);
        assert!(header.validate().is_ok());
        assert_eq!(header.index_location(), IndexLocation::Start);

        let header = FileHeader::new(IndexLocation::End, 999);
        assert!(header.validate().is_ok());
        assert_eq!(header.index_location(), IndexLocation::End);
        assert_eq!(header.index_offset, 0);
    }

    #[test]
    fn test_header_bytes_agree() {
        let header = FileHeader::new(IndexLocation::Start, 32);
        let mut buffer = Vec::new();
        header.write_to_buffer(&mut buffer);
        assert_eq!(buffer.as_slice(), &header.to_bytes()[..]);
        assert_eq!(FileHeader::from_bytes(&buffer).unwrap(), header);
    }

    #[test]
    fn test_header_validate_invalid_magic() {
        let mut header = FileHeader::new(IndexLocation::Start, 32);
        header.magic = [0; 8];
        assert!(header.validate().is_err());
    }

    #[test]
    fn test_header_validate_invalid_version() {
        let mut header = FileHeader::new(IndexLocation::Start, 32);
        header.version = 999;
        assert!(header.validate().is_err());
    }

    #[test]
    fn test_header_validate_unknown_flags() {
        let mut header = FileHeader::new(IndexLocation::Start, 32);
        header.flags |= 0x80;
        assert!(header.validate().is_err());
    }

    #[test]
    fn test_header_too_short() {
        assert!(matches!(
            FileHeader::from_bytes(&[0u8; 16]),
            Err(RacError::Format(_))
        ));
    }

    #[test]
    fn test_trailer_magic() {
        let trailer = Trailer::new(4242);
        let parsed = Trailer::from_bytes(&trailer.to_bytes()).unwrap();
        assert_eq!(parsed.index_offset, 4242);

        let mut bytes = trailer.to_bytes();
        bytes[15] ^= 0xFF;
        assert!(Trailer::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_directory_layout() {
        let directory = IndexDirectory {
            total_dsize: 64,
            root_offset: 80,
            resources: vec![ResourceRecord {
                coffset: 32,
                clength: 10,
            }],
        };
        let mut buffer = Vec::new();
        directory.write_to_buffer(&mut buffer);
        assert_eq!(buffer.len(), IndexDirectory::encoded_len(1));

        let (count, total, root) = IndexDirectory::parse_fixed(&buffer).unwrap();
        assert_eq!((count, total, root), (1, 64, 80));
        let resources =
            IndexDirectory::parse_resources(&buffer[DIRECTORY_FIXED_SIZE..], count).unwrap();
        assert_eq!(resources, directory.resources);
    }

    #[test]
    fn test_node_header_rejects_unknown_kind() {
        let header = NodeHeader {
            kind: NodeKind::Leaf,
            height: 0,
            count: 3,
            dbase: 0,
            dsize: 30,
        };
        let mut buffer = Vec::new();
        header.write_to_buffer(&mut buffer);
        assert_eq!(buffer.len(), NODE_HEADER_SIZE);
        assert_eq!(NodeHeader::from_bytes(&buffer).unwrap(), header);
        assert_eq!(header.body_len(), 3 * LEAF_ENTRY_SIZE);

        buffer[0] = b'X';
        assert!(NodeHeader::from_bytes(&buffer).is_err());
    }

    #[test]
    fn test_leaf_record_reserved_bytes() {
        let record = LeafRecord {
            coffset: 100,
            clength: 12,
            dlength: 10,
            codec: 1,
            resource: 0xFF,
        };
        let mut buffer = Vec::new();
        record.write_to_buffer(&mut buffer);
        assert_eq!(buffer.len(), LEAF_ENTRY_SIZE);
        assert_eq!(LeafRecord::from_bytes(&buffer).unwrap(), record);

        buffer[19] = 1;
        assert!(LeafRecord::from_bytes(&buffer).is_err());
    }

    #[test]
    fn test_index_location_from_str() {
        assert_eq!("start".parse::<IndexLocation>().unwrap(), IndexLocation::Start);
        assert_eq!("end".parse::<IndexLocation>().unwrap(), IndexLocation::End);
        assert!("middle".parse::<IndexLocation>().is_err());
    }
}
