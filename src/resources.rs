// SPDX-License-Identifier: MIT
//! Shared resource dictionaries
//!
//! A resource is an immutable byte blob stored once per RAC file and referenced
//! by chunks through a small integer id. Codecs that support dictionaries use
//! it to prime their compressor, which helps small or similar chunks.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

use crate::error::{RacError, Result};

/// Largest number of resources one file can reference (id 0xFF means "none")
pub const MAX_RESOURCES: usize = 255;

/// Resource id as stored in leaf entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u8);

impl ResourceId {
    /// On-disk marker for "no dictionary"
    pub const NONE_BYTE: u8 = 0xFF;

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        (byte != Self::NONE_BYTE).then_some(ResourceId(byte))
    }

    pub fn to_byte(id: Option<ResourceId>) -> u8 {
        id.map(|id| id.0).unwrap_or(Self::NONE_BYTE)
    }
}

/// One loaded dictionary
#[derive(Debug, Clone)]
pub struct ResourceDictionary {
    id: ResourceId,
    bytes: Bytes,
    digest: String,
}

impl ResourceDictionary {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex SHA-256 of the dictionary contents
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Id-indexed set of dictionaries, shared read-only by every decode worker
#[derive(Debug, Clone, Default)]
pub struct ResourceDictionaryStore {
    dictionaries: Vec<ResourceDictionary>,
}

impl ResourceDictionaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load dictionary files in order; identical files share one id
    pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut store = Self::new();
        for path in paths {
            let path = path.as_ref();
            let data = std::fs::read(path).map_err(|e| {
                RacError::config(format!(
                    "cannot read resource file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let id = store.insert(Bytes::from(data))?;
            debug!("Loaded resource {} as id {}", path.display(), id.0);
        }
        Ok(store)
    }

    /// Rebuild the table of a file being decoded, keeping ids positional
    pub(crate) fn from_file_regions(regions: Vec<Bytes>) -> Result<Self> {
        if regions.len() > MAX_RESOURCES {
            return Err(RacError::format(format!(
                "{} resources exceed the maximum of {}",
                regions.len(),
                MAX_RESOURCES
            )));
        }
        let dictionaries = regions
            .into_iter()
            .enumerate()
            .map(|(i, bytes)| ResourceDictionary {
                id: ResourceId(i as u8),
                digest: fingerprint(&bytes),
                bytes,
            })
            .collect();
        Ok(Self { dictionaries })
    }

    /// Add a dictionary, returning the id of an identical one if present
    pub fn insert(&mut self, bytes: Bytes) -> Result<ResourceId> {
        let digest = fingerprint(&bytes);
        if let Some(existing) = self.dictionaries.iter().find(|d| d.digest == digest) {
            return Ok(existing.id);
        }
        if self.dictionaries.len() >= MAX_RESOURCES {
            return Err(RacError::config(format!(
                "at most {} resource dictionaries are supported",
                MAX_RESOURCES
            )));
        }
        if bytes.is_empty() {
            return Err(RacError::config("resource dictionaries must not be empty"));
        }
        if u32::try_from(bytes.len()).is_err() {
            return Err(RacError::config(format!(
                "resource dictionary of {} bytes is too large",
                bytes.len()
            )));
        }
        let id = ResourceId(self.dictionaries.len() as u8);
        self.dictionaries.push(ResourceDictionary { id, bytes, digest });
        Ok(id)
    }

    pub fn get(&self, id: ResourceId) -> Option<&ResourceDictionary> {
        self.dictionaries.get(id.index())
    }

    /// Dictionary bytes for an optional id
    pub fn bytes_for(&self, id: Option<ResourceId>) -> Option<&[u8]> {
        id.and_then(|id| self.get(id)).map(|d| d.bytes())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDictionary> {
        self.dictionaries.iter()
    }

    pub fn len(&self) -> usize {
        self.dictionaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionaries.is_empty()
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
