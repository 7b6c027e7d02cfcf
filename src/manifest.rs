// manifest.rs - Snapshot manifest describing the mounted files
//
// The manifest is produced by whatever took the snapshot; this layer only
// consumes it. It maps each logical file name to the name of the blob
// holding its bytes and the file's length.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Descriptor of one snapshotted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Name of the remote blob holding this file's bytes.
    pub physical_name: String,
    /// Length of the file in bytes.
    pub length: u64,
}

impl FileInfo {
    pub fn new(physical_name: impl Into<String>, length: u64) -> Self {
        Self {
            physical_name: physical_name.into(),
            length,
        }
    }
}

/// The set of files contained in one shard snapshot, keyed by logical name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    files: HashMap<String, FileInfo>,
}

impl SnapshotManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper used when assembling a manifest in code.
    pub fn with_file(mut self, name: impl Into<String>, info: FileInfo) -> Self {
        self.files.insert(name.into(), info);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, info: FileInfo) {
        self.files.insert(name.into(), info);
    }

    pub fn file_info(&self, name: &str) -> Option<&FileInfo> {
        self.files.get(name)
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Load a manifest from its JSON representation.
    pub fn from_json(json: &str) -> io::Result<Self> {
        serde_json::from_str(json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Load a manifest from a JSON file on disk.
    pub fn load(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_json(&contents)
    }
}
