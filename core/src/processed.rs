//! Filename-based dedup against an existing output CSV.
//!
//! Only the first column (the file's base name) is consulted. A file whose
//! content changed since it was recorded is still considered processed.

use csv::ReaderBuilder;
use rustc_hash::FxHashSet;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Clone, Debug, Default)]
pub struct ProcessedSet {
    names: FxHashSet<String>,
}

impl ProcessedSet {
    /// Loads the filenames recorded in `csv_path`.
    ///
    /// A missing file yields an empty set. An unreadable file is reported and
    /// treated as empty; a malformed row stops reading and keeps what was
    /// collected before it.
    pub fn load(csv_path: &Path) -> Self {
        if !csv_path.exists() {
            return Self::default();
        }

        let mut reader = match ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(csv_path)
        {
            Ok(reader) => reader,
            Err(error) => {
                warn!(path = %csv_path.display(), %error, "could not read existing CSV");
                return Self::default();
            }
        };

        let mut set = Self::default();
        for record in reader.records() {
            match record {
                Ok(record) => {
                    if let Some(name) = record.get(0).filter(|name| !name.is_empty()) {
                        set.names.insert(name.to_string());
                    }
                }
                Err(error) => {
                    warn!(path = %csv_path.display(), %error, "stopped reading existing CSV");
                    break;
                }
            }
        }

        debug!(count = set.len(), path = %csv_path.display(), "files already in CSV");
        set
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Returns true when `name` was not yet present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.names.insert(name.into())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
