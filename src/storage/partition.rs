//! One physical partition file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::codec;
use crate::core::{Record, Result, Schema};

/// A named physical container for one entity's rows: a relative file path
/// under the storage root, holding encoded rows in file order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    rel_path: String,
}

impl Partition {
    pub fn new(rel_path: impl Into<String>) -> Self {
        Self { rel_path: rel_path.into() }
    }

    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }

    pub fn abs_path(&self, root: &Path) -> PathBuf {
        root.join(&self.rel_path)
    }

    pub fn exists(&self, root: &Path) -> bool {
        self.abs_path(root).is_file()
    }

    /// Read and decode all rows. A missing file reads as no rows.
    pub fn read(&self, root: &Path, schema: &Arc<Schema>) -> Result<Vec<Record>> {
        let path = self.abs_path(root);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path)?;
        codec::decode(&text, schema, &self.rel_path)
    }

    /// Encode and write all rows, atomically replacing the previous file.
    /// An empty record set removes the file so the storage root carries no
    /// empty artifacts.
    pub fn write(&self, root: &Path, schema: &Arc<Schema>, records: &[Record]) -> Result<()> {
        let path = self.abs_path(root);
        if records.is_empty() {
            if path.is_file() {
                fs::remove_file(&path)?;
                debug!(partition = %self.rel_path, "removed empty partition");
            }
            return Ok(());
        }
        let dir = path.parent().unwrap_or(root);
        fs::create_dir_all(dir)?;
        let text = codec::encode(records, schema);

        // Write to a temp file in the same directory, then rename over the
        // target so readers never observe a half-written partition.
        let tmp = NamedTempFile::new_in(dir)?;
        fs::write(tmp.path(), text)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!(partition = %self.rel_path, rows = records.len(), "wrote partition");
        Ok(())
    }
}
