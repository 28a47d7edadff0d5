//! Composite identifiers and partition resolution for multi-file entities.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::core::{LedgerError, Result};
use super::partition::Partition;

pub const DEFAULT_PARTITION: &str = "default.csv";

/// Partition-qualified identifier: `<partition-path>:<local-id>`.
///
/// The partition path may itself contain colons in theory, so parsing
/// splits on the last `:`. Sequences are local to the entity, assigned
/// monotonically across all of its partitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId {
    pub partition: String,
    pub sequence: u64,
}

impl EntryId {
    pub fn new(partition: impl Into<String>, sequence: u64) -> Self {
        Self { partition: partition.into(), sequence }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition, self.sequence)
    }
}

/// A caller-supplied key: either fully qualified or a bare sequence that the
/// router resolves through its index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryRef {
    Qualified(EntryId),
    Bare(u64),
}

impl EntryRef {
    pub fn parse(text: &str) -> Result<Self> {
        match text.rsplit_once(':') {
            Some((partition, seq)) => {
                let sequence = seq.parse::<u64>().map_err(|_| {
                    LedgerError::NotFound(format!("malformed entry id '{}'", text))
                })?;
                if partition.is_empty() {
                    return Err(LedgerError::NotFound(format!("malformed entry id '{}'", text)));
                }
                Ok(Self::Qualified(EntryId::new(partition, sequence)))
            }
            None => text
                .parse::<u64>()
                .map(Self::Bare)
                .map_err(|_| LedgerError::NotFound(format!("malformed entry id '{}'", text))),
        }
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Qualified(id) => id.fmt(f),
            Self::Bare(seq) => seq.fmt(f),
        }
    }
}

/// Maps records to partitions for one multi-file entity and resolves bare
/// sequences back to their owning partition.
///
/// The bare-key index is built lazily from a full scan supplied by the
/// owning store and dropped on every write.
pub struct PartitionRouter {
    subdir: String,
    default_partition: String,
    index: Option<HashMap<u64, String>>,
}

impl PartitionRouter {
    pub fn new(subdir: impl Into<String>) -> Self {
        Self {
            subdir: subdir.into(),
            default_partition: DEFAULT_PARTITION.to_string(),
            index: None,
        }
    }

    pub fn subdir(&self) -> &str {
        &self.subdir
    }

    /// All partitions of the entity, ordered by relative path. Paths are
    /// relative to the entity's subdirectory.
    pub fn partitions(&self, root: &Path) -> Result<Vec<Partition>> {
        let dir = root.join(&self.subdir);
        let mut rel_paths = Vec::new();
        if dir.is_dir() {
            collect_csv_files(&dir, &dir, &mut rel_paths)?;
        }
        rel_paths.sort();
        Ok(rel_paths.into_iter().map(Partition::new).collect())
    }

    /// Resolve a reference to the partition holding it. Qualified references
    /// bypass the index entirely; bare references require `ensure_index` to
    /// have run since the last write.
    pub fn resolve(&self, entry: &EntryRef) -> Option<EntryId> {
        match entry {
            EntryRef::Qualified(id) => Some(id.clone()),
            EntryRef::Bare(seq) => self
                .index
                .as_ref()
                .and_then(|index| index.get(seq))
                .map(|partition| EntryId::new(partition.clone(), *seq)),
        }
    }

    pub fn index_ready(&self) -> bool {
        self.index.is_some()
    }

    /// Rebuild the bare-key index from a full scan of current ids.
    pub fn ensure_index(&mut self, ids: impl IntoIterator<Item = EntryId>) {
        let mut index = HashMap::new();
        for id in ids {
            index.insert(id.sequence, id.partition);
        }
        self.index = Some(index);
    }

    pub fn invalidate(&mut self) {
        self.index = None;
    }

    /// Partition for a new record: the caller's hint, or the default.
    pub fn route(&self, hint: Option<&str>) -> String {
        hint.unwrap_or(&self.default_partition).to_string()
    }
}

fn collect_csv_files(base: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_csv_files(base, &path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "csv") {
            let rel = path
                .strip_prefix(base)
                .expect("entry under base directory")
                .to_string_lossy()
                .replace('\\', "/");
            out.push(rel);
        }
    }
    Ok(())
}
