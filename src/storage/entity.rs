//! Generic entity store contract and the single-partition implementation.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::core::{format_key, Key, LedgerError, Record, Result, Schema};
use super::mirror::{diff, MirrorStats};
use super::observer::{ChangeListener, Observers};
use super::partition::Partition;

/// Contract shared by every logical table, whether it is backed by one
/// partition or many. Mutating calls notify subscribed listeners exactly
/// once after the underlying file write has committed.
pub trait EntityStore {
    fn name(&self) -> &str;

    fn schema(&self) -> &Arc<Schema>;

    /// All records in stable order: partitions ordered by path, rows within
    /// a partition in file order. Pure read.
    fn list(&self) -> Result<Vec<Record>>;

    /// Append records, returning their keys. Fails with `DuplicateKey` if an
    /// explicit key is already present.
    fn add(&mut self, records: Vec<Record>) -> Result<Vec<Key>>;

    /// Replace the fields of the records matching each given key, in place.
    fn modify(&mut self, records: Vec<Record>) -> Result<()>;

    /// Remove records by key. With `allow_missing`, unknown keys are ignored
    /// instead of raising `NotFound`.
    fn delete(&mut self, keys: &[Key], allow_missing: bool) -> Result<()>;

    /// Reconcile stored content to exactly `target` with minimal edits.
    /// With `delete = false`, existing records absent from `target` are left
    /// alone. Re-mirroring an already-matching target touches no file and
    /// fires no listener.
    fn mirror(&mut self, target: Vec<Record>, delete: bool) -> Result<MirrorStats>;

    /// Subscribe to change notifications for this entity.
    fn on_change(&mut self, listener: ChangeListener);
}

/// Entity backed by exactly one partition, keyed by the schema's key
/// columns: accounts, tax codes, assets, revaluations.
pub struct SingleFileEntity {
    root: PathBuf,
    schema: Arc<Schema>,
    partition: Partition,
    observers: Observers,
}

impl SingleFileEntity {
    pub fn new(root: impl Into<PathBuf>, schema: Arc<Schema>, file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            schema,
            partition: Partition::new(file_name),
            observers: Observers::new(),
        }
    }

    fn standardize(&self, mut records: Vec<Record>) -> Result<Vec<Record>> {
        for record in &mut records {
            record.standardize();
            record.validate().map_err(|msg| {
                LedgerError::schema(self.partition.rel_path(), 0, msg)
            })?;
        }
        Ok(records)
    }

    fn store(&self, records: &[Record]) -> Result<()> {
        self.partition.write(&self.root, &self.schema, records)
    }
}

impl EntityStore for SingleFileEntity {
    fn name(&self) -> &str {
        self.schema.name()
    }

    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn list(&self) -> Result<Vec<Record>> {
        self.partition.read(&self.root, &self.schema)
    }

    fn add(&mut self, records: Vec<Record>) -> Result<Vec<Key>> {
        let incoming = self.standardize(records)?;
        if incoming.is_empty() {
            return Ok(Vec::new());
        }
        let mut current = self.list()?;
        let existing: HashSet<Key> = current.iter().map(Record::key).collect();
        let mut seen: HashSet<Key> = HashSet::new();
        for record in &incoming {
            let key = record.key();
            if existing.contains(&key) || !seen.insert(key.clone()) {
                return Err(LedgerError::DuplicateKey(format!(
                    "{} '{}'",
                    self.name(),
                    format_key(&key)
                )));
            }
        }
        let keys: Vec<Key> = incoming.iter().map(Record::key).collect();
        current.extend(incoming);
        self.store(&current)?;
        self.observers.notify(self.name());
        Ok(keys)
    }

    fn modify(&mut self, records: Vec<Record>) -> Result<()> {
        let incoming = self.standardize(records)?;
        if incoming.is_empty() {
            return Ok(());
        }
        let mut current = self.list()?;
        for record in incoming {
            let key = record.key();
            let slot = current.iter_mut().find(|r| r.key() == key).ok_or_else(|| {
                LedgerError::NotFound(format!("{} '{}'", self.name(), format_key(&key)))
            })?;
            *slot = record;
        }
        self.store(&current)?;
        self.observers.notify(self.name());
        Ok(())
    }

    fn delete(&mut self, keys: &[Key], allow_missing: bool) -> Result<()> {
        let current = self.list()?;
        let existing: HashSet<Key> = current.iter().map(Record::key).collect();
        if !allow_missing {
            for key in keys {
                if !existing.contains(key) {
                    return Err(LedgerError::NotFound(format!(
                        "{} '{}'",
                        self.name(),
                        format_key(key)
                    )));
                }
            }
        }
        let doomed: HashSet<&Key> = keys.iter().collect();
        let before = current.len();
        let remaining: Vec<Record> = current
            .into_iter()
            .filter(|r| !doomed.contains(&r.key()))
            .collect();
        // All keys tolerated as missing: nothing changed, stay silent.
        if remaining.len() == before {
            return Ok(());
        }
        self.store(&remaining)?;
        self.observers.notify(self.name());
        Ok(())
    }

    fn mirror(&mut self, target: Vec<Record>, delete: bool) -> Result<MirrorStats> {
        let desired = self.standardize(target)?;
        let current = self.list()?;

        let current_keyed: Vec<(Key, Record)> =
            current.iter().map(|r| (r.key(), r.clone())).collect();
        let desired_keyed: Vec<(Key, Record)> =
            desired.iter().map(|r| (r.key(), r.clone())).collect();
        let mut changes = diff(&current_keyed, &desired_keyed);
        if !delete {
            changes.delete.clear();
        }

        let stats = MirrorStats {
            initial: current.len(),
            target: desired.len(),
            added: changes.add.len(),
            deleted: changes.delete.len(),
            updated: changes.modify.len(),
        };
        if changes.is_empty() {
            debug!(entity = self.name(), "mirror: already in sync");
            return Ok(stats);
        }

        let to_delete: HashSet<&Key> = changes.delete.iter().collect();
        let to_modify: HashSet<&Key> = changes.modify.iter().collect();
        let to_add: HashSet<&Key> = changes.add.iter().collect();

        // Delete, then modify in place, then append: untouched rows keep
        // their original relative order.
        let mut next: Vec<Record> = Vec::with_capacity(desired.len());
        for record in current {
            let key = record.key();
            if to_delete.contains(&key) {
                continue;
            }
            if to_modify.contains(&key) {
                let replacement = desired
                    .iter()
                    .find(|r| r.key() == key)
                    .expect("modified key present in target")
                    .clone();
                next.push(replacement);
            } else {
                next.push(record);
            }
        }
        for record in &desired {
            if to_add.contains(&record.key()) {
                next.push(record.clone());
            }
        }

        self.store(&next)?;
        self.observers.notify(self.name());
        debug!(
            entity = self.name(),
            added = stats.added,
            deleted = stats.deleted,
            updated = stats.updated,
            "mirror applied"
        );
        Ok(stats)
    }

    fn on_change(&mut self, listener: ChangeListener) {
        self.observers.subscribe(listener);
    }
}
