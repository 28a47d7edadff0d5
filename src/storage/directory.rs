//! Entity spread over multiple partitions in a subdirectory, keyed by the
//! schema's key columns (e.g. price history).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::core::{format_key, Key, LedgerError, Record, Result, Schema};
use super::entity::EntityStore;
use super::mirror::{diff, MirrorStats};
use super::observer::{ChangeListener, Observers};
use super::partition::Partition;
use super::router::PartitionRouter;

pub struct DirectoryEntity {
    root: PathBuf,
    schema: Arc<Schema>,
    router: PartitionRouter,
    observers: Observers,
    /// Lazily built key -> partition map for records addressed without a
    /// partition hint. Dropped on every write.
    index: Option<HashMap<Key, String>>,
}

impl DirectoryEntity {
    pub fn new(root: impl Into<PathBuf>, schema: Arc<Schema>, subdir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            schema,
            router: PartitionRouter::new(subdir),
            observers: Observers::new(),
            index: None,
        }
    }

    fn entity_root(&self) -> PathBuf {
        self.root.join(self.router.subdir())
    }

    /// All partitions with their rows, ordered by partition path.
    fn scan(&self) -> Result<Vec<(Partition, Vec<Record>)>> {
        let entity_root = self.entity_root();
        let mut out = Vec::new();
        for partition in self.router.partitions(&self.root)? {
            let records = partition.read(&entity_root, &self.schema)?;
            out.push((partition, records));
        }
        Ok(out)
    }

    fn ensure_index(&mut self) -> Result<()> {
        if self.index.is_some() {
            return Ok(());
        }
        let mut index = HashMap::new();
        for (partition, records) in self.scan()? {
            for record in records {
                index.insert(record.key(), partition.rel_path().to_string());
            }
        }
        self.index = Some(index);
        Ok(())
    }

    fn invalidate(&mut self) {
        self.index = None;
    }

    fn standardize(&self, mut records: Vec<Record>) -> Result<Vec<Record>> {
        for record in &mut records {
            record.standardize();
            record
                .validate()
                .map_err(|msg| LedgerError::schema(self.router.subdir(), 0, msg))?;
        }
        Ok(records)
    }

    fn write_partition(&self, rel_path: &str, records: &[Record]) -> Result<()> {
        Partition::new(rel_path).write(&self.entity_root(), &self.schema, records)
    }

    /// Append records to a specific partition, bypassing the default route.
    pub fn add_to(&mut self, partition: Option<&str>, records: Vec<Record>) -> Result<Vec<Key>> {
        let incoming = self.standardize(records)?;
        if incoming.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_index()?;
        let index = self.index.as_ref().expect("index built above");
        let mut seen: HashSet<Key> = HashSet::new();
        for record in &incoming {
            let key = record.key();
            if index.contains_key(&key) || !seen.insert(key.clone()) {
                return Err(LedgerError::DuplicateKey(format!(
                    "{} '{}'",
                    self.name(),
                    format_key(&key)
                )));
            }
        }
        let keys: Vec<Key> = incoming.iter().map(Record::key).collect();

        let target = self.router.route(partition);
        let target_partition = Partition::new(target.clone());
        let mut rows = target_partition.read(&self.entity_root(), &self.schema)?;
        rows.extend(incoming);
        self.write_partition(&target, &rows)?;
        self.invalidate();
        self.observers.notify(self.name());
        Ok(keys)
    }

    /// Keys grouped by the partition that owns them; `NotFound` for unknown
    /// keys unless tolerated.
    fn locate(
        &mut self,
        keys: impl IntoIterator<Item = Key>,
        allow_missing: bool,
    ) -> Result<HashMap<String, HashSet<Key>>> {
        self.ensure_index()?;
        let index = self.index.as_ref().expect("index built above");
        let mut by_partition: HashMap<String, HashSet<Key>> = HashMap::new();
        for key in keys {
            match index.get(&key) {
                Some(partition) => {
                    by_partition.entry(partition.clone()).or_default().insert(key);
                }
                None if allow_missing => {}
                None => {
                    return Err(LedgerError::NotFound(format!(
                        "{} '{}'",
                        self.name(),
                        format_key(&key)
                    )));
                }
            }
        }
        Ok(by_partition)
    }
}

impl EntityStore for DirectoryEntity {
    fn name(&self) -> &str {
        self.schema.name()
    }

    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn list(&self) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        for (_, mut records) in self.scan()? {
            out.append(&mut records);
        }
        Ok(out)
    }

    fn add(&mut self, records: Vec<Record>) -> Result<Vec<Key>> {
        self.add_to(None, records)
    }

    fn modify(&mut self, records: Vec<Record>) -> Result<()> {
        let incoming = self.standardize(records)?;
        let by_key: HashMap<Key, Record> =
            incoming.iter().map(|r| (r.key(), r.clone())).collect();
        let by_partition = self.locate(incoming.iter().map(Record::key), false)?;
        if by_partition.is_empty() {
            return Ok(());
        }

        let entity_root = self.entity_root();
        for (rel_path, keys) in by_partition {
            let partition = Partition::new(rel_path.clone());
            let mut rows = partition.read(&entity_root, &self.schema)?;
            for row in &mut rows {
                if keys.contains(&row.key()) {
                    *row = by_key[&row.key()].clone();
                }
            }
            self.write_partition(&rel_path, &rows)?;
        }
        self.invalidate();
        self.observers.notify(self.name());
        Ok(())
    }

    fn delete(&mut self, keys: &[Key], allow_missing: bool) -> Result<()> {
        let by_partition = self.locate(keys.iter().cloned(), allow_missing)?;
        if by_partition.is_empty() {
            return Ok(());
        }
        let entity_root = self.entity_root();
        for (rel_path, keys) in by_partition {
            let partition = Partition::new(rel_path.clone());
            let rows = partition.read(&entity_root, &self.schema)?;
            let remaining: Vec<Record> =
                rows.into_iter().filter(|r| !keys.contains(&r.key())).collect();
            self.write_partition(&rel_path, &remaining)?;
        }
        self.invalidate();
        self.observers.notify(self.name());
        Ok(())
    }

    fn mirror(&mut self, target: Vec<Record>, delete: bool) -> Result<MirrorStats> {
        let desired = self.standardize(target)?;
        let scan = self.scan()?;

        let mut current_keyed: Vec<(Key, Record)> = Vec::new();
        for (_, records) in &scan {
            current_keyed.extend(records.iter().map(|r| (r.key(), r.clone())));
        }
        let desired_keyed: Vec<(Key, Record)> =
            desired.iter().map(|r| (r.key(), r.clone())).collect();
        let mut changes = diff(&current_keyed, &desired_keyed);
        if !delete {
            changes.delete.clear();
        }

        let stats = MirrorStats {
            initial: current_keyed.len(),
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
        let desired_by_key: HashMap<Key, &Record> =
            desired.iter().map(|r| (r.key(), r)).collect();

        // Rewrite only partitions that own an affected row; new rows land in
        // the default partition.
        let default = self.router.route(None);
        for (partition, rows) in scan {
            let affected = rows
                .iter()
                .any(|r| to_delete.contains(&r.key()) || to_modify.contains(&r.key()));
            let is_default = partition.rel_path() == default;
            if !affected && !(is_default && !to_add.is_empty()) {
                continue;
            }
            let mut next: Vec<Record> = Vec::with_capacity(rows.len());
            for row in rows {
                let key = row.key();
                if to_delete.contains(&key) {
                    continue;
                }
                if to_modify.contains(&key) {
                    next.push((*desired_by_key[&key]).clone());
                } else {
                    next.push(row);
                }
            }
            if is_default {
                for record in &desired {
                    if to_add.contains(&record.key()) {
                        next.push(record.clone());
                    }
                }
            }
            self.write_partition(partition.rel_path(), &next)?;
        }

        // The default partition may not exist yet.
        if !to_add.is_empty()
            && !Partition::new(default.clone()).exists(&self.entity_root())
        {
            let added: Vec<Record> = desired
                .iter()
                .filter(|r| to_add.contains(&r.key()))
                .cloned()
                .collect();
            self.write_partition(&default, &added)?;
        }

        self.invalidate();
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, ColumnType, Value};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn price_schema() -> Arc<Schema> {
        Arc::new(Schema::new(
            "price",
            vec![
                Column::new("ticker", ColumnType::Currency).key(),
                Column::new("date", ColumnType::Date).key(),
                Column::new("currency", ColumnType::Currency).key(),
                Column::new("price", ColumnType::Number).required(),
            ],
        ))
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn price(schema: &Arc<Schema>, ticker: &str, d: u32, value: f64) -> Record {
        Record::new(Arc::clone(schema))
            .with("ticker", ticker)
            .with("date", day(d))
            .with("currency", "USD")
            .with("price", value)
    }

    fn entity(root: &TempDir) -> DirectoryEntity {
        DirectoryEntity::new(root.path(), price_schema(), "price")
    }

    #[test]
    fn test_add_routes_to_default_partition() {
        let root = TempDir::new().unwrap();
        let mut store = entity(&root);
        let s = price_schema();
        store.add(vec![price(&s, "EUR", 1, 1.09)]).unwrap();
        assert!(root.path().join("price/default.csv").is_file());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_add_to_explicit_partition() {
        let root = TempDir::new().unwrap();
        let mut store = entity(&root);
        let s = price_schema();
        store
            .add_to(Some("2024/fx.csv"), vec![price(&s, "EUR", 1, 1.09)])
            .unwrap();
        assert!(root.path().join("price/2024/fx.csv").is_file());
    }

    #[test]
    fn test_duplicate_key_across_partitions_rejected() {
        let root = TempDir::new().unwrap();
        let mut store = entity(&root);
        let s = price_schema();
        store.add_to(Some("a.csv"), vec![price(&s, "EUR", 1, 1.09)]).unwrap();
        let err = store
            .add_to(Some("b.csv"), vec![price(&s, "EUR", 1, 1.10)])
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateKey(_)));
    }

    #[test]
    fn test_modify_rewrites_only_owning_partition() {
        let root = TempDir::new().unwrap();
        let mut store = entity(&root);
        let s = price_schema();
        store.add_to(Some("a.csv"), vec![price(&s, "EUR", 1, 1.09)]).unwrap();
        store.add_to(Some("b.csv"), vec![price(&s, "GBP", 1, 1.27)]).unwrap();
        let b_before = std::fs::read_to_string(root.path().join("price/b.csv")).unwrap();

        store.modify(vec![price(&s, "EUR", 1, 1.11)]).unwrap();

        let b_after = std::fs::read_to_string(root.path().join("price/b.csv")).unwrap();
        assert_eq!(b_before, b_after);
        let eur = store
            .list()
            .unwrap()
            .into_iter()
            .find(|r| r.get("ticker").as_str() == Some("EUR"))
            .unwrap();
        assert_eq!(eur.get("price"), &Value::Number(1.11));
    }

    #[test]
    fn test_mirror_to_empty_removes_all_partitions() {
        let root = TempDir::new().unwrap();
        let mut store = entity(&root);
        let s = price_schema();
        store.add_to(Some("a.csv"), vec![price(&s, "EUR", 1, 1.09)]).unwrap();
        store.mirror(Vec::new(), true).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(!root.path().join("price/a.csv").exists());
    }

    #[test]
    fn test_mirror_is_idempotent_across_partitions() {
        let root = TempDir::new().unwrap();
        let mut store = entity(&root);
        let s = price_schema();
        store.add_to(Some("a.csv"), vec![price(&s, "EUR", 1, 1.09)]).unwrap();

        let target = vec![price(&s, "EUR", 1, 1.09), price(&s, "GBP", 2, 1.27)];
        let stats = store.mirror(target.clone(), true).unwrap();
        assert_eq!((stats.added, stats.deleted, stats.updated), (1, 0, 0));

        let stats = store.mirror(target, true).unwrap();
        assert_eq!((stats.added, stats.deleted, stats.updated), (0, 0, 0));
    }
}
