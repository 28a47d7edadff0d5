//! The journal: multi-partition storage of grouped double-entry
//! transactions.
//!
//! A transaction is stored as a contiguous block of rows within one
//! partition. Only the first row of a block carries the date; subsequent
//! rows inherit it on read. Transaction ids are positional
//! (`<partition>:<group-index>`), regenerated on every read, and therefore
//! stable only until the owning partition is rewritten.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::core::{Key, LedgerError, Record, Result, Schema, Value};
use crate::rates::RateLookup;
use super::entity::EntityStore;
use super::mirror::MirrorStats;
use super::observer::{ChangeListener, Observers};
use super::partition::Partition;
use super::router::{EntryId, EntryRef, PartitionRouter};

/// One journal transaction: a surrogate id, a date, and one or more legs.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: EntryId,
    pub date: NaiveDate,
    pub legs: Vec<Record>,
}

/// Balance policy for the journal: reporting currency, conversion seam and
/// tolerance. Tolerance is domain policy, so it is configuration rather
/// than a constant.
pub struct BalancePolicy {
    pub reporting_currency: String,
    pub tolerance: f64,
    pub rates: Arc<dyn RateLookup>,
}

impl BalancePolicy {
    /// Reporting-currency amount of one leg: an explicit report_amount cell
    /// wins, otherwise the amount is converted as of the transaction date.
    fn report_amount(&self, leg: &Record, date: NaiveDate) -> Result<f64> {
        if let Some(explicit) = leg.get("report_amount").as_f64() {
            return Ok(explicit);
        }
        let amount = leg.get("amount").as_f64().unwrap_or(0.0);
        let currency = leg.get("currency").as_str().unwrap_or_default();
        Ok(amount * self.rates.rate(date, currency)?)
    }

    /// Enforce the zero-sum invariant for one transaction.
    fn check(&self, date: NaiveDate, legs: &[Record], label: &str) -> Result<()> {
        let mut sum = 0.0;
        for leg in legs {
            sum += self.report_amount(leg, date)?;
        }
        if sum.abs() > self.tolerance {
            return Err(LedgerError::UnbalancedTransaction(format!(
                "'{}' on {}: legs sum to {:.6} {}",
                label, date, sum, self.reporting_currency
            )));
        }
        Ok(())
    }
}

pub struct JournalEntity {
    root: PathBuf,
    schema: Arc<Schema>,
    router: PartitionRouter,
    observers: Observers,
    policy: BalancePolicy,
}

impl JournalEntity {
    pub fn new(
        root: impl Into<PathBuf>,
        schema: Arc<Schema>,
        subdir: impl Into<String>,
        policy: BalancePolicy,
    ) -> Self {
        Self {
            root: root.into(),
            schema,
            router: PartitionRouter::new(subdir),
            observers: Observers::new(),
            policy,
        }
    }

    fn entity_root(&self) -> PathBuf {
        self.root.join(self.router.subdir())
    }

    pub fn policy(&self) -> &BalancePolicy {
        &self.policy
    }

    /// Swap the balance policy, e.g. after the reporting currency changed.
    pub fn set_policy(&mut self, policy: BalancePolicy) {
        self.policy = policy;
    }

    /// Scan every partition and group contiguous rows into transactions.
    ///
    /// A row with a date starts a new transaction; rows with a blank date
    /// belong to the transaction begun by the nearest preceding dated row.
    pub fn transactions(&self) -> Result<Vec<Transaction>> {
        let entity_root = self.entity_root();
        let mut out = Vec::new();
        for partition in self.router.partitions(&self.root)? {
            let rows = partition.read(&entity_root, &self.schema)?;
            out.extend(group_rows(partition.rel_path(), rows)?);
        }
        Ok(out)
    }

    fn transactions_of(&self, rel_path: &str) -> Result<Vec<Transaction>> {
        let rows = Partition::new(rel_path).read(&self.entity_root(), &self.schema)?;
        group_rows(rel_path, rows)
    }

    /// Rewrite one partition from its transaction list. Dates are recorded
    /// on first legs only; ids are never written.
    fn write_transactions(&self, rel_path: &str, transactions: &[Transaction]) -> Result<()> {
        let mut rows: Vec<Record> = Vec::new();
        for txn in transactions {
            for (leg_idx, leg) in txn.legs.iter().enumerate() {
                let mut row = leg.clone();
                row.set("id", Value::Null)?;
                let date = if leg_idx == 0 {
                    Value::Date(txn.date)
                } else {
                    Value::Null
                };
                row.set("date", date)?;
                rows.push(row);
            }
        }
        Partition::new(rel_path).write(&self.entity_root(), &self.schema, &rows)
    }

    fn standardize_legs(&self, mut legs: Vec<Record>) -> Result<Vec<Record>> {
        for leg in &mut legs {
            leg.standardize();
            leg.validate()
                .map_err(|msg| LedgerError::schema(self.router.subdir(), 0, msg))?;
            if leg.get("account").is_null() && leg.get("contra").is_null() {
                return Err(LedgerError::schema(
                    self.router.subdir(),
                    0,
                    "journal leg needs an account or a contra account",
                ));
            }
        }
        if legs.is_empty() {
            return Err(LedgerError::schema(
                self.router.subdir(),
                0,
                "transaction has no legs",
            ));
        }
        Ok(legs)
    }

    /// Split flat records into transactions: by explicit id cells when
    /// present, otherwise by date runs (a dated row opens a new group).
    fn group_incoming(&self, records: Vec<Record>) -> Result<Vec<(NaiveDate, Vec<Record>, Option<EntryRef>)>> {
        let mut groups: Vec<(Option<String>, Vec<Record>)> = Vec::new();
        let has_ids = records.iter().any(|r| !r.get("id").is_null());
        for record in records {
            let start = if has_ids {
                let id = record.get("id").as_str().map(str::to_string);
                groups.last().map(|(last, _)| last != &id).unwrap_or(true)
            } else {
                !record.get("date").is_null() || groups.is_empty()
            };
            if start {
                let id = record.get("id").as_str().map(str::to_string);
                groups.push((id, vec![record]));
            } else {
                groups.last_mut().expect("group started").1.push(record);
            }
        }

        let mut out = Vec::new();
        for (id, legs) in groups {
            let legs = self.standardize_legs(legs)?;
            let date = legs
                .iter()
                .find_map(|leg| leg.get("date").as_date())
                .ok_or_else(|| {
                    LedgerError::schema(self.router.subdir(), 0, "transaction has no date")
                })?;
            let entry_ref = match id {
                Some(text) => Some(EntryRef::parse(&text)?),
                None => None,
            };
            out.push((date, legs, entry_ref));
        }
        Ok(out)
    }

    /// Append one transaction to a partition, enforcing the balance
    /// invariant before anything is written. Returns the assigned id.
    pub fn add_transaction(
        &mut self,
        date: NaiveDate,
        legs: Vec<Record>,
        partition: Option<&str>,
    ) -> Result<EntryId> {
        let legs = self.standardize_legs(legs)?;
        let label = legs[0].get("description").to_string();
        self.policy.check(date, &legs, &label)?;

        let rel_path = self.router.route(partition);
        let mut transactions = self.transactions_of(&rel_path)?;
        let id = EntryId::new(rel_path.clone(), transactions.len() as u64 + 1);
        transactions.push(Transaction { id: id.clone(), date, legs });
        self.write_transactions(&rel_path, &transactions)?;
        self.router.invalidate();
        self.observers.notify(self.name());
        Ok(id)
    }

    fn resolve(&mut self, entry: &EntryRef) -> Result<EntryId> {
        if let EntryRef::Bare(_) = entry {
            if !self.router.index_ready() {
                let ids: Vec<EntryId> =
                    self.transactions()?.into_iter().map(|t| t.id).collect();
                self.router.ensure_index(ids);
            }
        }
        self.router
            .resolve(entry)
            .ok_or_else(|| LedgerError::NotFound(format!("journal entry '{}'", entry)))
    }

    fn delete_resolved(&mut self, ids: &[EntryId], allow_missing: bool) -> Result<usize> {
        let mut by_partition: HashMap<String, Vec<u64>> = HashMap::new();
        for id in ids {
            by_partition
                .entry(id.partition.clone())
                .or_default()
                .push(id.sequence);
        }

        let mut removed = 0;
        for (rel_path, sequences) in by_partition {
            let transactions = self.transactions_of(&rel_path)?;
            if !allow_missing {
                for seq in &sequences {
                    if *seq == 0 || *seq > transactions.len() as u64 {
                        return Err(LedgerError::NotFound(format!(
                            "journal entry '{}:{}'",
                            rel_path, seq
                        )));
                    }
                }
            }
            let total = transactions.len();
            let surviving: Vec<Transaction> = transactions
                .into_iter()
                .filter(|t| !sequences.contains(&t.id.sequence))
                .collect();
            if surviving.len() == total {
                continue;
            }
            removed += total - surviving.len();
            self.write_transactions(&rel_path, &surviving)?;
        }
        if removed > 0 {
            self.router.invalidate();
        }
        Ok(removed)
    }

    /// Canonical content signature of one transaction: the date plus every
    /// leg's cells except the positional id. Two transactions with equal
    /// signatures are the same economic event.
    fn signature(&self, txn_date: NaiveDate, legs: &[Record]) -> String {
        let mut parts = vec![txn_date.to_string()];
        for leg in legs {
            let cells: Vec<String> = self
                .schema
                .columns()
                .iter()
                .filter(|col| col.name != "id" && col.name != "date")
                .map(|col| leg.get(&col.name).to_string())
                .collect();
            parts.push(cells.join("\u{1f}"));
        }
        parts.join("\u{1e}")
    }
}

impl EntityStore for JournalEntity {
    fn name(&self) -> &str {
        self.schema.name()
    }

    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Flat row view: every leg with its group's id and date filled in.
    fn list(&self) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        for txn in self.transactions()? {
            for leg in &txn.legs {
                let mut row = leg.clone();
                row.set("id", txn.id.to_string())?;
                row.set("date", txn.date)?;
                out.push(row);
            }
        }
        Ok(out)
    }

    /// Add transactions. All records of one date run (or one explicit id)
    /// form one transaction and receive one fresh id. A qualified incoming
    /// id selects the target partition; the local sequence is reassigned.
    fn add(&mut self, records: Vec<Record>) -> Result<Vec<Key>> {
        let groups = self.group_incoming(records)?;
        let mut keys = Vec::with_capacity(groups.len());
        for (date, legs, entry_ref) in groups {
            let partition = match &entry_ref {
                Some(EntryRef::Qualified(id)) => Some(id.partition.clone()),
                _ => None,
            };
            let id = self.add_transaction(date, legs, partition.as_deref())?;
            keys.push(vec![Value::Text(id.to_string())]);
        }
        Ok(keys)
    }

    /// Replace the legs of existing transactions, identified by id. The
    /// block keeps its position within its partition.
    fn modify(&mut self, records: Vec<Record>) -> Result<()> {
        let groups = self.group_incoming(records)?;
        if groups.is_empty() {
            return Ok(());
        }
        for (date, legs, entry_ref) in &groups {
            let entry = entry_ref.clone().ok_or_else(|| {
                LedgerError::NotFound("modify requires a journal entry id".to_string())
            })?;
            let id = self.resolve(&entry)?;
            let label = legs[0].get("description").to_string();
            self.policy.check(*date, legs, &label)?;

            let mut transactions = self.transactions_of(&id.partition)?;
            let slot = transactions
                .iter_mut()
                .find(|t| t.id.sequence == id.sequence)
                .ok_or_else(|| LedgerError::NotFound(format!("journal entry '{}'", id)))?;
            slot.date = *date;
            slot.legs = legs.clone();
            self.write_transactions(&id.partition, &transactions)?;
        }
        self.router.invalidate();
        self.observers.notify(self.name());
        Ok(())
    }

    fn delete(&mut self, keys: &[Key], allow_missing: bool) -> Result<()> {
        let mut resolved = Vec::with_capacity(keys.len());
        for key in keys {
            let text = match key.first() {
                Some(Value::Text(text)) => text.clone(),
                other => {
                    return Err(LedgerError::NotFound(format!(
                        "malformed journal key {:?}",
                        other
                    )));
                }
            };
            match self.resolve(&EntryRef::parse(&text)?) {
                Ok(id) => resolved.push(id),
                Err(_) if allow_missing => {}
                Err(e) => return Err(e),
            }
        }
        // Every key tolerated as missing: nothing to rewrite, stay silent.
        if resolved.is_empty() {
            return Ok(());
        }
        if self.delete_resolved(&resolved, allow_missing)? > 0 {
            self.observers.notify(self.name());
        }
        Ok(())
    }

    /// Content-based reconciliation: transactions are matched by signature
    /// with multiset counts, because positional ids are not stable across
    /// edits. Surplus copies are deleted from the tail; missing copies are
    /// appended, each balance-checked before any write happens.
    fn mirror(&mut self, target: Vec<Record>, delete: bool) -> Result<MirrorStats> {
        let desired = self.group_incoming(target)?;
        let current = self.transactions()?;

        let mut current_count: HashMap<String, usize> = HashMap::new();
        let mut current_by_sig: HashMap<String, Vec<EntryId>> = HashMap::new();
        for txn in &current {
            let sig = self.signature(txn.date, &txn.legs);
            *current_count.entry(sig.clone()).or_default() += 1;
            current_by_sig.entry(sig).or_default().push(txn.id.clone());
        }

        let mut desired_count: HashMap<String, usize> = HashMap::new();
        for (date, legs, _) in &desired {
            let sig = self.signature(*date, legs);
            *desired_count.entry(sig).or_default() += 1;
        }

        // Validate every transaction that would be added before touching
        // any file.
        let mut to_add: Vec<&(NaiveDate, Vec<Record>, Option<EntryRef>)> = Vec::new();
        let mut add_budget: HashMap<String, usize> = HashMap::new();
        for (sig, wanted) in &desired_count {
            let have = current_count.get(sig).copied().unwrap_or(0);
            if *wanted > have {
                add_budget.insert(sig.clone(), wanted - have);
            }
        }
        for group in &desired {
            let sig = self.signature(group.0, &group.1);
            if let Some(budget) = add_budget.get_mut(&sig) {
                if *budget > 0 {
                    *budget -= 1;
                    let label = group.1[0].get("description").to_string();
                    self.policy.check(group.0, &group.1, &label)?;
                    to_add.push(group);
                }
            }
        }

        let mut to_delete: Vec<EntryId> = Vec::new();
        if delete {
            for (sig, ids) in &current_by_sig {
                let wanted = desired_count.get(sig).copied().unwrap_or(0);
                if ids.len() > wanted {
                    // Drop surplus occurrences from the tail.
                    to_delete.extend(ids[wanted..].iter().cloned());
                }
            }
        }

        let stats = MirrorStats {
            initial: current.len(),
            target: desired.len(),
            added: to_add.len(),
            deleted: to_delete.len(),
            updated: 0,
        };
        if to_add.is_empty() && to_delete.is_empty() {
            debug!(entity = self.name(), "mirror: already in sync");
            return Ok(stats);
        }

        if !to_delete.is_empty() {
            self.delete_resolved(&to_delete, false)?;
        }
        for (date, legs, entry_ref) in to_add {
            let partition = match entry_ref {
                Some(EntryRef::Qualified(id)) => Some(id.partition.clone()),
                _ => None,
            };
            let legs = legs.clone();
            let label = legs[0].get("description").to_string();
            self.policy.check(*date, &legs, &label)?;

            let rel_path = self.router.route(partition.as_deref());
            let mut transactions = self.transactions_of(&rel_path)?;
            let id = EntryId::new(rel_path.clone(), transactions.len() as u64 + 1);
            transactions.push(Transaction { id, date: *date, legs });
            self.write_transactions(&rel_path, &transactions)?;
        }

        self.router.invalidate();
        self.observers.notify(self.name());
        debug!(
            entity = self.name(),
            added = stats.added,
            deleted = stats.deleted,
            "journal mirror applied"
        );
        Ok(stats)
    }

    fn on_change(&mut self, listener: ChangeListener) {
        self.observers.subscribe(listener);
    }
}

/// Group one partition's rows into transactions by date runs.
fn group_rows(rel_path: &str, rows: Vec<Record>) -> Result<Vec<Transaction>> {
    let mut transactions: Vec<Transaction> = Vec::new();
    for (row_idx, mut row) in rows.into_iter().enumerate() {
        let row_date = row.get("date").as_date();
        match row_date {
            Some(date) => {
                let sequence = transactions.len() as u64 + 1;
                transactions.push(Transaction {
                    id: EntryId::new(rel_path, sequence),
                    date,
                    legs: vec![row],
                });
            }
            None => {
                let group = transactions.last_mut().ok_or_else(|| {
                    // Header occupies line 1.
                    LedgerError::schema(
                        rel_path,
                        row_idx + 2,
                        "row without date before any dated row",
                    )
                })?;
                row.set("date", group.date)?;
                group.legs.push(row);
            }
        }
    }
    Ok(transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::FixedRates;
    use crate::schemas;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn policy() -> BalancePolicy {
        BalancePolicy {
            reporting_currency: "CHF".to_string(),
            tolerance: 0.005,
            rates: Arc::new(FixedRates::new("CHF").with_rate("EUR", 0.95)),
        }
    }

    fn journal(root: &TempDir) -> JournalEntity {
        JournalEntity::new(root.path(), schemas::journal(), "journal", policy())
    }

    fn leg(amount: f64, account: i64, description: &str) -> Record {
        Record::new(schemas::journal())
            .with("account", account)
            .with("currency", "CHF")
            .with("amount", amount)
            .with("description", description)
    }

    #[test]
    fn test_two_leg_transaction_stored_contiguously() {
        let root = TempDir::new().unwrap();
        let mut store = journal(&root);
        let id = store
            .add_transaction(
                day(1),
                vec![leg(100.0, 1000, "Invoice"), leg(-100.0, 2000, "Invoice")],
                None,
            )
            .unwrap();
        assert_eq!(id, EntryId::new("default.csv", 1));

        let text = std::fs::read_to_string(root.path().join("journal/default.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("2024-03-01"));
        assert!(!lines[2].contains("2024-03-01"));

        let txns = store.transactions().unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].legs.len(), 2);
        assert_eq!(txns[0].legs[1].get("date").as_date(), Some(day(1)));
    }

    #[test]
    fn test_unbalanced_transaction_rejected_before_write() {
        let root = TempDir::new().unwrap();
        let mut store = journal(&root);
        let err = store
            .add_transaction(day(1), vec![leg(100.0, 1000, "Broken")], None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnbalancedTransaction(_)));
        assert!(!root.path().join("journal/default.csv").exists());
    }

    #[test]
    fn test_balance_check_converts_currencies() {
        let root = TempDir::new().unwrap();
        let mut store = journal(&root);
        let legs = vec![
            Record::new(schemas::journal())
                .with("account", 1000)
                .with("currency", "EUR")
                .with("amount", 100.0)
                .with("description", "FX"),
            leg(-95.0, 2000, "FX"),
        ];
        store.add_transaction(day(1), legs, None).unwrap();
    }

    #[test]
    fn test_explicit_report_amount_short_circuits_conversion() {
        let root = TempDir::new().unwrap();
        let mut store = journal(&root);
        let legs = vec![
            Record::new(schemas::journal())
                .with("account", 1000)
                .with("currency", "JPY") // no rate configured
                .with("amount", 15000.0)
                .with("report_amount", 90.0)
                .with("description", "FX"),
            leg(-90.0, 2000, "FX"),
        ];
        store.add_transaction(day(1), legs, None).unwrap();
    }

    #[test]
    fn test_ids_are_positional_per_partition() {
        let root = TempDir::new().unwrap();
        let mut store = journal(&root);
        let one = store
            .add_transaction(day(1), vec![leg(1.0, 1, "a"), leg(-1.0, 2, "a")], None)
            .unwrap();
        let two = store
            .add_transaction(day(2), vec![leg(2.0, 1, "b"), leg(-2.0, 2, "b")], None)
            .unwrap();
        assert_eq!(one.sequence, 1);
        assert_eq!(two.sequence, 2);

        let other = store
            .add_transaction(day(3), vec![leg(3.0, 1, "c"), leg(-3.0, 2, "c")], Some("2024.csv"))
            .unwrap();
        assert_eq!(other, EntryId::new("2024.csv", 1));
    }

    #[test]
    fn test_delete_shifts_later_ids() {
        let root = TempDir::new().unwrap();
        let mut store = journal(&root);
        for (d, label) in [(1, "a"), (2, "b"), (3, "c")] {
            store
                .add_transaction(
                    day(d),
                    vec![leg(1.0, 1, label), leg(-1.0, 2, label)],
                    None,
                )
                .unwrap();
        }
        store
            .delete(&[vec![Value::Text("default.csv:2".into())]], false)
            .unwrap();
        let txns = store.transactions().unwrap();
        assert_eq!(txns.len(), 2);
        assert_eq!(txns[1].id, EntryId::new("default.csv", 2));
        assert_eq!(txns[1].legs[0].get("description").as_str(), Some("c"));
    }

    #[test]
    fn test_delete_unknown_id() {
        let root = TempDir::new().unwrap();
        let mut store = journal(&root);
        let err = store
            .delete(&[vec![Value::Text("default.csv:9".into())]], false)
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn test_bare_id_resolved_through_index() {
        let root = TempDir::new().unwrap();
        let mut store = journal(&root);
        store
            .add_transaction(day(1), vec![leg(1.0, 1, "a"), leg(-1.0, 2, "a")], Some("q1.csv"))
            .unwrap();
        store.delete(&[vec![Value::Text("1".into())]], false).unwrap();
        assert!(store.transactions().unwrap().is_empty());
    }

    #[test]
    fn test_tolerated_missing_delete_is_silent() {
        use std::sync::Mutex;
        let root = TempDir::new().unwrap();
        let mut store = journal(&root);
        store
            .add_transaction(day(1), vec![leg(1.0, 1, "a"), leg(-1.0, 2, "a")], None)
            .unwrap();

        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        store.on_change(Box::new(move |_| *counter.lock().unwrap() += 1));

        store
            .delete(&[vec![Value::Text("default.csv:9".into())]], true)
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(store.transactions().unwrap().len(), 1);
    }

    #[test]
    fn test_mirror_is_idempotent_and_content_based() {
        let root = TempDir::new().unwrap();
        let mut store = journal(&root);
        store
            .add_transaction(day(1), vec![leg(10.0, 1, "keep"), leg(-10.0, 2, "keep")], None)
            .unwrap();
        store
            .add_transaction(day(2), vec![leg(5.0, 1, "drop"), leg(-5.0, 2, "drop")], None)
            .unwrap();

        // Target: keep the first, replace the second with a new event.
        let target = vec![
            leg(10.0, 1, "keep").with("date", day(1)),
            leg(-10.0, 2, "keep"),
            leg(7.0, 1, "new").with("date", day(3)),
            leg(-7.0, 2, "new"),
        ];
        let stats = store.mirror(target.clone(), true).unwrap();
        assert_eq!((stats.added, stats.deleted), (1, 1));

        let stats = store.mirror(target, true).unwrap();
        assert_eq!((stats.added, stats.deleted), (0, 0));
        assert_eq!(store.transactions().unwrap().len(), 2);
    }

    #[test]
    fn test_mirror_rejects_unbalanced_target_without_writing() {
        let root = TempDir::new().unwrap();
        let mut store = journal(&root);
        let target = vec![leg(10.0, 1, "broken").with("date", day(1))];
        let err = store.mirror(target, true).unwrap_err();
        assert!(matches!(err, LedgerError::UnbalancedTransaction(_)));
        assert!(store.transactions().unwrap().is_empty());
    }
}
