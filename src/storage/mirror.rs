//! Reconciliation of a stored record set against a desired target state.
//!
//! `diff` partitions the union of current and desired keys into disjoint
//! delete / modify / add / unchanged sets. Stores apply the sets in the
//! fixed order delete, modify, add: a freshly added key can then never
//! collide with one being deleted in the same pass, and modifications never
//! touch a row that is about to disappear.

use std::collections::HashMap;
use std::hash::Hash;

/// Outcome of one reconciliation pass. Transient: computed, applied,
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<K> {
    pub delete: Vec<K>,
    pub modify: Vec<K>,
    pub add: Vec<K>,
    pub unchanged: Vec<K>,
}

impl<K> ChangeSet<K> {
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.modify.is_empty() && self.add.is_empty()
    }
}

impl<K> Default for ChangeSet<K> {
    fn default() -> Self {
        Self {
            delete: Vec::new(),
            modify: Vec::new(),
            add: Vec::new(),
            unchanged: Vec::new(),
        }
    }
}

/// Summary counts returned by `mirror`, matching the shape callers use for
/// progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MirrorStats {
    pub initial: usize,
    pub target: usize,
    pub added: usize,
    pub deleted: usize,
    pub updated: usize,
}

/// Compare keyed record sets field by field.
///
/// `current` preserves store order so deletions and modifications are
/// emitted in stable, on-disk order; `desired` order drives additions.
/// Keys present on both sides with equal values land in `unchanged` and are
/// never rewritten.
pub fn diff<K, R>(current: &[(K, R)], desired: &[(K, R)]) -> ChangeSet<K>
where
    K: Eq + Hash + Clone,
    R: PartialEq,
{
    let desired_by_key: HashMap<&K, &R> = desired.iter().map(|(k, r)| (k, r)).collect();
    let current_by_key: HashMap<&K, &R> = current.iter().map(|(k, r)| (k, r)).collect();

    let mut changes = ChangeSet::default();
    for (key, record) in current {
        match desired_by_key.get(key) {
            None => changes.delete.push(key.clone()),
            Some(target) if *target != record => changes.modify.push(key.clone()),
            Some(_) => changes.unchanged.push(key.clone()),
        }
    }
    for (key, _) in desired {
        if !current_by_key.contains_key(key) {
            changes.add.push(key.clone());
        }
    }
    changes
}
