// ============================================================================
// TextLedger Library
// ============================================================================

pub mod codec;
pub mod core;
pub mod ledger;
pub mod rates;
pub mod schemas;
pub mod settings;
pub mod storage;

// Re-export main types for convenience
pub use crate::core::{Column, ColumnType, Key, LedgerError, Record, Result, Schema, Value};
pub use ledger::TextLedger;
pub use rates::{FixedRates, RateLookup};
pub use settings::Settings;
pub use storage::{
    BalancePolicy, ChangeListener, DirectoryEntity, EntityStore, EntryId, EntryRef,
    JournalEntity, MirrorStats, SingleFileEntity, Transaction,
};
