pub mod directory;
pub mod entity;
pub mod journal;
pub mod mirror;
pub mod observer;
pub mod partition;
pub mod router;

pub use directory::DirectoryEntity;
pub use entity::{EntityStore, SingleFileEntity};
pub use journal::{BalancePolicy, JournalEntity, Transaction};
pub use mirror::{ChangeSet, MirrorStats};
pub use observer::ChangeListener;
pub use partition::Partition;
pub use router::{EntryId, EntryRef, PartitionRouter, DEFAULT_PARTITION};
