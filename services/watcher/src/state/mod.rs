//! Roster snapshot persistence.
//!
//! This module provides durable storage for the last observed roster so
//! that a restarted watcher diffs against what it already announced instead
//! of treating the alliance as brand new.
//!
//! The file store writes to a temporary file, fsyncs it and renames it over
//! the snapshot, so a crash mid-save leaves the previous snapshot intact.
//! Every record carries a format version and a SHA-256 checksum; a record
//! failing either check is refused rather than treated as empty.

mod store;

pub use store::{
    decode_snapshot, encode_snapshot, FileSnapshotStore, MemorySnapshotStore, Snapshot,
    SnapshotStore, StoreError, SNAPSHOT_VERSION,
};
