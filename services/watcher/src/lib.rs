//! corpwatch library
//!
//! Watches the corporation roster of an EVE Online alliance and announces
//! corporations joining or leaving it in a Discord channel.
//!
//! ## Architecture
//!
//! - **Roster Source** (`source`, `esi`): fetches the alliance's corporations from ESI
//! - **State Store** (`state`): persists the last observed roster atomically
//! - **Diff Engine** (`corpwatch_reconcile::diff`): derives join/leave events
//! - **Notifier** (`notifier`): delivers events to Discord (or the log)
//! - **Poll Scheduler** (`scheduler`): drives fetch, diff, persist, notify

pub mod config;
pub mod esi;
pub mod information;
pub mod notifier;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod state;

// Re-export commonly used types
pub use notifier::{DiscordNotifier, LogNotifier, Notifier, NotifyError};
pub use scheduler::{CycleOutcome, CycleReport, Watcher, WatcherConfig, WatcherError};
pub use source::{FetchError, RosterSource};
pub use state::{FileSnapshotStore, Snapshot, SnapshotStore, StoreError};
