//! Snapshot stores.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use corpwatch_id::AllianceId;
use corpwatch_reconcile::Roster;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

/// Persisted snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

const CHECKSUM_PREFIX: &str = "sha256:";

/// Errors from snapshot store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("snapshot {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("snapshot {path} has format version {found}, this build reads version {expected}")]
    IncompatibleVersion {
        path: PathBuf,
        found: u64,
        expected: u32,
    },

    #[error("snapshot save timed out after {0:?}")]
    Timeout(Duration),

    #[error("snapshot save task failed: {0}")]
    Task(String),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The last observed roster of an alliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Alliance the roster belongs to.
    pub alliance_id: AllianceId,
    /// Poll cycle that produced the roster. Increases with every save.
    pub cycle: u64,
    /// When the roster was fetched.
    pub observed_at: DateTime<Utc>,
    /// Corporations in the alliance.
    pub corporations: Roster,
}

/// On-disk envelope around a snapshot.
#[derive(Serialize)]
struct Envelope<'a> {
    version: u32,
    checksum: String,
    snapshot: &'a serde_json::Value,
}

fn checksum(body: &serde_json::Value) -> Result<String, serde_json::Error> {
    // serde_json::Value keeps object keys sorted, so this is canonical.
    let bytes = serde_json::to_vec(body)?;
    Ok(format!("{}{}", CHECKSUM_PREFIX, hex::encode(Sha256::digest(&bytes))))
}

/// Serialize a snapshot into its versioned, checksummed record.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>, StoreError> {
    let body = serde_json::to_value(snapshot)?;
    let envelope = Envelope {
        version: SNAPSHOT_VERSION,
        checksum: checksum(&body)?,
        snapshot: &body,
    };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}

/// Parse and verify a snapshot record. `path` is only used in errors.
pub fn decode_snapshot(bytes: &[u8], path: &Path) -> Result<Snapshot, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let mut record: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| corrupt(format!("unreadable record: {e}")))?;

    let version = record
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| corrupt("missing format version".to_string()))?;
    if version != u64::from(SNAPSHOT_VERSION) {
        return Err(StoreError::IncompatibleVersion {
            path: path.to_path_buf(),
            found: version,
            expected: SNAPSHOT_VERSION,
        });
    }

    let stored_checksum = record
        .get("checksum")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| corrupt("missing checksum".to_string()))?;
    let body = record
        .get_mut("snapshot")
        .map(serde_json::Value::take)
        .ok_or_else(|| corrupt("missing snapshot body".to_string()))?;

    let actual = checksum(&body).map_err(|e| corrupt(e.to_string()))?;
    if actual != stored_checksum {
        return Err(corrupt(format!(
            "checksum mismatch: stored {stored_checksum}, computed {actual}"
        )));
    }

    serde_json::from_value(body).map_err(|e| corrupt(format!("invalid snapshot body: {e}")))
}

/// Durable storage for the last observed roster.
pub trait SnapshotStore: Send + Sync {
    /// Return the last saved snapshot, or `None` if nothing was ever saved.
    fn load(&self) -> Result<Option<Snapshot>, StoreError>;

    /// Atomically replace the saved snapshot.
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
}

/// Snapshot store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Temp file next to the snapshot (same directory, so rename is atomic).
    pub fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("snapshot"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No snapshot file, first run");
                return Ok(None);
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let snapshot = decode_snapshot(&bytes, &self.path)?;

        info!(
            path = %self.path.display(),
            cycle = snapshot.cycle,
            corporation_count = snapshot.corporations.len(),
            "Loaded snapshot from disk"
        );

        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf);

        if let Some(parent) = &parent {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let content = encode_snapshot(snapshot)?;
        let tmp_path = self.temp_path();

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(|e| StoreError::io(&tmp_path, e))?;

            file.write_all(&content)
                .map_err(|e| StoreError::io(&tmp_path, e))?;
            file.sync_all().map_err(|e| StoreError::io(&tmp_path, e))?;
        }

        // Atomic rename
        fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        // Make the rename itself durable.
        #[cfg(unix)]
        if let Some(parent) = &parent {
            fs::File::open(parent)
                .and_then(|dir| dir.sync_all())
                .map_err(|e| StoreError::io(parent, e))?;
        }

        debug!(
            path = %self.path.display(),
            cycle = snapshot.cycle,
            corporation_count = snapshot.corporations.len(),
            "Saved snapshot to disk"
        );

        Ok(())
    }
}

/// In-memory snapshot store (for testing).
///
/// Records go through the same encoding as the file store.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    record: Mutex<Option<Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with raw record bytes.
    pub fn with_record(bytes: Vec<u8>) -> Self {
        Self {
            record: Mutex::new(Some(bytes)),
        }
    }

    /// Raw bytes of the current record.
    pub fn record(&self) -> Option<Vec<u8>> {
        self.record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        self.record()
            .map(|bytes| decode_snapshot(&bytes, Path::new("<memory>")))
            .transpose()
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let bytes = encode_snapshot(snapshot)?;
        *self
            .record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(bytes);
        Ok(())
    }
}
