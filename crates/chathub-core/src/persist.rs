//! Snapshot persistence: versioned whole-state files with debounced writes

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::{debounce::Debouncer, error::Result, state::AppState, store::Store};

/// Schema version written to and required from snapshot files
pub const SNAPSHOT_VERSION: u64 = 1;

/// Quiet period before a burst of changes is written out
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// On-disk record: the version tag alongside the flattened state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    #[serde(flatten)]
    pub state: AppState,
}

/// What hydration found on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hydration {
    Restored,
    /// No snapshot yet
    Missing,
    /// A snapshot from an incompatible schema; ignored
    VersionMismatch { found: Option<u64> },
}

/// Location of the snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        PathBuf::from(temp)
    }

    /// Read the last snapshot. Absence or a version mismatch yields the
    /// default state; unreadable or malformed files are errors.
    pub fn hydrate(&self) -> Result<(AppState, Hydration)> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((AppState::default(), Hydration::Missing));
            }
            Err(e) => return Err(e.into()),
        };

        let value: serde_json::Value = serde_json::from_str(&content)?;
        let found = value.get("version").and_then(|v| v.as_u64());
        if found != Some(SNAPSHOT_VERSION) {
            tracing::warn!(
                "Ignoring snapshot {} with version {:?} (expected {})",
                self.path.display(),
                found,
                SNAPSHOT_VERSION
            );
            return Ok((AppState::default(), Hydration::VersionMismatch { found }));
        }

        let snapshot: Snapshot = serde_json::from_value(value)?;
        Ok((snapshot.state, Hydration::Restored))
    }

    /// Replace the snapshot atomically: the previous file stays intact until
    /// the new one is completely written.
    pub fn write(&self, state: &AppState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            state: state.clone(),
        };
        let json = serde_json::to_vec(&snapshot)?;
        let temp = self.temp_path();
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

/// Writes the store to disk after every burst of changes
pub struct PersistenceManager {
    debouncer: Arc<Debouncer>,
    listener: JoinHandle<()>,
    writes: Arc<AtomicU64>,
}

impl PersistenceManager {
    /// Watch `store` and persist it to `file`. Must be called inside a Tokio
    /// runtime.
    pub fn start(store: &Store, file: SnapshotFile, quiet: Duration) -> Self {
        let writes = Arc::new(AtomicU64::new(0));

        let writer_store = store.clone();
        let writer_writes = writes.clone();
        let debouncer = Arc::new(Debouncer::spawn(quiet, move || {
            let state = writer_store.snapshot();
            let file = file.clone();
            let writes = writer_writes.clone();
            async move {
                match tokio::task::spawn_blocking(move || file.write(&state)).await {
                    Ok(Ok(())) => {
                        let n = writes.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::debug!("Snapshot #{} written", n);
                    }
                    Ok(Err(e)) => tracing::warn!("Failed to write snapshot: {}", e),
                    Err(e) => tracing::warn!("Snapshot writer panicked: {}", e),
                }
            }
        }));

        let mut events = store.subscribe();
        let schedule = debouncer.clone();
        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(_) => schedule.schedule(),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Persistence listener skipped {} events", skipped);
                        schedule.schedule();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self {
            debouncer,
            listener,
            writes,
        }
    }

    /// Request a write after the quiet period
    pub fn schedule_snapshot(&self) {
        self.debouncer.schedule();
    }

    /// Write the current state now
    pub async fn flush(&self) {
        self.debouncer.schedule();
        self.debouncer.flush().await;
    }

    /// Write the current state and stop watching
    pub async fn shutdown(self) {
        self.listener.abort();
        self.debouncer.schedule();
        self.debouncer.shutdown().await;
    }

    /// Number of snapshots written so far
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

/// Hydrate from `file`, build the store and start persisting it
pub fn open(file: SnapshotFile, quiet: Duration) -> Result<(Store, PersistenceManager, Hydration)> {
    let (state, hydration) = file.hydrate()?;
    tracing::info!("Hydrated {} ({:?})", file.path().display(), hydration);
    let store = Store::new(state);
    let manager = PersistenceManager::start(&store, file, quiet);
    Ok((store, manager, hydration))
}
