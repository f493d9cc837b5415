//! State persistence.
//!
//! The whole store is written to one JSON file after every mutation, by way
//! of a temporary file that is renamed over the old one, so a crash leaves
//! either the previous state or the new one on disk.
//!
//! ```text
//! ~/.local/share/switchboard/
//! ├── state.json
//! └── state.tmp      (only while a write is in flight)
//! ```

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use switchboard::store::SnapshotSink;
use switchboard::{MemoryStore, StoreError, StoreSnapshot};

use crate::error::{CliError, Result};

/// Writes store snapshots to a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored snapshot; a missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<StoreSnapshot> {
        if !self.path.exists() {
            debug!("No state file yet, starting empty");
            return Ok(StoreSnapshot::default());
        }

        let contents = fs::read_to_string(&self.path)?;
        let snapshot: StoreSnapshot = serde_json::from_str(&contents)?;
        debug!(
            conversations = snapshot.conversations.len(),
            turns = snapshot.turns.len(),
            invocations = snapshot.invocations.len(),
            "Loaded state"
        );
        Ok(snapshot)
    }

    fn write(&self, snapshot: &StoreSnapshot) -> Result<usize> {
        let json = serde_json::to_string_pretty(snapshot)?;

        // Atomic write: write to temp file, then rename
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, &self.path)?;

        Ok(json.len())
    }
}

impl SnapshotSink for JsonFileSink {
    #[instrument(skip(self, snapshot), fields(path = %self.path.display(), turns = snapshot.turns.len()))]
    fn save(&self, snapshot: &StoreSnapshot) -> std::result::Result<(), StoreError> {
        let size_bytes = self
            .write(snapshot)
            .map_err(|e| StoreError::Persistence(e.to_string()))?;
        debug!(size_bytes, "Saved state");
        Ok(())
    }
}

/// Opens the file-backed store at `path`, creating its directory.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the existing state
/// cannot be read.
pub fn open_store(path: &Path) -> Result<MemoryStore<JsonFileSink>> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .map_err(|e| CliError::Config(format!("Failed to create state directory: {e}")))?;
    }

    let sink = JsonFileSink::new(path);
    let snapshot = sink.load()?;
    info!(path = %path.display(), "State store opened");
    Ok(MemoryStore::with_sink(snapshot, sink))
}
