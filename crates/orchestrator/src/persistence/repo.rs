#![forbid(unsafe_code)]

use crate::error::Error;
use crate::persistence::TelemetrySnapshot;
use super::snapshot::SnapshotHeader;
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Load a snapshot. A missing document or a schema-version mismatch
    /// yields an empty snapshot; unreadable or malformed data is an error.
    async fn load(&self) -> Result<TelemetrySnapshot, Error>;
    /// Persist a snapshot.
    async fn save(&self, snapshot: &TelemetrySnapshot) -> Result<(), Error>;
}

#[derive(Debug, Default)]
pub struct NoopRepository;

#[async_trait]
impl SnapshotRepository for NoopRepository {
    async fn load(&self) -> Result<TelemetrySnapshot, Error> {
        Ok(TelemetrySnapshot::empty())
    }

    async fn save(&self, _snapshot: &TelemetrySnapshot) -> Result<(), Error> {
        Ok(())
    }
}

/// JSON document on local storage, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotRepository for JsonFileRepository {
    async fn load(&self) -> Result<TelemetrySnapshot, Error> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no telemetry snapshot, starting empty");
                return Ok(TelemetrySnapshot::empty());
            }
            Err(err) => return Err(err.into()),
        };

        let header: SnapshotHeader = serde_json::from_slice(&raw)?;
        if !header.is_current() {
            warn!(
                path = %self.path.display(),
                version = header.version,
                "telemetry snapshot schema mismatch, starting empty"
            );
            return Ok(TelemetrySnapshot::empty());
        }
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn save(&self, snapshot: &TelemetrySnapshot) -> Result<(), Error> {
        let bytes = serde_json::to_vec(snapshot)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_private(&path, &bytes)).await??;
        debug!(path = %self.path.display(), keys = snapshot.per_key.len(), "snapshot persisted");
        Ok(())
    }
}

/// Write `bytes` to a sibling temp file readable only by the owner, then
/// rename it over `path`. Blocking.
pub fn write_private(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidPath(path.to_owned()))?;
    let mut tmp_name = file_name.to_owned();
    tmp_name.push(".tmp");
    let tmp = parent.join(tmp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&tmp)?;
    // `mode` only applies on creation; a stale temp file keeps its bits.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp, path)?;
    Ok(())
}
