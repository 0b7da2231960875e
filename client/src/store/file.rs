//! One JSON file per user on the local filesystem.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tally_engine::Snapshot;
use tokio::io::AsyncWriteExt;

use super::SnapshotStore;
use crate::error::StoreError;

/// Stores each owner's snapshot as `<dir>/<owner>.json`.
///
/// Saves write a sibling temp file, fsync it, then rename it over the
/// target, so a crash mid-write leaves the previous snapshot readable.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Where the snapshot for `owner` lives.
    pub fn path_for(&self, owner: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(owner)))
    }
}

/// Owner ids are opaque; anything outside `[A-Za-z0-9_-]` is hex-escaped so
/// an id can never climb out of the data directory.
fn file_stem(owner: &str) -> String {
    let mut stem = String::with_capacity(owner.len());
    for byte in owner.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{byte:02x}"));
        }
    }
    stem
}

async fn replace(tmp: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(tmp, path).await
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn load(&self, owner: &str) -> Result<Snapshot, StoreError> {
        let path = self.path_for(owner);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Snapshot::new(owner)),
            Err(e) => return Err(e.into()),
        };

        let snapshot = Snapshot::from_json(&json)?;
        if snapshot.owner_id != owner {
            return Err(StoreError::OwnerMismatch {
                path: path.display().to_string(),
                expected: owner.to_string(),
                actual: snapshot.owner_id,
            });
        }

        tracing::debug!(
            owner = %owner,
            pending = snapshot.pending_mutations.len(),
            "Snapshot loaded"
        );
        Ok(snapshot)
    }

    async fn save(&self, owner: &str, snapshot: &Snapshot) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(owner);
        let tmp = path.with_extension("json.tmp");
        let json = snapshot.to_json()?;

        if let Err(e) = replace(&tmp, &path, json.as_bytes()).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    tracing::warn!(
                        path = %tmp.display(),
                        error = %cleanup,
                        "Temp file left behind"
                    );
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn clear(&self, owner: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(owner)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
