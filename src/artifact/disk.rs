//! Local-disk artifact store
//!
//! Layout: `<root>/run-<number>/<stage>/<name>`. Publish is write-once at
//! the filesystem level; a fresh file is only created when the key does not
//! exist yet.

use crate::artifact::{ArtifactEntry, ArtifactError, ArtifactKey, ArtifactStore};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct DiskArtifactStore {
    root: PathBuf,
    // serializes the exists-then-create window on publish
    publish_lock: Mutex<()>,
}

impl DiskArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            publish_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run: u64) -> PathBuf {
        self.root.join(format!("run-{}", run))
    }

    fn blob_path(&self, key: &ArtifactKey) -> PathBuf {
        self.run_dir(key.run).join(&key.stage).join(&key.name)
    }

    /// Delete run directories whose last modification predates the retention
    /// window. Best-effort: failures are logged, never propagated, and the
    /// engine never waits on this.
    pub async fn sweep(&self, retention: Duration) -> usize {
        let cutoff = SystemTime::now() - retention;
        let mut removed = 0;

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with("run-") {
                continue;
            }
            let old_enough = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .map(|mtime| mtime < cutoff)
                .unwrap_or(false);
            if !old_enough {
                continue;
            }
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!("swept expired artifacts at {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("failed to sweep {}: {}", path.display(), e),
            }
        }

        removed
    }
}

#[async_trait]
impl ArtifactStore for DiskArtifactStore {
    async fn publish(&self, key: ArtifactKey, blob: Vec<u8>) -> Result<(), ArtifactError> {
        let path = self.blob_path(&key);
        let _guard = self.publish_lock.lock().await;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ArtifactError::DuplicatePublish(key));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ArtifactError::Storage(e.to_string()))?;
        }
        tokio::fs::write(&path, &blob)
            .await
            .map_err(|e| ArtifactError::Storage(e.to_string()))?;

        debug!("published artifact {} ({} bytes)", key, blob.len());
        Ok(())
    }

    async fn fetch(&self, key: &ArtifactKey) -> Result<Arc<Vec<u8>>, ArtifactError> {
        let path = self.blob_path(key);
        match tokio::fs::read(&path).await {
            Ok(blob) => Ok(Arc::new(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(key.clone()))
            }
            Err(e) => Err(ArtifactError::Storage(e.to_string())),
        }
    }

    async fn manifest(&self, run: u64) -> Result<Vec<ArtifactEntry>, ArtifactError> {
        let run_dir = self.run_dir(run);
        let mut entries = Vec::new();

        let mut stages = match tokio::fs::read_dir(&run_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(ArtifactError::Storage(e.to_string())),
        };

        while let Ok(Some(stage_entry)) = stages.next_entry().await {
            let stage = stage_entry.file_name().to_string_lossy().into_owned();
            let mut blobs = match tokio::fs::read_dir(stage_entry.path()).await {
                Ok(d) => d,
                Err(_) => continue,
            };
            while let Ok(Some(blob_entry)) = blobs.next_entry().await {
                let size = blob_entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                entries.push(ArtifactEntry {
                    stage: stage.clone(),
                    name: blob_entry.file_name().to_string_lossy().into_owned(),
                    size,
                });
            }
        }

        entries.sort_by(|a, b| a.stage.cmp(&b.stage).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    async fn remove_run(&self, run: u64) -> Result<(), ArtifactError> {
        let dir = self.run_dir(run);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArtifactError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disk_publish_fetch_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskArtifactStore::new(dir.path());
        let key = ArtifactKey::new(3, "package", "image-digest");

        store.publish(key.clone(), b"sha256:abc".to_vec()).await.unwrap();
        let blob = store.fetch(&key).await.unwrap();
        assert_eq!(blob.as_slice(), b"sha256:abc");
    }

    #[tokio::test]
    async fn test_disk_publish_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskArtifactStore::new(dir.path());
        let key = ArtifactKey::new(1, "build", "bundle");

        store.publish(key.clone(), b"first".to_vec()).await.unwrap();
        let err = store.publish(key.clone(), b"second".to_vec()).await.unwrap_err();
        assert!(matches!(err, ArtifactError::DuplicatePublish(_)));
        assert_eq!(store.fetch(&key).await.unwrap().as_slice(), b"first");
    }

    #[tokio::test]
    async fn test_disk_fetch_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskArtifactStore::new(dir.path());
        let key = ArtifactKey::new(1, "build", "missing");
        assert!(matches!(
            store.fetch(&key).await.unwrap_err(),
            ArtifactError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_disk_manifest_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskArtifactStore::new(dir.path());

        store
            .publish(ArtifactKey::new(5, "build", "a"), vec![1, 2, 3])
            .await
            .unwrap();
        store
            .publish(ArtifactKey::new(5, "build", "b"), vec![4])
            .await
            .unwrap();

        let manifest = store.manifest(5).await.unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest[0].name, "a");
        assert_eq!(manifest[0].size, 3);

        store.remove_run(5).await.unwrap();
        assert!(store.manifest(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskArtifactStore::new(dir.path());
        store
            .publish(ArtifactKey::new(9, "build", "a"), vec![0])
            .await
            .unwrap();

        // retention of zero makes everything already written expendable
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let removed = store.sweep(Duration::from_millis(1)).await;
        assert_eq!(removed, 1);
        assert!(store.manifest(9).await.unwrap().is_empty());
    }
}
