//! In-memory artifact store (for testing or ephemeral runs)

use crate::artifact::{ArtifactEntry, ArtifactError, ArtifactKey, ArtifactStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps every blob in a map behind a lock. Published blobs are immutable,
/// so fetches hand out `Arc` clones without copying.
pub struct MemoryArtifactStore {
    blobs: RwLock<HashMap<ArtifactKey, Arc<Vec<u8>>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn publish(&self, key: ArtifactKey, blob: Vec<u8>) -> Result<(), ArtifactError> {
        let mut blobs = self.blobs.write().await;
        if blobs.contains_key(&key) {
            return Err(ArtifactError::DuplicatePublish(key));
        }
        blobs.insert(key, Arc::new(blob));
        Ok(())
    }

    async fn fetch(&self, key: &ArtifactKey) -> Result<Arc<Vec<u8>>, ArtifactError> {
        let blobs = self.blobs.read().await;
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(key.clone()))
    }

    async fn manifest(&self, run: u64) -> Result<Vec<ArtifactEntry>, ArtifactError> {
        let blobs = self.blobs.read().await;
        let mut entries: Vec<ArtifactEntry> = blobs
            .iter()
            .filter(|(key, _)| key.run == run)
            .map(|(key, blob)| ArtifactEntry {
                stage: key.stage.clone(),
                name: key.name.clone(),
                size: blob.len() as u64,
            })
            .collect();
        entries.sort_by(|a, b| a.stage.cmp(&b.stage).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    async fn remove_run(&self, run: u64) -> Result<(), ArtifactError> {
        let mut blobs = self.blobs.write().await;
        blobs.retain(|key, _| key.run != run);
        Ok(())
    }
}
