//! Artifact store
//!
//! Write-once holding area for build outputs produced by one stage and
//! consumed by later stages. The contract is identical regardless of the
//! backing medium: publish is rejected on a duplicate key, fetch fails when
//! the producer has not yet published, and content is immutable once stored
//! (consumers get a read-only reference and need no lock).

pub mod disk;
pub mod memory;

pub use disk::DiskArtifactStore;
pub use memory::MemoryArtifactStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Identity of a published artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// Run number the artifact belongs to
    pub run: u64,
    /// Producing stage name
    pub stage: String,
    /// Logical artifact name
    pub name: String,
}

impl ArtifactKey {
    pub fn new(run: u64, stage: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            run,
            stage: stage.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}/{}/{}", self.run, self.stage, self.name)
    }
}

/// One entry of a run's artifact manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub stage: String,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("artifact {0} was already published")]
    DuplicatePublish(ArtifactKey),

    #[error("artifact {0} has not been published")]
    NotFound(ArtifactKey),

    #[error("artifact storage error: {0}")]
    Storage(String),
}

/// Store contract, identical for in-memory, local-disk, or remote backings
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store an artifact. Write-once: a second publish with the same key
    /// fails and leaves the first content untouched.
    async fn publish(&self, key: ArtifactKey, blob: Vec<u8>) -> Result<(), ArtifactError>;

    /// Fetch a published artifact as a read-only reference. Callers must
    /// have already confirmed the producing stage completed.
    async fn fetch(&self, key: &ArtifactKey) -> Result<Arc<Vec<u8>>, ArtifactError>;

    /// Manifest of everything published under a run, in deterministic order
    async fn manifest(&self, run: u64) -> Result<Vec<ArtifactEntry>, ArtifactError>;

    /// Delete everything published under a run. Best-effort GC; never
    /// called while the run is still executing.
    async fn remove_run(&self, run: u64) -> Result<(), ArtifactError>;
}
