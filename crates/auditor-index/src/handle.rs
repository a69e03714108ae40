use std::path::Path;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::info;

use auditor_core::error::{Error, Result};

use crate::{store, Index, PolicyIndexer};

/// A served index generation. Holding one keeps that index alive for the
/// whole audit even if a rebuild swaps in a newer generation meanwhile.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub generation: u64,
    pub index: Arc<Index>,
}

/// Shared handle to the index currently served to audits.
///
/// Readers take a snapshot and never block on a rebuild; a rebuild builds
/// off to the side and publishes with a single pointer swap. At most one
/// rebuild runs at a time.
pub struct IndexHandle {
    current: RwLock<IndexSnapshot>,
    build_guard: Mutex<()>,
}

impl IndexHandle {
    pub fn new(index: Index) -> Self {
        Self {
            current: RwLock::new(IndexSnapshot { generation: 1, index: Arc::new(index) }),
            build_guard: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn current(&self) -> Arc<Index> {
        self.snapshot().index
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Publish `index` as the next generation and return its number.
    pub fn swap(&self, index: Index) -> u64 {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let generation = guard.generation + 1;
        *guard = IndexSnapshot { generation, index: Arc::new(index) };
        generation
    }

    /// Build a new generation from `source` and swap it in. On failure the
    /// served generation is untouched. A concurrent call fails fast.
    pub async fn rebuild(&self, indexer: &PolicyIndexer, source: &str) -> Result<u64> {
        let _guard = self
            .build_guard
            .try_lock()
            .map_err(|_| Error::Ingestion("rebuild already in progress".to_string()))?;
        let index = indexer.build(source).await?;
        let generation = self.swap(index);
        info!(generation, "policy index swapped");
        Ok(generation)
    }

    /// Like [`rebuild`](Self::rebuild), but also persists the new index to
    /// `path` before it is served.
    pub async fn rebuild_and_persist(&self, indexer: &PolicyIndexer, source: &str, path: &Path) -> Result<u64> {
        let _guard = self
            .build_guard
            .try_lock()
            .map_err(|_| Error::Ingestion("rebuild already in progress".to_string()))?;
        let index = indexer.build(source).await?;
        store::save(&index, path)?;
        let generation = self.swap(index);
        info!(generation, path = %path.display(), "policy index rebuilt and persisted");
        Ok(generation)
    }
}
