//! JSON persistence for [`Index`]. Saves go through a temp file in the
//! target directory and a rename, so readers never see a half-written index.

use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

use auditor_core::error::{Error, Result};
use auditor_core::types::PolicyChunk;

use crate::{Index, IndexMeta, FORMAT_VERSION};

#[derive(Serialize)]
struct StoredIndexRef<'a> {
    #[serde(flatten)]
    meta: &'a IndexMeta,
    chunks: &'a [PolicyChunk],
}

#[derive(Deserialize)]
struct StoredIndex {
    #[serde(flatten)]
    meta: IndexMeta,
    chunks: Vec<PolicyChunk>,
}

pub fn save(index: &Index, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::Ingestion(format!("cannot create {}: {}", dir.display(), e)))?;

    let tmp = NamedTempFile::new_in(dir)
        .map_err(|e| Error::Ingestion(format!("cannot create temp file in {}: {}", dir.display(), e)))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        let stored = StoredIndexRef { meta: index.meta(), chunks: index.chunks() };
        serde_json::to_writer(&mut writer, &stored)
            .map_err(|e| Error::Ingestion(format!("cannot serialize index: {}", e)))?;
        writer.flush().map_err(|e| Error::Ingestion(format!("cannot write index: {}", e)))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::Ingestion(format!("cannot sync index: {}", e)))?;
    tmp.persist(path)
        .map_err(|e| Error::Ingestion(format!("cannot replace {}: {}", path.display(), e.error)))?;
    info!(path = %path.display(), chunks = index.len(), "index saved");
    Ok(())
}

pub fn load(path: &Path) -> Result<Index> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Retrieval(format!("cannot open index {}: {}", path.display(), e)))?;
    let stored: StoredIndex = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::Retrieval(format!("corrupt index {}: {}", path.display(), e)))?;
    if stored.meta.format_version != FORMAT_VERSION {
        return Err(Error::Retrieval(format!(
            "index format version {} is not supported (expected {})",
            stored.meta.format_version, FORMAT_VERSION
        )));
    }
    let index = Index::new(stored.meta, stored.chunks)?;
    info!(path = %path.display(), chunks = index.len(), provider = %index.meta().provider_id, "index loaded");
    Ok(index)
}
