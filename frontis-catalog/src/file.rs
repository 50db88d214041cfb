use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use frontis_types::CatalogData;

use crate::{CatalogStore, CatalogStoreError};

/// Catalog persisted as one pretty-printed JSON document.
///
/// `persist` writes a sibling temp file and renames it over the target, so a
/// crash mid-write leaves the previous catalog intact. First `load` on a
/// missing file returns the seeded catalog without touching disk.
pub struct JsonFileCatalogStore {
    path: PathBuf,
}

impl JsonFileCatalogStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CatalogStore for JsonFileCatalogStore {
    async fn load(&self) -> Result<CatalogData, CatalogStoreError> {
        if !self.path.exists() {
            return Ok(CatalogData::seed());
        }
        let text = fs::read_to_string(&self.path)
            .await
            .map_err(|e| CatalogStoreError::Io(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| CatalogStoreError::Parse(e.to_string()))
    }

    async fn persist(&self, data: &CatalogData) -> Result<(), CatalogStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| CatalogStoreError::Io(e.to_string()))?;
            }
        }
        let json = serde_json::to_string_pretty(data)
            .map_err(|e| CatalogStoreError::Parse(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| CatalogStoreError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CatalogStoreError::Io(e.to_string()))?;
        Ok(())
    }
}
