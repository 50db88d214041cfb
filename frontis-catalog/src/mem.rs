use async_trait::async_trait;
use tokio::sync::Mutex;

use frontis_types::CatalogData;

use crate::{CatalogStore, CatalogStoreError};

/// In-memory catalog backend for tests and the CLI demo. Not durable.
pub struct InMemoryCatalogStore {
    data: Mutex<CatalogData>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(CatalogData::seed()),
        }
    }

    pub fn with_data(data: CatalogData) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }
}

impl Default for InMemoryCatalogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn load(&self) -> Result<CatalogData, CatalogStoreError> {
        Ok(self.data.lock().await.clone())
    }

    async fn persist(&self, data: &CatalogData) -> Result<(), CatalogStoreError> {
        *self.data.lock().await = data.clone();
        Ok(())
    }
}
