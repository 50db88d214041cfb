use async_trait::async_trait;
use thiserror::Error;

use frontis_types::CatalogData;

pub mod file;
pub use file::JsonFileCatalogStore;

pub mod mem;
pub use mem::InMemoryCatalogStore;

pub mod service;
pub use service::{CatalogError, CatalogService, SubjectMutation};

#[derive(Debug, Error)]
pub enum CatalogStoreError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Backing store for the catalog: full-snapshot load and full rewrite.
///
/// Invariant enforcement lives in [`CatalogService`]; a backend only has to
/// make `persist` atomic (readers never observe a half-written catalog) and
/// `load` seed a fresh catalog when nothing was persisted yet.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn load(&self) -> Result<CatalogData, CatalogStoreError>;
    async fn persist(&self, data: &CatalogData) -> Result<(), CatalogStoreError>;
}
