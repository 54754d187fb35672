use crate::domain::asset::{Asset, AssetId, LifecycleError};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("asset {0} not found")]
    NotFound(AssetId),
    #[error("asset {0} already exists")]
    Duplicate(AssetId),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Mutation applied atomically to one stored record.
pub type AssetUpdate = Box<dyn FnOnce(&mut Asset) -> Result<(), LifecycleError> + Send>;

/// Boxes a closure as an [`AssetUpdate`], letting the compiler infer its argument type.
pub fn asset_update<F>(f: F) -> AssetUpdate
where
    F: FnOnce(&mut Asset) -> Result<(), LifecycleError> + Send + 'static,
{
    Box::new(f)
}

/// Persistence of asset records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn insert(&self, asset: &Asset) -> Result<(), RepositoryError>;

    async fn get(&self, id: &AssetId) -> Result<Option<Asset>, RepositoryError>;

    /// Applies `update` under the store lock and returns the new record.
    /// Nothing is written when the closure fails or the record is gone.
    async fn update(&self, id: &AssetId, update: AssetUpdate) -> Result<Asset, RepositoryError>;

    /// Removes and returns the record, `None` when it was already gone.
    async fn remove(&self, id: &AssetId) -> Result<Option<Asset>, RepositoryError>;

    async fn list(&self) -> Result<Vec<Asset>, RepositoryError>;
}
