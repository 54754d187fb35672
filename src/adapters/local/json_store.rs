//! `AssetRepository` kept in memory and snapshotted to a JSON file.

use crate::domain::asset::{Asset, AssetId};
use crate::ports::repository::{AssetRepository, AssetUpdate, RepositoryError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

pub struct JsonFileRepository {
    path: Option<PathBuf>,
    assets: RwLock<HashMap<AssetId, Asset>>,
}

impl JsonFileRepository {
    /// Non-persistent store.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            assets: RwLock::new(HashMap::new()),
        }
    }

    /// Loads `path` when present; later writes go to the same file.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let assets = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                let list: Vec<Asset> = serde_json::from_slice(&bytes)?;
                list.into_iter().map(|a| (a.id, a)).collect()
            }
            Ok(_) => HashMap::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), assets = assets.len(), "Asset store opened");
        Ok(Self {
            path: Some(path),
            assets: RwLock::new(assets),
        })
    }

    /// Called with the write lock held so snapshots never interleave.
    async fn persist(&self, assets: &HashMap<AssetId, Asset>) -> Result<(), RepositoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut list: Vec<&Asset> = assets.values().collect();
        list.sort_by_key(|a| a.created_at);
        let bytes = serde_json::to_vec_pretty(&list)?;
        write_atomically(path, &bytes).await?;
        Ok(())
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl AssetRepository for JsonFileRepository {
    async fn insert(&self, asset: &Asset) -> Result<(), RepositoryError> {
        let mut assets = self.assets.write().await;
        if assets.contains_key(&asset.id) {
            return Err(RepositoryError::Duplicate(asset.id));
        }
        assets.insert(asset.id, asset.clone());
        if let Err(e) = self.persist(&assets).await {
            assets.remove(&asset.id);
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, id: &AssetId) -> Result<Option<Asset>, RepositoryError> {
        Ok(self.assets.read().await.get(id).cloned())
    }

    async fn update(&self, id: &AssetId, update: AssetUpdate) -> Result<Asset, RepositoryError> {
        let mut assets = self.assets.write().await;
        let current = assets.get(id).ok_or(RepositoryError::NotFound(*id))?;

        let mut next = current.clone();
        update(&mut next)?;
        let previous = assets.insert(*id, next.clone());
        if let Err(e) = self.persist(&assets).await {
            if let Some(previous) = previous {
                assets.insert(*id, previous);
            }
            return Err(e);
        }
        Ok(next)
    }

    async fn remove(&self, id: &AssetId) -> Result<Option<Asset>, RepositoryError> {
        let mut assets = self.assets.write().await;
        let removed = assets.remove(id);
        if let Some(asset) = &removed {
            if let Err(e) = self.persist(&assets).await {
                assets.insert(*id, asset.clone());
                return Err(e);
            }
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<Asset>, RepositoryError> {
        Ok(self.assets.read().await.values().cloned().collect())
    }
}
