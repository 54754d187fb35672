use crate::domain::asset::{AssetId, ProcessingStatus};
use serde::{Deserialize, Serialize};

pub mod hub;

/// Pushed to progress subscribers while an asset moves through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssetEvent {
    #[serde(rename_all = "camelCase")]
    Progress { asset_id: AssetId, percent: u8 },
    #[serde(rename_all = "camelCase")]
    Status {
        asset_id: AssetId,
        status: ProcessingStatus,
        error: Option<String>,
    },
}

impl AssetEvent {
    pub fn asset_id(&self) -> &AssetId {
        match self {
            AssetEvent::Progress { asset_id, .. } | AssetEvent::Status { asset_id, .. } => asset_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AssetEvent::Progress { .. } => "progress",
            AssetEvent::Status { .. } => "status",
        }
    }
}
