use super::asset::AssetId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One HLS encode of one asset, admitted to the bounded queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeJob {
    pub asset_id: AssetId,
    pub source_path: PathBuf,
    /// Matches `Asset::attempts` at admission; write-backs carrying another value are dropped.
    pub attempt: u32,
    /// Probed duration in seconds, used to turn encoder timestamps into percent.
    pub duration_hint: Option<f64>,
}
