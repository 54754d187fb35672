//! Domain layer - Pure business logic.

pub mod asset;
pub mod av;
pub mod hls;
pub mod jobs;
pub mod layout;
