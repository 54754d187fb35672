//! Audio/Video domain modules.

pub mod cmd;
pub mod encoder;
pub mod probe;
pub mod thumbnails;
