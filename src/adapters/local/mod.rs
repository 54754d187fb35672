//! Local adapters for monolith deployment.

pub mod access;
pub mod events;
pub mod fs;
pub mod http;
pub mod json_store;
pub mod queue;

pub use events::hub::EventHub;
