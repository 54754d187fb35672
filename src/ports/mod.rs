//! Ports - Trait definitions for external collaborators.

pub mod access;
pub mod queue;
pub mod repository;
