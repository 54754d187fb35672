//! hlsvault - Video ingestion and HLS streaming library
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (asset lifecycle, av tooling, hls, layout)
//! - ports/: Trait definitions
//! - adapters/: Concrete implementations (filesystem, JSON store, queue, HTTP)
//! - application/: Ingest, worker, reconcile and streaming services
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use config::Config;
pub use domain::{av, hls};
