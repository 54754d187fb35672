//! Application layer - Services driving the ports.

pub mod ingest;
pub mod reconcile;
pub mod streaming;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
