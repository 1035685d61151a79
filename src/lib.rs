//! Job scheduler and worker runtime for a personal media-ingestion pipeline.
//!
//! See [`usecases::Services`] for the dependency-injection record that
//! threads the ledger, storage adapter, job queue, and worker runtime
//! through every call site.

pub mod config;
pub mod db;
pub mod engines;
pub mod error;
pub mod queue;
pub mod storage;
pub mod usecases;
pub mod worker;

pub use config::Config;
pub use error::{CoreError, CoreResult};
