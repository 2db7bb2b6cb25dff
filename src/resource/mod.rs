//! Resource collection
//!
//! This module collects the resources of a service across every region of an
//! account and normalizes them into a configuration tree.
//!
//! # Architecture
//!
//! - [`registry`] - Loads service metadata from embedded JSON and classifies resource scopes
//! - [`target`] - Fetch targets and parameter sentinel resolution
//! - [`parsers`] - Per-type normalization of raw list items
//! - [`status`] - Discovered/fetched progress counters
//! - [`region`] - Per-region listing and resource storage
//! - [`service`] - Per-service orchestration of the concurrent fetch pipeline
//!
//! # Example
//!
//! ```ignore
//! use cloudaudit::resource::{FetchOptions, ServiceConfiguration};
//!
//! async fn fetch_storage(provider: Arc<dyn Provider>, creds: &Credentials) -> anyhow::Result<()> {
//!     let mut storage = ServiceConfiguration::from_registry("storage")?;
//!     storage.fetch(provider, creds, &[], "gcp", None, FetchOptions::default()).await?;
//!     storage.finalize();
//!     println!("{:?} buckets", storage.count("buckets"));
//!     Ok(())
//! }
//! ```

pub mod parsers;
pub mod region;
pub mod registry;
pub mod service;
pub mod status;
pub mod target;

pub use parsers::{ParseFn, ParsedResource, ParserRegistry};
pub use region::{ParseJob, ParseQueue, RegionConfiguration, RegionState, VpcConfiguration};
pub use registry::*;
pub use service::{
    FetchOptions, ServiceConfiguration, ServiceReport, DEFAULT_CONSUMER_WORKERS,
    DEFAULT_FEEDER_WORKERS, DEFAULT_QUEUE_CAPACITY, REGIONS_COUNT_KEY,
};
pub use status::{Counts, FetchStatusLogger, ProgressSink};
pub use target::{ParamResolver, ResourceTarget};
