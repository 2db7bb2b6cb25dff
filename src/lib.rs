//! cloudaudit
//!
//! Audits a cloud account for security misconfigurations. The [`resource`]
//! pipeline collects the configuration of every service across regions, and
//! [`rules`] turns a parameterized rule catalog into rules ready for
//! evaluation against it.

pub mod config;
pub mod error;
pub mod gcp;
pub mod provider;
pub mod report;
pub mod resource;
pub mod rules;
