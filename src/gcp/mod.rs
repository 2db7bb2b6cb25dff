//! Google Cloud provider
//!
//! Implements [`crate::provider::Provider`] on top of the GCP REST APIs.
//!
//! # Module Structure
//!
//! - [`auth`] - GCP authentication using Application Default Credentials
//! - [`client`] - Region-scoped client for one API family
//! - [`dispatch`] - Maps list operation names to REST endpoints
//! - [`http`] - HTTP utilities for REST API calls
//! - [`provider`] - Region directory, project resolution and client factory
//!
//! # Example
//!
//! ```ignore
//! use cloudaudit::gcp::GcpProvider;
//! use cloudaudit::provider::{Credentials, Provider};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let provider = GcpProvider::from_environment("gcp").await?;
//!     let creds = Credentials::for_account("my-project");
//!     let regions = provider.regions_for("compute", &[], "gcp").await?;
//!     let client = provider.connect("compute", &creds, &regions[0], false).await?;
//!     let page = client.call("list_addresses", &serde_json::json!({})).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod dispatch;
pub mod http;
pub mod provider;

pub use auth::GcpCredentials;
pub use client::{Endpoints, GcpClient};
pub use http::format_gcp_error;
pub use provider::GcpProvider;
