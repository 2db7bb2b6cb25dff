//! Provider abstraction
//!
//! The collection pipeline never talks to a cloud API directly. It goes through
//! the traits defined here, so the same pipeline runs against the GCP REST
//! client in [`crate::gcp`] or against an in-memory provider in tests.
//!
//! - [`Provider`] - connects region-scoped clients, lists regions, resolves the account
//! - [`ApiClient`] - invokes one list operation and returns a raw response page
//! - [`pagination`] - follows continuation tokens across pages

pub mod pagination;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub use pagination::{call_all_pages, extract_path};

/// Parameter sentinel replaced by the current account identifier
pub const ACCOUNT_ID_SENTINEL: &str = "_ACCOUNT_ID_";

/// Credentials handed to a provider
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Explicit account (project) identifier; resolved by the provider when absent
    pub account_id: Option<String>,
    /// Named profile or configuration the credentials come from
    pub profile: Option<String>,
}

impl Credentials {
    pub fn for_account(account_id: &str) -> Self {
        Self {
            account_id: Some(account_id.to_string()),
            profile: None,
        }
    }
}

/// A client bound to a single region of a single API family
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Region this client is scoped to
    fn region(&self) -> &str;

    /// Invoke a list operation and return one raw response page
    async fn call(&self, operation: &str, params: &Value) -> Result<Value>;
}

/// Factory and directory for region-scoped API clients
#[async_trait]
pub trait Provider: Send + Sync {
    /// Create a client for `service` scoped to `region`.
    /// When `silent` is set, connection chatter is logged at debug level only.
    async fn connect(
        &self,
        service: &str,
        credentials: &Credentials,
        region: &str,
        silent: bool,
    ) -> Result<Box<dyn ApiClient>>;

    /// Regions available to `service`, restricted to `filter` when it is non-empty
    async fn regions_for(&self, service: &str, filter: &[String], partition: &str)
        -> Result<Vec<String>>;

    /// Identifier of the account the credentials belong to
    async fn account_id(&self, credentials: &Credentials) -> Result<String>;
}
