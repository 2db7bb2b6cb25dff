//! GCP Client
//!
//! Region-scoped client for one API family, combining authentication
//! and HTTP functionality.

use super::auth::GcpCredentials;
use super::dispatch;
use super::http::GcpHttpClient;
use crate::provider::ApiClient;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Universe domain of the public Google Cloud partition
pub const DEFAULT_UNIVERSE_DOMAIN: &str = "googleapis.com";

/// Base URLs of the REST APIs used by the collectors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub compute: String,
    pub storage: String,
    pub container: String,
}

impl Endpoints {
    /// Endpoints for a partition: `gcp` is the public cloud, anything with a
    /// dot is taken as a universe domain
    pub fn for_partition(partition: &str) -> Result<Self> {
        let domain = match partition {
            "" | "gcp" => DEFAULT_UNIVERSE_DOMAIN,
            other if other.contains('.') => other,
            other => bail!("Unknown partition '{}'", other),
        };

        Ok(Self {
            compute: format!("https://compute.{}/compute/v1", domain),
            storage: format!("https://storage.{}/storage/v1", domain),
            container: format!("https://container.{}/v1", domain),
        })
    }

    /// Serve every API from one base URL (emulators, tests)
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            compute: format!("{}/compute/v1", base),
            storage: format!("{}/storage/v1", base),
            container: format!("{}/v1", base),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub endpoints: Endpoints,
    /// API family, e.g. `compute` or `storage`
    pub service: String,
    pub project_id: String,
    pub region: String,
}

impl GcpClient {
    pub fn new(
        credentials: GcpCredentials,
        http: GcpHttpClient,
        endpoints: Endpoints,
        service: &str,
        project_id: &str,
        region: &str,
    ) -> Self {
        Self {
            credentials,
            http,
            endpoints,
            service: service.to_string(),
            project_id: project_id.to_string(),
            region: region.to_string(),
        }
    }

    pub async fn get_token(&self) -> Result<String> {
        self.credentials.get_token().await
    }

    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.get(url, &token).await
    }

    // =========================================================================
    // Compute Engine API helpers
    // =========================================================================

    pub fn compute_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/{}",
            self.endpoints.compute, self.project_id, path
        )
    }

    pub fn compute_regional_url(&self, resource: &str) -> String {
        self.compute_url(&format!("regions/{}/{}", self.region, resource))
    }

    pub fn compute_global_url(&self, resource: &str) -> String {
        self.compute_url(&format!("global/{}", resource))
    }

    // =========================================================================
    // Cloud Storage API helpers
    // =========================================================================

    pub fn storage_url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoints.storage, path)
    }

    // =========================================================================
    // GKE API helpers
    // =========================================================================

    pub fn container_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/{}",
            self.endpoints.container, self.project_id, path
        )
    }

    /// Build GKE location URL (region or zone)
    pub fn container_location_url(&self, location: &str, resource: &str) -> String {
        self.container_url(&format!("locations/{}/{}", location, resource))
    }
}

#[async_trait]
impl ApiClient for GcpClient {
    fn region(&self) -> &str {
        &self.region
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value> {
        dispatch::invoke(&self.service, operation, self, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(service: &str) -> GcpClient {
        GcpClient::new(
            GcpCredentials::from_token("t"),
            GcpHttpClient::new().unwrap(),
            Endpoints::for_partition("gcp").unwrap(),
            service,
            "my-project",
            "europe-west1",
        )
    }

    #[test]
    fn test_partition_endpoints() {
        let endpoints = Endpoints::for_partition("gcp").unwrap();
        assert_eq!(endpoints.compute, "https://compute.googleapis.com/compute/v1");
        assert_eq!(endpoints.container, "https://container.googleapis.com/v1");

        let sovereign = Endpoints::for_partition("cloud.example.eu").unwrap();
        assert_eq!(sovereign.storage, "https://storage.cloud.example.eu/storage/v1");

        assert!(Endpoints::for_partition("aws").is_err());
    }

    #[test]
    fn test_url_builders() {
        let c = client("compute");
        assert_eq!(
            c.compute_regional_url("addresses"),
            "https://compute.googleapis.com/compute/v1/projects/my-project/regions/europe-west1/addresses"
        );
        assert_eq!(
            c.compute_global_url("firewalls"),
            "https://compute.googleapis.com/compute/v1/projects/my-project/global/firewalls"
        );
        assert_eq!(
            c.container_location_url("europe-west1", "clusters"),
            "https://container.googleapis.com/v1/projects/my-project/locations/europe-west1/clusters"
        );
        assert_eq!(c.storage_url("b"), "https://storage.googleapis.com/storage/v1/b");
        assert_eq!(c.region(), "europe-west1");
    }

    #[test]
    fn test_single_endpoint() {
        let endpoints = Endpoints::single("http://127.0.0.1:8080/");
        assert_eq!(endpoints.compute, "http://127.0.0.1:8080/compute/v1");
        assert_eq!(endpoints.storage, "http://127.0.0.1:8080/storage/v1");
    }
}
