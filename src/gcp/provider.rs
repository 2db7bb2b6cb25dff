//! GCP implementation of [`Provider`]

use super::auth::{get_default_project, GcpCredentials};
use super::client::{Endpoints, GcpClient};
use super::http::GcpHttpClient;
use crate::provider::{call_all_pages, ApiClient, Credentials, Provider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Region name used for clients that only talk to global endpoints
const GLOBAL_REGION: &str = "global";

#[derive(Debug, Clone)]
pub struct GcpProvider {
    credentials: GcpCredentials,
    http: GcpHttpClient,
    endpoints: Endpoints,
    /// Fixed base URL; overrides partition endpoints when set
    base_url: Option<String>,
    /// Project used when the credentials do not name one
    project: Option<String>,
}

impl GcpProvider {
    pub fn new(credentials: GcpCredentials, partition: &str) -> Result<Self> {
        Ok(Self {
            credentials,
            http: GcpHttpClient::new()?,
            endpoints: Endpoints::for_partition(partition)?,
            base_url: None,
            project: None,
        })
    }

    /// Provider using Application Default Credentials
    pub async fn from_environment(partition: &str) -> Result<Self> {
        let credentials = GcpCredentials::new()
            .await
            .context("Failed to initialize GCP credentials")?;
        Self::new(credentials, partition)
    }

    /// Send every request to `base` regardless of partition
    pub fn with_base_url(mut self, base: &str) -> Self {
        self.endpoints = Endpoints::single(base);
        self.base_url = Some(base.to_string());
        self
    }

    pub fn with_project(mut self, project: &str) -> Self {
        self.project = Some(project.to_string());
        self
    }

    fn endpoints_for(&self, partition: &str) -> Result<Endpoints> {
        match &self.base_url {
            Some(base) => Ok(Endpoints::single(base)),
            None => Endpoints::for_partition(partition),
        }
    }

    fn project_for(&self, credentials: &Credentials) -> Result<String> {
        credentials
            .account_id
            .clone()
            .or_else(|| self.project.clone())
            .or_else(get_default_project)
            .context("No GCP project configured. Use --project or 'gcloud config set project'")
    }
}

#[async_trait]
impl Provider for GcpProvider {
    async fn connect(
        &self,
        service: &str,
        credentials: &Credentials,
        region: &str,
        silent: bool,
    ) -> Result<Box<dyn ApiClient>> {
        let project = self.project_for(credentials)?;
        if silent {
            debug!("Connecting to {} in {} ({})", service, region, project);
        } else {
            info!("Connecting to {} in {} ({})", service, region, project);
        }

        Ok(Box::new(GcpClient::new(
            self.credentials.clone(),
            self.http.clone(),
            self.endpoints.clone(),
            service,
            &project,
            region,
        )))
    }

    async fn regions_for(&self, service: &str, filter: &[String], partition: &str) -> Result<Vec<String>> {
        let project = self.project_for(&Credentials::default())?;
        let client = GcpClient::new(
            self.credentials.clone(),
            self.http.clone(),
            self.endpoints_for(partition)?,
            "compute",
            &project,
            GLOBAL_REGION,
        );

        let pages = call_all_pages(&client, "list_regions", &json!({}), &["items"])
            .await
            .with_context(|| format!("Failed to list regions of {} for {}", project, service))?;

        let available: Vec<String> = pages
            .get("items")
            .into_iter()
            .flatten()
            .filter_map(|r| r.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        for wanted in filter {
            if !available.contains(wanted) {
                warn!("Region {} is not available to {}", wanted, project);
            }
        }

        let regions: Vec<String> = available
            .into_iter()
            .filter(|r| filter.is_empty() || filter.contains(r))
            .collect();
        debug!("{} regions for {}", regions.len(), service);
        Ok(regions)
    }

    async fn account_id(&self, credentials: &Credentials) -> Result<String> {
        self.project_for(credentials)
    }
}
