//! Service configuration and the concurrent fetch pipeline
//!
//! Fetching a service runs two worker groups bound to the lifetime of the
//! [`ServiceConfiguration::fetch`] call:
//!
//! - **feeders** receive one job per region, connect a region-scoped client and
//!   list every target of that region;
//! - **consumers** receive the discovered items and run the per-type parser.
//!
//! Both groups read from bounded queues, so producers wait rather than drop
//! work. The orchestrator closes the region queue once every region has been
//! enqueued and awaits the feeders; the last parse-queue sender goes away with
//! them, which lets the consumers drain and exit.

use super::parsers::ParserRegistry;
use super::region::{ParseJob, ParseQueue, RegionConfiguration};
use super::registry::{format_service_name, get_service, ResourceScopes, ServiceMetadata};
use super::status::{FetchStatusLogger, ProgressSink};
use super::target::{needs_resolution, ParamResolver, ResourceTarget};
use crate::provider::{Credentials, Provider};
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_FEEDER_WORKERS: usize = 10;
pub const DEFAULT_CONSUMER_WORKERS: usize = 20;
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// Key of the region counter in the finalized counts
pub const REGIONS_COUNT_KEY: &str = "regions";

/// Tuning and control of one fetch
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub feeder_workers: usize,
    pub consumer_workers: usize,
    pub queue_capacity: usize,
    /// Deadline applied to every remote list call
    pub call_timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            feeder_workers: DEFAULT_FEEDER_WORKERS,
            consumer_workers: DEFAULT_CONSUMER_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            call_timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

struct RegionJob {
    region: String,
    targets: Arc<[ResourceTarget]>,
}

type RegionMap = BTreeMap<String, Arc<RegionConfiguration>>;

/// State shared by every feeder of one fetch
struct FeederContext {
    provider: Arc<dyn Provider>,
    credentials: Credentials,
    api_service: String,
    scopes: ResourceScopes,
    queue: ParseQueue,
    status: Arc<FetchStatusLogger>,
    regions: Arc<Mutex<RegionMap>>,
    call_timeout: Option<Duration>,
}

impl FeederContext {
    /// Existing configuration of a region, or a fresh one
    fn region_config(&self, region: &str) -> Arc<RegionConfiguration> {
        let mut regions = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
        regions
            .entry(region.to_string())
            .or_insert_with(|| Arc::new(RegionConfiguration::new(region, &self.scopes)))
            .clone()
    }

    async fn fetch_region(&self, job: &RegionJob) -> Result<()> {
        let config = self.region_config(&job.region);
        let client = self
            .provider
            .connect(&self.api_service, &self.credentials, &job.region, true)
            .await
            .with_context(|| format!("Failed to connect to {} in {}", self.api_service, job.region))?;

        config
            .fetch(
                client.as_ref(),
                self.status.clone(),
                Some(&self.queue),
                &job.targets,
                self.call_timeout,
            )
            .await?;

        self.status.region_fetched();
        Ok(())
    }
}

/// Configuration of a single service across every region
#[derive(Debug)]
pub struct ServiceConfiguration {
    service: String,
    api_service: String,
    resource_scopes: ResourceScopes,
    targets_first_region: Vec<ResourceTarget>,
    targets_other_regions: Vec<ResourceTarget>,
    parsers: Arc<ParserRegistry>,
    regions: RegionMap,
    status: Option<Arc<FetchStatusLogger>>,
    counts: BTreeMap<String, usize>,
}

impl ServiceConfiguration {
    /// Classify the declared resources and build both target lists
    pub fn new(service: &str, metadata: &ServiceMetadata) -> Self {
        let resource_scopes = ResourceScopes::classify(metadata);
        let mut targets_first_region = Vec::new();
        let mut targets_other_regions = Vec::new();

        for (type_name, resource) in &metadata.resources {
            let target = ResourceTarget::new(type_name, &resource.response, &resource.api_call)
                .with_params(resource.params.clone())
                .ignoring_list_errors(resource.ignore_list_errors);

            if !resource_scopes.is_global(type_name) {
                targets_other_regions.push(target.clone());
            }
            targets_first_region.push(target);
        }

        Self {
            service: service.to_string(),
            api_service: metadata
                .api_service
                .clone()
                .unwrap_or_else(|| service.to_string()),
            resource_scopes,
            targets_first_region,
            targets_other_regions,
            parsers: Arc::new(ParserRegistry::for_service(metadata)),
            regions: BTreeMap::new(),
            status: None,
            counts: BTreeMap::new(),
        }
    }

    /// Build the configuration of a service from the embedded registry
    pub fn from_registry(service: &str) -> Result<Self> {
        let metadata =
            get_service(service).ok_or_else(|| anyhow!("Unknown service: {}", service))?;
        Ok(Self::new(service, metadata))
    }

    /// Mutable access to the parser registry, e.g. to override one type
    pub fn parsers_mut(&mut self) -> &mut ParserRegistry {
        Arc::make_mut(&mut self.parsers)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn api_service(&self) -> &str {
        &self.api_service
    }

    pub fn resource_scopes(&self) -> &ResourceScopes {
        &self.resource_scopes
    }

    pub fn targets_first_region(&self) -> &[ResourceTarget] {
        &self.targets_first_region
    }

    pub fn targets_other_regions(&self) -> &[ResourceTarget] {
        &self.targets_other_regions
    }

    pub fn region(&self, name: &str) -> Option<&Arc<RegionConfiguration>> {
        self.regions.get(name)
    }

    pub fn regions(&self) -> impl Iterator<Item = (&String, &Arc<RegionConfiguration>)> {
        self.regions.iter()
    }

    /// Progress of the fetch in flight; gone after [`Self::finalize`]
    pub fn fetch_status(&self) -> Option<&Arc<FetchStatusLogger>> {
        self.status.as_ref()
    }

    /// Finalized fetched count of a resource type (`<type>_count`)
    pub fn count(&self, resource_type: &str) -> Option<usize> {
        self.counts.get(resource_type).copied()
    }

    pub fn counts(&self) -> &BTreeMap<String, usize> {
        &self.counts
    }

    /// Fetch every target of the service across the regions of its API family.
    ///
    /// `targets` replaces the declared target lists: it is used as-is in the
    /// first region and without its global types in the other regions.
    pub async fn fetch(
        &mut self,
        provider: Arc<dyn Provider>,
        credentials: &Credentials,
        region_filter: &[String],
        partition: &str,
        targets: Option<Vec<ResourceTarget>>,
        options: FetchOptions,
    ) -> Result<()> {
        let (first, others) = match targets {
            Some(targets) => {
                let others = targets
                    .iter()
                    .filter(|t| !self.resource_scopes.is_global(&t.type_name))
                    .cloned()
                    .collect();
                (targets, others)
            }
            None => (
                self.targets_first_region.clone(),
                self.targets_other_regions.clone(),
            ),
        };
        let (first, others) =
            resolve_targets(provider.as_ref(), credentials, first, others).await?;

        tracing::info!("Fetching {} config...", format_service_name(&self.service));

        let status = Arc::new(FetchStatusLogger::new(&self.service, &first));
        self.status = Some(status.clone());

        let regions = provider
            .regions_for(&self.api_service, region_filter, partition)
            .await
            .with_context(|| format!("Failed to list regions for {}", self.api_service))?;
        status.regions_discovered(regions.len());

        let cancel = options.cancel.clone();
        let capacity = options.queue_capacity.max(1);

        // Consumers first, so parsing starts as soon as the first region lists
        let (parse_tx, parse_rx) = mpsc::channel::<ParseJob>(capacity);
        let consumers = spawn_consumers(
            options.consumer_workers.max(1),
            parse_rx,
            status.clone(),
            cancel.clone(),
        );

        let shared_regions = Arc::new(Mutex::new(std::mem::take(&mut self.regions)));
        let context = FeederContext {
            provider,
            credentials: credentials.clone(),
            api_service: self.api_service.clone(),
            scopes: self.resource_scopes.clone(),
            queue: ParseQueue::new(parse_tx, self.parsers.clone(), cancel.clone()),
            status: status.clone(),
            regions: shared_regions.clone(),
            call_timeout: options.call_timeout,
        };
        let (region_tx, region_rx) = mpsc::channel::<RegionJob>(capacity);
        let feeders = spawn_feeders(
            options.feeder_workers.max(1),
            region_rx,
            Arc::new(context),
            cancel.clone(),
        );

        let first: Arc<[ResourceTarget]> = first.into();
        let others: Arc<[ResourceTarget]> = others.into();
        for (i, region) in regions.into_iter().enumerate() {
            let targets = if i == 0 { first.clone() } else { others.clone() };
            let job = RegionJob { region, targets };
            let sent = tokio::select! {
                _ = cancel.cancelled() => false,
                sent = region_tx.send(job) => sent.is_ok(),
            };
            if !sent {
                tracing::warn!("{}: stopped enqueueing regions", self.service);
                break;
            }
        }
        drop(region_tx);

        join_workers(feeders, "feeder").await;
        join_workers(consumers, "consumer").await;

        self.regions = std::mem::take(
            &mut *shared_regions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        status.show(true);

        if cancel.is_cancelled() {
            bail!("Fetch of {} was cancelled", self.service);
        }
        Ok(())
    }

    /// Record the fetched counts and drop the transient progress handles
    pub fn finalize(&mut self) {
        if let Some(status) = self.status.take() {
            self.counts = status
                .snapshot()
                .into_iter()
                .map(|(name, counts)| (name, counts.fetched))
                .collect();
            self.counts
                .insert(REGIONS_COUNT_KEY.to_string(), status.region_counts().fetched);
        }
        for region in self.regions.values() {
            region.detach_status();
        }
    }

    /// Serializable view of the collected configuration
    pub fn report(&self) -> ServiceReport {
        ServiceReport {
            service: format_service_name(&self.service),
            api_service: self.api_service.clone(),
            resource_scopes: self.resource_scopes.clone(),
            counts: self.counts.clone(),
            regions: self
                .regions
                .iter()
                .map(|(name, region)| (name.clone(), region.snapshot()))
                .collect(),
        }
    }
}

/// Snapshot of a finalized service configuration
#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub service: String,
    pub api_service: String,
    pub resource_scopes: ResourceScopes,
    pub counts: BTreeMap<String, usize>,
    pub regions: BTreeMap<String, super::region::RegionState>,
}

/// Resolve parameter sentinels; the account is only looked up when needed
async fn resolve_targets(
    provider: &dyn Provider,
    credentials: &Credentials,
    first: Vec<ResourceTarget>,
    others: Vec<ResourceTarget>,
) -> Result<(Vec<ResourceTarget>, Vec<ResourceTarget>)> {
    if !first.iter().chain(&others).any(|t| needs_resolution(&t.params)) {
        return Ok((first, others));
    }

    let account_id = provider
        .account_id(credentials)
        .await
        .context("Failed to resolve account id")?;
    let resolver = ParamResolver::new(&account_id);

    Ok((
        first.iter().map(|t| resolver.resolve_target(t)).collect(),
        others.iter().map(|t| resolver.resolve_target(t)).collect(),
    ))
}

/// Receive the next job, or `None` once the queue is closed and drained or
/// the fetch is cancelled
async fn next_job<T>(
    receiver: &AsyncMutex<mpsc::Receiver<T>>,
    cancel: &CancellationToken,
) -> Option<T> {
    let mut receiver = receiver.lock().await;
    tokio::select! {
        _ = cancel.cancelled() => None,
        job = receiver.recv() => job,
    }
}

fn spawn_feeders(
    count: usize,
    receiver: mpsc::Receiver<RegionJob>,
    context: Arc<FeederContext>,
    cancel: CancellationToken,
) -> JoinSet<()> {
    let receiver = Arc::new(AsyncMutex::new(receiver));
    let mut workers = JoinSet::new();

    for _ in 0..count {
        let receiver = receiver.clone();
        let context = context.clone();
        let cancel = cancel.clone();
        workers.spawn(async move {
            while let Some(job) = next_job(&receiver, &cancel).await {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => Err(anyhow!("Fetch cancelled")),
                    outcome = context.fetch_region(&job) => outcome,
                };
                if let Err(e) = outcome {
                    tracing::error!("Failed to fetch region {}: {:#}", job.region, e);
                }
            }
        });
    }

    workers
}

fn spawn_consumers(
    count: usize,
    receiver: mpsc::Receiver<ParseJob>,
    status: Arc<FetchStatusLogger>,
    cancel: CancellationToken,
) -> JoinSet<()> {
    let receiver = Arc::new(AsyncMutex::new(receiver));
    let mut workers = JoinSet::new();

    for _ in 0..count {
        let receiver = receiver.clone();
        let status = status.clone();
        let cancel = cancel.clone();
        workers.spawn(async move {
            while let Some(job) = next_job(&receiver, &cancel).await {
                parse_item(job, status.as_ref());
            }
        });
    }

    workers
}

/// Parse one item; a failing or panicking parser only loses that item
fn parse_item(job: ParseJob, status: &dyn ProgressSink) {
    let ParseJob {
        parser,
        resource_type,
        region,
        raw,
    } = job;

    match catch_unwind(AssertUnwindSafe(|| parser(region.region(), &raw))) {
        Ok(Ok(resource)) => {
            region.insert(&resource_type, resource);
            status.fetched(&resource_type);
            status.show(false);
        }
        Ok(Err(e)) => {
            tracing::error!(
                "{}: failed to parse {} item: {:#}",
                region.region(),
                resource_type,
                e
            );
        }
        Err(_) => {
            tracing::error!(
                "{}: parser for {} panicked",
                region.region(),
                resource_type
            );
        }
    }
}

async fn join_workers(mut workers: JoinSet<()>, pool: &str) {
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            tracing::error!("{} worker terminated abnormally: {}", pool, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::registry::{get_all_service_names, get_service};

    #[test]
    fn test_classification_is_a_partition() {
        for name in get_all_service_names() {
            let metadata = get_service(name).unwrap();
            let config = ServiceConfiguration::new(name, metadata);
            let scopes = config.resource_scopes();

            let mut all: Vec<&String> = scopes.all().collect();
            let total = all.len();
            all.sort();
            all.dedup();
            assert_eq!(all.len(), total, "{}: scopes overlap", name);
            assert_eq!(total, metadata.resources.len(), "{}: scopes incomplete", name);
        }
    }

    #[test]
    fn test_global_targets_only_in_first_region() {
        let config = ServiceConfiguration::from_registry("vpc").unwrap();
        let first: Vec<&str> = config
            .targets_first_region()
            .iter()
            .map(|t| t.type_name.as_str())
            .collect();
        let others: Vec<&str> = config
            .targets_other_regions()
            .iter()
            .map(|t| t.type_name.as_str())
            .collect();

        assert!(first.contains(&"networks"));
        assert!(first.contains(&"firewalls"));
        assert!(!others.contains(&"networks"));
        assert!(!others.contains(&"firewalls"));
        assert!(others.contains(&"subnetworks"));
        for target in config.targets_other_regions() {
            assert!(config.targets_first_region().contains(target));
        }
    }

    #[test]
    fn test_equal_lists_without_global_types() {
        let config = ServiceConfiguration::from_registry("container").unwrap();
        assert!(config.resource_scopes().global.is_empty());
        assert_eq!(
            config.targets_first_region().len(),
            config.targets_other_regions().len()
        );
        assert_eq!(config.api_service(), "container");
    }

    #[test]
    fn test_unknown_service() {
        assert!(ServiceConfiguration::from_registry("mainframe").is_err());
    }
}
