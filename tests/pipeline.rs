//! End-to-end tests of the collection pipeline against an in-memory provider

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use cloudaudit::provider::{ApiClient, Credentials, Provider};
use cloudaudit::resource::{
    FetchOptions, ParsedResource, ResourceTarget, ServiceConfiguration, ServiceMetadata,
    REGIONS_COUNT_KEY,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ACCOUNT: &str = "audit-target";

type Responses = HashMap<(String, String), Value>;

/// Serves canned pages keyed by `(region, operation)`
struct FakeProvider {
    regions: Vec<String>,
    responses: Arc<Responses>,
    calls: Arc<Mutex<Vec<(String, String, Value)>>>,
    account_lookups: AtomicUsize,
    /// Operations that never return
    hanging: Vec<String>,
}

impl FakeProvider {
    fn new(regions: &[&str]) -> Self {
        Self {
            regions: regions.iter().map(|r| r.to_string()).collect(),
            responses: Arc::new(HashMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            account_lookups: AtomicUsize::new(0),
            hanging: Vec::new(),
        }
    }

    fn respond(mut self, region: &str, operation: &str, page: Value) -> Self {
        Arc::get_mut(&mut self.responses)
            .unwrap()
            .insert((region.to_string(), operation.to_string()), page);
        self
    }

    fn hang_on(mut self, operation: &str) -> Self {
        self.hanging.push(operation.to_string());
        self
    }

    fn calls_of(&self, operation: &str) -> Vec<(String, Value)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, op, _)| op == operation)
            .map(|(region, _, params)| (region.clone(), params.clone()))
            .collect()
    }
}

struct FakeClient {
    region: String,
    responses: Arc<Responses>,
    calls: Arc<Mutex<Vec<(String, String, Value)>>>,
    hanging: Vec<String>,
}

#[async_trait]
impl ApiClient for FakeClient {
    fn region(&self) -> &str {
        &self.region
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((self.region.clone(), operation.to_string(), params.clone()));

        if self.hanging.iter().any(|op| op == operation) {
            std::future::pending::<()>().await;
        }

        self.responses
            .get(&(self.region.clone(), operation.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("403 Forbidden: {} in {}", operation, self.region))
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn connect(
        &self,
        _service: &str,
        _credentials: &Credentials,
        region: &str,
        _silent: bool,
    ) -> Result<Box<dyn ApiClient>> {
        Ok(Box::new(FakeClient {
            region: region.to_string(),
            responses: self.responses.clone(),
            calls: self.calls.clone(),
            hanging: self.hanging.clone(),
        }))
    }

    async fn regions_for(&self, _service: &str, filter: &[String], _partition: &str) -> Result<Vec<String>> {
        Ok(self
            .regions
            .iter()
            .filter(|r| filter.is_empty() || filter.contains(r))
            .cloned()
            .collect())
    }

    async fn account_id(&self, credentials: &Credentials) -> Result<String> {
        self.account_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(credentials.account_id.clone().unwrap_or_else(|| ACCOUNT.to_string()))
    }
}

fn inventory_metadata() -> ServiceMetadata {
    serde_json::from_value(json!({
        "resources": {
            "buckets": {
                "path": "services.inventory.buckets.id",
                "api_call": "list_buckets",
                "response": "items",
                "name_field": "name",
                "params": {"project": "_ACCOUNT_ID_"}
            },
            "instances": {
                "path": "services.inventory.regions.id.instances.id",
                "api_call": "list_instances",
                "response": "items",
                "name_field": "name"
            },
            "pools": {
                "path": "services.inventory.regions.id.pools.id",
                "api_call": "list_pools",
                "response": "items",
                "ignore_list_errors": true
            }
        }
    }))
    .unwrap()
}

fn items(ids: &[&str]) -> Value {
    json!({ "items": ids.iter().map(|id| json!({"id": id, "name": format!("{}-name", id)})).collect::<Vec<_>>() })
}

fn inventory_provider() -> FakeProvider {
    FakeProvider::new(&["region-a", "region-b"])
        .respond("region-a", "list_buckets", items(&["b1", "b2"]))
        .respond("region-a", "list_instances", items(&["i1", "i2", "i3"]))
        .respond("region-b", "list_instances", items(&["i4"]))
}

fn options() -> FetchOptions {
    FetchOptions {
        feeder_workers: 2,
        consumer_workers: 3,
        queue_capacity: 2,
        ..FetchOptions::default()
    }
}

fn instance_ids(config: &ServiceConfiguration, region: &str) -> Vec<String> {
    config
        .region(region)
        .unwrap()
        .resources("instances")
        .unwrap_or_default()
        .into_keys()
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_buckets_and_instances_across_regions() {
    let provider = Arc::new(inventory_provider());
    let mut config = ServiceConfiguration::new("inventory", &inventory_metadata());

    config
        .fetch(provider.clone(), &Credentials::default(), &[], "test", None, options())
        .await
        .unwrap();

    let status = config.fetch_status().unwrap().clone();
    assert_eq!(status.counts("buckets").unwrap().discovered, 2);
    assert_eq!(status.counts("instances").unwrap().discovered, 4);
    assert_eq!(status.counts("instances").unwrap().fetched, 4);
    assert_eq!(status.region_counts().discovered, 2);
    assert_eq!(status.region_counts().fetched, 2);

    config.finalize();
    assert_eq!(config.count("buckets"), Some(2));
    assert_eq!(config.count("instances"), Some(4));
    assert_eq!(config.count(REGIONS_COUNT_KEY), Some(2));
    assert!(config.fetch_status().is_none());

    assert_eq!(instance_ids(&config, "region-a"), vec!["i1", "i2", "i3"]);
    assert_eq!(instance_ids(&config, "region-b"), vec!["i4"]);
    assert_eq!(config.region("region-a").unwrap().resource_count("instances"), 3);
    assert_eq!(config.region("region-b").unwrap().resource_count("instances"), 1);

    let buckets = config.region("region-a").unwrap().resources("buckets").unwrap();
    assert_eq!(buckets["b1"].name.as_deref(), Some("b1-name"));
    assert!(config
        .region("region-b")
        .unwrap()
        .resources("buckets")
        .unwrap_or_default()
        .is_empty());

    // Global types are listed once, with the account sentinel resolved
    let bucket_calls = provider.calls_of("list_buckets");
    assert_eq!(bucket_calls.len(), 1);
    assert_eq!(bucket_calls[0].1["project"], ACCOUNT);
    assert_eq!(provider.account_lookups.load(Ordering::SeqCst), 1);
    assert_eq!(provider.calls_of("list_instances").len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_parser_does_not_stall_pipeline() {
    let provider = Arc::new(inventory_provider());
    let mut config = ServiceConfiguration::new("inventory", &inventory_metadata());
    config
        .parsers_mut()
        .register("instances", |_region: &str, raw: &Value| {
            let id = raw["id"].as_str().unwrap_or_default().to_string();
            match id.as_str() {
                "i2" => bail!("unparseable instance"),
                "i3" => panic!("parser bug"),
                _ => Ok(ParsedResource {
                    id,
                    name: None,
                    vpc: None,
                    attributes: Map::new(),
                }),
            }
        });

    let creds = Credentials::default();
    let fetch = config.fetch(provider, &creds, &[], "test", None, options());
    tokio::time::timeout(Duration::from_secs(10), fetch)
        .await
        .expect("pipeline stalled")
        .unwrap();

    let counts = config.fetch_status().unwrap().counts("instances").unwrap();
    assert_eq!(counts.discovered, 4);
    assert_eq!(counts.fetched, 2);
    assert_eq!(counts.discovered - counts.fetched, 2);

    config.finalize();
    assert_eq!(config.count("instances"), Some(2));
    assert_eq!(instance_ids(&config, "region-a"), vec!["i1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_list_errors_degrade_to_empty() {
    // No response for list_pools anywhere: ignored errors and empty results alike
    let provider = Arc::new(inventory_provider());
    let mut config = ServiceConfiguration::new("inventory", &inventory_metadata());

    config
        .fetch(provider.clone(), &Credentials::default(), &[], "test", None, options())
        .await
        .unwrap();

    let status = config.fetch_status().unwrap();
    assert_eq!(status.counts("pools").unwrap().discovered, 0);
    assert_eq!(provider.calls_of("list_pools").len(), 2);
    assert_eq!(config.region("region-b").unwrap().resource_count("pools"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_region_filter_and_supplied_targets() {
    let provider = Arc::new(inventory_provider());
    let mut config = ServiceConfiguration::new("inventory", &inventory_metadata());
    let targets = vec![ResourceTarget::new("instances", "items", "list_instances")];

    config
        .fetch(
            provider.clone(),
            &Credentials::for_account("explicit-account"),
            &["region-b".to_string()],
            "test",
            Some(targets),
            options(),
        )
        .await
        .unwrap();

    assert!(config.region("region-a").is_none());
    assert_eq!(instance_ids(&config, "region-b"), vec!["i4"]);
    assert!(provider.calls_of("list_buckets").is_empty());
    // Nothing to resolve, so the account is never looked up
    assert_eq!(provider.account_lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_call_timeout_bounds_hung_calls() {
    let provider = Arc::new(inventory_provider().hang_on("list_pools"));
    let mut config = ServiceConfiguration::new("inventory", &inventory_metadata());
    let options = FetchOptions {
        call_timeout: Some(Duration::from_millis(100)),
        ..options()
    };

    let creds = Credentials::default();
    let fetch = config.fetch(provider, &creds, &[], "test", None, options);
    tokio::time::timeout(Duration::from_secs(10), fetch)
        .await
        .expect("call timeout not applied")
        .unwrap();

    config.finalize();
    assert_eq!(config.count("instances"), Some(4));
    assert_eq!(config.count("pools"), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_stops_fetch() {
    let provider = Arc::new(inventory_provider().hang_on("list_instances"));
    let mut config = ServiceConfiguration::new("inventory", &inventory_metadata());
    let cancel = CancellationToken::new();
    let options = FetchOptions {
        cancel: cancel.clone(),
        ..options()
    };

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let creds = Credentials::default();
    let fetch = config.fetch(provider, &creds, &[], "test", None, options);
    let result = tokio::time::timeout(Duration::from_secs(10), fetch)
        .await
        .expect("cancellation did not stop the fetch");

    let err = result.unwrap_err();
    assert!(err.to_string().contains("cancelled"));
}

#[tokio::test]
async fn test_registry_service_over_fake_provider() {
    let provider = Arc::new(
        FakeProvider::new(&["europe-west1"]).respond(
            "europe-west1",
            "list_buckets",
            json!({"items": [{"id": "logs", "name": "logs", "iamConfiguration": {"uniformBucketLevelAccess": {"enabled": true}}}]}),
        ),
    );
    let mut storage = ServiceConfiguration::from_registry("storage").unwrap();

    storage
        .fetch(provider.clone(), &Credentials::for_account("proj-1"), &[], "gcp", None, FetchOptions::default())
        .await
        .unwrap();
    storage.finalize();

    assert_eq!(storage.count("buckets"), Some(1));
    assert_eq!(provider.calls_of("list_buckets")[0].1["project"], "proj-1");

    let report = serde_json::to_value(storage.report()).unwrap();
    assert_eq!(report["service"], "Cloud Storage");
    assert_eq!(report["counts"]["buckets"], 1);
}
