//! Per-region resource container
//!
//! A [`RegionConfiguration`] lists every target of one region and hands the
//! discovered items to the parse queue. Consumers later insert the parsed
//! resources back into it, so its state sits behind a mutex that is only held
//! for short, non-async sections.

use super::parsers::{ParseFn, ParsedResource, ParserRegistry, NO_VPC};
use super::registry::ResourceScopes;
use super::status::ProgressSink;
use super::target::ResourceTarget;
use crate::provider::{call_all_pages, ApiClient};
use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type ResourceMap = BTreeMap<String, BTreeMap<String, ParsedResource>>;

/// One discovered item waiting to be parsed
pub struct ParseJob {
    pub parser: ParseFn,
    pub resource_type: String,
    pub region: Arc<RegionConfiguration>,
    pub raw: Value,
}

/// Producer side of the parse queue
#[derive(Clone)]
pub struct ParseQueue {
    sender: mpsc::Sender<ParseJob>,
    parsers: Arc<ParserRegistry>,
    cancel: CancellationToken,
}

impl ParseQueue {
    pub fn new(
        sender: mpsc::Sender<ParseJob>,
        parsers: Arc<ParserRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sender,
            parsers,
            cancel,
        }
    }

    pub fn parser(&self, resource_type: &str) -> Option<ParseFn> {
        self.parsers.get(resource_type)
    }

    /// Enqueue a job, waiting while the queue is full
    pub async fn enqueue(&self, job: ParseJob) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => bail!("Fetch cancelled"),
            sent = self.sender.send(job) => sent.map_err(|_| anyhow!("Parse queue closed")),
        }
    }
}

/// Resources of one VPC network
#[derive(Debug, Clone, Default, Serialize)]
pub struct VpcConfiguration {
    pub resources: ResourceMap,
}

/// Serializable state of a region
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegionState {
    pub resources: ResourceMap,
    /// Items discovered per resource type during listing
    pub counts: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpcs: Option<BTreeMap<String, VpcConfiguration>>,
}

/// Resources collected in one region
pub struct RegionConfiguration {
    region: String,
    vpc_resource_types: Vec<String>,
    state: Mutex<RegionState>,
    status: Mutex<Option<Arc<dyn ProgressSink>>>,
}

impl RegionConfiguration {
    pub fn new(region: &str, scopes: &ResourceScopes) -> Self {
        let mut state = RegionState::default();
        for type_name in scopes.region.iter().chain(&scopes.global) {
            state.resources.insert(type_name.clone(), BTreeMap::new());
            state.counts.insert(type_name.clone(), 0);
        }
        if !scopes.vpc.is_empty() {
            state.vpcs = Some(BTreeMap::new());
        }

        Self {
            region: region.to_string(),
            vpc_resource_types: scopes.vpc.clone(),
            state: Mutex::new(state),
            status: Mutex::new(None),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// List every target and enqueue the discovered items for parsing.
    ///
    /// A failing list call counts as zero resources. Without a queue, items
    /// are only counted.
    pub async fn fetch(
        self: &Arc<Self>,
        client: &dyn ApiClient,
        status: Arc<dyn ProgressSink>,
        queue: Option<&ParseQueue>,
        targets: &[ResourceTarget],
        call_timeout: Option<Duration>,
    ) -> Result<()> {
        *self.status_slot() = Some(status.clone());

        for target in targets {
            let items = self.list_target(client, target, call_timeout).await;

            self.state().counts.insert(target.type_name.clone(), items.len());
            status.discovered(&target.type_name, items.len());
            tracing::debug!(
                "{}: discovered {} {}",
                self.region,
                items.len(),
                target.type_name
            );

            let Some(queue) = queue else {
                continue;
            };
            let Some(parser) = queue.parser(&target.type_name) else {
                tracing::warn!(
                    "{}: no parser registered for {}, skipping {} item(s)",
                    self.region,
                    target.type_name,
                    items.len()
                );
                continue;
            };

            for raw in items {
                queue
                    .enqueue(ParseJob {
                        parser: parser.clone(),
                        resource_type: target.type_name.clone(),
                        region: Arc::clone(self),
                        raw,
                    })
                    .await?;
            }
        }

        Ok(())
    }

    async fn list_target(
        &self,
        client: &dyn ApiClient,
        target: &ResourceTarget,
        call_timeout: Option<Duration>,
    ) -> Vec<Value> {
        let fields = [target.response_field.as_str()];
        let listing = call_all_pages(client, &target.list_operation, &target.params, &fields);

        let result = match call_timeout {
            Some(limit) => match tokio::time::timeout(limit, listing).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("{} timed out after {:?}", target.list_operation, limit)),
            },
            None => listing.await,
        };

        match result {
            Ok(mut merged) => merged.remove(&target.response_field).unwrap_or_default(),
            Err(e) => {
                if !target.ignore_list_errors {
                    tracing::error!(
                        "{}: failed to list {}: {:#}",
                        self.region,
                        target.type_name,
                        e
                    );
                }
                Vec::new()
            }
        }
    }

    /// Store a parsed resource; VPC-scoped types go under their network
    pub fn insert(&self, resource_type: &str, resource: ParsedResource) {
        let is_vpc_type = self.vpc_resource_types.iter().any(|t| t == resource_type);
        let mut state = self.state();

        if is_vpc_type {
            let vpc_id = resource.vpc.clone().unwrap_or_else(|| NO_VPC.to_string());
            state
                .vpcs
                .get_or_insert_with(BTreeMap::new)
                .entry(vpc_id)
                .or_default()
                .resources
                .entry(resource_type.to_string())
                .or_default()
                .insert(resource.id.clone(), resource);
        } else {
            state
                .resources
                .entry(resource_type.to_string())
                .or_default()
                .insert(resource.id.clone(), resource);
        }
    }

    /// Parsed resources of a region- or global-scoped type
    pub fn resources(&self, resource_type: &str) -> Option<BTreeMap<String, ParsedResource>> {
        self.state().resources.get(resource_type).cloned()
    }

    /// Parsed resources of a VPC-scoped type within one network
    pub fn vpc_resources(
        &self,
        vpc_id: &str,
        resource_type: &str,
    ) -> Option<BTreeMap<String, ParsedResource>> {
        self.state()
            .vpcs
            .as_ref()?
            .get(vpc_id)?
            .resources
            .get(resource_type)
            .cloned()
    }

    pub fn has_vpcs(&self) -> bool {
        self.state().vpcs.is_some()
    }

    /// Items discovered for a type in this region (`<type>_count`)
    pub fn resource_count(&self, resource_type: &str) -> usize {
        self.state().counts.get(resource_type).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> RegionState {
        self.state().clone()
    }

    pub fn has_status(&self) -> bool {
        self.status_slot().is_some()
    }

    /// Drop the transient progress handle
    pub fn detach_status(&self) {
        *self.status_slot() = None;
    }

    fn state(&self) -> MutexGuard<'_, RegionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status_slot(&self) -> MutexGuard<'_, Option<Arc<dyn ProgressSink>>> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RegionConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionConfiguration")
            .field("region", &self.region)
            .field("state", &*self.state())
            .finish()
    }
}

impl Serialize for RegionConfiguration {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}
