//! Resource Parsers
//!
//! Normalizes raw list items into [`ParsedResource`] values. Every resource type
//! gets a generic parser built from its metadata (id, name and VPC fields);
//! a few types add derived fields on top.

use super::registry::{ResourceMetadata, ServiceMetadata};
use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// VPC key used for VPC-scoped resources that do not reference a network
pub const NO_VPC: &str = "no-vpc";

/// A normalized resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedResource {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Short name of the owning VPC network
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc: Option<String>,
    pub attributes: Map<String, Value>,
}

/// Parser callback: `(region, raw item) -> parsed resource`
pub type ParseFn = Arc<dyn Fn(&str, &Value) -> Result<ParsedResource> + Send + Sync>;

/// Explicit mapping from resource type name to its parser
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, ParseFn>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the parsers of every resource type a service declares
    pub fn for_service(metadata: &ServiceMetadata) -> Self {
        let mut registry = Self::new();
        for (type_name, resource) in &metadata.resources {
            let generic = generic_parser(resource.clone());
            let parser: ParseFn = match type_name.as_str() {
                "firewalls" => with_enrichment(generic, enrich_firewall),
                "buckets" => with_enrichment(generic, enrich_bucket),
                "networks" => with_enrichment(generic, enrich_network),
                _ => generic,
            };
            registry.parsers.insert(type_name.clone(), parser);
        }
        registry
    }

    /// Register (or replace) the parser for a resource type
    pub fn register<F>(&mut self, type_name: &str, parser: F)
    where
        F: Fn(&str, &Value) -> Result<ParsedResource> + Send + Sync + 'static,
    {
        self.parsers.insert(type_name.to_string(), Arc::new(parser));
    }

    pub fn get(&self, type_name: &str) -> Option<ParseFn> {
        self.parsers.get(type_name).cloned()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.parsers.contains_key(type_name)
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.parsers.keys().collect();
        types.sort();
        f.debug_struct("ParserRegistry").field("types", &types).finish()
    }
}

fn generic_parser(metadata: ResourceMetadata) -> ParseFn {
    Arc::new(move |region: &str, raw: &Value| parse_with_metadata(&metadata, region, raw))
}

fn with_enrichment(base: ParseFn, enrich: fn(&mut Map<String, Value>)) -> ParseFn {
    Arc::new(move |region: &str, raw: &Value| {
        let mut parsed = base(region, raw)?;
        enrich(&mut parsed.attributes);
        Ok(parsed)
    })
}

/// Generic normalization driven by the resource metadata
pub fn parse_with_metadata(
    metadata: &ResourceMetadata,
    region: &str,
    raw: &Value,
) -> Result<ParsedResource> {
    let Value::Object(map) = raw else {
        return Err(anyhow!("Expected an object in {}, got {}", region, type_name_of(raw)));
    };

    let id = match map.get(&metadata.id_field) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(anyhow!(
                "Missing identifier field '{}' in {}",
                metadata.id_field,
                region
            ))
        }
    };

    let name = metadata
        .name_field
        .as_ref()
        .and_then(|field| map.get(field))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let vpc = metadata
        .vpc_field
        .as_ref()
        .and_then(|field| map.get(field))
        .and_then(|v| v.as_str())
        .map(extract_short_name);

    let mut attributes = map.clone();
    post_process(&mut attributes);

    Ok(ParsedResource {
        id,
        name,
        vpc,
        attributes,
    })
}

/// Add short forms of URL-valued fields and trimmed timestamps
fn post_process(map: &mut Map<String, Value>) {
    for field in ["region", "zone", "network", "subnetwork", "target"] {
        if let Some(url) = map.get(field).and_then(|v| v.as_str()) {
            let short = extract_short_name(url);
            map.insert(format!("{}_short", field), Value::String(short));
        }
    }

    for field in ["creationTimestamp", "timeCreated", "updated"] {
        if let Some(timestamp) = map.get(field).and_then(|v| v.as_str()) {
            let short = format_timestamp_short(timestamp);
            map.insert(format!("{}_short", field), Value::String(short));
        }
    }
}

fn enrich_firewall(map: &mut Map<String, Value>) {
    let action = if map.contains_key("denied") { "DENY" } else { "ALLOW" };
    map.insert("action".to_string(), Value::String(action.to_string()));

    // "tcp:22", "udp:53-60", "icmp" ...
    let key = if action == "DENY" { "denied" } else { "allowed" };
    let mut ports: Vec<Value> = Vec::new();
    if let Some(rules) = map.get(key).and_then(|v| v.as_array()) {
        for rule in rules {
            let protocol = rule
                .get("IPProtocol")
                .and_then(|v| v.as_str())
                .unwrap_or("all");
            match rule.get("ports").and_then(|v| v.as_array()) {
                Some(list) if !list.is_empty() => {
                    for port in list.iter().filter_map(|p| p.as_str()) {
                        ports.push(Value::String(format!("{}:{}", protocol, port)));
                    }
                }
                _ => ports.push(Value::String(protocol.to_string())),
            }
        }
    }
    map.insert("rules".to_string(), Value::Array(ports));

    if !map.contains_key("sourceRanges") {
        map.insert("sourceRanges".to_string(), Value::Array(Vec::new()));
    }
    let disabled = map.get("disabled").and_then(|v| v.as_bool()).unwrap_or(false);
    map.insert("disabled".to_string(), Value::Bool(disabled));
}

fn enrich_bucket(map: &mut Map<String, Value>) {
    let uniform = map
        .get("iamConfiguration")
        .and_then(|v| v.get("uniformBucketLevelAccess"))
        .and_then(|v| v.get("enabled"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    map.insert("uniform_access".to_string(), Value::Bool(uniform));

    let prevention = map
        .get("iamConfiguration")
        .and_then(|v| v.get("publicAccessPrevention"))
        .and_then(|v| v.as_str())
        .unwrap_or("inherited")
        .to_string();
    map.insert("public_access_prevention".to_string(), Value::String(prevention));

    let versioning = map
        .get("versioning")
        .and_then(|v| v.get("enabled"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    map.insert("versioning_enabled".to_string(), Value::Bool(versioning));

    let logging = map.get("logging").is_some();
    map.insert("logging_enabled".to_string(), Value::Bool(logging));
}

fn enrich_network(map: &mut Map<String, Value>) {
    let mode = match map.get("autoCreateSubnetworks").and_then(|v| v.as_bool()) {
        Some(true) => "auto",
        Some(false) => "custom",
        None => "legacy",
    };
    map.insert("subnet_mode".to_string(), Value::String(mode.to_string()));

    let subnet_count = map
        .get("subnetworks")
        .and_then(|v| v.as_array())
        .map(|arr| arr.len())
        .unwrap_or(0);
    map.insert("subnetworks_count".to_string(), Value::from(subnet_count));
}

/// Extract short name from a resource URL
/// e.g., "https://www.googleapis.com/compute/v1/projects/my-project/global/networks/default" -> "default"
pub fn extract_short_name(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

/// Format timestamp to short form
fn format_timestamp_short(timestamp: &str) -> String {
    // RFC3339 format: 2023-01-15T10:30:00.000Z
    timestamp.get(..10).unwrap_or(timestamp).to_string()
}

fn type_name_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
