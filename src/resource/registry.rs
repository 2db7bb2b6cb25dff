//! Service Registry - Load service metadata from JSON
//!
//! This module loads the declared resources of every supported service from
//! an embedded JSON file and classifies each resource type by scope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Embedded service metadata (compiled into the binary)
const METADATA_FILE: &str = include_str!("../resources/metadata.json");

/// Where a resource type lives, derived from its metadata path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceScope {
    /// Fetched once per account, in the first region visited
    Global,
    /// Fetched in every region
    Region,
    /// Fetched in every region and stored under its VPC
    Vpc,
}

impl ResourceScope {
    /// Classify a metadata path such as `services.vpc.regions.id.vpcs.id.subnetworks.id`
    pub fn from_path(path: &str) -> Self {
        if path.contains(".vpcs.id.") {
            Self::Vpc
        } else if path.contains(".regions.id.") {
            Self::Region
        } else {
            Self::Global
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Region => "region",
            Self::Vpc => "vpc",
        }
    }
}

/// Partition of a service's resource types by scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceScopes {
    pub global: Vec<String>,
    pub region: Vec<String>,
    pub vpc: Vec<String>,
}

impl ResourceScopes {
    /// Classify every declared resource type; each lands in exactly one scope
    pub fn classify(metadata: &ServiceMetadata) -> Self {
        let mut scopes = Self::default();
        for (type_name, resource) in &metadata.resources {
            scopes.push(resource.scope(), type_name);
        }
        scopes
    }

    pub fn push(&mut self, scope: ResourceScope, type_name: &str) {
        let list = match scope {
            ResourceScope::Global => &mut self.global,
            ResourceScope::Region => &mut self.region,
            ResourceScope::Vpc => &mut self.vpc,
        };
        list.push(type_name.to_string());
    }

    pub fn scope_of(&self, type_name: &str) -> Option<ResourceScope> {
        if self.global.iter().any(|t| t == type_name) {
            Some(ResourceScope::Global)
        } else if self.region.iter().any(|t| t == type_name) {
            Some(ResourceScope::Region)
        } else if self.vpc.iter().any(|t| t == type_name) {
            Some(ResourceScope::Vpc)
        } else {
            None
        }
    }

    pub fn is_global(&self, type_name: &str) -> bool {
        self.scope_of(type_name) == Some(ResourceScope::Global)
    }

    /// Every classified type name
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.global.iter().chain(&self.region).chain(&self.vpc)
    }
}

/// Resource definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceMetadata {
    /// Location of the resource in the configuration tree
    pub path: String,
    /// List operation invoked on the API client
    pub api_call: String,
    /// Response field holding the listed items
    pub response: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default)]
    pub name_field: Option<String>,
    /// Field referencing the owning VPC network
    #[serde(default)]
    pub vpc_field: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub ignore_list_errors: bool,
}

fn default_id_field() -> String {
    "id".to_string()
}

impl ResourceMetadata {
    pub fn scope(&self) -> ResourceScope {
        ResourceScope::from_path(&self.path)
    }
}

/// Service definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceMetadata {
    /// API family used to reach the service, when it differs from the service name
    #[serde(default)]
    pub api_service: Option<String>,
    pub resources: BTreeMap<String, ResourceMetadata>,
}

/// Root structure of resources/metadata.json
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceMetadata>,
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<MetadataConfig> = OnceLock::new();

/// Get the service registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static MetadataConfig {
    REGISTRY.get_or_init(|| {
        serde_json::from_str(METADATA_FILE)
            .unwrap_or_else(|e| panic!("Failed to parse embedded service metadata: {}", e))
    })
}

/// Get a service definition by name
pub fn get_service(name: &str) -> Option<&'static ServiceMetadata> {
    get_registry().services.get(name)
}

/// Get all registered service names
pub fn get_all_service_names() -> Vec<&'static str> {
    get_registry()
        .services
        .keys()
        .map(|s| s.as_str())
        .collect()
}

/// Human-readable service name for logs and rule metadata
pub fn format_service_name(service: &str) -> String {
    match service.to_lowercase().as_str() {
        "compute" => "Compute Engine".to_string(),
        "vpc" => "VPC Network".to_string(),
        "storage" => "Cloud Storage".to_string(),
        "container" => "GKE".to_string(),
        "iam" => "IAM".to_string(),
        "sql" | "cloudsql" => "Cloud SQL".to_string(),
        "dns" => "Cloud DNS".to_string(),
        "kms" => "Cloud KMS".to_string(),
        _ => {
            let mut chars = service.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_loads_successfully() {
        let registry = get_registry();
        assert!(
            !registry.services.is_empty(),
            "Registry should have services"
        );
    }

    #[test]
    fn test_vpc_service_uses_compute_api() {
        let service = get_service("vpc").expect("vpc service should exist");
        assert_eq!(service.api_service.as_deref(), Some("compute"));
        assert_eq!(service.resources["subnetworks"].scope(), ResourceScope::Vpc);
        assert_eq!(service.resources["networks"].scope(), ResourceScope::Global);
        assert_eq!(service.resources["routers"].scope(), ResourceScope::Region);
    }

    #[test]
    fn test_get_all_service_names() {
        let names = get_all_service_names();
        assert!(names.contains(&"storage"));
        assert!(names.contains(&"compute"));
    }

    #[test]
    fn test_scope_from_path() {
        assert_eq!(
            ResourceScope::from_path("services.ec2.regions.id.vpcs.id.instances.id"),
            ResourceScope::Vpc
        );
        assert_eq!(
            ResourceScope::from_path("services.compute.regions.id.addresses.id"),
            ResourceScope::Region
        );
        assert_eq!(
            ResourceScope::from_path("services.storage.buckets.id"),
            ResourceScope::Global
        );
    }

    #[test]
    fn test_format_service_name() {
        assert_eq!(format_service_name("vpc"), "VPC Network");
        assert_eq!(format_service_name("pubsub"), "Pubsub");
        assert_eq!(format_service_name(""), "");
    }
}
