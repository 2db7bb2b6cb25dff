//! Operation dispatch
//!
//! Maps list operation names from the service metadata to GCP REST API calls.

use super::client::GcpClient;
use anyhow::Result;
use serde_json::Value;

/// Parameters that are part of the URL path rather than the query string
const PATH_PARAMS: &[&str] = &["location", "name"];

/// Invoke a list operation of `service`
pub async fn invoke(service: &str, method: &str, client: &GcpClient, params: &Value) -> Result<Value> {
    tracing::debug!(
        "invoke: service={}, method={}, region={}",
        service,
        method,
        client.region
    );

    match service {
        "compute" => invoke_compute(method, client, params).await,
        "storage" => invoke_storage(method, client, params).await,
        "container" => invoke_container(method, client, params).await,
        _ => Err(anyhow::anyhow!("Unknown service: {}", service)),
    }
}

/// URL of a list operation, if it is known
pub fn operation_url(service: &str, method: &str, client: &GcpClient, params: &Value) -> Option<String> {
    let url = match (service, method) {
        ("compute", "list_regions") => client.compute_url("regions"),
        ("compute", "list_addresses") => client.compute_regional_url("addresses"),
        ("compute", "list_forwarding_rules") => client.compute_regional_url("forwardingRules"),
        ("compute", "list_target_pools") => client.compute_regional_url("targetPools"),
        ("compute", "list_routers") => client.compute_regional_url("routers"),
        ("compute", "list_subnetworks") => client.compute_regional_url("subnetworks"),
        ("compute", "list_instance_templates") => client.compute_global_url("instanceTemplates"),
        ("compute", "list_networks") => client.compute_global_url("networks"),
        ("compute", "list_firewalls") => client.compute_global_url("firewalls"),
        ("storage", "list_buckets") => {
            let url = client.storage_url("b");
            if params.get("project").is_none() {
                format!("{}?project={}", url, urlencoding::encode(&client.project_id))
            } else {
                url
            }
        },
        ("container", "list_clusters") => {
            let location = get_param_str_opt(params, "location").unwrap_or_else(|| client.region.clone());
            client.container_location_url(&location, "clusters")
        },
        _ => return None,
    };
    Some(add_query_params(&url, params))
}

// =============================================================================
// Compute Engine
// =============================================================================

async fn invoke_compute(method: &str, client: &GcpClient, params: &Value) -> Result<Value> {
    let Some(url) = operation_url("compute", method, client, params) else {
        return Err(anyhow::anyhow!("Unknown compute method: {}", method));
    };
    client.get(&url).await
}

// =============================================================================
// Cloud Storage
// =============================================================================

async fn invoke_storage(method: &str, client: &GcpClient, params: &Value) -> Result<Value> {
    let Some(url) = operation_url("storage", method, client, params) else {
        return Err(anyhow::anyhow!("Unknown storage method: {}", method));
    };
    client.get(&url).await
}

// =============================================================================
// GKE
// =============================================================================

async fn invoke_container(method: &str, client: &GcpClient, params: &Value) -> Result<Value> {
    let Some(url) = operation_url("container", method, client, params) else {
        return Err(anyhow::anyhow!("Unknown container method: {}", method));
    };
    // The clusters API has no paging and omits the field when empty
    let mut response = client.get(&url).await?;
    if response.get("clusters").is_none() {
        if let Value::Object(map) = &mut response {
            map.insert("clusters".to_string(), Value::Array(Vec::new()));
        } else {
            response = serde_json::json!({ "clusters": [] });
        }
    }
    Ok(response)
}

// =============================================================================
// Helpers
// =============================================================================

fn get_param_str_opt(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| {
            if let Value::Array(arr) = v {
                arr.first().and_then(|v| v.as_str())
            } else {
                v.as_str()
            }
        })
        .map(|s| s.to_string())
}

fn add_query_params(url: &str, params: &Value) -> String {
    let Value::Object(map) = params else {
        return url.to_string();
    };

    let mut query_parts: Vec<String> = Vec::new();

    for (key, value) in map {
        if PATH_PARAMS.contains(&key.as_str()) {
            continue;
        }

        match value {
            Value::String(s) => {
                query_parts.push(format!("{}={}", key, urlencoding::encode(s)));
            },
            Value::Number(n) => {
                query_parts.push(format!("{}={}", key, n));
            },
            Value::Bool(b) => {
                query_parts.push(format!("{}={}", key, b));
            },
            Value::Array(arr) => {
                for item in arr {
                    if let Value::String(s) = item {
                        query_parts.push(format!("{}={}", key, urlencoding::encode(s)));
                    }
                }
            },
            _ => {},
        }
    }

    if query_parts.is_empty() {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&{}", url, query_parts.join("&"))
    } else {
        format!("{}?{}", url, query_parts.join("&"))
    }
}
