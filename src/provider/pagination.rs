//! Paginated calls
//!
//! List operations return at most one page per call. The continuation token
//! is read from `nextPageToken` and sent back as `pageToken` until exhausted.

use super::ApiClient;
use anyhow::{bail, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Request parameter carrying the continuation token
pub const PAGE_TOKEN_PARAM: &str = "pageToken";

/// Response field holding the continuation token
pub const NEXT_PAGE_TOKEN_FIELD: &str = "nextPageToken";

/// Call `operation` until every page has been read, merging the list found
/// under each of `response_fields` across pages.
///
/// Every requested field is present in the result, empty when no page had it.
pub async fn call_all_pages(
    client: &dyn ApiClient,
    operation: &str,
    params: &Value,
    response_fields: &[&str],
) -> Result<HashMap<String, Vec<Value>>> {
    let mut merged: HashMap<String, Vec<Value>> = response_fields
        .iter()
        .map(|field| (field.to_string(), Vec::new()))
        .collect();
    let mut page_token: Option<String> = None;

    loop {
        let mut page_params = match params {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => bail!("Parameters for {} must be an object, got {}", operation, other),
        };

        if let Some(token) = &page_token {
            page_params.insert(PAGE_TOKEN_PARAM.to_string(), Value::String(token.clone()));
        }

        let response = client.call(operation, &Value::Object(page_params)).await?;

        for field in response_fields {
            if let Some(items) = extract_path(&response, field).and_then(|v| v.as_array()) {
                if let Some(list) = merged.get_mut(*field) {
                    list.extend(items.iter().cloned());
                }
            }
        }

        page_token = response
            .get(NEXT_PAGE_TOKEN_FIELD)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        if page_token.is_none() {
            break;
        }
        tracing::debug!("{}: following page token", operation);
    }

    Ok(merged)
}

/// Walk a dot-notation path into a JSON value. An empty path is the value itself.
pub fn extract_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }

    let mut current = value;
    for part in path.split('.') {
        current = match part.parse::<usize>() {
            Ok(idx) if current.is_array() => current.get(idx)?,
            _ => current.get(part)?,
        };
    }
    Some(current)
}
