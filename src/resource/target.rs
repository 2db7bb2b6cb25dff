//! Fetch targets and parameter resolution

use crate::provider::ACCOUNT_ID_SENTINEL;
use serde::Serialize;
use serde_json::Value;

/// One unit of fetch work: a resource type and the list call that enumerates it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceTarget {
    pub type_name: String,
    pub response_field: String,
    pub list_operation: String,
    pub params: Value,
    /// Suppress the log line when listing fails; the result is empty either way
    pub ignore_list_errors: bool,
}

impl ResourceTarget {
    pub fn new(type_name: &str, response_field: &str, list_operation: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            response_field: response_field.to_string(),
            list_operation: list_operation.to_string(),
            params: Value::Object(serde_json::Map::new()),
            ignore_list_errors: false,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn ignoring_list_errors(mut self, ignore: bool) -> Self {
        self.ignore_list_errors = ignore;
        self
    }
}

/// Rewrites sentinel scalars in a parameter structure with runtime values
#[derive(Debug, Clone)]
pub struct ParamResolver {
    account_id: String,
}

impl ParamResolver {
    pub fn new(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
        }
    }

    /// Produce a resolved copy of `params`; the input is left untouched.
    pub fn resolve(&self, params: &Value) -> Value {
        match params {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve(v)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve(v)).collect()),
            Value::String(s) if s == ACCOUNT_ID_SENTINEL => Value::String(self.account_id.clone()),
            other => other.clone(),
        }
    }

    pub fn resolve_target(&self, target: &ResourceTarget) -> ResourceTarget {
        ResourceTarget {
            params: self.resolve(&target.params),
            ..target.clone()
        }
    }
}

/// True when some scalar in `params` is a sentinel that needs resolving
pub fn needs_resolution(params: &Value) -> bool {
    match params {
        Value::Object(map) => map.values().any(needs_resolution),
        Value::Array(items) => items.iter().any(needs_resolution),
        Value::String(s) => s == ACCOUNT_ID_SENTINEL,
        _ => false,
    }
}
