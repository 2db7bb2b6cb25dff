//! Turning catalog templates into concrete rules
//!
//! A rule body has its `_ARG_<n>_` placeholders filled from the template
//! arguments, is parsed, and has the special values in its conditions
//! resolved before the requested attributes are copied out.

use crate::error::{MaterializeError, MaterializeResult};
use crate::resource::format_service_name;
use crate::rules::condition::{Condition, Operand, SpecialValue, IP_RANGES_FROM_ARGS};
use crate::rules::ip_ranges::IpRangeReader;
use crate::rules::template::{strip_extension, RuleTemplate, Severity, RULE_FILE_EXTENSION};
use anyhow::Context;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

static ARGUMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_ARG_([a-zA-Z0-9]+)_").unwrap());

/// Attributes held in dedicated fields of [`MaterializedRule`]
const RESERVED_ATTRIBUTES: &[&str] = &[
    "identity",
    "key",
    "category",
    "enabled",
    "severity",
    "service",
    "conditions",
];

/// A rule ready for evaluation
#[derive(Debug, Clone, Serialize)]
pub struct MaterializedRule {
    pub identity: String,
    pub key: String,
    pub category: String,
    pub enabled: bool,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub conditions: Vec<Condition>,
    /// Remaining requested attributes of the definition (`description`, `path`, ...)
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl MaterializedRule {
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Dotted resource path the rule applies to
    pub fn path(&self) -> Option<&str> {
        self.attribute("path").and_then(|v| v.as_str())
    }
}

/// Result of materializing a whole catalog
#[derive(Debug, Default)]
pub struct CatalogMaterialization {
    pub rules: Vec<MaterializedRule>,
    pub failures: Vec<(String, MaterializeError)>,
}

/// Replace every `_ARG_<n>_` with the n-th argument in one pass.
///
/// Argument text is copied as is, so placeholders inside an argument are
/// not expanded again.
pub fn substitute_arguments(body: &str, arguments: &[String]) -> MaterializeResult<String> {
    let mut output = String::with_capacity(body.len());
    let mut last = 0;

    for caps in ARGUMENT_RE.captures_iter(body) {
        let whole = caps.get(0).map_or("", |m| m.as_str());
        let (start, end) = caps.get(0).map_or((last, last), |m| (m.start(), m.end()));

        let index: usize = caps[1]
            .parse()
            .map_err(|_| MaterializeError::InvalidPlaceholder(whole.to_string()))?;
        let argument = arguments.get(index).ok_or(MaterializeError::MissingArgument {
            index,
            supplied: arguments.len(),
        })?;

        output.push_str(&body[last..start]);
        output.push_str(argument);
        last = end;
    }

    output.push_str(&body[last..]);
    Ok(output)
}

/// Turns rule templates and their catalog bodies into [`MaterializedRule`]s
#[derive(Clone)]
pub struct RuleMaterializer {
    reader: Arc<dyn IpRangeReader>,
}

impl std::fmt::Debug for RuleMaterializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleMaterializer").finish_non_exhaustive()
    }
}

impl RuleMaterializer {
    pub fn new(reader: Arc<dyn IpRangeReader>) -> Self {
        Self { reader }
    }

    pub fn materialize(
        &self,
        template: &RuleTemplate,
        body: &str,
        wanted_attributes: &[String],
        ip_range_sources: &[String],
    ) -> MaterializeResult<MaterializedRule> {
        let substituted = substitute_arguments(body, &template.arguments)?;
        let document: Value = serde_json::from_str(&substituted)?;
        let Value::Object(document) = document else {
            return Err(MaterializeError::NotAnObject);
        };

        let wanted: Vec<&str> = if wanted_attributes.is_empty() {
            document.keys().map(String::as_str).collect()
        } else {
            wanted_attributes.iter().map(String::as_str).collect()
        };

        let mut conditions = Vec::new();
        if wanted.contains(&"conditions") {
            if let Some(raw) = document.get("conditions") {
                conditions = Condition::parse_list(raw).map_err(MaterializeError::InvalidConditions)?;
                for condition in &mut conditions {
                    self.resolve_special_values(condition, ip_range_sources)?;
                }
            }
        }

        let mut attributes = Map::new();
        for name in &wanted {
            if RESERVED_ATTRIBUTES.contains(name) {
                continue;
            }
            if let Some(value) = document.get(*name) {
                attributes.insert(name.to_string(), value.clone());
            }
        }

        let service = document
            .get("path")
            .and_then(|p| p.as_str())
            .and_then(|p| p.split('.').next())
            .filter(|segment| !segment.is_empty())
            .map(format_service_name);

        let key = match document.get("key") {
            Some(Value::String(key)) => strip_extension(key),
            _ => template.default_key(),
        };

        debug!("Materialized rule {} ({} conditions)", key, conditions.len());

        Ok(MaterializedRule {
            identity: template.identity.clone(),
            key,
            category: template.category.clone(),
            enabled: template.enabled,
            severity: template.severity,
            service,
            conditions,
            attributes,
        })
    }

    /// Materialize every template independently; a failing rule never stops the others.
    pub fn materialize_catalog(
        &self,
        templates: &[RuleTemplate],
        definitions: &HashMap<String, String>,
        wanted_attributes: &[String],
        ip_range_sources: &[String],
    ) -> CatalogMaterialization {
        let mut result = CatalogMaterialization::default();

        for template in templates {
            let outcome = match definitions.get(&template.identity) {
                Some(body) => self.materialize(template, body, wanted_attributes, ip_range_sources),
                None => Err(MaterializeError::MissingDefinition(template.identity.clone())),
            };

            match outcome {
                Ok(rule) => result.rules.push(rule),
                Err(e) => {
                    warn!("Skipping rule {}: {}", template.identity, e);
                    result.failures.push((template.identity.clone(), e));
                }
            }
        }

        result
    }

    fn resolve_special_values(
        &self,
        condition: &mut Condition,
        ip_range_sources: &[String],
    ) -> MaterializeResult<()> {
        match condition {
            Condition::Group { conditions, .. } => {
                for nested in conditions {
                    self.resolve_special_values(nested, ip_range_sources)?;
                }
            }
            Condition::Comparison {
                operand: Some(operand),
                ..
            } => {
                let Some(text) = operand.as_str() else {
                    return Ok(());
                };
                let raw = text.to_string();

                // Text that names no IP range file is left as an account-id pattern
                *operand = match SpecialValue::classify(text) {
                    Some(SpecialValue::IpRangesFromFile(name)) => {
                        Operand::List(self.read_prefixes(&name, false, ip_range_sources)?)
                    }
                    Some(SpecialValue::IpRangesFromLocalFile(name)) => {
                        Operand::List(self.read_prefixes(&name, true, ip_range_sources)?)
                    }
                    Some(SpecialValue::AccountId) | None => Operand::Pattern {
                        value: SpecialValue::AccountId,
                        raw,
                    },
                };
            }
            _ => {}
        }
        Ok(())
    }

    fn read_prefixes(
        &self,
        name: &str,
        local_file: bool,
        ip_range_sources: &[String],
    ) -> MaterializeResult<Vec<Value>> {
        if name != IP_RANGES_FROM_ARGS {
            return self.read_one(name, local_file);
        }

        let mut prefixes = Vec::new();
        for source in ip_range_sources {
            prefixes.extend(self.read_one(source, true)?);
        }
        Ok(prefixes)
    }

    fn read_one(&self, path: &str, local_file: bool) -> MaterializeResult<Vec<Value>> {
        self.reader
            .read_ip_ranges(path, local_file, true)
            .map_err(|e| MaterializeError::IpRanges {
                path: path.to_string(),
                message: format!("{:#}", e),
            })
    }
}

/// Read every rule definition stored in `dir`, keyed by file name
pub fn read_definitions(dir: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut definitions = HashMap::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list rule catalog {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.is_file() || !name.ends_with(RULE_FILE_EXTENSION) {
            continue;
        }
        let body = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read rule {}", path.display()))?;
        definitions.insert(name.to_string(), body);
    }

    Ok(definitions)
}
