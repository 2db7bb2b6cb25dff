//! Scan report
//!
//! Collects the finalized service configurations and materialized rules of
//! one run and writes them as JSON or YAML.

use crate::resource::ServiceReport;
use crate::rules::{CatalogMaterialization, MaterializedRule};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleFailure {
    pub identity: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RulesReport {
    pub rules: Vec<MaterializedRule>,
    pub failures: Vec<RuleFailure>,
}

impl From<CatalogMaterialization> for RulesReport {
    fn from(catalog: CatalogMaterialization) -> Self {
        Self {
            rules: catalog.rules,
            failures: catalog
                .failures
                .into_iter()
                .map(|(identity, error)| RuleFailure {
                    identity,
                    error: error.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub account_id: String,
    pub partition: String,
    pub services: BTreeMap<String, ServiceReport>,
    /// Services whose fetch failed, with a user-facing reason
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<RulesReport>,
}

impl ScanReport {
    pub fn new(account_id: &str, partition: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            account_id: account_id.to_string(),
            partition: partition.to_string(),
            services: BTreeMap::new(),
            errors: BTreeMap::new(),
            rules: None,
        }
    }

    pub fn add_service(&mut self, name: &str, report: ServiceReport) {
        self.services.insert(name.to_string(), report);
    }

    pub fn add_error(&mut self, name: &str, message: String) {
        self.errors.insert(name.to_string(), message);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(self).context("Failed to serialize report as JSON")
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(self).context("Failed to serialize report as YAML")
            }
        }
    }

    pub fn write_to(&self, path: &Path, format: OutputFormat) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.render(format)?)
            .with_context(|| format!("Failed to write report to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MaterializeError;
    use crate::resource::ServiceConfiguration;
    use tempfile::TempDir;

    fn sample() -> ScanReport {
        let mut report = ScanReport::new("audit-project", "gcp");
        let storage = ServiceConfiguration::from_registry("storage").unwrap();
        report.add_service("storage", storage.report());
        report.add_error("container", "Permission denied.".to_string());
        report.finish();
        report
    }

    #[test]
    fn test_json_shape() {
        let value: serde_json::Value =
            serde_json::from_str(&sample().render(OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(value["account_id"], "audit-project");
        assert_eq!(value["services"]["storage"]["service"], "Cloud Storage");
        assert_eq!(value["errors"]["container"], "Permission denied.");
        assert!(value["run_id"].as_str().unwrap().len() == 36);
        assert!(value.get("rules").is_none());
    }

    #[test]
    fn test_yaml_output_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("report.yaml");
        sample().write_to(&path, OutputFormat::Yaml).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("account_id: audit-project"));
    }

    #[test]
    fn test_rule_failures_are_rendered() {
        let catalog = CatalogMaterialization {
            rules: Vec::new(),
            failures: vec![(
                "missing.json".to_string(),
                MaterializeError::MissingDefinition("missing.json".to_string()),
            )],
        };
        let rules = RulesReport::from(catalog);
        assert_eq!(rules.failures[0].error, "No rule definition found for missing.json");
    }
}
