//! Rule catalog entries and severities

use serde::{Deserialize, Deserializer, Serialize};

/// Catalog file extension, stripped from rule keys
pub const RULE_FILE_EXTENSION: &str = ".json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Danger,
}

impl Severity {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "warning" | "warn" | "low" | "medium" => Some(Self::Warning),
            "danger" | "high" | "critical" | "crit" => Some(Self::Danger),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str_lenient(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown severity: {}", s)))
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Danger => write!(f, "danger"),
        }
    }
}

/// Catalog entry for one security rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTemplate {
    /// Catalog file the rule body comes from, e.g. `firewall-world-open.json`
    pub identity: String,
    /// `findings` or `filters`
    pub category: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub severity: Severity,
    /// Positional values substituted for `_ARG_<n>_`
    #[serde(default)]
    pub arguments: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl RuleTemplate {
    pub fn new(identity: &str, category: &str, severity: Severity, arguments: &[&str]) -> Self {
        Self {
            identity: identity.to_string(),
            category: category.to_string(),
            enabled: true,
            severity,
            arguments: arguments.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Identity without the catalog file extension
    pub fn default_key(&self) -> String {
        strip_extension(&self.identity)
    }
}

pub(crate) fn strip_extension(name: &str) -> String {
    name.strip_suffix(RULE_FILE_EXTENSION)
        .unwrap_or(name)
        .to_string()
}
