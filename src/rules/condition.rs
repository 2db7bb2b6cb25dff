//! Rule condition tree
//!
//! Catalog files write conditions as positional JSON arrays:
//!
//! ```text
//! ["and",
//!   ["vpc.firewalls.id.sourceRanges", "containAtLeastOneOf", "_IP_RANGES_FROM_FILE_(ip-ranges-from-args)"],
//!   ["vpc.firewalls.id.disabled", "false", ""]
//! ]
//! ```
//!
//! They are parsed into [`Condition`] so that the shape of each slot is
//! explicit, and written back in the same array form.

use crate::provider::ACCOUNT_ID_SENTINEL;
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::sync::LazyLock;

/// File name that stands for "every IP range source given on the command line"
pub const IP_RANGES_FROM_ARGS: &str = "ip-ranges-from-args";

static ACCOUNT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{}", regex::escape(ACCOUNT_ID_SENTINEL))).unwrap());
static IP_RANGES_FROM_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_IP_RANGES_FROM_FILE_\((.*?)\)").unwrap());
static IP_RANGES_FROM_LOCAL_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_IP_RANGES_FROM_LOCAL_FILE_\((.*?)\)").unwrap());

/// Placeholder resolved from runtime context rather than the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialValue {
    AccountId,
    IpRangesFromFile(String),
    IpRangesFromLocalFile(String),
}

impl SpecialValue {
    /// Recognize a placeholder at the start of `text`
    pub fn classify(text: &str) -> Option<Self> {
        if ACCOUNT_ID_RE.is_match(text) {
            return Some(Self::AccountId);
        }
        if let Some(caps) = IP_RANGES_FROM_FILE_RE.captures(text) {
            return Some(Self::IpRangesFromFile(caps[1].to_string()));
        }
        if let Some(caps) = IP_RANGES_FROM_LOCAL_FILE_RE.captures(text) {
            return Some(Self::IpRangesFromLocalFile(caps[1].to_string()));
        }
        None
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Scalar(Value),
    List(Vec<Value>),
    /// Recognized placeholder left for the evaluator; `raw` is the catalog text
    Pattern { value: SpecialValue, raw: String },
}

impl Operand {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Array(items) => Self::List(items.clone()),
            other => Self::Scalar(other.clone()),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Scalar(v) => v.clone(),
            Self::List(items) => Value::Array(items.clone()),
            Self::Pattern { raw, .. } => Value::String(raw.clone()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `[attribute, operator, operand?, extra...]`
    Comparison {
        attribute: String,
        operator: String,
        operand: Option<Operand>,
        extra: Vec<Value>,
    },
    /// `["and" | "or", [..], [..]]`
    Group {
        connective: String,
        conditions: Vec<Condition>,
    },
    /// Anything else, kept verbatim (top-level connectives, one-element arrays...)
    Literal(Value),
}

impl Condition {
    pub fn from_value(value: &Value) -> Self {
        let Value::Array(items) = value else {
            return Self::Literal(value.clone());
        };

        if let [Value::String(connective), rest @ ..] = items.as_slice() {
            if is_connective(connective) && !rest.is_empty() && rest.iter().all(Value::is_array) {
                return Self::Group {
                    connective: connective.clone(),
                    conditions: rest.iter().map(Self::from_value).collect(),
                };
            }
        }

        match items.as_slice() {
            [Value::String(attribute), Value::String(operator), rest @ ..] => Self::Comparison {
                attribute: attribute.clone(),
                operator: operator.clone(),
                operand: rest.first().map(Operand::from_value),
                extra: rest.iter().skip(1).cloned().collect(),
            },
            _ => Self::Literal(value.clone()),
        }
    }

    /// Parse the `conditions` attribute of a rule definition
    pub fn parse_list(value: &Value) -> Result<Vec<Self>, String> {
        match value {
            Value::Array(items) => Ok(items.iter().map(Self::from_value).collect()),
            other => Err(format!("expected an array, got {}", other)),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Comparison {
                attribute,
                operator,
                operand,
                extra,
            } => {
                let mut items = vec![
                    Value::String(attribute.clone()),
                    Value::String(operator.clone()),
                ];
                if let Some(operand) = operand {
                    items.push(operand.to_value());
                }
                items.extend(extra.iter().cloned());
                Value::Array(items)
            }
            Self::Group {
                connective,
                conditions,
            } => {
                let mut items = vec![Value::String(connective.clone())];
                items.extend(conditions.iter().map(Self::to_value));
                Value::Array(items)
            }
            Self::Literal(value) => value.clone(),
        }
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

fn is_connective(word: &str) -> bool {
    matches!(word, "and" | "or")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_special_values() {
        assert_eq!(SpecialValue::classify("_ACCOUNT_ID_"), Some(SpecialValue::AccountId));
        assert_eq!(
            SpecialValue::classify("_IP_RANGES_FROM_FILE_(allow.json)"),
            Some(SpecialValue::IpRangesFromFile("allow.json".to_string()))
        );
        assert_eq!(
            SpecialValue::classify("_IP_RANGES_FROM_LOCAL_FILE_(corp/ranges.json)"),
            Some(SpecialValue::IpRangesFromLocalFile("corp/ranges.json".to_string()))
        );
        // Anchored at the start
        assert_eq!(SpecialValue::classify("x_ACCOUNT_ID_"), None);
        assert_eq!(SpecialValue::classify("0.0.0.0/0"), None);
    }

    #[test]
    fn test_parse_shapes() {
        let conditions = Condition::parse_list(&json!([
            "and",
            ["storage.buckets.id.uniform_access", "false", ""],
            ["vpc.networks.id.subnet_mode", "equal"],
            ["or", ["a", "null", ""], ["b", "notNull", ""]],
            ["lonely"]
        ]))
        .unwrap();

        assert_eq!(conditions[0], Condition::Literal(json!("and")));
        assert!(matches!(
            &conditions[1],
            Condition::Comparison { operand: Some(Operand::Scalar(v)), .. } if v == ""
        ));
        assert!(matches!(&conditions[2], Condition::Comparison { operand: None, .. }));
        assert!(matches!(&conditions[3], Condition::Group { conditions, .. } if conditions.len() == 2));
        assert_eq!(conditions[4], Condition::Literal(json!(["lonely"])));
    }

    #[test]
    fn test_list_operand_is_kept() {
        let condition = Condition::from_value(&json!(["a", "containAtLeastOneOf", ["x", "y"]]));
        let Condition::Comparison { operand, .. } = &condition else {
            panic!("expected a comparison");
        };
        assert_eq!(operand, &Some(Operand::List(vec![json!("x"), json!("y")])));
    }

    #[test]
    fn test_serializes_back_to_array_form() {
        let raw = json!(["or", ["a", "equal", "b", "extra"], ["c", "null"]]);
        let condition = Condition::from_value(&raw);
        assert_eq!(serde_json::to_value(&condition).unwrap(), raw);

        let pattern = Condition::Comparison {
            attribute: "owner".to_string(),
            operator: "notEqual".to_string(),
            operand: Some(Operand::Pattern {
                value: SpecialValue::AccountId,
                raw: "_ACCOUNT_ID_".to_string(),
            }),
            extra: Vec::new(),
        };
        assert_eq!(pattern.to_value(), json!(["owner", "notEqual", "_ACCOUNT_ID_"]));
    }

    #[test]
    fn test_parse_list_rejects_objects() {
        assert!(Condition::parse_list(&json!({"a": 1})).is_err());
    }
}
