//! Pattern Synthesizer: a closed-world JSON Schema fragment for CALM
//! architecture validation.
//!
//! A node's `controls.*.requirements[].requirement-url` must be one of the
//! enumerated record URLs. There is no prefix or regex matching.

use crate::pipeline::materialize::ControlRequirementRecord;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;

pub const JSON_SCHEMA_DIALECT: &str = "https://json-schema.org/draft/2020-12/schema";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternFragment {
    pub policy_id: Option<String>,
    /// Sorted, de-duplicated allow-list.
    pub requirement_urls: Vec<String>,
    pub scope: Option<Vec<String>>,
}

impl PatternFragment {
    pub fn accepts(&self, url: &str) -> bool {
        self.requirement_urls.binary_search_by(|u| u.as_str().cmp(url)).is_ok()
    }

    pub fn to_schema(&self) -> JsonValue {
        let title = match &self.policy_id {
            Some(policy) => format!("Control requirements resolved from policy {}", policy),
            None => "Control requirements resolved from catalog".to_string(),
        };
        let mut schema = serde_json::json!({
            "$schema": JSON_SCHEMA_DIALECT,
            "title": title,
            "type": "object",
            "properties": {
                "nodes": {
                    "type": "array",
                    "items": { "$ref": "#/$defs/node" }
                }
            },
            "$defs": {
                "requirement-url": {
                    "type": "string",
                    "enum": self.requirement_urls
                },
                "node": {
                    "type": "object",
                    "properties": {
                        "controls": {
                            "type": "object",
                            "additionalProperties": { "$ref": "#/$defs/control" }
                        }
                    }
                },
                "control": {
                    "type": "object",
                    "properties": {
                        "requirements": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "requirement-url": { "$ref": "#/$defs/requirement-url" }
                                },
                                "required": ["requirement-url"]
                            }
                        }
                    },
                    "required": ["requirements"]
                }
            }
        });
        if let (Some(scope), Some(obj)) = (&self.scope, schema.as_object_mut()) {
            obj.insert("x-gemara-scope".to_string(), serde_json::json!(scope));
        }
        schema
    }
}

fn in_scope(record: &ControlRequirementRecord, filter: &BTreeSet<String>) -> bool {
    record
        .gemara()
        .applicability
        .iter()
        .any(|tag| filter.contains(tag))
}

/// Enumerate the `$id` of every record whose applicability intersects
/// `scope_filter` (every record when no filter is given).
pub fn synthesize(
    records: &[ControlRequirementRecord],
    scope_filter: Option<&BTreeSet<String>>,
) -> PatternFragment {
    let urls: BTreeSet<String> = records
        .iter()
        .filter(|r| scope_filter.is_none_or(|f| in_scope(r, f)))
        .map(|r| r.id.clone())
        .collect();

    let mut policies: BTreeSet<&str> = records
        .iter()
        .filter_map(|r| r.gemara().policy_id.as_deref())
        .collect();
    let policy_id = match policies.len() {
        1 => policies.pop_first().map(|p| p.to_string()),
        _ => None,
    };

    PatternFragment {
        policy_id,
        requirement_urls: urls.into_iter().collect(),
        scope: scope_filter.map(|f| f.iter().cloned().collect()),
    }
}
