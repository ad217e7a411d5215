//! Rule document loading.
//!
//! The JSON document is converted into typed rule sets up front; any
//! malformed entry rejects the whole document before evaluation starts.

use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::pipeline::rules::{ActionSpec, Aggregator, Condition, Predicate, RuleSet};
use crate::pipeline::types::Field;

#[derive(Debug, Deserialize)]
struct RawDocument {
    all_rules: Option<Vec<RawRuleSet>>,
}

#[derive(Debug, Deserialize)]
struct RawRuleSet {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    predicate: Option<String>,
    rules: Vec<RawCondition>,
    #[serde(default)]
    actions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    field: String,
    predicate: String,
    #[serde(default)]
    value: serde_json::Value,
}

/// Read and parse a rule document from disk.
pub async fn load_rules(path: &Path) -> Result<Vec<RuleSet>, ConfigError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::RulesFile {
            path: path.to_path_buf(),
            source,
        })?;
    let rule_sets = parse_rules(&raw)?;
    info!(path = %path.display(), count = rule_sets.len(), "Rules loaded");
    Ok(rule_sets)
}

/// Parse a rule document (`{"all_rules": [...]}`).
pub fn parse_rules(json: &str) -> Result<Vec<RuleSet>, ConfigError> {
    let doc: RawDocument =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    let Some(raw_sets) = doc.all_rules else {
        warn!("Rules document has no 'all_rules' key; nothing will match");
        return Ok(Vec::new());
    };

    raw_sets
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            convert_rule_set(raw).map_err(|reason| ConfigError::InvalidRuleSet { index, reason })
        })
        .collect()
}

fn convert_rule_set(raw: RawRuleSet) -> Result<RuleSet, String> {
    let aggregator = match raw.predicate.as_deref() {
        Some(p) => p.parse::<Aggregator>()?,
        None => Aggregator::default(),
    };

    let conditions = raw
        .rules
        .into_iter()
        .map(convert_condition)
        .collect::<Result<Vec<_>, _>>()?;

    let actions = raw
        .actions
        .iter()
        .map(|a| a.parse::<ActionSpec>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RuleSet {
        name: raw.name.filter(|n| !n.trim().is_empty()),
        aggregator,
        conditions,
        actions,
    })
}

fn convert_condition(raw: RawCondition) -> Result<Condition, String> {
    let field: Field = raw.field.parse()?;
    let predicate = Predicate::from(raw.predicate.as_str());
    if let Predicate::Unsupported(name) = &predicate {
        warn!(field = %field, "Unsupported condition predicate '{name}' will never match");
    }

    let expected = match raw.value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        v @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_)) => v.to_string(),
        other => return Err(format!("condition on '{field}' has a non-scalar value: {other}")),
    };

    Ok(Condition {
        field,
        predicate,
        expected,
    })
}
