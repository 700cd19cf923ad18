//! Query parameter templates and dependency expansion
//!
//! A template value of the exact form `{column}` is a placeholder bound per
//! distinct row of the dependency table; everything else is sent verbatim.

use crate::error::{IngestError, Result};
use crate::record::{render, Table};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Default number of parameter sets fetched per dataset
pub const DEFAULT_MAX_PARAMETER_SETS: usize = 2;

/// A single template value, classified once at load time
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Static(Value),
    /// Name of the dependency column supplying the value
    Placeholder(String),
}

impl QueryValue {
    pub fn parse(value: Value) -> Self {
        match value {
            Value::String(s) => match placeholder_target(&s) {
                Some(column) => QueryValue::Placeholder(column.to_string()),
                None => QueryValue::Static(Value::String(s)),
            },
            other => QueryValue::Static(other),
        }
    }
}

fn placeholder_target(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('{')?.strip_suffix('}')?;
    let mut chars = inner.chars();
    let first = chars.next()?;
    if (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Some(inner)
    } else {
        None
    }
}

/// Ordered query parameter template
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryTemplate {
    entries: Vec<(String, QueryValue)>,
}

impl QueryTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), QueryValue::parse(v.into())))
                .collect(),
        }
    }

    pub fn entries(&self) -> &[(String, QueryValue)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(parameter, column)` for every placeholder entry
    pub fn placeholders(&self) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(key, value)| match value {
                QueryValue::Placeholder(column) => Some((key.as_str(), column.as_str())),
                QueryValue::Static(_) => None,
            })
            .collect()
    }

    pub fn has_placeholders(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, v)| matches!(v, QueryValue::Placeholder(_)))
    }

    /// Template sent as-is, placeholders included literally
    fn verbatim(&self) -> ParameterSet {
        let params = self
            .entries
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    QueryValue::Static(v) => render(v),
                    QueryValue::Placeholder(column) => format!("{{{}}}", column),
                };
                (key.clone(), text)
            })
            .collect();

        ParameterSet {
            params,
            bindings: Vec::new(),
        }
    }
}

impl<'de> Deserialize<'de> for QueryTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map = serde_json::Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self {
            entries: map
                .into_iter()
                .map(|(k, v)| (k, QueryValue::parse(v)))
                .collect(),
        })
    }
}

/// One concrete set of query parameters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterSet {
    params: Vec<(String, String)>,
    /// Dependency column values bound into this set
    bindings: Vec<(String, Value)>,
}

impl ParameterSet {
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn bindings(&self) -> &[(String, Value)] {
        &self.bindings
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Expand a template into one parameter set per distinct dependency combination.
///
/// Without placeholders, or without a dependency table, the template itself
/// is the only parameter set. Sets come out in first-seen order of the
/// dependency rows.
pub fn expand(template: &QueryTemplate, dependency: Option<&Table>) -> Result<Vec<ParameterSet>> {
    let placeholders = template.placeholders();

    let dependency = match dependency {
        Some(table) if !placeholders.is_empty() => table,
        _ => return Ok(vec![template.verbatim()]),
    };

    let mut columns: Vec<&str> = Vec::new();
    for (_, column) in &placeholders {
        if !columns.contains(column) {
            columns.push(column);
        }
    }

    for column in &columns {
        let present = dependency.schema.contains(column)
            || dependency.records.iter().any(|r| r.contains_key(*column));
        if !present {
            return Err(IngestError::config(format!(
                "Dependency table {} has no column '{}'",
                dependency.name, column
            )));
        }
    }

    let mut seen = HashSet::new();
    let mut sets = Vec::new();

    for record in &dependency.records {
        let combination: Vec<Value> = columns
            .iter()
            .map(|c| record.get(*c).cloned().unwrap_or(Value::Null))
            .collect();

        if !seen.insert(Value::Array(combination.clone()).to_string()) {
            continue;
        }

        let mut params = Vec::with_capacity(template.entries.len());
        for (key, value) in &template.entries {
            match value {
                QueryValue::Static(v) => params.push((key.clone(), render(v))),
                QueryValue::Placeholder(column) => {
                    let idx = columns.iter().position(|c| c == column).unwrap_or_default();
                    // null binds drop the parameter, same as an unset query arg
                    if !combination[idx].is_null() {
                        params.push((key.clone(), render(&combination[idx])));
                    }
                },
            }
        }

        let bindings = columns
            .iter()
            .zip(combination)
            .map(|(c, v)| (c.to_string(), v))
            .collect();

        sets.push(ParameterSet { params, bindings });
    }

    debug!(
        dependency = %dependency.name,
        rows = dependency.records.len(),
        parameter_sets = sets.len(),
        "Expanded query template"
    );

    Ok(sets)
}

/// Keep at most `limit` parameter sets.
pub fn cap_parameter_sets(mut sets: Vec<ParameterSet>, limit: Option<usize>) -> Vec<ParameterSet> {
    if let Some(limit) = limit {
        if sets.len() > limit {
            warn!(
                expanded = sets.len(),
                limit, "Truncating parameter sets to the configured limit"
            );
            sets.truncate(limit);
        }
    }
    sets
}
