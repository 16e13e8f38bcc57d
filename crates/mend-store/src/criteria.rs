//! Query criteria with dotted-path field access
//!
//! Criteria map a dotted field path to a condition. Unspecified fields
//! match everything; all listed conditions must hold.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

/// A single field condition
#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Value),
    Gte(Value),
    Lte(Value),
    Regex(String),
}

/// Conjunction of field conditions keyed by dotted path
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    conditions: BTreeMap<String, Condition>,
}

impl Criteria {
    pub fn new() -> Self {
        Criteria::default()
    }

    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(path.into(), Condition::Eq(value.into()));
        self
    }

    pub fn gte(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(path.into(), Condition::Gte(value.into()));
        self
    }

    pub fn lte(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(path.into(), Condition::Lte(value.into()));
        self
    }

    pub fn regex(mut self, path: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.conditions
            .insert(path.into(), Condition::Regex(pattern.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&String, &Condition)> {
        self.conditions.iter()
    }

    /// Whether a document satisfies every condition
    pub fn matches(&self, doc: &Value) -> bool {
        self.conditions.iter().all(|(path, condition)| {
            match lookup_path(doc, path) {
                Some(field) => condition_holds(condition, field),
                None => false,
            }
        })
    }
}

/// Resolve a dotted path against a JSON document
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn condition_holds(condition: &Condition, field: &Value) -> bool {
    match condition {
        Condition::Eq(expected) => field == expected,
        Condition::Gte(bound) => compare(field, bound).map_or(false, |o| o >= std::cmp::Ordering::Equal),
        Condition::Lte(bound) => compare(field, bound).map_or(false, |o| o <= std::cmp::Ordering::Equal),
        Condition::Regex(pattern) => match (field.as_str(), Regex::new(pattern)) {
            (Some(text), Ok(re)) => re.is_match(text),
            _ => false,
        },
    }
}

/// Order two scalar JSON values: numbers numerically, strings
/// lexicographically. Mixed or non-scalar operands do not compare.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
