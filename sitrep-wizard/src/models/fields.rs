//! Field values edited in the wizard
//!
//! Every inspection field is an optional scalar: free text or a yes/no flag.
//! Numbers typed by the inspector (heights, readings, losses) stay text until
//! something like the ERP calculator parses them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
}

impl FieldValue {
    /// True when the value reflects real input: non-blank text or a set flag
    pub fn is_meaningful(&self) -> bool {
        match self {
            FieldValue::Flag(b) => *b,
            FieldValue::Text(s) => !s.trim().is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Flag(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(b) => Some(*b),
            FieldValue::Text(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Flag(b) => Value::Bool(*b),
            FieldValue::Text(s) => Value::String(s.clone()),
        }
    }

    /// Convert a value read from an inspection record
    ///
    /// Numbers become their text form; null, arrays and objects are not field values.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(FieldValue::Flag(*b)),
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Number(n) => Some(FieldValue::Text(n.to_string())),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Flag(b)
    }
}

/// Named field values, ordered by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldValues(BTreeMap<String, FieldValue>);

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    /// Text value of a field, if it holds text
    pub fn text(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(FieldValue::as_text)
    }

    /// Trimmed, non-blank text value
    pub fn non_blank(&self, name: &str) -> Option<&str> {
        self.text(name).map(str::trim).filter(|s| !s.is_empty())
    }

    /// Flag value of a field; absent or text reads as false
    pub fn flag(&self, name: &str) -> bool {
        self.0.get(name).and_then(FieldValue::as_flag).unwrap_or(false)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// True when the field holds a meaningful value
    pub fn has_value(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(FieldValue::is_meaningful)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Copy every value of `other` into self; `other` wins on conflicts
    pub fn merge_from(&mut self, other: &FieldValues) {
        for (name, value) in other.iter() {
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// Values whose names satisfy `keep`
    pub fn filtered(&self, mut keep: impl FnMut(&str) -> bool) -> FieldValues {
        FieldValues(
            self.0
                .iter()
                .filter(|(name, _)| keep(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        )
    }

    /// Field values of a JSON object (an inspection record or a cached entity)
    pub fn from_json_object(object: &serde_json::Map<String, Value>) -> Self {
        FieldValues(
            object
                .iter()
                .filter_map(|(name, value)| {
                    FieldValue::from_json(value).map(|v| (name.clone(), v))
                })
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for FieldValues {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        FieldValues(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
