//! Runtime configuration options

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SensorError};

/// A typed option value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl OptionValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "bool",
            OptionValue::Int(_) => "int",
            OptionValue::Double(_) => "double",
            OptionValue::String(_) => "string",
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            OptionValue::Double(v) => Ok(*v),
            _ => Err(SensorError::UnsupportedOption("Unexpected type".to_string())),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            OptionValue::String(v) => Ok(v),
            _ => Err(SensorError::UnsupportedOption("Unexpected type".to_string())),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(v) => write!(f, "{}", v),
            OptionValue::Int(v) => write!(f, "{}", v),
            OptionValue::Double(v) => write!(f, "{}", v),
            OptionValue::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Double(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::String(v.to_string())
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

/// Option map that keeps insertion order
///
/// Setting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorOptions {
    entries: Vec<(String, OptionValue)>,
}

impl SensorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<OptionValue>> FromIterator<(K, V)> for SensorOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = SensorOptions::new();
        for (k, v) in iter {
            options.set(k, v);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_preserved() {
        let opts = SensorOptions::new()
            .with("sample[blue]", 0.3)
            .with("sample[red]", 0.1)
            .with("sample[green]", 0.2);
        let keys: Vec<&str> = opts.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["sample[blue]", "sample[red]", "sample[green]"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut opts = SensorOptions::new().with("a", 1.0).with("b", 2.0);
        opts.set("a", 5.0);
        assert_eq!(opts.len(), 2);
        assert_eq!(opts.iter().next(), Some(("a", &OptionValue::Double(5.0))));
    }

    #[test]
    fn test_typed_access() {
        assert_eq!(OptionValue::Double(0.5).as_f64().unwrap(), 0.5);
        let err = OptionValue::String("x".into()).as_f64().unwrap_err();
        assert_eq!(err, SensorError::UnsupportedOption("Unexpected type".into()));
        assert_eq!(OptionValue::from("abc").as_str().unwrap(), "abc");
    }

    #[test]
    fn test_untagged_values_from_toml_like_json() {
        let v: OptionValue = serde_json::from_str("0.25").unwrap();
        assert_eq!(v, OptionValue::Double(0.25));
        let v: OptionValue = serde_json::from_str("\"0123\"").unwrap();
        assert_eq!(v, OptionValue::String("0123".into()));
        let v: OptionValue = serde_json::from_str("3").unwrap();
        assert_eq!(v, OptionValue::Int(3));
    }
}
