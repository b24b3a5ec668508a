//! Schemaless JSON `data` carried by ledgers, accounts and transactions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorKind, LedgerError, LedgerResult};

/// A JSON object. Anything else is rejected at the boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataMap(Map<String, Value>);

impl DataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the wire form. An empty string is an empty object.
    pub fn parse(raw: &str) -> LedgerResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        let value: Value = serde_json::from_str(raw).map_err(|e| {
            LedgerError::new(ErrorKind::BadDataSupplied)
                .extend("data is not valid JSON")
                .with_source(e)
        })?;
        Self::try_from(value)
    }

    /// Look up a dotted path such as `customer.address.city`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Set a dotted path, creating intermediate objects. Non-object values on
    /// the way are replaced.
    pub fn set(&mut self, path: &str, value: Value) {
        let parts: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = parts.split_last() else {
            return;
        };

        let mut current = &mut self.0;
        for part in parents {
            let slot = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(map) = slot else {
                return;
            };
            current = map;
        }
        current.insert(last.to_string(), value);
    }

    /// The patch with blank values removed, ready for a `jsonb ||` update.
    pub fn without_blanks(&self) -> DataMap {
        DataMap(
            self.0
                .iter()
                .filter(|(_, v)| !is_blank(v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

impl TryFrom<Value> for DataMap {
    type Error = LedgerError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(LedgerError::new(ErrorKind::BadDataSupplied)
                .extend(format!("data must be a JSON object, got {}", kind_of(&other)))),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl std::fmt::Display for DataMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(DataMap::parse("").unwrap().is_empty());
        assert!(DataMap::parse("[1,2]")
            .unwrap_err()
            .is(ErrorKind::BadDataSupplied));
        assert!(DataMap::parse("{oops").is_err());
    }

    #[test]
    fn test_get_and_set_paths() {
        let mut data = DataMap::parse(r#"{"customer":{"id":"C1"}}"#).unwrap();
        assert_eq!(data.get("customer.id"), Some(&json!("C1")));
        assert_eq!(data.get("customer.name"), None);

        data.set("customer.address.city", json!("Lagos"));
        data.set("status", json!("active"));
        assert_eq!(data.get("customer.address.city"), Some(&json!("Lagos")));
        assert_eq!(data.get("customer.id"), Some(&json!("C1")));

        data.set("status.code", json!(1));
        assert_eq!(data.get("status.code"), Some(&json!(1)));
    }

    #[test]
    fn test_without_blanks() {
        let patch = DataMap::parse(r#"{"a":"","b":0,"c":null}"#).unwrap();
        assert_eq!(patch.without_blanks().to_value(), json!({"b":0}));
    }
}
