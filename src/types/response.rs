//! Response envelope types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// Source location of an error in the query document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// A single GraphQL error entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GqlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<Location>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// `extensions.code`, when the server supplied a string code.
    pub fn code(&self) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(Value::as_str)
    }

    fn path_string(&self) -> Option<String> {
        let path = self.path.as_ref().filter(|p| !p.is_empty())?;
        let parts: Vec<String> = path
            .iter()
            .map(|seg| match seg {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        Some(parts.join("."))
    }
}

impl std::fmt::Display for GqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.path_string() {
            Some(path) => write!(f, "{} {}", path, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Ordered list of GraphQL errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GqlErrors(pub Vec<GqlError>);

impl GqlErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GqlError> {
        self.0.iter()
    }

    pub fn push(&mut self, err: GqlError) {
        self.0.push(err);
    }

    /// True when any entry carries `extensions.code == code`.
    pub fn has_code(&self, code: &str) -> bool {
        self.0.iter().any(|e| e.code() == Some(code))
    }
}

impl std::fmt::Display for GqlErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl From<Vec<GqlError>> for GqlErrors {
    fn from(v: Vec<GqlError>) -> Self {
        Self(v)
    }
}

impl<'a> IntoIterator for &'a GqlErrors {
    type Item = &'a GqlError;
    type IntoIter = std::slice::Iter<'a, GqlError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// One envelope of a response stream.
///
/// Data may be absent (pure error response) and errors may coexist with
/// partial data. `data` stays an untyped JSON value until the caller decodes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "GqlErrors::is_empty")]
    pub errors: GqlErrors,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl OperationResponse {
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn from_errors(errors: impl Into<GqlErrors>) -> Self {
        Self {
            errors: errors.into(),
            ..Self::default()
        }
    }

    /// Read an envelope out of a JSON value. A value that is not an envelope is
    /// folded into a single error entry instead of failing the stream.
    pub fn from_value_lossy(value: Value) -> Self {
        serde_json::from_value(value)
            .unwrap_or_else(|e| Self::from_errors(vec![GqlError::new(e.to_string())]))
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Decode `data` into the caller's type. `Ok(None)` when no data was sent.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.data {
            None | Some(Value::Null) => Ok(None),
            Some(v) => Ok(Some(T::deserialize(v)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Room {
        name: String,
    }

    #[test]
    fn decodes_data_lazily() {
        let res: OperationResponse =
            serde_json::from_value(json!({"data": {"room": {"name": "test"}}})).unwrap();
        let room: Option<Room> = res
            .decode_data::<Value>()
            .unwrap()
            .map(|v| serde_json::from_value(v["room"].clone()).unwrap());
        assert_eq!(room.unwrap().name, "test");
        assert!(!res.has_errors());
    }

    #[test]
    fn error_only_envelope_has_no_data() {
        let res: OperationResponse =
            serde_json::from_value(json!({"errors": [{"message": "invalid room"}], "data": null}))
                .unwrap();
        assert!(res.decode_data::<Value>().unwrap().is_none());
        assert_eq!(res.errors.to_string(), "invalid room");
    }

    #[test]
    fn errors_coexist_with_partial_data() {
        let res: OperationResponse = serde_json::from_value(json!({
            "data": {"a": 1},
            "errors": [{"message": "b failed", "path": ["b", 0]}]
        }))
        .unwrap();
        assert!(res.has_errors());
        assert_eq!(res.errors.0[0].to_string(), "b.0 b failed");
        assert_eq!(res.decode_data::<Value>().unwrap(), Some(json!({"a": 1})));
    }

    #[test]
    fn error_code_lookup() {
        let errs = GqlErrors(vec![
            GqlError::new("first"),
            GqlError::new("PersistedQueryNotFound")
                .with_extension("code", json!("PERSISTED_QUERY_NOT_FOUND")),
        ]);
        assert!(errs.has_code("PERSISTED_QUERY_NOT_FOUND"));
        assert!(!errs.has_code("OTHER"));
        assert_eq!(errs.to_string(), "first; PersistedQueryNotFound");
    }

    #[test]
    fn lossy_parse_folds_failure_into_errors() {
        let res = OperationResponse::from_value_lossy(json!({"data": 1, "errors": "nope"}));
        assert!(res.data.is_none());
        assert_eq!(res.errors.len(), 1);

        let ok = OperationResponse::from_value_lossy(json!({"data": {"a": 1}}));
        assert_eq!(ok.data, Some(json!({"a": 1})));
        assert!(!ok.has_errors());
    }
}
