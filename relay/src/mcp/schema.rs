//! Parameter schemas for capabilities and the validation that runs before dispatch.
//!
//! A schema is a flat list of named parameters with a primitive type and a
//! required flag. Validation is pure: the same payload and schema always give
//! the same verdict, and every offending field is reported, not just the first.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Primitive parameter types understood by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }

    /// Check whether a JSON value is compatible with this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

/// JSON type name of a value, for error messages
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Input schema of a capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    params: Vec<ParamSpec>,
    #[serde(default)]
    allow_additional: bool,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter. A later spec with the same name replaces the earlier one.
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.retain(|p| p.name != spec.name);
        self.params.push(spec);
        self
    }

    /// Accept keys that are not declared instead of rejecting them
    pub fn allow_additional(mut self) -> Self {
        self.allow_additional = true;
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Render as JSON Schema for tool-discovery clients
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            let mut prop = json!({ "type": p.ty.as_str() });
            if let Some(desc) = &p.description {
                prop["description"] = Value::String(desc.clone());
            }
            properties.insert(p.name.clone(), prop);
        }

        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.allow_additional,
        })
    }

    pub fn validate(&self, payload: &Value) -> Result<ValidatedParams, ValidationError> {
        validate(self, payload)
    }
}

/// One offending field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

/// Schema mismatch, enumerating every offending field
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{}", render_fields(.fields))]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

fn render_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn single(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            fields: vec![FieldError {
                field: field.into(),
                reason: reason.into(),
            }],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }
}

/// Validate a raw parameter payload against a schema.
///
/// `null` is treated as an empty object so that calls without `arguments`
/// still reach schemas with no required parameters.
pub fn validate(schema: &InputSchema, payload: &Value) -> Result<ValidatedParams, ValidationError> {
    let empty = Map::new();
    let obj = match payload {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(ValidationError::single(
                "$",
                format!("expected object, got {}", json_type_name(other)),
            ))
        }
    };

    let mut fields = Vec::new();

    for spec in &schema.params {
        match obj.get(&spec.name) {
            None | Some(Value::Null) if spec.required => fields.push(FieldError {
                field: spec.name.clone(),
                reason: "missing".to_string(),
            }),
            None | Some(Value::Null) => {}
            Some(value) if !spec.ty.accepts(value) => fields.push(FieldError {
                field: spec.name.clone(),
                reason: format!(
                    "expected {}, got {}",
                    spec.ty.as_str(),
                    json_type_name(value)
                ),
            }),
            Some(_) => {}
        }
    }

    if !schema.allow_additional {
        // Map iteration is key-ordered, so the report order is stable
        for key in obj.keys() {
            if schema.get(key).is_none() {
                fields.push(FieldError {
                    field: key.clone(),
                    reason: "unknown parameter".to_string(),
                });
            }
        }
    }

    if fields.is_empty() {
        Ok(ValidatedParams {
            values: obj.clone(),
        })
    } else {
        Err(ValidationError { fields })
    }
}

/// Parameters that passed validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedParams {
    values: Map<String, Value>,
}

impl ValidatedParams {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|v| v.as_str())
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(|v| v.as_f64())
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(|v| v.as_i64())
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(|v| v.as_bool())
    }

    /// Deserialize into a typed parameter record
    pub fn parse<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.values.clone()))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}

impl From<Map<String, Value>> for ValidatedParams {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_schema() -> InputSchema {
        InputSchema::new()
            .param(ParamSpec::required("message", ParamType::String))
            .param(ParamSpec::optional("repeat", ParamType::Integer))
    }

    #[test]
    fn test_valid_payload() {
        let params = echo_schema()
            .validate(&json!({"message": "hi", "repeat": 2}))
            .unwrap();
        assert_eq!(params.str("message"), Some("hi"));
        assert_eq!(params.i64("repeat"), Some(2));
    }

    #[test]
    fn test_missing_required() {
        let err = echo_schema().validate(&json!({})).unwrap_err();
        assert_eq!(err.fields.len(), 1);
        assert_eq!(err.fields[0].field, "message");
        assert_eq!(err.fields[0].reason, "missing");
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = echo_schema()
            .validate(&json!({"message": null}))
            .unwrap_err();
        assert!(err.has_field("message"));
    }

    #[test]
    fn test_wrong_type_reports_every_field() {
        let err = echo_schema()
            .validate(&json!({"message": 42, "repeat": "twice"}))
            .unwrap_err();
        assert_eq!(err.fields.len(), 2);
        assert_eq!(err.fields[0].reason, "expected string, got integer");
        assert_eq!(err.fields[1].reason, "expected integer, got string");
        assert_eq!(
            err.to_string(),
            "message: expected string, got integer; repeat: expected integer, got string"
        );
    }

    #[test]
    fn test_non_object_rejected() {
        let err = echo_schema().validate(&json!(["hi"])).unwrap_err();
        assert_eq!(err.fields[0].field, "$");
        assert_eq!(err.fields[0].reason, "expected object, got array");
    }

    #[test]
    fn test_null_payload_is_empty_object() {
        let schema = InputSchema::new().param(ParamSpec::optional("limit", ParamType::Integer));
        assert!(schema.validate(&Value::Null).is_ok());
        assert!(echo_schema().validate(&Value::Null).is_err());
    }

    #[test]
    fn test_unknown_parameter() {
        let err = echo_schema()
            .validate(&json!({"message": "hi", "extra": true}))
            .unwrap_err();
        assert_eq!(err.fields[0].field, "extra");
        assert_eq!(err.fields[0].reason, "unknown parameter");

        let open = echo_schema().allow_additional();
        assert!(open.validate(&json!({"message": "hi", "extra": true})).is_ok());
    }

    #[test]
    fn test_integer_vs_number() {
        assert!(ParamType::Number.accepts(&json!(1.5)));
        assert!(ParamType::Number.accepts(&json!(3)));
        assert!(!ParamType::Integer.accepts(&json!(1.5)));
    }

    #[test]
    fn test_parse_typed_record() {
        #[derive(Deserialize)]
        struct Echo {
            message: String,
        }
        let params = echo_schema().validate(&json!({"message": "typed"})).unwrap();
        let echo: Echo = params.parse().unwrap();
        assert_eq!(echo.message, "typed");
    }

    #[test]
    fn test_json_schema_rendering() {
        let schema = InputSchema::new()
            .param(ParamSpec::required("message", ParamType::String).describe("Text to echo"));
        let rendered = schema.to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["properties"]["message"]["type"], "string");
        assert_eq!(rendered["properties"]["message"]["description"], "Text to echo");
        assert_eq!(rendered["required"], json!(["message"]));
        assert_eq!(rendered["additionalProperties"], false);
    }
}
