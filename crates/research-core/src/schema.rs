//! Typed argument schemas for actions.
//!
//! A schema is an ordered list of named parameters. Validation happens before
//! dispatch and produces an [`ActionArgs`] with every default filled in, so
//! handlers never have to second-guess their input.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ActionError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type", content = "values")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Enum(Vec<String>),
}

impl ParamType {
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ParamType::Enum(values.into_iter().map(Into::into).collect())
    }

    fn label(&self) -> String {
        match self {
            ParamType::String => "string".into(),
            ParamType::Integer => "integer".into(),
            ParamType::Number => "number".into(),
            ParamType::Boolean => "boolean".into(),
            ParamType::Enum(values) => format!("one of [{}]", values.join(", ")),
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Enum(values) => value
                .as_str()
                .map(|s| values.iter().any(|v| v == s))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArgumentSchema {
    params: Vec<ParamSpec>,
}

impl ArgumentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(
        mut self,
        name: impl Into<String>,
        kind: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
            default: None,
        });
        self
    }

    pub fn optional(
        mut self,
        name: impl Into<String>,
        kind: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
            default: None,
        });
        self
    }

    /// Optional parameter that takes `default` when absent or null.
    pub fn with_default(
        mut self,
        name: impl Into<String>,
        kind: ParamType,
        description: impl Into<String>,
        default: Value,
    ) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
            default: Some(default),
        });
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn validate(&self, action: &str, args: &Value) -> Result<ActionArgs, ActionError> {
        let empty = Map::new();
        let given = match args {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(ActionError::validation(
                    action,
                    format!("arguments must be an object, got {}", json_kind(other)),
                ))
            }
        };

        if let Some(unknown) = given.keys().find(|k| self.param(k).is_none()) {
            return Err(ActionError::validation(
                action,
                format!("unknown parameter '{unknown}'"),
            ));
        }

        let mut values = Map::new();
        for spec in &self.params {
            match given.get(&spec.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    if !spec.kind.accepts(value) {
                        return Err(ActionError::validation(
                            action,
                            format!(
                                "parameter '{}' must be {}, got {}",
                                spec.name,
                                spec.kind.label(),
                                json_kind(value)
                            ),
                        ));
                    }
                    values.insert(spec.name.clone(), value.clone());
                }
                None if spec.required => {
                    return Err(ActionError::validation(
                        action,
                        format!("missing required parameter '{}'", spec.name),
                    ));
                }
                None => {
                    if let Some(default) = &spec.default {
                        values.insert(spec.name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(ActionArgs { values })
    }

    /// JSON Schema object suitable for function-calling model APIs.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for spec in &self.params {
            let mut prop = match &spec.kind {
                ParamType::Enum(values) => json!({"type": "string", "enum": values}),
                other => json!({"type": other.label()}),
            };
            if let Value::Object(map) = &mut prop {
                if !spec.description.is_empty() {
                    map.insert("description".into(), Value::String(spec.description.clone()));
                }
                if let Some(default) = &spec.default {
                    map.insert("default".into(), default.clone());
                }
            }
            properties.insert(spec.name.clone(), prop);
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
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
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

/// Arguments that passed schema validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionArgs {
    values: Map<String, Value>,
}

impl ActionArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn u64(&self, name: &str) -> Option<u64> {
        self.values.get(name).and_then(Value::as_u64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    /// Required string that validation has already guaranteed.
    pub fn require_str(&self, action: &str, name: &str) -> Result<&str, ActionError> {
        self.str(name).ok_or_else(|| {
            ActionError::validation(action, format!("missing required parameter '{name}'"))
        })
    }

    /// Deserializes the validated arguments into a typed struct.
    pub fn parse<T: DeserializeOwned>(&self, action: &str) -> Result<T, ActionError> {
        serde_json::from_value(Value::Object(self.values.clone()))
            .map_err(|e| ActionError::validation(action, e.to_string()))
    }
}
