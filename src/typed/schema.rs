//! Declared output types for structured generation.
//!
//! A type is declared as JSON: the strings `"string"`, `"number"` and
//! `"boolean"` name primitives, a one-element array declares an array of that
//! element type, and an object declares required fields.
//!
//! ```text
//! {"name": "string", "age": "number", "tags": ["string"], "address": {"city": "string"}}
//! ```

use serde_json::Value;
use std::fmt;

/// A structural type that generated JSON must satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    /// A JSON string
    String,
    /// Any JSON number
    Number,
    /// `true` or `false`
    Boolean,
    /// An array whose every element has the given type
    Array(Box<TypeDescriptor>),
    /// An object with these required fields, in declaration order
    Object(Vec<(String, TypeDescriptor)>),
}

/// Why a type declaration was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    /// Path of the offending node, `$` for the root
    pub path: String,
    /// What is wrong with it
    pub reason: String,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid type at {}: {}", self.path, self.reason)
    }
}

impl std::error::Error for SchemaError {}

impl TypeDescriptor {
    /// Parses a type declaration.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] naming the first node that is not a valid
    /// declaration.
    pub fn from_json(value: &Value) -> Result<Self, SchemaError> {
        Self::parse_at(value, "$")
    }

    fn parse_at(value: &Value, path: &str) -> Result<Self, SchemaError> {
        let invalid = |reason: String| SchemaError {
            path: path.to_string(),
            reason,
        };

        match value {
            Value::String(name) => match name.as_str() {
                "string" => Ok(Self::String),
                "number" => Ok(Self::Number),
                "boolean" => Ok(Self::Boolean),
                other => Err(invalid(format!("unknown primitive '{}'", other))),
            },
            Value::Array(items) => match items.as_slice() {
                [item] => Ok(Self::Array(Box::new(Self::parse_at(
                    item,
                    &format!("{}[]", path),
                )?))),
                _ => Err(invalid(format!(
                    "array types take exactly one element type, got {}",
                    items.len()
                ))),
            },
            Value::Object(fields) => fields
                .iter()
                .map(|(key, field)| {
                    Self::parse_at(field, &format!("{}.{}", path, key)).map(|t| (key.clone(), t))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Object),
            other => Err(invalid(format!("expected a type, got {}", other))),
        }
    }

    /// Returns true if `value` has this shape.
    ///
    /// Every declared field must be present with a matching value. Fields the
    /// declaration does not mention are allowed.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::String, Value::String(_))
            | (Self::Number, Value::Number(_))
            | (Self::Boolean, Value::Bool(_)) => true,
            (Self::Array(item), Value::Array(values)) => values.iter().all(|v| item.matches(v)),
            (Self::Object(fields), Value::Object(map)) => fields
                .iter()
                .all(|(key, ty)| map.get(key).is_some_and(|v| ty.matches(v))),
            _ => false,
        }
    }

    /// Renders the type in the notation shown to the model.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        match self {
            Self::String => out.push_str("string"),
            Self::Number => out.push_str("number"),
            Self::Boolean => out.push_str("boolean"),
            Self::Array(item) => {
                item.render_into(out, depth);
                out.push_str("[]");
            }
            Self::Object(fields) if fields.is_empty() => out.push_str("{}"),
            Self::Object(fields) => {
                let indent = "  ".repeat(depth + 1);
                out.push_str("{\n");
                for (i, (key, ty)) in fields.iter().enumerate() {
                    out.push_str(&indent);
                    out.push('"');
                    out.push_str(key);
                    out.push_str("\": ");
                    ty.render_into(out, depth + 1);
                    if i + 1 < fields.len() {
                        out.push(',');
                    }
                    out.push('\n');
                }
                out.push_str(&"  ".repeat(depth));
                out.push('}');
            }
        }
    }
}
