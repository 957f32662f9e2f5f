//! Schema - Define type schemas for resources
//!
//! Every resource and data source declares a schema. The host uses it to drive
//! diffing; the provider uses it to reject malformed configuration before any
//! network call is made.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::resource::{Attributes, Value};

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// List
    List(Box<AttributeType>),
    /// Map
    Map(Box<AttributeType>),
    /// Nested block, stored as a list of attribute maps
    Block {
        attributes: HashMap<String, AttributeSchema>,
        max_items: Option<usize>,
    },
}

impl AttributeType {
    /// Nested block type from a list of attribute schemas
    pub fn block(attributes: Vec<AttributeSchema>, max_items: Option<usize>) -> Self {
        AttributeType::Block {
            attributes: attributes
                .into_iter()
                .map(|a| (a.name.clone(), a))
                .collect(),
            max_items,
        }
    }

    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { validate, base, .. }, v) => {
                base.validate(v)?;
                validate(v).map_err(|msg| TypeError::ValidationFailed { message: msg })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (
                AttributeType::Block {
                    attributes,
                    max_items,
                },
                Value::List(items),
            ) => {
                if let Some(max) = max_items
                    && items.len() > *max
                {
                    return Err(TypeError::TooManyItems {
                        max: *max,
                        got: items.len(),
                    });
                }
                for (index, item) in items.iter().enumerate() {
                    let Value::Map(item) = item else {
                        return Err(TypeError::TypeMismatch {
                            expected: "Block".to_string(),
                            got: item.type_name().to_string(),
                        });
                    };
                    let mut errors = Vec::new();
                    validate_attributes(attributes, item, &mut errors);
                    if !errors.is_empty() {
                        return Err(TypeError::BlockItemErrors { index, errors });
                    }
                }
                Ok(())
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name().to_string(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Block { max_items, .. } => match max_items {
                Some(max) => format!("Block[max {}]", max),
                None => "Block".to_string(),
            },
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    #[error("Attribute '{name}' is computed and cannot be set")]
    ComputedOnly { name: String },

    #[error("Attributes '{name}' and '{other}' cannot be set together")]
    ConflictingAttributes { name: String, other: String },

    #[error("Attribute '{name}': {inner}")]
    AttributeError { name: String, inner: Box<TypeError> },

    #[error("Block allows at most {max} item(s), got {got}")]
    TooManyItems { max: usize, got: usize },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },

    #[error("Block item {index}: {}", errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    BlockItemErrors { index: usize, errors: Vec<TypeError> },
}

/// Who supplies the value of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Must be set in configuration
    Required,
    /// May be set in configuration
    Optional,
    /// Set by the server only
    Computed,
    /// May be set in configuration, otherwise filled in by the server
    OptionalComputed,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Required => "required",
            Mode::Optional => "optional",
            Mode::Computed => "computed",
            Mode::OptionalComputed => "optional+computed",
        };
        write!(f, "{}", s)
    }
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub mode: Mode,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// Value must never be logged or printed
    pub sensitive: bool,
    /// Changing the value requires replacing the resource
    pub force_new: bool,
    pub conflicts_with: Vec<String>,
    /// Treats semantically equal values as unchanged (e.g. reformatted JSON)
    pub equivalent: Option<fn(&Value, &Value) -> bool>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            mode: Mode::Optional,
            default: None,
            description: None,
            sensitive: false,
            force_new: false,
            conflicts_with: Vec::new(),
            equivalent: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.mode = Mode::Required;
        self
    }

    pub fn computed(mut self) -> Self {
        self.mode = Mode::Computed;
        self
    }

    pub fn optional_computed(mut self) -> Self {
        self.mode = Mode::OptionalComputed;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn conflicts_with(mut self, other: impl Into<String>) -> Self {
        self.conflicts_with.push(other.into());
        self
    }

    pub fn with_equivalence(mut self, equivalent: fn(&Value, &Value) -> bool) -> Self {
        self.equivalent = Some(equivalent);
        self
    }

    /// Whether two values of this attribute count as the same
    ///
    /// Blocks compare item by item on their configurable fields, so values
    /// the server fills in (a host's FQDN) never read as a change.
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        if a == b || self.equivalent.is_some_and(|eq| eq(a, b)) {
            return true;
        }
        match (&self.attr_type, a, b) {
            (AttributeType::Block { attributes, .. }, Value::List(a), Value::List(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|pair| match pair {
                        (Value::Map(a), Value::Map(b)) => configured_fields_equal(attributes, a, b),
                        _ => false,
                    })
            }
            _ => false,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn is_configurable(&self) -> bool {
        self.mode != Mode::Computed
    }
}

/// Configured values of `desired` match `current`; server-filled fields,
/// declared defaults and empty values are not compared
fn configured_fields_equal(
    schemas: &HashMap<String, AttributeSchema>,
    desired: &Attributes,
    current: &Attributes,
) -> bool {
    desired.keys().chain(current.keys()).all(|key| {
        let Some(schema) = schemas.get(key) else {
            return true;
        };
        if !schema.is_configurable() {
            return true;
        }
        match (desired.get(key), current.get(key)) {
            (Some(d), Some(c)) => schema.values_equal(d, c),
            (None, Some(_)) if schema.mode == Mode::OptionalComputed => true,
            (None, Some(c)) if schema.default.as_ref() == Some(c) => true,
            (None, Some(v)) | (Some(v), None) => v.is_blank(),
            (None, None) => true,
        }
    })
}

fn validate_attributes(
    schemas: &HashMap<String, AttributeSchema>,
    attributes: &Attributes,
    errors: &mut Vec<TypeError>,
) {
    for (name, schema) in schemas {
        if schema.mode == Mode::Required
            && !attributes.contains_key(name)
            && schema.default.is_none()
        {
            errors.push(TypeError::MissingRequired { name: name.clone() });
        }
    }

    let mut conflicts = BTreeSet::new();
    for (name, value) in attributes {
        let Some(schema) = schemas.get(name) else {
            errors.push(TypeError::UnknownAttribute { name: name.clone() });
            continue;
        };
        if schema.mode == Mode::Computed {
            errors.push(TypeError::ComputedOnly { name: name.clone() });
            continue;
        }
        if let Err(e) = schema.attr_type.validate(value) {
            errors.push(TypeError::AttributeError {
                name: name.clone(),
                inner: Box::new(e),
            });
        }
        for other in &schema.conflicts_with {
            if attributes.contains_key(other) {
                let pair = if name < other {
                    (name.clone(), other.clone())
                } else {
                    (other.clone(), name.clone())
                };
                conflicts.insert(pair);
            }
        }
    }

    errors.extend(
        conflicts
            .into_iter()
            .map(|(name, other)| TypeError::ConflictingAttributes { name, other }),
    );
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Validate configuration attributes, reporting every problem at once
    pub fn validate(&self, attributes: &Attributes) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();
        validate_attributes(&self.attributes, attributes, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Fill in declared defaults for attributes absent from configuration
    pub fn apply_defaults(&self, attributes: &mut Attributes) {
        for (name, schema) in &self.attributes {
            if let Some(default) = &schema.default
                && !attributes.contains_key(name)
            {
                attributes.insert(name.clone(), default.clone());
            }
        }
    }

    pub fn is_configurable(&self, name: &str) -> bool {
        self.attributes
            .get(name)
            .is_some_and(AttributeSchema::is_configurable)
    }

    pub fn is_force_new(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.force_new)
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.sensitive)
    }

    /// Attributes whose change replaces the resource, sorted
    pub fn force_new_attributes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .attributes
            .values()
            .filter(|a| a.force_new)
            .map(|a| a.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Attribute names sorted for stable output
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.attributes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value {
                Value::Int(n) if *n > 0 => Ok(()),
                Value::Int(_) => Err("Value must be positive".to_string()),
                _ => Err("Expected integer".to_string()),
            },
        }
    }

    /// Integer that may be zero but not negative (sizes, limits)
    pub fn non_negative_int() -> AttributeType {
        AttributeType::Custom {
            name: "NonNegativeInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value {
                Value::Int(n) if *n >= 0 => Ok(()),
                Value::Int(_) => Err("Value must not be negative".to_string()),
                _ => Err("Expected integer".to_string()),
            },
        }
    }

    /// String holding a JSON document (policies)
    pub fn json_string() -> AttributeType {
        AttributeType::Custom {
            name: "Json".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value {
                Value::String(s) => serde_json::from_str::<serde_json::Value>(s)
                    .map(|_| ())
                    .map_err(|e| format!("Invalid JSON: {}", e)),
                _ => Err("Expected string".to_string()),
            },
        }
    }

    /// Two JSON documents are equivalent when they parse to the same value
    pub fn json_equivalent(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::String(a), Value::String(b)) => {
                match (
                    serde_json::from_str::<serde_json::Value>(a),
                    serde_json::from_str::<serde_json::Value>(b),
                ) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Map of string labels
    pub fn string_map() -> AttributeType {
        AttributeType::Map(Box::new(AttributeType::String))
    }

    pub fn string_list() -> AttributeType {
        AttributeType::List(Box::new(AttributeType::String))
    }
}
