//! `NodeInfo`'s property/port schema ("PropertySchema"/"PortSchema").

use crate::error::{ExecutionError, Result};
use crate::value::Value;

/// `NodeInfo.category`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Input,
    Processing,
    Output,
    Function,
    Other,
}

/// `PropertySchema.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    Select,
    Password,
    Object,
    Array,
}

/// One declared configuration property of a node type. Used by
/// external UI/persistence for rendering; the core only validates that
/// required properties are present at `Init` and that declared defaults
/// validate against their own type (NodeInfo invariants).
#[derive(Debug, Clone)]
pub struct PropertySchema {
    pub name: String,
    pub label: String,
    pub prop_type: PropertyType,
    pub default: Option<Value>,
    pub required: bool,
    pub description: String,
    pub options: Option<Vec<Value>>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PropertySchema {
    fn new(name: impl Into<String>, prop_type: PropertyType) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            prop_type,
            default: None,
            required: false,
            description: String::new(),
            options: None,
            min: None,
            max: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Boolean)
    }

    pub fn select(name: impl Into<String>, options: Vec<Value>) -> Self {
        let mut s = Self::new(name, PropertyType::Select);
        s.options = Some(options);
        s
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Object)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// A declared default must validate against the property's own type.
    pub fn validate_default(&self) -> Result<()> {
        let Some(default) = &self.default else {
            return Ok(());
        };
        let ok = match (self.prop_type, default) {
            (PropertyType::String | PropertyType::Password, Value::Str(_)) => true,
            (PropertyType::Number, v) => v.as_f64().is_some(),
            (PropertyType::Boolean, Value::Bool(_)) => true,
            (PropertyType::Select, v) => self
                .options
                .as_ref()
                .map(|opts| opts.contains(v))
                .unwrap_or(true),
            (PropertyType::Object, Value::Object(_)) => true,
            (PropertyType::Array, Value::Array(_)) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(ExecutionError::ConfigInvalid(format!(
                "default for property '{}' does not match declared type",
                self.name
            )))
        }
    }
}

/// One declared input or output port of a node type.
#[derive(Debug, Clone)]
pub struct PortSchema {
    pub name: String,
    pub label: String,
    pub port_type: String,
    pub description: String,
}

impl PortSchema {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            port_type: "any".to_string(),
            description: String::new(),
        }
    }
}
