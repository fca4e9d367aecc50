//! Context definitions
//!
//! A context is an immutable, typed payload exchanged between applications.
//! On the wire it is a flat JSON object: the `type` member is the routing
//! discriminator and every other member belongs to the payload.
//!
//! ```text
//! { "type": "fdc3.instrument", "id": { "ticker": "AAPL" } }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{BusError, BusResult};

/// Typed payload broadcast between applications
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(rename = "type")]
    context_type: String,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl Context {
    /// Create a context with an empty payload
    pub fn new(context_type: impl Into<String>) -> Self {
        Context {
            context_type: context_type.into(),
            payload: Map::new(),
        }
    }

    /// Add a payload member (builder style)
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if key != "type" {
            self.payload.insert(key, value);
        }
        self
    }

    /// Build a context from a JSON object carrying a `type` member
    pub fn from_value(value: Value) -> BusResult<Self> {
        let context: Context = serde_json::from_value(value)
            .map_err(|e| BusError::InvalidContext(e.to_string()))?;
        context.validate()?;
        Ok(context)
    }

    /// Parse a context from JSON text
    pub fn from_json_str(json: &str) -> BusResult<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| BusError::InvalidContext(e.to_string()))?;
        Self::from_value(value)
    }

    /// Flat JSON form, `type` included
    pub fn to_value(&self) -> Value {
        let mut object = self.payload.clone();
        object.insert("type".into(), Value::String(self.context_type.clone()));
        Value::Object(object)
    }

    /// Check the routing discriminator is usable
    pub fn validate(&self) -> BusResult<()> {
        if self.context_type.is_empty() {
            return Err(BusError::InvalidContext(
                "context type must be a non-empty string".into(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn context_type(&self) -> &str {
        &self.context_type
    }

    #[inline]
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Conventional display name member
    pub fn name(&self) -> Option<&str> {
        self.payload.get("name").and_then(Value::as_str)
    }

    /// Conventional identifier bag (`{"ticker": "AAPL"}` etc.)
    pub fn id(&self) -> Option<&Map<String, Value>> {
        self.payload.get("id").and_then(Value::as_object)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.context_type)?;
        if let Some(name) = self.name() {
            write!(f, " ({})", name)?;
        }
        Ok(())
    }
}

/// Which contexts a listener wants
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum ContextFilter {
    /// Every context type
    #[default]
    Any,
    /// Exactly one context type
    Type(String),
}

impl ContextFilter {
    pub fn of_type(context_type: impl Into<String>) -> Self {
        ContextFilter::Type(context_type.into())
    }

    #[inline]
    pub fn matches(&self, context_type: &str) -> bool {
        match self {
            ContextFilter::Any => true,
            ContextFilter::Type(t) => t == context_type,
        }
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, ContextFilter::Any)
    }
}

/// `None` and the empty string both mean "any type"
impl From<Option<&str>> for ContextFilter {
    fn from(filter: Option<&str>) -> Self {
        match filter {
            Some(t) if !t.is_empty() => ContextFilter::Type(t.to_string()),
            _ => ContextFilter::Any,
        }
    }
}

impl From<&str> for ContextFilter {
    fn from(filter: &str) -> Self {
        ContextFilter::from(Some(filter))
    }
}

impl fmt::Display for ContextFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextFilter::Any => f.write_str("*"),
            ContextFilter::Type(t) => f.write_str(t),
        }
    }
}
