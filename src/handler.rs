//! Type handler extension point.
//!
//! A [`TypeHandler`] converts between a domain-side value and the column
//! value the database stores, in both directions: `encode` runs when a
//! parameter spec names the handler, `decode` runs when a field binding
//! does. Handlers are registered by name at startup and resolved by the
//! dispatcher; an unregistered name referenced by a statement is a
//! configuration error surfaced on first use.

use crate::error::{MapResult, MapperError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub trait TypeHandler: Send + Sync {
    /// Convert a bound argument into the value sent to the database.
    fn encode(&self, value: &Value) -> MapResult<Value>;

    /// Convert a column value into the value handed to the object layer.
    fn decode(&self, value: &Value) -> MapResult<Value>;
}

/// Named handler lookup, populated at startup and read-only afterwards.
#[derive(Default, Clone)]
pub struct TypeHandlerRegistry {
    handlers: HashMap<String, Arc<dyn TypeHandler>>,
}

impl TypeHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn TypeHandler>,
    ) -> MapResult<()> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(MapperError::config(format!(
                "type handler '{}' is already registered",
                name
            )));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> MapResult<Arc<dyn TypeHandler>> {
        self.handlers.get(name).cloned().ok_or_else(|| {
            MapperError::config(format!("type handler '{}' is not registered", name))
        })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for TypeHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeHandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Stores any value as its JSON text form and parses it back out.
///
/// Useful for columns that persist structured data in a TEXT column.
pub struct JsonTextHandler;

impl TypeHandler for JsonTextHandler {
    fn encode(&self, value: &Value) -> MapResult<Value> {
        let json = serde_json::to_string(value)
            .map_err(|e| MapperError::internal(format!("JSON encode failed: {}", e)))?;
        Ok(Value::Text(json))
    }

    fn decode(&self, value: &Value) -> MapResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Text(s) => serde_json::from_str(s)
                .map_err(|e| MapperError::internal(format!("JSON decode failed: {}", e))),
            other => Ok(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl TypeHandler for Upper {
        fn encode(&self, value: &Value) -> MapResult<Value> {
            match value {
                Value::Text(s) => Ok(Value::Text(s.to_uppercase())),
                other => Ok(other.clone()),
            }
        }

        fn decode(&self, value: &Value) -> MapResult<Value> {
            match value {
                Value::Text(s) => Ok(Value::Text(s.to_lowercase())),
                other => Ok(other.clone()),
            }
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = TypeHandlerRegistry::new();
        registry.register("upper", Arc::new(Upper)).unwrap();
        let handler = registry.resolve("upper").unwrap();
        assert_eq!(
            handler.encode(&Value::Text("abc".to_string())).unwrap(),
            Value::Text("ABC".to_string())
        );
    }

    #[test]
    fn test_duplicate_name_fails() {
        let mut registry = TypeHandlerRegistry::new();
        registry.register("upper", Arc::new(Upper)).unwrap();
        assert!(registry.register("upper", Arc::new(Upper)).is_err());
    }

    #[test]
    fn test_unknown_name_fails() {
        let registry = TypeHandlerRegistry::new();
        assert!(matches!(
            registry.resolve("missing"),
            Err(MapperError::Config { .. })
        ));
    }

    #[test]
    fn test_json_text_round_trip() {
        let handler = JsonTextHandler;
        let encoded = handler.encode(&Value::Int(42)).unwrap();
        assert_eq!(encoded, Value::Text("42".to_string()));
        assert_eq!(handler.decode(&encoded).unwrap(), Value::Int(42));
    }
}
