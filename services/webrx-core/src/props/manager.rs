//! Keyed property store and bounded views over it

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Property, Subscription, Value};
use crate::error::{Error, Result};

/// Mapping from configuration key to observable property.
///
/// Cloning is cheap and yields a handle to the same store. `collect` yields a
/// separate store that shares the named properties with its parent.
#[derive(Clone, Default)]
pub struct PropertyManager {
    properties: Arc<RwLock<HashMap<String, Arc<Property>>>>,
}

impl PropertyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Property for `name`, created unset on first access
    pub fn get_property(&self, name: &str) -> Arc<Property> {
        if let Some(property) = self.properties.read().get(name) {
            return property.clone();
        }
        self.properties
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Property::new(name))
            .clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.read().contains_key(name)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.properties.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.properties.read().get(name).and_then(|p| p.get())
    }

    /// Write a value; fires the key's callbacks if it changed
    pub fn set(&self, name: &str, value: impl Into<Value>) -> bool {
        self.get_property(name).set(value.into())
    }

    /// View restricted to `keys`, sharing the underlying properties
    pub fn collect(&self, keys: &[&str]) -> PropertyManager {
        let view: HashMap<String, Arc<Property>> = keys
            .iter()
            .map(|key| (key.to_string(), self.get_property(key)))
            .collect();
        PropertyManager {
            properties: Arc::new(RwLock::new(view)),
        }
    }

    /// Subscribe one callback to every property currently in this store
    pub fn wire<F>(&self, callback: F) -> Vec<Subscription>
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        self.properties
            .read()
            .values()
            .map(|property| {
                let cb = callback.clone();
                let name = property.name().to_string();
                property.wire(move |value| cb(&name, value))
            })
            .collect()
    }

    fn require(&self, name: &str) -> Result<Value> {
        self.get(name)
            .ok_or_else(|| Error::MissingProperty(name.to_string()))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        self.require(name)?.as_i64().ok_or_else(|| Error::PropertyType {
            name: name.to_string(),
            expected: "an integer",
        })
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        self.require(name)?.as_f64().ok_or_else(|| Error::PropertyType {
            name: name.to_string(),
            expected: "a number",
        })
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        self.require(name)?.as_bool().ok_or_else(|| Error::PropertyType {
            name: name.to_string(),
            expected: "a boolean",
        })
    }

    pub fn get_str(&self, name: &str) -> Result<String> {
        match self.require(name)? {
            Value::Str(s) => Ok(s),
            _ => Err(Error::PropertyType {
                name: name.to_string(),
                expected: "a string",
            }),
        }
    }
}

impl std::fmt::Debug for PropertyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyManager")
            .field("keys", &self.keys())
            .finish()
    }
}
