use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A registered component as exported across the transport.
///
/// `name` is the custom element name; any other fields the loader chooses to
/// expose are carried through untouched in `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, JsonValue>,
}

impl ComponentDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: BTreeMap::new(),
        }
    }
}

pub type RegistrySnapshot = Vec<ComponentDescriptor>;

/// The worker's authoritative component list.
///
/// Names are unique; registering an existing name replaces the descriptor in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    entries: Vec<ComponentDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert the loader's exported records, collapsing duplicate names.
    pub fn from_guest(value: JsonValue) -> Result<Self, serde_json::Error> {
        let descriptors: Vec<ComponentDescriptor> = serde_json::from_value(value)?;
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.insert(descriptor);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, descriptor: ComponentDescriptor) {
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.name == descriptor.name)
        {
            Some(existing) => *existing = descriptor,
            None => self.entries.push(descriptor),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_loader_records() {
        let registry = Registry::from_guest(json!([{"name": "my-counter"}])).unwrap();
        assert_eq!(registry.snapshot(), vec![ComponentDescriptor::named("my-counter")]);
    }

    #[test]
    fn keeps_extra_metadata() {
        let registry =
            Registry::from_guest(json!([{"name": "my-counter", "observed": ["count"]}])).unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].metadata.get("observed"), Some(&json!(["count"])));
    }

    #[test]
    fn duplicate_names_overwrite_in_place() {
        let registry = Registry::from_guest(json!([
            {"name": "a-one", "v": 1},
            {"name": "b-two"},
            {"name": "a-one", "v": 2}
        ]))
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), ["a-one", "b-two"]);
        assert_eq!(registry.snapshot()[0].metadata.get("v"), Some(&json!(2)));
    }

    #[test]
    fn rejects_records_without_name() {
        assert!(Registry::from_guest(json!([{"title": "x"}])).is_err());
    }
}
