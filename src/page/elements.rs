use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// Attribute that carries an element's uid in the DOM.
pub const UID_ATTRIBUTE: &str = "data-uid";

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// Mint a uid that is never handed out again in this process.
pub fn mint_uid() -> String {
    format!("n{}", NEXT_UID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElementError {
    #[error("\"{0}\" is not a valid custom element name")]
    InvalidName(String),
}

/// Custom element names: lowercase ASCII letter first, at least one `-`, and only
/// lowercase letters, digits, `-`, `.` or `_`.
pub fn validate_element_name(name: &str) -> Result<(), ElementError> {
    let mut chars = name.chars();
    let starts_lowercase = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_'));
    if starts_lowercase && valid_chars && name.contains('-') {
        Ok(())
    } else {
        Err(ElementError::InvalidName(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDefinition {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Constructed,
    Attached,
    Patched { renders: usize },
    Detached,
}

impl LifecycleState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Attached | Self::Patched { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementInstance {
    pub name: String,
    pub state: LifecycleState,
}

/// The page's custom element definitions and the lifecycle of every instance.
///
/// Detached instances stay in the table so a detached node that is attached
/// again keeps its uid. An entry is a name and a state per constructed element.
#[derive(Debug, Default)]
pub struct ElementRegistry {
    definitions: BTreeMap<String, ElementDefinition>,
    /// Keyed by uid; never pruned.
    instances: HashMap<String, ElementInstance>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define `name`; returns `false` if it was already defined.
    pub fn define(&mut self, name: &str) -> Result<bool, ElementError> {
        validate_element_name(name)?;
        if self.definitions.contains_key(name) {
            return Ok(false);
        }
        self.definitions.insert(
            name.to_string(),
            ElementDefinition {
                name: name.to_string(),
            },
        );
        Ok(true)
    }

    pub fn get(&self, name: &str) -> Option<&ElementDefinition> {
        self.definitions.get(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ElementDefinition> {
        self.definitions.values()
    }

    pub fn instance(&self, uid: &str) -> Option<&ElementInstance> {
        self.instances.get(uid)
    }

    pub(crate) fn constructed(&mut self, uid: &str, name: &str) {
        self.instances.insert(
            uid.to_string(),
            ElementInstance {
                name: name.to_string(),
                state: LifecycleState::Constructed,
            },
        );
    }

    /// Mark `uid` connected; returns `false` if it already was.
    pub(crate) fn attached(&mut self, uid: &str) -> bool {
        match self.instances.get_mut(uid) {
            Some(instance) if !instance.state.is_connected() => {
                instance.state = LifecycleState::Attached;
                true
            }
            _ => false,
        }
    }

    /// Count a render for a connected instance; detached instances are left alone.
    pub(crate) fn patched(&mut self, uid: &str) {
        if let Some(instance) = self
            .instances
            .get_mut(uid)
            .filter(|instance| instance.state.is_connected())
        {
            instance.state = match instance.state {
                LifecycleState::Patched { renders } => LifecycleState::Patched {
                    renders: renders + 1,
                },
                _ => LifecycleState::Patched { renders: 1 },
            };
        }
    }

    /// Mark `uid` detached; returns `false` if it was not connected.
    pub(crate) fn detached(&mut self, uid: &str) -> bool {
        match self.instances.get_mut(uid) {
            Some(instance) if instance.state.is_connected() => {
                instance.state = LifecycleState::Detached;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uids_are_never_reused() {
        let first = mint_uid();
        let second = mint_uid();
        assert_ne!(first, second);
        assert!(first.starts_with('n'));
    }

    #[test]
    fn validates_custom_element_names() {
        assert!(validate_element_name("my-counter").is_ok());
        assert!(validate_element_name("x-1.b_c").is_ok());
        assert!(validate_element_name("counter").is_err());
        assert!(validate_element_name("My-counter").is_err());
        assert!(validate_element_name("-counter").is_err());
        assert!(validate_element_name("my counter").is_err());
        assert!(validate_element_name("").is_err());
    }

    #[test]
    fn defining_twice_keeps_one_definition() {
        let mut registry = ElementRegistry::new();
        assert!(registry.define("my-counter").unwrap());
        assert!(!registry.define("my-counter").unwrap());
        assert_eq!(registry.definitions().count(), 1);
    }

    #[test]
    fn lifecycle_transitions() {
        let mut registry = ElementRegistry::new();
        registry.constructed("n1", "my-counter");
        assert!(registry.attached("n1"));
        assert!(!registry.attached("n1"));
        registry.patched("n1");
        registry.patched("n1");
        assert_eq!(
            registry.instance("n1").unwrap().state,
            LifecycleState::Patched { renders: 2 }
        );
        assert!(registry.detached("n1"));
        assert!(!registry.detached("n1"));
        registry.patched("n1");
        assert_eq!(registry.instance("n1").unwrap().state, LifecycleState::Detached);
    }
}
