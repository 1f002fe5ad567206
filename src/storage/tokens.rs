use serde::{Deserialize, Serialize};

use crate::types::{LabelId, PropKeyId, TypeId};

/// Dense name table for one token kind; ids are positions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenHolder {
    names: Vec<String>,
}

impl TokenHolder {
    /// Returns the id for `name`, assigning the next one if it is new.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(pos) = self.names.iter().position(|n| n == name) {
            return pos as u32;
        }
        self.names.push(name.to_owned());
        (self.names.len() - 1) as u32
    }

    /// Name registered for `id`.
    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    /// `true` when `id` is registered.
    pub fn contains(&self, id: u32) -> bool {
        (id as usize) < self.names.len()
    }

    /// Number of registered tokens.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// `true` when no token is registered.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Label, relationship type and property key tokens of a store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHolders {
    /// Label names.
    pub labels: TokenHolder,
    /// Relationship type names.
    pub types: TokenHolder,
    /// Property key names.
    pub property_keys: TokenHolder,
}

impl TokenHolders {
    /// Id of label `name`, registering it on first use.
    pub fn label(&mut self, name: &str) -> LabelId {
        LabelId(self.labels.intern(name))
    }

    /// Id of relationship type `name`, registering it on first use.
    pub fn rel_type(&mut self, name: &str) -> TypeId {
        TypeId(self.types.intern(name))
    }

    /// Id of property key `name`, registering it on first use.
    pub fn property_key(&mut self, name: &str) -> PropKeyId {
        PropKeyId(self.property_keys.intern(name))
    }

    /// `true` when `id` was registered as a label.
    pub fn has_label(&self, id: LabelId) -> bool {
        self.labels.contains(id.0)
    }

    /// `true` when `id` was registered as a relationship type.
    pub fn has_type(&self, id: TypeId) -> bool {
        self.types.contains(id.0)
    }

    /// `true` when `id` was registered as a property key.
    pub fn has_property_key(&self, id: PropKeyId) -> bool {
        self.property_keys.contains(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let mut tokens = TokenHolders::default();
        let person = tokens.label("Person");
        let city = tokens.label("City");
        assert_eq!(tokens.label("Person"), person);
        assert_ne!(person, city);
        assert!(tokens.has_label(city));
        assert!(!tokens.has_label(LabelId(2)));
        assert_eq!(tokens.labels.name(city.0), Some("City"));
    }
}
