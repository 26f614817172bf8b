//! Discriminator Maps
//!
//! Tagged-choice types (entities, block entities) dispatch on a string id. The
//! set of known ids evolves per schema version through three delta operations,
//! always applied in the same order: registrations, renames, removals.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use super::TemplateFn;
use crate::error::FixerError;
use crate::template::TypeTemplate;

/// Which discriminator map a delta or choice type refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceKind {
    Entities,
    BlockEntities,
}

impl ChoiceKind {
    pub const ALL: [ChoiceKind; 2] = [ChoiceKind::Entities, ChoiceKind::BlockEntities];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Entities => 0,
            Self::BlockEntities => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entities => "entities",
            Self::BlockEntities => "block_entities",
        }
    }
}

impl fmt::Display for ChoiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChoiceKind {
    type Err = FixerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| FixerError::InvalidPlan(format!("unknown choice kind '{}'", s)))
    }
}

// =============================================================================
// Per-version deltas
// =============================================================================

/// The changes one schema version makes to a discriminator map
#[derive(Clone, Default)]
pub(crate) struct ChoiceDeltas {
    pub registrations: Vec<(String, TemplateFn)>,
    pub renames: Vec<(String, String)>,
    pub removals: Vec<String>,
}

impl ChoiceDeltas {
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty() && self.renames.is_empty() && self.removals.is_empty()
    }
}

// =============================================================================
// Discriminator Map
// =============================================================================

/// Ordered `discriminator → template thunk` map.
///
/// Enumeration order is insertion order. Re-registering a key replaces its
/// thunk in place; renaming a key keeps its position.
#[derive(Clone, Default)]
pub struct DiscriminatorMap {
    entries: Vec<(String, TemplateFn)>,
    index: HashMap<String, usize>,
}

impl DiscriminatorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, discriminator: &str) -> bool {
        self.index.contains_key(discriminator)
    }

    /// Discriminators in enumeration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Materialize the template registered for a discriminator
    pub fn template(&self, discriminator: &str) -> Option<TypeTemplate> {
        let &i = self.index.get(discriminator)?;
        self.entries.get(i).map(|(_, thunk)| thunk())
    }

    /// Materialize every entry; the result feeds [`TypeTemplate::TaggedChoice`]
    pub fn materialize(&self) -> BTreeMap<String, TypeTemplate> {
        self.entries
            .iter()
            .map(|(k, thunk)| (k.clone(), thunk()))
            .collect()
    }

    /// Add a key or replace the thunk of an existing key
    pub(crate) fn register(&mut self, discriminator: String, thunk: TemplateFn) {
        match self.index.get(&discriminator) {
            Some(&i) => {
                if let Some(entry) = self.entries.get_mut(i) {
                    entry.1 = thunk;
                }
            }
            None => {
                self.index.insert(discriminator.clone(), self.entries.len());
                self.entries.push((discriminator, thunk));
            }
        }
    }

    /// Rename a key, keeping its thunk and position.
    ///
    /// An existing entry under `new` is dropped first. Returns `false` when
    /// `old` is not present.
    pub(crate) fn rename(&mut self, old: &str, new: &str) -> bool {
        if old == new {
            return self.contains(old);
        }
        if !self.contains(old) {
            return false;
        }
        self.remove(new);
        let Some(i) = self.index.remove(old) else {
            return false;
        };
        if let Some(entry) = self.entries.get_mut(i) {
            entry.0 = new.to_string();
        }
        self.index.insert(new.to_string(), i);
        true
    }

    /// Delete a key. Returns `false` when it was not present.
    pub(crate) fn remove(&mut self, discriminator: &str) -> bool {
        let Some(i) = self.index.remove(discriminator) else {
            return false;
        };
        self.entries.remove(i);
        for (pos, (key, _)) in self.entries.iter().enumerate().skip(i) {
            self.index.insert(key.clone(), pos);
        }
        true
    }

    /// Apply one version's deltas in order: registrations, renames, removals.
    ///
    /// Returns the renames and removals that named missing keys.
    pub(crate) fn apply(&mut self, deltas: &ChoiceDeltas) -> Vec<String> {
        let mut missing = Vec::new();
        for (key, thunk) in &deltas.registrations {
            self.register(key.clone(), thunk.clone());
        }
        for (old, new) in &deltas.renames {
            if !self.rename(old, new) {
                missing.push(old.clone());
            }
        }
        for key in &deltas.removals {
            if !self.remove(key) {
                missing.push(key.clone());
            }
        }
        missing
    }
}

impl fmt::Debug for DiscriminatorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn thunk(template: TypeTemplate) -> TemplateFn {
        Arc::new(move || template.clone())
    }

    fn keys(map: &DiscriminatorMap) -> Vec<&str> {
        map.keys().collect()
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("block_entities".parse::<ChoiceKind>().unwrap(), ChoiceKind::BlockEntities);
        assert!("blocks".parse::<ChoiceKind>().is_err());
    }

    #[test]
    fn test_register_keeps_position() {
        let mut map = DiscriminatorMap::new();
        map.register("Zombie".into(), thunk(TypeTemplate::Remainder));
        map.register("Creeper".into(), thunk(TypeTemplate::Remainder));
        map.register(
            "Zombie".into(),
            thunk(TypeTemplate::fields([("IsBaby", TypeTemplate::Remainder)])),
        );

        assert_eq!(keys(&map), vec!["Zombie", "Creeper"]);
        assert_eq!(
            map.template("Zombie"),
            Some(TypeTemplate::fields([("IsBaby", TypeTemplate::Remainder)]))
        );
    }

    #[test]
    fn test_rename_keeps_thunk_and_position() {
        let mut map = DiscriminatorMap::new();
        map.register("Zombie".into(), thunk(TypeTemplate::list(TypeTemplate::Remainder)));
        map.register("Pig".into(), thunk(TypeTemplate::Remainder));

        assert!(map.rename("Zombie", "minecraft:zombie"));
        assert_eq!(keys(&map), vec!["minecraft:zombie", "Pig"]);
        assert!(!map.contains("Zombie"));
        assert_eq!(
            map.template("minecraft:zombie"),
            Some(TypeTemplate::list(TypeTemplate::Remainder))
        );
        assert!(!map.rename("Zombie", "anything"));
    }

    #[test]
    fn test_rename_onto_existing_key() {
        let mut map = DiscriminatorMap::new();
        map.register("a".into(), thunk(TypeTemplate::list(TypeTemplate::Remainder)));
        map.register("b".into(), thunk(TypeTemplate::Remainder));
        map.register("c".into(), thunk(TypeTemplate::Remainder));

        assert!(map.rename("c", "a"));
        assert_eq!(keys(&map), vec!["b", "a"]);
        assert_eq!(map.template("a"), Some(TypeTemplate::Remainder));
    }

    #[test]
    fn test_remove_reindexes() {
        let mut map = DiscriminatorMap::new();
        for key in ["a", "b", "c"] {
            map.register(key.into(), thunk(TypeTemplate::Remainder));
        }
        assert!(map.remove("a"));
        assert!(!map.remove("a"));
        assert_eq!(keys(&map), vec!["b", "c"]);
        assert!(map.rename("c", "d"));
        assert_eq!(keys(&map), vec!["b", "d"]);
    }

    #[test]
    fn test_apply_order() {
        let mut map = DiscriminatorMap::new();
        map.register("Old".into(), thunk(TypeTemplate::Remainder));

        // "Gone" is registered first, so the removal finds it
        let deltas = ChoiceDeltas {
            registrations: vec![("Gone".into(), thunk(TypeTemplate::Remainder))],
            renames: vec![("Old".into(), "New".into()), ("Missing".into(), "X".into())],
            removals: vec!["Gone".into()],
        };
        let missing = map.apply(&deltas);

        assert_eq!(keys(&map), vec!["New"]);
        assert_eq!(missing, vec!["Missing".to_string()]);
    }
}
