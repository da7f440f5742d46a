//! Read-only dependency snapshots handed to module transitions.
//!
//! In development mode a module only sees the slices it declared: its own
//! key plus its `depends`. Reading anything else returns `None`, exactly as
//! if the slice did not exist.
//!
//! In production mode the restriction is dropped and the whole accumulator is
//! visible. Module logic must not rely on that.

use std::any::Any;

use indexmap::IndexMap;
use tracing::debug;

use crate::core::{Slice, SliceKey, StateTree};
use crate::module::{Api, ModuleRef};

/// A module's view of the state tree during one fold step.
///
/// Values reflect the fold so far: every module that sorts earlier has
/// already produced its next state for the current event.
pub struct Dependencies<'a> {
    owner: &'a SliceKey,
    declared: &'a [SliceKey],
    tree: &'a StateTree,
    externals: Option<&'a StateTree>,
    modules: Option<&'a IndexMap<SliceKey, ModuleRef>>,
    restricted: bool,
}

impl<'a> Dependencies<'a> {
    /// A restricted view of `tree` for the module owning `owner`.
    pub fn new(owner: &'a SliceKey, declared: &'a [SliceKey], tree: &'a StateTree) -> Self {
        Self {
            owner,
            declared,
            tree,
            externals: None,
            modules: None,
            restricted: true,
        }
    }

    /// Fall back to `externals` for keys absent from the tree.
    pub fn with_externals(mut self, externals: &'a StateTree) -> Self {
        self.externals = Some(externals);
        self
    }

    pub(crate) fn with_modules(mut self, modules: &'a IndexMap<SliceKey, ModuleRef>) -> Self {
        self.modules = Some(modules);
        self
    }

    /// Drop the declared-key restriction.
    pub fn unrestricted(mut self) -> Self {
        self.restricted = false;
        self
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    /// The slice the receiving module owns.
    pub fn owner(&self) -> &SliceKey {
        self.owner
    }

    /// Whether `key` may be read through this snapshot.
    pub fn is_visible(&self, key: &SliceKey) -> bool {
        !self.restricted || key == self.owner || self.declared.contains(key)
    }

    /// Typed read of a dependency slice.
    pub fn get<T: Any>(&self, key: &SliceKey) -> Option<&T> {
        self.get_slice(key)?.downcast_ref::<T>()
    }

    /// Untyped read of a dependency slice.
    pub fn get_slice(&self, key: &SliceKey) -> Option<&Slice> {
        if !self.is_visible(key) {
            debug!(owner = %self.owner, key = %key, "read of undeclared slice hidden");
            return None;
        }
        match self.tree.get_slice(key) {
            Some(slice) => Some(slice),
            None => self.externals?.get_slice(key),
        }
    }

    pub fn contains(&self, key: &SliceKey) -> bool {
        self.get_slice(key).is_some()
    }

    /// The api of the module providing `key`, if visible and registered.
    pub fn api(&self, key: &SliceKey) -> Option<&Api> {
        if !self.is_visible(key) {
            return None;
        }
        self.modules?.get(key).map(|module| module.api())
    }

    /// Keys readable through this snapshot that currently hold a value.
    pub fn keys(&self) -> Vec<&SliceKey> {
        let externals = self
            .externals
            .into_iter()
            .flat_map(|ext| ext.keys())
            .filter(|key| !self.tree.contains_key(key));

        self.tree
            .keys()
            .chain(externals)
            .filter(|key| self.is_visible(key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<SliceKey> {
        names.iter().map(|n| SliceKey::from(*n)).collect()
    }

    #[test]
    fn test_restricted_snapshot_hides_undeclared_slices() {
        let tree = StateTree::new().with("a", 1).with("b", 2).with("secret", 3);
        let owner = SliceKey::from("b");
        let declared = keys(&["a"]);

        let deps = Dependencies::new(&owner, &declared, &tree);

        assert_eq!(deps.get::<i32>(&"a".into()), Some(&1));
        assert_eq!(deps.get::<i32>(&"b".into()), Some(&2));
        assert_eq!(deps.get::<i32>(&"secret".into()), None);
        assert!(!deps.contains(&"secret".into()));

        let visible: Vec<_> = deps.keys().into_iter().cloned().collect();
        assert_eq!(visible, keys(&["a", "b"]));
    }

    #[test]
    fn test_unrestricted_snapshot_sees_everything() {
        let tree = StateTree::new().with("a", 1).with("secret", 3);
        let owner = SliceKey::from("b");
        let declared: Vec<SliceKey> = Vec::new();

        let deps = Dependencies::new(&owner, &declared, &tree).unrestricted();

        assert!(!deps.is_restricted());
        assert_eq!(deps.get::<i32>(&"secret".into()), Some(&3));
    }

    #[test]
    fn test_externals_fill_absent_keys_only() {
        let tree = StateTree::new().with("a", 1);
        let externals = StateTree::new().with("a", 100).with("session", "alice".to_string());
        let owner = SliceKey::from("b");
        let declared = keys(&["a", "session"]);

        let deps = Dependencies::new(&owner, &declared, &tree).with_externals(&externals);

        // Tree wins over externals
        assert_eq!(deps.get::<i32>(&"a".into()), Some(&1));
        assert_eq!(
            deps.get::<String>(&"session".into()).map(String::as_str),
            Some("alice")
        );
        assert_eq!(deps.keys().len(), 2);
    }

    #[test]
    fn test_externals_still_respect_restriction() {
        let tree = StateTree::new();
        let externals = StateTree::new().with("token", 7_u32);
        let owner = SliceKey::from("b");
        let declared: Vec<SliceKey> = Vec::new();

        let deps = Dependencies::new(&owner, &declared, &tree).with_externals(&externals);
        assert_eq!(deps.get::<u32>(&"token".into()), None);
    }
}
