//! Persistent module registry.
//!
//! A [`Registry`] is an immutable value. Every structural change returns a
//! new registry with a bumped generation; the old value stays valid and keeps
//! its own compiled engine. Registration is idempotent: adding the module
//! already registered under its key returns the very same instance, while a
//! different module claiming that key is rejected.
//!
//! ```ignore
//! let registry = Registry::default()
//!     .add_module(TodosModule)?
//!     .add_module(VisibleTodosModule)?;
//!
//! let engine = registry.engine()?;
//! let outcome = engine.transition(&state, &TodoEvent::Cleared, &StateTree::new());
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::codec::{IdentityCodec, StateCodec};
use crate::compiler::{compile, CompiledEngine};
use crate::config::ModularConfig;
use crate::core::{SliceKey, StateTree};
use crate::error::ModularError;
use crate::module::{Module, ModuleEntry, ModuleRef};
use crate::sort::sort_modules;

struct Inner<C> {
    generation: u64,
    modules: IndexMap<SliceKey, ModuleRef>,
    /// Keys of modules removed and not re-added.
    retired: IndexSet<SliceKey>,
    codec: Arc<dyn StateCodec<C>>,
    config: ModularConfig,
    engine: OnceLock<Arc<CompiledEngine<C>>>,
}

/// Immutable set of registered modules, keyed by `provides`.
pub struct Registry<C = StateTree> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for Registry<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for Registry<StateTree> {
    fn default() -> Self {
        Self::new(IdentityCodec, ModularConfig::default())
    }
}

impl Registry<StateTree> {
    /// An empty registry over a plain [`StateTree`].
    pub fn with_config(config: ModularConfig) -> Self {
        Self::new(IdentityCodec, config)
    }
}

impl<C: 'static> Registry<C> {
    pub fn new(codec: impl StateCodec<C>, config: ModularConfig) -> Self {
        Self::from_codec(Arc::new(codec), config)
    }

    pub fn from_codec(codec: Arc<dyn StateCodec<C>>, config: ModularConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                generation: 0,
                modules: IndexMap::new(),
                retired: IndexSet::new(),
                codec,
                config,
                engine: OnceLock::new(),
            }),
        }
    }

    fn derive(&self, modules: IndexMap<SliceKey, ModuleRef>, retired: IndexSet<SliceKey>) -> Self {
        Self {
            inner: Arc::new(Inner {
                generation: self.inner.generation + 1,
                modules,
                retired,
                codec: Arc::clone(&self.inner.codec),
                config: self.inner.config,
                engine: OnceLock::new(),
            }),
        }
    }

    /// Register a module.
    pub fn add_module<M: Module>(&self, module: M) -> Result<Self, ModularError> {
        self.add_entry(Arc::new(ModuleEntry::new(module)))
    }

    /// Register an already wrapped module, e.g. one taken from another registry.
    pub fn add_entry(&self, entry: ModuleRef) -> Result<Self, ModularError> {
        if self.inner.config.validates() {
            entry.validate()?;
        }

        let key = entry.provides().clone();
        if let Some(existing) = self.inner.modules.get(&key) {
            if existing.is_same_module(&entry) {
                debug!(key = %key, module = entry.name(), "module already registered");
                return Ok(self.clone());
            }
            return Err(ModularError::invalid(
                entry.name(),
                "provides",
                format!("`{}` is already provided by {}", key, existing.name()),
            ));
        }

        let mut modules = self.inner.modules.clone();
        modules.insert(key.clone(), entry);
        let mut retired = self.inner.retired.clone();
        retired.shift_remove(&key);

        let next = self.derive(modules, retired);
        debug!(key = %key, generation = next.generation(), "module added");
        Ok(next)
    }

    /// Unregister the module providing `key`. An absent key returns the
    /// same instance.
    pub fn remove_module(&self, key: &SliceKey) -> Self {
        if !self.inner.modules.contains_key(key) {
            return self.clone();
        }

        let mut modules = self.inner.modules.clone();
        modules.shift_remove(key);
        let mut retired = self.inner.retired.clone();
        retired.insert(key.clone());

        let next = self.derive(modules, retired);
        debug!(key = %key, generation = next.generation(), "module removed");
        next
    }

    pub fn remove_all_modules(&self) -> Self {
        if self.inner.modules.is_empty() {
            return self.clone();
        }

        let mut retired = self.inner.retired.clone();
        retired.extend(self.inner.modules.keys().cloned());

        let next = self.derive(IndexMap::new(), retired);
        debug!(generation = next.generation(), "all modules removed");
        next
    }

    /// Forget retired keys, e.g. once their slices are gone from the state.
    pub fn clear_retired(&self) -> Self {
        if self.inner.retired.is_empty() {
            return self.clone();
        }

        let next = self.derive(self.inner.modules.clone(), IndexSet::new());
        debug!(generation = next.generation(), "retired keys cleared");
        next
    }

    /// Keys of removed modules whose slices are still dematerialized.
    pub fn retired_keys(&self) -> impl Iterator<Item = &SliceKey> {
        self.inner.retired.iter()
    }

    pub fn get_module(&self, key: &SliceKey) -> Option<ModuleRef> {
        self.inner.modules.get(key).cloned()
    }

    pub fn contains(&self, key: &SliceKey) -> bool {
        self.inner.modules.contains_key(key)
    }

    /// Registered modules in registration order.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleRef> {
        self.inner.modules.values()
    }

    pub fn len(&self) -> usize {
        self.inner.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.modules.is_empty()
    }

    /// The compiled transition for this registry value, built on first use.
    pub fn engine(&self) -> Result<Arc<CompiledEngine<C>>, ModularError> {
        if let Some(engine) = self.inner.engine.get() {
            return Ok(Arc::clone(engine));
        }

        let sorted = sort_modules(&self.inner.modules)?;
        let engine = Arc::new(compile(
            sorted,
            self.inner.retired.iter().cloned(),
            Arc::clone(&self.inner.codec),
            self.inner.config,
        ));
        Ok(Arc::clone(self.inner.engine.get_or_init(|| engine)))
    }

    /// Dependencies no registered module provides.
    pub fn unmet_dependencies(&self) -> Result<Vec<SliceKey>, ModularError> {
        Ok(self.engine()?.unmet_dependencies().to_vec())
    }

    /// Whether two registries are the same value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn config(&self) -> ModularConfig {
        self.inner.config
    }
}

impl<C> fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("generation", &self.inner.generation)
            .field("modules", &self.inner.modules.keys().collect::<Vec<_>>())
            .field("retired", &self.inner.retired)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
