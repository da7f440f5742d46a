//! Composition enhancer: wires a module registry into a container.
//!
//! ```text
//! add_module ─► Registry' ─► engine() ─► active graph ─► replace_transition
//!                               │
//!                   cycle? ─────┘ rejected, previous graph stays active
//! ```
//!
//! The installed transition runs the optional base transition first, checks
//! that every unmet dependency is present, then folds the modules.
//!
//! # Usage
//!
//! ```ignore
//! let store = enhance(Store::with_state(StateTree::new()), Registry::default())
//!     .with_external("session", Session::anonymous())
//!     .build()?;
//!
//! store.add_module(TodosModule)?;
//! store.dispatch(TodoEvent::Added { text: "Ship it".into() })?;
//! ```

use std::any::Any;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use crate::compiler::{CompiledEngine, Outcome};
use crate::core::{AnyEvent, SliceKey, StateTree};
use crate::effect::{optimize_batch, Effects};
use crate::error::ModularError;
use crate::module::{Module, ModuleRef};
use crate::registry::Registry;
use crate::store::{lock, Container, Listener, Subscription, TransitionFn};

struct Active<S> {
    engine: Arc<CompiledEngine<S>>,
    base: Option<TransitionFn<S>>,
}

/// Builder returned by [`enhance`].
pub struct Enhancer<Ctr: Container> {
    container: Ctr,
    registry: Registry<Ctr::State>,
    externals: StateTree,
    base: Option<TransitionFn<Ctr::State>>,
}

/// Start enhancing `container` with the modules of `registry`.
pub fn enhance<Ctr: Container>(container: Ctr, registry: Registry<Ctr::State>) -> Enhancer<Ctr> {
    Enhancer {
        container,
        registry,
        externals: StateTree::new(),
        base: None,
    }
}

impl<Ctr: Container> Enhancer<Ctr> {
    /// Provide a dependency no module owns and the state may lack.
    pub fn with_external<T: Any + Send + Sync>(mut self, key: impl Into<SliceKey>, value: T) -> Self {
        self.externals.insert(key, value);
        self
    }

    /// Run `base` before the module fold on every event.
    pub fn with_base(mut self, base: TransitionFn<Ctr::State>) -> Self {
        self.base = Some(base);
        self
    }

    /// Compile the registry and install the composed transition.
    pub fn build(self) -> Result<ModularStore<Ctr>, ModularError> {
        let engine = self.registry.engine()?;
        let active = Arc::new(Mutex::new(Active {
            engine,
            base: self.base,
        }));
        let externals = Arc::new(self.externals);
        let transition = composed(Arc::clone(&active), Arc::clone(&externals));

        let store = ModularStore {
            container: self.container,
            registry: Mutex::new(self.registry),
            active,
            externals,
            transition,
        };

        info!(
            modules = store.registry().len(),
            externals = store.externals.len(),
            "installing module graph"
        );
        store.container.replace_transition(Arc::clone(&store.transition))?;
        Ok(store)
    }
}

/// The transition installed into the container. Reads the active graph once
/// per event.
fn composed<S: Send + Sync + 'static>(
    active: Arc<Mutex<Active<S>>>,
    externals: Arc<StateTree>,
) -> TransitionFn<S> {
    Arc::new(move |state: &Arc<S>, event: &dyn Any| {
        let (engine, base) = {
            let active = lock(&active);
            (Arc::clone(&active.engine), active.base.clone())
        };

        let (state, base_effects) = match base {
            Some(base) => {
                let outcome = base(state, event)?;
                (outcome.state, outcome.effects)
            }
            None => (Arc::clone(state), Effects::None),
        };

        if engine.config().validates() {
            let missing = engine.missing_dependencies(&state, &externals);
            if !missing.is_empty() {
                error!(keys = ?missing, "missing external dependencies");
                return Err(ModularError::MissingExternalDependency { keys: missing });
            }
        }

        let outcome = engine.transition(&state, event, &externals);
        let effects = if base_effects.is_none() {
            outcome.effects
        } else {
            let mut all = base_effects.into_vec();
            all.extend(outcome.effects.into_vec());
            optimize_batch(all)
        };

        Ok(Outcome {
            state: outcome.state,
            effects,
        })
    })
}

/// A container whose transition is the fold of a module registry.
pub struct ModularStore<Ctr: Container> {
    container: Ctr,
    registry: Mutex<Registry<Ctr::State>>,
    active: Arc<Mutex<Active<Ctr::State>>>,
    externals: Arc<StateTree>,
    transition: TransitionFn<Ctr::State>,
}

impl<Ctr: Container> ModularStore<Ctr> {
    pub fn add_module<M: Module>(&self, module: M) -> Result<Effects, ModularError> {
        self.update(|registry| registry.add_module(module))
    }

    /// Re-register a module handle, e.g. one taken from [`get_module`](Self::get_module).
    pub fn add_entry(&self, entry: ModuleRef) -> Result<Effects, ModularError> {
        self.update(|registry| registry.add_entry(entry))
    }

    pub fn remove_module(&self, key: &SliceKey) -> Result<Effects, ModularError> {
        self.update(|registry| Ok(registry.remove_module(key)))
    }

    pub fn remove_all_modules(&self) -> Result<Effects, ModularError> {
        self.update(|registry| Ok(registry.remove_all_modules()))
    }

    pub fn get_module(&self, key: &SliceKey) -> Option<ModuleRef> {
        lock(&self.registry).get_module(key)
    }

    /// Build an event through a module's api and dispatch it.
    pub fn call_api(
        &self,
        key: &SliceKey,
        name: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<Effects> {
        let module = self
            .get_module(key)
            .ok_or_else(|| anyhow::anyhow!("no module provides `{}`", key))?;
        let event = module.api().call(name, payload)?;
        Ok(self.dispatch_any(event)?)
    }

    /// Replace the transition run before the module fold.
    pub fn replace_base(&self, base: Option<TransitionFn<Ctr::State>>) -> Result<Effects, ModularError> {
        lock(&self.active).base = base;
        info!("base transition replaced");
        self.container.replace_transition(Arc::clone(&self.transition))
    }

    /// The currently installed registry.
    pub fn registry(&self) -> Registry<Ctr::State> {
        lock(&self.registry).clone()
    }

    pub fn externals(&self) -> &StateTree {
        &self.externals
    }

    /// The wrapped container.
    pub fn inner(&self) -> &Ctr {
        &self.container
    }

    /// Apply a registry change. The new graph is compiled before anything is
    /// installed; on error the previous graph stays active.
    fn update(
        &self,
        change: impl FnOnce(&Registry<Ctr::State>) -> Result<Registry<Ctr::State>, ModularError>,
    ) -> Result<Effects, ModularError> {
        let installed = {
            let mut registry = lock(&self.registry);
            let next = change(&*registry)?;
            if next.ptr_eq(&*registry) {
                return Ok(Effects::None);
            }

            let engine = next.engine()?;
            info!(
                generation = next.generation(),
                modules = next.len(),
                unmet = ?engine.unmet_dependencies(),
                "installing module graph"
            );
            lock(&self.active).engine = engine;
            *registry = next.clone();
            next
        };

        let effects = self.container.replace_transition(Arc::clone(&self.transition))?;
        self.forget_retired(&installed);
        Ok(effects)
    }

    /// The replacement dispatch has dropped every retired slice; stop
    /// checking for them unless another change got installed meanwhile.
    fn forget_retired(&self, installed: &Registry<Ctr::State>) {
        if installed.retired_keys().next().is_none() {
            return;
        }

        let mut registry = lock(&self.registry);
        if !registry.ptr_eq(installed) {
            return;
        }

        let next = registry.clear_retired();
        if let Ok(engine) = next.engine() {
            debug!(generation = next.generation(), "retired slices pruned");
            lock(&self.active).engine = engine;
            *registry = next;
        }
    }
}

impl<Ctr: Container> Container for ModularStore<Ctr> {
    type State = Ctr::State;

    fn dispatch_any(&self, event: AnyEvent) -> Result<Effects, ModularError> {
        self.container.dispatch_any(event)
    }

    fn get_state(&self) -> Arc<Ctr::State> {
        self.container.get_state()
    }

    fn subscribe(&self, listener: Listener<Ctr::State>) -> Subscription {
        self.container.subscribe(listener)
    }

    /// Replaces the base transition; the module fold stays installed.
    fn replace_transition(&self, transition: TransitionFn<Ctr::State>) -> Result<Effects, ModularError> {
        self.replace_base(Some(transition))
    }
}
