//! Module trait and type-erased module entry.
//!
//! Modules are pure reducers over one slice of the state tree. Each module
//! owns exactly one slice (`provides`) and may read others (`depends`)
//! through the [`Dependencies`] snapshot it is handed.
//!
//! # Key Properties
//!
//! - **One slice per module**: a module never writes outside its slice
//! - **Pure transitions**: no IO, no async; side effects are *described* via [`Transition::WithEffect`]
//! - **Lazy materialization**: an absent slice starts at `initial_state()`
//! - **Every event**: `transition` handles the module's own event type, `observe` sees all others

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use smallvec::SmallVec;

use crate::core::{AnyEvent, Event, Slice, SliceKey};
use crate::effect::Effect;
use crate::error::ModularError;
use crate::snapshot::Dependencies;

/// Result of a module transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<S, F> {
    /// The next slice state, nothing else.
    Pure(S),
    /// The next slice state plus an effect description.
    WithEffect(S, F),
}

impl<S, F> Transition<S, F> {
    pub fn state(&self) -> &S {
        match self {
            Transition::Pure(state) | Transition::WithEffect(state, _) => state,
        }
    }

    pub fn effect(&self) -> Option<&F> {
        match self {
            Transition::Pure(_) => None,
            Transition::WithEffect(_, effect) => Some(effect),
        }
    }

    pub fn into_parts(self) -> (S, Option<F>) {
        match self {
            Transition::Pure(state) => (state, None),
            Transition::WithEffect(state, effect) => (state, Some(effect)),
        }
    }
}

impl<S, F> From<S> for Transition<S, F> {
    fn from(state: S) -> Self {
        Transition::Pure(state)
    }
}

/// An api function: builds an event from a JSON payload.
pub type ApiFn = Arc<dyn Fn(serde_json::Value) -> anyhow::Result<AnyEvent> + Send + Sync>;

/// Named side-channel functions a module exposes to consumers.
///
/// The engine never calls these. A consumer looks the module up, builds an
/// event through its api, and dispatches it.
///
/// ```ignore
/// let api = Api::new()
///     .with("add_todo", |payload| {
///         let text = payload["text"].as_str().unwrap_or_default().to_string();
///         Ok(TodoEvent::Added { text })
///     })
///     .with_deserialize::<ClearMarked>("clear_marked");
///
/// let event = api.call("add_todo", json!({ "text": "Use Rust" }))?;
/// store.dispatch_any(event)?;
/// ```
#[derive(Clone, Default)]
pub struct Api {
    functions: IndexMap<String, ApiFn>,
}

impl Api {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function returning a typed event.
    pub fn with<E, Func>(mut self, name: impl Into<String>, f: Func) -> Self
    where
        E: Event,
        Func: Fn(serde_json::Value) -> anyhow::Result<E> + Send + Sync + 'static,
    {
        let erased: ApiFn = Arc::new(move |payload| {
            let event = f(payload)?;
            Ok(Arc::new(event) as AnyEvent)
        });
        self.functions.insert(name.into(), erased);
        self
    }

    /// Register a function that deserializes the payload straight into `E`.
    pub fn with_deserialize<E>(self, name: impl Into<String>) -> Self
    where
        E: Event + DeserializeOwned,
    {
        self.with(name, |payload| {
            serde_json::from_value::<E>(payload)
                .with_context(|| format!("invalid payload for {}", std::any::type_name::<E>()))
        })
    }

    /// Call a function by name.
    pub fn call(&self, name: &str, payload: serde_json::Value) -> anyhow::Result<AnyEvent> {
        let f = self
            .functions
            .get(name)
            .ok_or_else(|| anyhow!("no api function named '{}'", name))?;
        f(payload)
    }

    pub fn get(&self, name: &str) -> Option<&ApiFn> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}

/// A reducer that owns one slice of the state tree.
///
/// # Stability
///
/// `provides` and `depends` are read once, when the module is registered.
/// A module that wants a private slice should mint a [`SliceKey::symbol`]
/// at construction and return it from `provides`.
///
/// # Example
///
/// ```ignore
/// struct Visible;
///
/// impl Module for Visible {
///     type State = Vec<Todo>;
///     type Event = TodoEvent;
///     type Effect = ();
///
///     fn provides(&self) -> SliceKey {
///         "visible".into()
///     }
///
///     fn depends(&self) -> Vec<SliceKey> {
///         vec!["todos".into(), "filter".into()]
///     }
///
///     fn initial_state(&self) -> Vec<Todo> {
///         Vec::new()
///     }
///
///     fn transition(
///         &self,
///         _state: &Vec<Todo>,
///         _event: &TodoEvent,
///         deps: &Dependencies<'_>,
///     ) -> Transition<Vec<Todo>, ()> {
///         let todos = deps.get::<Vec<Todo>>(&"todos".into()).cloned().unwrap_or_default();
///         let filter = deps.get::<Filter>(&"filter".into()).copied().unwrap_or_default();
///         Transition::Pure(todos.into_iter().filter(|t| filter.matches(t)).collect())
///     }
/// }
/// ```
pub trait Module: Send + Sync + 'static {
    /// The slice state this module owns.
    type State: Send + Sync + 'static;

    /// The event type this module reacts to.
    type Event: Event;

    /// The effect descriptions this module may produce.
    type Effect: Send + Sync + 'static;

    /// The slice key this module owns.
    fn provides(&self) -> SliceKey;

    /// Slice keys this module reads but does not own.
    fn depends(&self) -> Vec<SliceKey> {
        Vec::new()
    }

    /// State used when the slice is absent.
    fn initial_state(&self) -> Self::State;

    /// Compute the next slice state.
    ///
    /// # Guarantees
    ///
    /// - Called synchronously, in dependency order
    /// - Every dependency that sorts earlier has already transitioned for this event
    fn transition(
        &self,
        state: &Self::State,
        event: &Self::Event,
        deps: &Dependencies<'_>,
    ) -> Transition<Self::State, Self::Effect>;

    /// React to an event of any other type.
    ///
    /// Runs in the same fold position as `transition`, so dependencies have
    /// already moved for this event. `None` leaves the slice untouched; a
    /// derived slice returns its recomputed value.
    fn observe(
        &self,
        _state: &Self::State,
        _event: &dyn Any,
        _deps: &Dependencies<'_>,
    ) -> Option<Transition<Self::State, Self::Effect>> {
        None
    }

    /// Side-channel functions for consumers.
    fn api(&self) -> Api {
        Api::new()
    }

    /// Human-readable name for logs and errors.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Tells apart values of one module type that behave differently.
    ///
    /// Registering a module for an occupied key is a no-op only when type and
    /// instance id both match the registered one.
    fn instance_id(&self) -> u64 {
        0
    }
}

/// Outcome of running one module for one event.
#[derive(Default)]
pub(crate) struct Step {
    /// `None` leaves the slice untouched.
    pub slice: Option<Slice>,
    pub effect: Option<Effect>,
}

/// Type-erased module trait for internal use.
pub(crate) trait AnyModule: Send + Sync {
    fn step(
        &self,
        key: &SliceKey,
        slice: Option<&Slice>,
        event: &dyn Any,
        deps: &Dependencies<'_>,
    ) -> Step;
}

impl<M: Module> AnyModule for M {
    fn step(
        &self,
        key: &SliceKey,
        slice: Option<&Slice>,
        event: &dyn Any,
        deps: &Dependencies<'_>,
    ) -> Step {
        let existing = slice.and_then(|s| s.downcast_ref::<M::State>());
        let fresh = match existing {
            Some(_) => None,
            None => Some(self.initial_state()),
        };

        let Some(state) = existing.or(fresh.as_ref()) else {
            return Step::default();
        };

        let next = match event.downcast_ref::<M::Event>() {
            Some(event) => Some(self.transition(state, event, deps)),
            None => self.observe(state, event, deps),
        };

        match next {
            Some(next) => {
                let (next, effect) = next.into_parts();
                Step {
                    slice: Some(Arc::new(next)),
                    effect: effect.map(|e| Effect::new(key.clone(), e)),
                }
            }
            // Untouched: only a freshly materialized slice is written
            None => Step {
                slice: fresh.map(|state| Arc::new(state) as Slice),
                effect: None,
            },
        }
    }
}

/// Shared handle to a registered module.
pub type ModuleRef = Arc<ModuleEntry>;

/// Type-erased wrapper for modules.
///
/// `ModuleEntry` lets a registry hold modules with different state, event
/// and effect types in one collection. The module's `provides`, `depends`
/// and `api` are captured once at construction.
pub struct ModuleEntry {
    inner: Box<dyn AnyModule>,
    provides: SliceKey,
    depends: SmallVec<[SliceKey; 4]>,
    api: Api,
    name: &'static str,
    module_type: TypeId,
    instance_id: u64,
    event_type: TypeId,
}

impl ModuleEntry {
    pub fn new<M: Module>(module: M) -> Self {
        Self {
            provides: module.provides(),
            depends: module.depends().into_iter().collect(),
            api: module.api(),
            name: module.name(),
            module_type: TypeId::of::<M>(),
            instance_id: module.instance_id(),
            event_type: TypeId::of::<M::Event>(),
            inner: Box::new(module),
        }
    }

    /// Check the module contract.
    ///
    /// A module may list its own key in `depends`; that entry is ignored
    /// for ordering.
    pub fn validate(&self) -> Result<(), ModularError> {
        if let Some(name) = self.provides.name() {
            if name.trim().is_empty() {
                return Err(ModularError::invalid(self.name, "provides", "must not be empty"));
            }
        }

        for (i, key) in self.depends.iter().enumerate() {
            if key.name().is_some_and(|name| name.trim().is_empty()) {
                return Err(ModularError::invalid(
                    self.name,
                    "depends",
                    "contains an empty key",
                ));
            }
            if self.depends[..i].contains(key) {
                return Err(ModularError::invalid(
                    self.name,
                    "depends",
                    format!("lists `{}` more than once", key),
                ));
            }
        }

        if self.api.names().any(|name| name.trim().is_empty()) {
            return Err(ModularError::invalid(
                self.name,
                "api",
                "contains a function with an empty name",
            ));
        }

        Ok(())
    }

    pub(crate) fn step(
        &self,
        slice: Option<&Slice>,
        event: &dyn Any,
        deps: &Dependencies<'_>,
    ) -> Step {
        self.inner.step(&self.provides, slice, event, deps)
    }

    pub fn provides(&self) -> &SliceKey {
        &self.provides
    }

    pub fn depends(&self) -> &[SliceKey] {
        &self.depends
    }

    /// Whether `key` is the module's own slice or one of its declared dependencies.
    pub fn declares(&self, key: &SliceKey) -> bool {
        &self.provides == key || self.depends.contains(key)
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// TypeId of the module implementation.
    pub fn module_type(&self) -> TypeId {
        self.module_type
    }

    /// Whether `other` is the same module: same implementation type and
    /// same instance id.
    pub fn is_same_module(&self, other: &ModuleEntry) -> bool {
        self.module_type == other.module_type && self.instance_id == other.instance_id
    }

    /// Check if the given event reaches this module's typed `transition`.
    pub fn handles_event(&self, event: &dyn Any) -> bool {
        event.type_id() == self.event_type
    }
}

impl fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("name", &self.name)
            .field("provides", &self.provides)
            .field("depends", &self.depends)
            .field("api", &self.api)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Closure-based modules
// =============================================================================

type TransitionFn<S, E, F> =
    Arc<dyn Fn(&S, &E, &Dependencies<'_>) -> Transition<S, F> + Send + Sync>;

type ObserveFn<S, F> =
    Arc<dyn Fn(&S, &dyn Any, &Dependencies<'_>) -> Option<Transition<S, F>> + Send + Sync>;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// A module assembled from closures by [`ModuleBuilder`].
///
/// Every `build()` mints a new instance id, so two builder modules never
/// count as the same registration.
pub struct FnModule<S, E, F> {
    provides: SliceKey,
    depends: Vec<SliceKey>,
    initial: S,
    transition: TransitionFn<S, E, F>,
    observe: Option<ObserveFn<S, F>>,
    api: Api,
    name: &'static str,
    instance_id: u64,
}

impl<S, E, F> Module for FnModule<S, E, F>
where
    S: Clone + Send + Sync + 'static,
    E: Event,
    F: Send + Sync + 'static,
{
    type State = S;
    type Event = E;
    type Effect = F;

    fn provides(&self) -> SliceKey {
        self.provides.clone()
    }

    fn depends(&self) -> Vec<SliceKey> {
        self.depends.clone()
    }

    fn initial_state(&self) -> S {
        self.initial.clone()
    }

    fn transition(&self, state: &S, event: &E, deps: &Dependencies<'_>) -> Transition<S, F> {
        (self.transition)(state, event, deps)
    }

    fn observe(&self, state: &S, event: &dyn Any, deps: &Dependencies<'_>) -> Option<Transition<S, F>> {
        self.observe.as_ref().and_then(|observe| observe(state, event, deps))
    }

    fn api(&self) -> Api {
        self.api.clone()
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn instance_id(&self) -> u64 {
        self.instance_id
    }
}

/// Builder for closure-based modules.
///
/// # Example
///
/// ```ignore
/// let counter = ModuleBuilder::<i64, CounterEvent>::new()
///     .provides("counter")
///     .initial(0)
///     .transition(|count, event, _deps| match event {
///         CounterEvent::Increment => Transition::Pure(count + 1),
///         CounterEvent::Reset => Transition::Pure(0),
///     })
///     .build()?;
/// ```
pub struct ModuleBuilder<S, E, F = ()> {
    provides: Option<SliceKey>,
    depends: Vec<SliceKey>,
    initial: Option<S>,
    transition: Option<TransitionFn<S, E, F>>,
    observe: Option<ObserveFn<S, F>>,
    api: Api,
    name: &'static str,
}

impl<S, E, F> Default for ModuleBuilder<S, E, F>
where
    S: Clone + Send + Sync + 'static,
    E: Event,
    F: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, E, F> ModuleBuilder<S, E, F>
where
    S: Clone + Send + Sync + 'static,
    E: Event,
    F: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            provides: None,
            depends: Vec::new(),
            initial: None,
            transition: None,
            observe: None,
            api: Api::new(),
            name: "ModuleBuilder",
        }
    }

    /// Set the owned slice. Without it the module gets a private symbol key.
    pub fn provides(mut self, key: impl Into<SliceKey>) -> Self {
        self.provides = Some(key.into());
        self
    }

    pub fn depends<K: Into<SliceKey>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.depends.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn initial(mut self, state: S) -> Self {
        self.initial = Some(state);
        self
    }

    pub fn transition<Func>(mut self, f: Func) -> Self
    where
        Func: Fn(&S, &E, &Dependencies<'_>) -> Transition<S, F> + Send + Sync + 'static,
    {
        self.transition = Some(Arc::new(f));
        self
    }

    /// Handle events of other types, see [`Module::observe`].
    pub fn observe<Func>(mut self, f: Func) -> Self
    where
        Func: Fn(&S, &dyn Any, &Dependencies<'_>) -> Option<Transition<S, F>> + Send + Sync + 'static,
    {
        self.observe = Some(Arc::new(f));
        self
    }

    pub fn api(mut self, api: Api) -> Self {
        self.api = api;
        self
    }

    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Assemble the module, failing with `InvalidModule` on a missing field.
    pub fn build(self) -> Result<FnModule<S, E, F>, ModularError> {
        let transition = self
            .transition
            .ok_or_else(|| ModularError::invalid(self.name, "transition", "is required"))?;
        let initial = self
            .initial
            .ok_or_else(|| ModularError::invalid(self.name, "initial", "is required"))?;

        Ok(FnModule {
            provides: self
                .provides
                .unwrap_or_else(|| SliceKey::symbol("private-module")),
            depends: self.depends,
            initial,
            transition,
            observe: self.observe,
            api: self.api,
            name: self.name,
            instance_id: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
        })
    }
}
