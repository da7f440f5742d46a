//! Testing utilities for modules and enhanced stores.
//!
//! This module provides ergonomic helpers for testing module transitions
//! in isolation, plus a listener that records every state a container
//! publishes.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! modular = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ## Using `assert_transitions!` Macro
//!
//! ```ignore
//! use modular::testing::assert_transitions;
//!
//! let final_count = assert_transitions!(
//!     CounterModule,
//!     0,
//!     CounterEvent::Increment => Transition::Pure(1),
//!     CounterEvent::Reset => Transition::WithEffect(0, Beep),
//! );
//! ```
//!
//! ## Using Fluent Builder
//!
//! ```ignore
//! use modular::testing::TransitionTest;
//!
//! TransitionTest::new(VisibleTodos)
//!     .with_dependency("todos", vec![todo("write docs")])
//!     .with_dependency("filter", Filter::All)
//!     .given(TodoEvent::Refresh)
//!     .expect_no_effect()
//!     .assert_state(|visible| visible.len() == 1);
//! ```

use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::core::{SliceKey, StateTree};
use crate::module::{Module, Transition};
use crate::snapshot::Dependencies;
use crate::store::{lock, Container, Listener, Subscription};

/// Asserts a sequence of event → transition results for a module, threading
/// the state from one line to the next. Evaluates to the final state.
///
/// The module sees an empty, restricted dependency snapshot. Use
/// [`TransitionTest::with_dependency`] when dependencies matter.
///
/// # Panics
///
/// Panics if any transition doesn't match the expected result.
#[macro_export]
macro_rules! assert_transitions {
    ($module:expr, $state:expr, $($event:expr => $expected:expr),+ $(,)?) => {{
        let __tree = $crate::StateTree::new();
        let __owner = $crate::Module::provides(&$module);
        let __declared = $crate::Module::depends(&$module);
        let __deps = $crate::Dependencies::new(&__owner, &__declared, &__tree);
        let mut __state = $state;
        $(
            let __actual = $crate::Module::transition(&$module, &__state, &$event, &__deps);
            assert_eq!(
                __actual, $expected,
                "Unexpected transition for event {:?}\n  expected: {:?}\n  actual: {:?}",
                $event, $expected, __actual
            );
            __state = __actual.into_parts().0;
        )+
        __state
    }};
}

pub use assert_transitions;

/// Fluent test builder for a single module.
///
/// Runs transitions against a private dependency tree, restricted exactly
/// like the development-mode engine restricts it.
pub struct TransitionTest<M: Module> {
    module: M,
    provides: SliceKey,
    depends: Vec<SliceKey>,
    state: M::State,
    dependencies: StateTree,
    last_effect: Option<M::Effect>,
}

impl<M: Module> TransitionTest<M> {
    /// Start from the module's initial state.
    pub fn new(module: M) -> Self {
        Self {
            provides: module.provides(),
            depends: module.depends(),
            state: module.initial_state(),
            dependencies: StateTree::new(),
            last_effect: None,
            module,
        }
    }

    /// Replace the current state.
    pub fn with_state(mut self, state: M::State) -> Self {
        self.state = state;
        self
    }

    /// Seed a slice the module can read through its snapshot.
    pub fn with_dependency<T: Any + Send + Sync>(mut self, key: impl Into<SliceKey>, value: T) -> Self {
        self.dependencies.insert(key, value);
        self
    }

    /// Run one transition and capture its effect.
    pub fn given(mut self, event: M::Event) -> Self {
        let deps = Dependencies::new(&self.provides, &self.depends, &self.dependencies);
        let (next, effect) = self.module.transition(&self.state, &event, &deps).into_parts();
        self.state = next;
        self.last_effect = effect;
        self
    }

    /// Alias of [`given`](Self::given) for follow-up events.
    pub fn then(self, event: M::Event) -> Self {
        self.given(event)
    }

    /// Assert the last transition produced exactly this effect.
    pub fn expect_effect(self, expected: Option<M::Effect>) -> Self
    where
        M::Effect: std::fmt::Debug + PartialEq,
    {
        assert_eq!(
            self.last_effect, expected,
            "Effect mismatch\n  expected: {:?}\n  actual: {:?}",
            expected, self.last_effect
        );
        self
    }

    /// Assert the last transition was `WithEffect`.
    pub fn expect_some_effect(self) -> Self {
        assert!(self.last_effect.is_some(), "Expected an effect, got none");
        self
    }

    /// Assert the last transition was `Pure`.
    pub fn expect_no_effect(self) -> Self
    where
        M::Effect: std::fmt::Debug,
    {
        assert!(
            self.last_effect.is_none(),
            "Expected no effect, got {:?}",
            self.last_effect
        );
        self
    }

    /// Assert the current state equals `expected`.
    pub fn expect_state(self, expected: M::State) -> Self
    where
        M::State: std::fmt::Debug + PartialEq,
    {
        assert_eq!(self.state, expected, "State mismatch");
        self
    }

    /// Assert the current state matches a predicate.
    pub fn assert_state<F>(self, predicate: F) -> Self
    where
        F: FnOnce(&M::State) -> bool,
    {
        assert!(predicate(&self.state), "State predicate failed");
        self
    }

    pub fn state(&self) -> &M::State {
        &self.state
    }

    pub fn last_effect(&self) -> Option<&M::Effect> {
        self.last_effect.as_ref()
    }

    /// The last transition, rebuilt from the captured state and effect.
    pub fn into_transition(self) -> Transition<M::State, M::Effect> {
        match self.last_effect {
            Some(effect) => Transition::WithEffect(self.state, effect),
            None => Transition::Pure(self.state),
        }
    }

    pub fn into_state(self) -> M::State {
        self.state
    }
}

/// Records every state a container publishes.
///
/// # Example
///
/// ```ignore
/// let recorder = RecordingListener::new();
/// let _subscription = recorder.attach(&store);
///
/// store.dispatch(TodoEvent::Cleared)?;
/// assert_eq!(recorder.count(), 1);
/// ```
pub struct RecordingListener<S> {
    states: Arc<Mutex<Vec<Arc<S>>>>,
}

impl<S: Send + Sync + 'static> RecordingListener<S> {
    pub fn new() -> Self {
        Self {
            states: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A listener feeding this recorder.
    pub fn listener(&self) -> Listener<S> {
        let states = Arc::clone(&self.states);
        Arc::new(move |state: &Arc<S>| lock(&states).push(Arc::clone(state)))
    }

    /// Subscribe to `container`.
    pub fn attach<Ctr: Container<State = S>>(&self, container: &Ctr) -> Subscription {
        container.subscribe(self.listener())
    }

    pub fn count(&self) -> usize {
        lock(&self.states).len()
    }

    pub fn states(&self) -> Vec<Arc<S>> {
        lock(&self.states).clone()
    }

    pub fn last(&self) -> Option<Arc<S>> {
        lock(&self.states).last().cloned()
    }

    pub fn clear(&self) {
        lock(&self.states).clear();
    }
}

impl<S: Send + Sync + 'static> Default for RecordingListener<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for RecordingListener<S> {
    fn clone(&self) -> Self {
        Self {
            states: Arc::clone(&self.states),
        }
    }
}
