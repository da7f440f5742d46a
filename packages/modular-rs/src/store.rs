//! The container contract and a basic store.
//!
//! A container holds the current state and the active transition. The
//! enhancer only relies on the [`Container`] trait, so any host that can run
//! a [`TransitionFn`] and swap it at runtime can be enhanced.
//!
//! # Guarantees
//!
//! - **Serialized transitions**: one event at a time, under a single lock
//! - **Swap between events**: a replaced transition is observed by the next event, never mid-event
//! - **Listeners outside the lock**: a listener may dispatch again without deadlocking

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use indexmap::IndexMap;
use tracing::trace;

use crate::compiler::Outcome;
use crate::core::{AnyEvent, Event};
use crate::effect::Effects;
use crate::error::ModularError;

/// A transition over the whole container state.
pub type TransitionFn<S> =
    Arc<dyn Fn(&Arc<S>, &dyn Any) -> Result<Outcome<S>, ModularError> + Send + Sync>;

/// Called with the new state after every dispatch.
pub type Listener<S> = Arc<dyn Fn(&Arc<S>) + Send + Sync>;

/// Dispatched after the transition was replaced, so newly registered
/// modules materialize their slices right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionReplaced;

/// A state container with a replaceable transition.
pub trait Container: Send + Sync {
    type State: Send + Sync + 'static;

    /// Run the active transition for a type-erased event.
    fn dispatch_any(&self, event: AnyEvent) -> Result<Effects, ModularError>;

    /// Run the active transition for a typed event.
    fn dispatch<E: Event>(&self, event: E) -> Result<Effects, ModularError>
    where
        Self: Sized,
    {
        self.dispatch_any(Arc::new(event))
    }

    fn get_state(&self) -> Arc<Self::State>;

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is dropped.
    fn subscribe(&self, listener: Listener<Self::State>) -> Subscription;

    /// Install a new transition and dispatch [`TransitionReplaced`].
    fn replace_transition(
        &self,
        transition: TransitionFn<Self::State>,
    ) -> Result<Effects, ModularError>;
}

/// Handle to a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A transition that leaves the state untouched.
pub fn passthrough<S: Send + Sync + 'static>() -> TransitionFn<S> {
    Arc::new(|state: &Arc<S>, _event: &dyn Any| {
        Ok(Outcome {
            state: Arc::clone(state),
            effects: Effects::None,
        })
    })
}

struct Current<S> {
    state: Arc<S>,
    transition: TransitionFn<S>,
}

type Listeners<S> = Mutex<IndexMap<u64, Listener<S>>>;

/// Basic in-memory [`Container`].
pub struct Store<S> {
    current: Mutex<Current<S>>,
    listeners: Arc<Listeners<S>>,
    next_listener: AtomicU64,
}

impl<S: Send + Sync + 'static> Store<S> {
    pub fn new(transition: TransitionFn<S>, initial: S) -> Self {
        Self {
            current: Mutex::new(Current {
                state: Arc::new(initial),
                transition,
            }),
            listeners: Arc::new(Mutex::new(IndexMap::new())),
            next_listener: AtomicU64::new(0),
        }
    }

    /// A store whose transition leaves the state untouched until replaced.
    pub fn with_state(initial: S) -> Self {
        Self::new(passthrough(), initial)
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    fn notify(&self, state: &Arc<S>) {
        let listeners: Vec<Listener<S>> = lock(&self.listeners).values().cloned().collect();
        for listener in listeners {
            listener(state);
        }
    }
}

impl<S: Send + Sync + 'static> Container for Store<S> {
    type State = S;

    fn dispatch_any(&self, event: AnyEvent) -> Result<Effects, ModularError> {
        let (state, effects) = {
            let mut current = lock(&self.current);
            let outcome = (current.transition)(&current.state, &*event)?;
            current.state = Arc::clone(&outcome.state);
            (outcome.state, outcome.effects)
        };

        trace!(effects = effects.len(), "dispatched");
        self.notify(&state);
        Ok(effects)
    }

    fn get_state(&self) -> Arc<S> {
        Arc::clone(&lock(&self.current).state)
    }

    fn subscribe(&self, listener: Listener<S>) -> Subscription {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).insert(id, listener);

        let listeners: Weak<Listeners<S>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                lock(&listeners).shift_remove(&id);
            }
        })
    }

    fn replace_transition(&self, transition: TransitionFn<S>) -> Result<Effects, ModularError> {
        lock(&self.current).transition = transition;
        self.dispatch_any(Arc::new(TransitionReplaced))
    }
}
