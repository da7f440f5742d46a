//! # Modular
//!
//! A reducer-composition runtime where independent modules each own one
//! slice of a state tree, declare which other slices they read, and are
//! folded into a single transition function.
//!
//! ## Core Concepts
//!
//! - [`Module`] = a pure reducer over one slice (`provides`), reading others (`depends`)
//! - [`Registry`] = the persistent set of registered modules
//! - [`CompiledEngine`] = the dependency-ordered fold over a registry snapshot
//! - [`ModularStore`] = a [`Container`] whose transition is that fold, rebuilt as modules come and go
//!
//! ## Architecture
//!
//! ```text
//! add_module / remove_module
//!     │
//!     ▼
//! Registry (persistent) ──► sort_modules ──► compile ──► CompiledEngine
//!                                                            │
//!                                         replace_transition ▼
//! dispatch(event) ──► Container ──► base ──► m1 ──► m2 ──► ... ──► state'
//!                                              │      │
//!                                              └──────┴──► Effects
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One owner per slice** - `provides` is unique across registered modules
//! 2. **Dependencies first** - a module runs after every module it depends on
//! 3. **Pure transitions** - modules describe effects, they never perform them
//! 4. **No cycles** - a cyclic graph is rejected before it is installed
//! 5. **Declared reads only** - in development mode undeclared slices read as absent
//!
//! ## Example
//!
//! ```ignore
//! use modular::{enhance, Container, Dependencies, Module, Registry, SliceKey, StateTree, Store, Transition};
//!
//! #[derive(Debug, Clone)]
//! enum TodoEvent {
//!     Added { text: String },
//!     Cleared,
//! }
//!
//! struct Todos;
//!
//! impl Module for Todos {
//!     type State = Vec<String>;
//!     type Event = TodoEvent;
//!     type Effect = ();
//!
//!     fn provides(&self) -> SliceKey {
//!         "todos".into()
//!     }
//!
//!     fn initial_state(&self) -> Vec<String> {
//!         Vec::new()
//!     }
//!
//!     fn transition(&self, todos: &Vec<String>, event: &TodoEvent, _: &Dependencies<'_>) -> Transition<Vec<String>, ()> {
//!         match event {
//!             TodoEvent::Added { text } => {
//!                 let mut next = todos.clone();
//!                 next.push(text.clone());
//!                 Transition::Pure(next)
//!             }
//!             TodoEvent::Cleared => Transition::Pure(Vec::new()),
//!         }
//!     }
//! }
//!
//! let store = enhance(Store::with_state(StateTree::new()), Registry::default()).build()?;
//! store.add_module(Todos)?;
//! store.dispatch(TodoEvent::Added { text: "Use Rust".into() })?;
//! ```
//!
//! ## What This Is Not
//!
//! Modular is **not**:
//! - An effect runner (effects are returned, never executed)
//! - A persistence layer
//! - Async

// Core modules
mod codec;
mod compiler;
mod config;
mod core;
mod effect;
mod enhancer;
mod error;
mod module;
mod registry;
mod snapshot;
mod sort;
mod store;

// Testing utilities (feature-gated)
#[cfg(feature = "testing")]
pub mod testing;


// Re-export core types
pub use crate::core::{AnyEvent, Event, Slice, SliceKey, StateTree};

// Re-export module contract
pub use module::{Api, ApiFn, FnModule, Module, ModuleBuilder, ModuleEntry, ModuleRef, Transition};

// Re-export error types
pub use crate::error::ModularError;

// Re-export configuration
pub use config::{Mode, ModularConfig, MODE_ENV_VAR};

// Re-export codec types
pub use codec::{FnCodec, IdentityCodec, StateCodec};

// Re-export sorter and compiler
pub use compiler::{compile, CompiledEngine, Outcome};
pub use sort::{sort_modules, SortedModules};

// Re-export snapshot and effect types
pub use effect::{optimize_batch, Effect, Effects};
pub use snapshot::Dependencies;

// Re-export registry
pub use registry::Registry;

// Re-export container types
pub use store::{passthrough, Container, Listener, Store, Subscription, TransitionFn, TransitionReplaced};

// Re-export enhancer types (primary entry point)
pub use enhancer::{enhance, Enhancer, ModularStore};
