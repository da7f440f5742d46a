//! Core types for the modular reducer runtime.
//!
//! # Overview
//!
//! The runtime composes many small transition functions into one:
//! - [`SliceKey`] = the name of a slice of the state tree
//! - [`StateTree`] = the keyed mapping of slices the engine folds over
//! - [`Event`] = facts dispatched into the composed transition
//!
//! Slices are type-erased (`Arc<dyn Any>`) so that modules with unrelated
//! state types can live side by side in one tree. Typed access goes through
//! [`StateTree::get`], which downcasts.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

/// Source of unique ids for symbol keys.
static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(1);

/// Identifier of a slice in the state tree.
///
/// A key is either a plain name or a unique symbol. Two named keys are equal
/// when their names are equal; a symbol is only ever equal to itself (and its
/// clones), regardless of description.
///
/// # Example
///
/// ```ignore
/// use modular::SliceKey;
///
/// let todos = SliceKey::named("todos");
/// assert_eq!(todos, SliceKey::from("todos"));
///
/// let private = SliceKey::symbol("private-module");
/// assert_ne!(private, SliceKey::symbol("private-module"));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SliceKey {
    /// A string key.
    Named(Arc<str>),
    /// A unique key minted by [`SliceKey::symbol`].
    Symbol {
        /// Process-wide unique id.
        id: u64,
        /// Human-readable description (not part of identity).
        description: Arc<str>,
    },
}

impl SliceKey {
    /// Create a named key.
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        SliceKey::Named(name.into())
    }

    /// Mint a new unique symbol key.
    pub fn symbol(description: impl Into<Arc<str>>) -> Self {
        SliceKey::Symbol {
            id: NEXT_SYMBOL.fetch_add(1, Ordering::Relaxed),
            description: description.into(),
        }
    }

    /// Returns true for symbol keys.
    pub fn is_symbol(&self) -> bool {
        matches!(self, SliceKey::Symbol { .. })
    }

    /// The name of a named key, `None` for symbols.
    pub fn name(&self) -> Option<&str> {
        match self {
            SliceKey::Named(name) => Some(name),
            SliceKey::Symbol { .. } => None,
        }
    }
}

impl From<&str> for SliceKey {
    fn from(name: &str) -> Self {
        SliceKey::named(name)
    }
}

impl From<String> for SliceKey {
    fn from(name: String) -> Self {
        SliceKey::named(name)
    }
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceKey::Named(name) => write!(f, "{}", name),
            SliceKey::Symbol { id, description } => write!(f, "Symbol({})#{}", description, id),
        }
    }
}

impl fmt::Debug for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceKey::Named(name) => write!(f, "{:?}", name),
            SliceKey::Symbol { .. } => write!(f, "{}", self),
        }
    }
}

/// Marker trait for events that can be dispatched into a composed transition.
///
/// **Note**: This trait is automatically implemented for any type that is
/// `Clone + Send + Sync + 'static`. You don't need to implement it manually.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone)]
/// enum TodoEvent {
///     Added { text: String },
///     Cleared,
/// }
/// // Event is automatically implemented!
/// ```
pub trait Event: Any + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Event for T {}

/// Type-erased event, as produced by api functions and accepted by
/// [`Container::dispatch_any`](crate::Container::dispatch_any).
pub type AnyEvent = Arc<dyn Any + Send + Sync>;

/// Type-erased slice value.
pub type Slice = Arc<dyn Any + Send + Sync>;

/// Keyed mapping of slices, in insertion order.
///
/// Cloning a tree clones the key list and bumps slice reference counts; the
/// slice values themselves are shared.
#[derive(Clone, Default)]
pub struct StateTree {
    slices: IndexMap<SliceKey, Slice>,
}

impl StateTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with<T: Any + Send + Sync>(mut self, key: impl Into<SliceKey>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a typed value, returning the previous slice.
    pub fn insert<T: Any + Send + Sync>(
        &mut self,
        key: impl Into<SliceKey>,
        value: T,
    ) -> Option<Slice> {
        self.insert_slice(key.into(), Arc::new(value))
    }

    /// Insert an already type-erased slice, returning the previous slice.
    pub fn insert_slice(&mut self, key: SliceKey, slice: Slice) -> Option<Slice> {
        self.slices.insert(key, slice)
    }

    /// Typed read. Returns `None` if the slice is absent or of another type.
    pub fn get<T: Any>(&self, key: &SliceKey) -> Option<&T> {
        self.slices.get(key)?.downcast_ref::<T>()
    }

    /// Untyped read.
    pub fn get_slice(&self, key: &SliceKey) -> Option<&Slice> {
        self.slices.get(key)
    }

    /// Remove a slice, keeping the order of the remaining ones.
    pub fn remove(&mut self, key: &SliceKey) -> Option<Slice> {
        self.slices.shift_remove(key)
    }

    pub fn contains_key(&self, key: &SliceKey) -> bool {
        self.slices.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &SliceKey> {
        self.slices.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SliceKey, &Slice)> {
        self.slices.iter()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

impl FromIterator<(SliceKey, Slice)> for StateTree {
    fn from_iter<I: IntoIterator<Item = (SliceKey, Slice)>>(iter: I) -> Self {
        Self {
            slices: iter.into_iter().collect(),
        }
    }
}

impl fmt::Debug for StateTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTree")
            .field("keys", &self.slices.keys().collect::<Vec<_>>())
            .finish()
    }
}
