//! Conversion between a host's state container and the plain [`StateTree`]
//! the engine folds over.
//!
//! A host that keeps its state in its own shape (a struct with router data,
//! a persistent map, ...) supplies a codec. `decode` must be lossless for the
//! keys the engine touches; `encode` writes the tree back and leaves any
//! container-internal data alone.

use std::sync::Arc;

use crate::core::{SliceKey, StateTree};

/// Two-way mapping between a container `C` and a [`StateTree`].
pub trait StateCodec<C>: Send + Sync + 'static {
    /// Produce the plain tree from the container.
    fn decode(&self, container: &C) -> StateTree;

    /// Write `tree` back into a copy of `container`.
    fn encode(&self, container: &C, tree: StateTree) -> C;

    /// Whether the container currently holds `key`.
    fn contains(&self, container: &C, key: &SliceKey) -> bool {
        self.decode(container).contains_key(key)
    }
}

/// Codec for hosts that use [`StateTree`] directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl StateCodec<StateTree> for IdentityCodec {
    fn decode(&self, container: &StateTree) -> StateTree {
        container.clone()
    }

    fn encode(&self, _container: &StateTree, tree: StateTree) -> StateTree {
        tree
    }

    fn contains(&self, container: &StateTree, key: &SliceKey) -> bool {
        container.contains_key(key)
    }
}

type DecodeFn<C> = Arc<dyn Fn(&C) -> StateTree + Send + Sync>;
type EncodeFn<C> = Arc<dyn Fn(&C, StateTree) -> C + Send + Sync>;

/// Codec assembled from a pair of closures.
///
/// ```ignore
/// let codec = FnCodec::new(
///     |app: &AppState| app.slices.clone(),
///     |app: &AppState, slices| AppState { slices, ..app.clone() },
/// );
/// ```
pub struct FnCodec<C> {
    decode: DecodeFn<C>,
    encode: EncodeFn<C>,
}

impl<C> FnCodec<C> {
    pub fn new<D, E>(decode: D, encode: E) -> Self
    where
        D: Fn(&C) -> StateTree + Send + Sync + 'static,
        E: Fn(&C, StateTree) -> C + Send + Sync + 'static,
    {
        Self {
            decode: Arc::new(decode),
            encode: Arc::new(encode),
        }
    }
}

impl<C> Clone for FnCodec<C> {
    fn clone(&self) -> Self {
        Self {
            decode: Arc::clone(&self.decode),
            encode: Arc::clone(&self.encode),
        }
    }
}

impl<C: 'static> StateCodec<C> for FnCodec<C> {
    fn decode(&self, container: &C) -> StateTree {
        (self.decode)(container)
    }

    fn encode(&self, container: &C, tree: StateTree) -> C {
        (self.encode)(container, tree)
    }
}
