//! Effect descriptions produced by a composed transition.
//!
//! Modules never perform side effects. A module that wants one returns
//! [`Transition::WithEffect`](crate::Transition::WithEffect); the compiler
//! collects those descriptions in fold order and hands them back as a
//! single [`Effects`] value. Executing them is the caller's business.
//!
//! # Batch Optimization
//!
//! ```text
//! []            → Effects::None
//! [e]           → Effects::Single(e)
//! [e1, e2, ...] → Effects::Batch([e1, e2, ...])   (fold order)
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::core::SliceKey;

/// One opaque effect description, tagged with the slice that produced it.
#[derive(Clone)]
pub struct Effect {
    source: SliceKey,
    type_name: &'static str,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Effect {
    pub fn new<F: Any + Send + Sync>(source: SliceKey, payload: F) -> Self {
        Self {
            source,
            type_name: std::any::type_name::<F>(),
            payload: Arc::new(payload),
        }
    }

    /// The slice whose module produced this effect.
    pub fn source(&self) -> &SliceKey {
        &self.source
    }

    /// Type name of the payload, for logging.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn payload_type_id(&self) -> TypeId {
        (*self.payload).type_id()
    }

    pub fn downcast_ref<F: Any>(&self) -> Option<&F> {
        self.payload.downcast_ref::<F>()
    }

    pub fn is<F: Any>(&self) -> bool {
        self.payload.is::<F>()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("source", &self.source)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Optimized effect description for one transition.
#[derive(Debug, Clone, Default)]
pub enum Effects {
    /// No module produced an effect.
    #[default]
    None,
    /// Exactly one module produced an effect.
    Single(Effect),
    /// Several effects, in fold order.
    Batch(Vec<Effect>),
}

impl Effects {
    pub fn is_none(&self) -> bool {
        matches!(self, Effects::None)
    }

    pub fn len(&self) -> usize {
        match self {
            Effects::None => 0,
            Effects::Single(_) => 1,
            Effects::Batch(effects) => effects.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate effects in fold order.
    pub fn iter(&self) -> std::slice::Iter<'_, Effect> {
        match self {
            Effects::None => [].iter(),
            Effects::Single(effect) => std::slice::from_ref(effect).iter(),
            Effects::Batch(effects) => effects.iter(),
        }
    }

    /// Flatten back into a list.
    pub fn into_vec(self) -> Vec<Effect> {
        match self {
            Effects::None => Vec::new(),
            Effects::Single(effect) => vec![effect],
            Effects::Batch(effects) => effects,
        }
    }
}

/// Collapse a list of effects into the smallest equivalent description.
pub fn optimize_batch(mut effects: Vec<Effect>) -> Effects {
    match effects.len() {
        0 => Effects::None,
        1 => match effects.pop() {
            Some(effect) => Effects::Single(effect),
            None => Effects::None,
        },
        _ => Effects::Batch(effects),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Notify(&'static str);

    fn effect(source: &str, label: &'static str) -> Effect {
        Effect::new(SliceKey::from(source), Notify(label))
    }

    #[test]
    fn test_zero_effects_is_none() {
        let effects = optimize_batch(Vec::new());
        assert!(effects.is_none());
        assert_eq!(effects.len(), 0);
        assert_eq!(effects.iter().count(), 0);
    }

    #[test]
    fn test_single_effect_is_unwrapped() {
        let effects = optimize_batch(vec![effect("todos", "saved")]);

        match &effects {
            Effects::Single(e) => {
                assert_eq!(e.downcast_ref::<Notify>(), Some(&Notify("saved")));
                assert_eq!(e.source(), &SliceKey::from("todos"));
            }
            other => panic!("Expected Single, got {:?}", other),
        }
    }

    #[test]
    fn test_many_effects_are_batched_in_order() {
        let effects = optimize_batch(vec![
            effect("a", "first"),
            effect("b", "second"),
            effect("c", "third"),
        ]);

        assert!(matches!(effects, Effects::Batch(_)));
        let labels: Vec<_> = effects
            .iter()
            .filter_map(|e| e.downcast_ref::<Notify>())
            .map(|n| n.0)
            .collect();
        assert_eq!(labels, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_downcast_to_wrong_type_is_none() {
        let e = effect("a", "x");
        assert!(e.is::<Notify>());
        assert!(!e.is::<String>());
        assert!(e.downcast_ref::<String>().is_none());
        assert!(e.type_name().ends_with("Notify"));
        assert_eq!(e.payload_type_id(), TypeId::of::<Notify>());
    }
}
