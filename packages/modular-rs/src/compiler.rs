//! Compiles a sorted module set into one transition function.
//!
//! ```text
//! state ──decode──► tree ──► m1 ──► m2 ──► ... ──► mN ──encode──► state'
//!                           │      │              │
//!                           └──────┴──── effects ─┴──► optimize_batch
//! ```
//!
//! Fold order is the sorted order, so every module observes the values its
//! dependencies already produced for the same event.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::codec::StateCodec;
use crate::config::ModularConfig;
use crate::core::{SliceKey, StateTree};
use crate::effect::{optimize_batch, Effects};
use crate::module::ModuleRef;
use crate::snapshot::Dependencies;
use crate::sort::SortedModules;

/// Result of running a compiled transition.
#[derive(Debug)]
pub struct Outcome<C> {
    pub state: Arc<C>,
    pub effects: Effects,
}

/// An immutable transition function over one registry snapshot.
pub struct CompiledEngine<C> {
    modules: Vec<ModuleRef>,
    by_provides: IndexMap<SliceKey, ModuleRef>,
    unmet: Vec<SliceKey>,
    retired: Vec<SliceKey>,
    codec: Arc<dyn StateCodec<C>>,
    config: ModularConfig,
}

/// Build the engine for `sorted`.
///
/// `retired` lists keys of modules that were removed from the registry.
/// Their slices are dropped from the state on every transition, except
/// those still provided or still an unmet dependency of a remaining module.
pub fn compile<C: 'static>(
    sorted: SortedModules,
    retired: impl IntoIterator<Item = SliceKey>,
    codec: Arc<dyn StateCodec<C>>,
    config: ModularConfig,
) -> CompiledEngine<C> {
    let by_provides: IndexMap<SliceKey, ModuleRef> = sorted
        .modules
        .iter()
        .map(|module| (module.provides().clone(), Arc::clone(module)))
        .collect();

    let retired: Vec<SliceKey> = retired
        .into_iter()
        .filter(|key| !by_provides.contains_key(key) && !sorted.unmet_dependencies.contains(key))
        .collect();

    debug!(
        modules = sorted.modules.len(),
        unmet = ?sorted.unmet_dependencies,
        retired = ?retired,
        mode = %config.mode,
        "compiled module graph"
    );

    CompiledEngine {
        modules: sorted.modules,
        by_provides,
        unmet: sorted.unmet_dependencies,
        retired,
        codec,
        config,
    }
}

impl<C: 'static> CompiledEngine<C> {
    /// Run every module for `event`, in sorted order.
    ///
    /// With no modules and no retired slice present the input state is
    /// returned unchanged (pointer-equal).
    pub fn transition(&self, state: &Arc<C>, event: &dyn Any, externals: &StateTree) -> Outcome<C> {
        if self.modules.is_empty()
            && !self
                .retired
                .iter()
                .any(|key| self.codec.contains(state, key))
        {
            trace!("no modules registered, passing state through");
            return Outcome {
                state: Arc::clone(state),
                effects: Effects::None,
            };
        }

        let mut tree = self.codec.decode(state);
        for key in &self.retired {
            if tree.remove(key).is_some() {
                debug!(key = %key, "dematerialized retired slice");
            }
        }

        let mut effects = Vec::new();
        for module in &self.modules {
            let step = {
                let deps = Dependencies::new(module.provides(), module.depends(), &tree)
                    .with_externals(externals)
                    .with_modules(&self.by_provides);
                let deps = if self.config.restricts_snapshots() {
                    deps
                } else {
                    deps.unrestricted()
                };
                module.step(tree.get_slice(module.provides()), event, &deps)
            };

            if let Some(slice) = step.slice {
                tree.insert_slice(module.provides().clone(), slice);
            }
            if let Some(effect) = step.effect {
                trace!(source = %effect.source(), effect = effect.type_name(), "effect described");
                effects.push(effect);
            }
        }

        Outcome {
            state: Arc::new(self.codec.encode(state, tree)),
            effects: optimize_batch(effects),
        }
    }

    /// Unmet dependencies that neither `state` nor `externals` provides.
    pub fn missing_dependencies(&self, state: &C, externals: &StateTree) -> Vec<SliceKey> {
        self.unmet
            .iter()
            .filter(|key| !externals.contains_key(key) && !self.codec.contains(state, key))
            .cloned()
            .collect()
    }

    /// Modules in fold order.
    pub fn modules(&self) -> &[ModuleRef] {
        &self.modules
    }

    pub fn unmet_dependencies(&self) -> &[SliceKey] {
        &self.unmet
    }

    /// Retired keys this engine dematerializes.
    pub fn retired_keys(&self) -> &[SliceKey] {
        &self.retired
    }

    pub fn config(&self) -> ModularConfig {
        self.config
    }

    pub fn codec(&self) -> &dyn StateCodec<C> {
        self.codec.as_ref()
    }
}

impl<C> fmt::Debug for CompiledEngine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledEngine")
            .field(
                "modules",
                &self.modules.iter().map(|m| m.provides()).collect::<Vec<_>>(),
            )
            .field("unmet", &self.unmet)
            .field("retired", &self.retired)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IdentityCodec;
    use crate::module::{ModuleBuilder, ModuleEntry};
    use crate::sort::sort_modules;
    use crate::{Module, Transition};

    #[derive(Debug, Clone, PartialEq)]
    enum Counter {
        Add(i64),
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Logged(i64);

    fn counter() -> ModuleRef {
        Arc::new(ModuleEntry::new(
            ModuleBuilder::<i64, Counter, Logged>::new()
                .provides("count")
                .initial(0)
                .transition(|count: &i64, Counter::Add(n): &Counter, _: &Dependencies<'_>| {
                    Transition::WithEffect(count + n, Logged(count + n))
                })
                .build()
                .unwrap(),
        ))
    }

    /// Doubles whatever `count` holds after it has already transitioned.
    fn doubled() -> ModuleRef {
        Arc::new(ModuleEntry::new(
            ModuleBuilder::<i64, Counter, Logged>::new()
                .provides("doubled")
                .depends(["count"])
                .initial(0)
                .transition(|_: &i64, _: &Counter, deps: &Dependencies<'_>| {
                    let count = deps.get::<i64>(&"count".into()).copied().unwrap_or_default();
                    Transition::WithEffect(count * 2, Logged(count * 2))
                })
                .build()
                .unwrap(),
        ))
    }

    fn engine(modules: Vec<ModuleRef>, config: ModularConfig) -> CompiledEngine<StateTree> {
        let by_provides = modules
            .into_iter()
            .map(|m| (m.provides().clone(), m))
            .collect();
        let sorted = sort_modules(&by_provides).unwrap();
        let codec: Arc<dyn StateCodec<StateTree>> = Arc::new(IdentityCodec);
        compile(sorted, Vec::new(), codec, config)
    }

    #[test]
    fn test_dependents_see_already_updated_values() {
        // Registered dependent-first; the sort must still run `count` first.
        let engine = engine(vec![doubled(), counter()], ModularConfig::default());
        let state = Arc::new(StateTree::new());

        let outcome = engine.transition(&state, &Counter::Add(3), &StateTree::new());

        assert_eq!(outcome.state.get::<i64>(&"count".into()), Some(&3));
        assert_eq!(outcome.state.get::<i64>(&"doubled".into()), Some(&6));

        let logged: Vec<_> = outcome
            .effects
            .iter()
            .filter_map(|e| e.downcast_ref::<Logged>())
            .cloned()
            .collect();
        assert_eq!(logged, vec![Logged(3), Logged(6)]);
        assert!(matches!(outcome.effects, Effects::Batch(_)));
    }

    #[test]
    fn test_single_effect_is_not_batched() {
        let engine = engine(vec![counter()], ModularConfig::default());
        let outcome = engine.transition(&Arc::new(StateTree::new()), &Counter::Add(1), &StateTree::new());

        assert!(matches!(outcome.effects, Effects::Single(_)));
    }

    #[test]
    fn test_foreign_event_materializes_without_effects() {
        let engine = engine(vec![counter()], ModularConfig::default());

        let outcome = engine.transition(&Arc::new(StateTree::new()), &"init", &StateTree::new());
        assert_eq!(outcome.state.get::<i64>(&"count".into()), Some(&0));
        assert!(outcome.effects.is_none());

        // Existing slice is kept as-is
        let seeded = Arc::new(StateTree::new().with("count", 41_i64));
        let outcome = engine.transition(&seeded, &"init", &StateTree::new());
        assert!(Arc::ptr_eq(
            seeded.get_slice(&"count".into()).unwrap(),
            outcome.state.get_slice(&"count".into()).unwrap()
        ));
    }

    #[test]
    fn test_empty_engine_passes_state_through() {
        let engine = engine(Vec::new(), ModularConfig::default());
        let state = Arc::new(StateTree::new().with("host", 1));

        let outcome = engine.transition(&state, &Counter::Add(1), &StateTree::new());

        assert!(Arc::ptr_eq(&state, &outcome.state));
        assert!(outcome.effects.is_none());
    }

    #[test]
    fn test_retired_slices_are_dematerialized() {
        let sorted = sort_modules(&IndexMap::new()).unwrap();
        let engine = compile(
            sorted,
            vec![SliceKey::from("count")],
            Arc::new(IdentityCodec) as Arc<dyn StateCodec<StateTree>>,
            ModularConfig::default(),
        );
        let state = Arc::new(StateTree::new().with("count", 5_i64).with("host", 1));

        let outcome = engine.transition(&state, &Counter::Add(1), &StateTree::new());

        assert!(!Arc::ptr_eq(&state, &outcome.state));
        assert!(!outcome.state.contains_key(&"count".into()));
        assert!(outcome.state.contains_key(&"host".into()));
    }

    #[test]
    fn test_retired_key_kept_while_still_depended_on() {
        let by_provides = std::iter::once(doubled())
            .map(|m| (m.provides().clone(), m))
            .collect();
        let engine = compile(
            sort_modules(&by_provides).unwrap(),
            vec![SliceKey::from("count")],
            Arc::new(IdentityCodec) as Arc<dyn StateCodec<StateTree>>,
            ModularConfig::default(),
        );

        assert!(engine.retired_keys().is_empty());
        assert_eq!(engine.unmet_dependencies(), &[SliceKey::from("count")]);

        let state = Arc::new(StateTree::new().with("count", 5_i64));
        let outcome = engine.transition(&state, &Counter::Add(0), &StateTree::new());
        assert_eq!(outcome.state.get::<i64>(&"doubled".into()), Some(&10));
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Bump;

    #[derive(Debug, Clone, PartialEq)]
    struct Other;

    struct Source;

    impl Module for Source {
        type State = u32;
        type Event = Bump;
        type Effect = ();

        fn provides(&self) -> SliceKey {
            "a".into()
        }

        fn initial_state(&self) -> u32 {
            0
        }

        fn transition(&self, n: &u32, _: &Bump, _: &Dependencies<'_>) -> Transition<u32, ()> {
            Transition::Pure(n + 1)
        }
    }

    /// Keeps `b = a * 10` for any event, not only its own.
    struct Derived;

    impl Derived {
        fn recompute(deps: &Dependencies<'_>) -> u32 {
            deps.get::<u32>(&"a".into()).copied().unwrap_or_default() * 10
        }
    }

    impl Module for Derived {
        type State = u32;
        type Event = Other;
        type Effect = ();

        fn provides(&self) -> SliceKey {
            "b".into()
        }

        fn depends(&self) -> Vec<SliceKey> {
            vec!["a".into()]
        }

        fn initial_state(&self) -> u32 {
            0
        }

        fn transition(&self, _: &u32, _: &Other, deps: &Dependencies<'_>) -> Transition<u32, ()> {
            Transition::Pure(Self::recompute(deps))
        }

        fn observe(&self, _: &u32, _: &dyn Any, deps: &Dependencies<'_>) -> Option<Transition<u32, ()>> {
            Some(Transition::Pure(Self::recompute(deps)))
        }
    }

    #[test]
    fn test_dependent_recomputes_on_events_of_other_types() {
        let engine = engine(
            vec![Arc::new(ModuleEntry::new(Derived)), Arc::new(ModuleEntry::new(Source))],
            ModularConfig::default(),
        );

        let once = engine.transition(&Arc::new(StateTree::new()), &Bump, &StateTree::new());
        assert_eq!(once.state.get::<u32>(&"a".into()), Some(&1));
        assert_eq!(once.state.get::<u32>(&"b".into()), Some(&10));

        let twice = engine.transition(&once.state, &Bump, &StateTree::new());
        assert_eq!(twice.state.get::<u32>(&"b".into()), Some(&20));

        // `Source` ignores `Other`, `Derived` still sees the current `a`
        let other = engine.transition(&twice.state, &Other, &StateTree::new());
        assert_eq!(other.state.get::<u32>(&"a".into()), Some(&2));
        assert_eq!(other.state.get::<u32>(&"b".into()), Some(&20));
    }

    struct Snooper;

    impl Module for Snooper {
        type State = Option<i64>;
        type Event = Counter;
        type Effect = ();

        fn provides(&self) -> SliceKey {
            "snooper".into()
        }

        fn initial_state(&self) -> Option<i64> {
            None
        }

        fn transition(&self, _: &Option<i64>, _: &Counter, deps: &Dependencies<'_>) -> Transition<Option<i64>, ()> {
            // Reads `count` without declaring it
            Transition::Pure(deps.get::<i64>(&"count".into()).copied())
        }
    }

    #[test]
    fn test_undeclared_reads_hidden_in_development() {
        let engine = engine(
            vec![counter(), Arc::new(ModuleEntry::new(Snooper))],
            ModularConfig::development(),
        );
        let outcome = engine.transition(&Arc::new(StateTree::new()), &Counter::Add(2), &StateTree::new());

        assert_eq!(outcome.state.get::<Option<i64>>(&"snooper".into()), Some(&None));
    }

    #[test]
    fn test_production_snapshot_is_unrestricted() {
        let engine = engine(
            vec![counter(), Arc::new(ModuleEntry::new(Snooper))],
            ModularConfig::production(),
        );
        let outcome = engine.transition(&Arc::new(StateTree::new()), &Counter::Add(2), &StateTree::new());

        assert_eq!(outcome.state.get::<Option<i64>>(&"snooper".into()), Some(&Some(2)));
    }

    #[test]
    fn test_externals_feed_unmet_dependencies() {
        let engine = engine(vec![doubled()], ModularConfig::default());
        let state = StateTree::new();
        let externals = StateTree::new().with("count", 21_i64);

        assert_eq!(engine.missing_dependencies(&state, &StateTree::new()), vec![SliceKey::from("count")]);
        assert!(engine.missing_dependencies(&state, &externals).is_empty());

        let outcome = engine.transition(&Arc::new(state), &Counter::Add(0), &externals);
        assert_eq!(outcome.state.get::<i64>(&"doubled".into()), Some(&42));
        // Externals are read, never written into the tree
        assert!(!outcome.state.contains_key(&"count".into()));
    }
}
