//! Dependency ordering for registered modules.
//!
//! Kahn-style, in rounds: each round takes every remaining module whose
//! dependencies are all already placed, in registration order. A round that
//! places nothing means the remainder is cyclic.
//!
//! ```text
//! registered: todos, visible(todos, filter), filter
//! round 1:    todos, filter
//! round 2:    visible
//! ```

use indexmap::{IndexMap, IndexSet};
use tracing::error;

use crate::core::SliceKey;
use crate::error::ModularError;
use crate::module::ModuleRef;

/// Modules in fold order plus the dependencies nobody provides.
#[derive(Debug, Clone, Default)]
pub struct SortedModules {
    pub modules: Vec<ModuleRef>,
    /// Keys the base state must already contain, in first-occurrence order.
    pub unmet_dependencies: Vec<SliceKey>,
}

/// Order modules so every module comes after the modules it depends on.
///
/// A module's own key in its `depends` is ignored. Never returns a partial
/// order: a cycle fails with [`ModularError::CircularDependency`].
pub fn sort_modules(
    modules_by_provides: &IndexMap<SliceKey, ModuleRef>,
) -> Result<SortedModules, ModularError> {
    let mut remaining: IndexSet<&SliceKey> = modules_by_provides.keys().collect();
    let mut sorted = Vec::with_capacity(modules_by_provides.len());

    while !remaining.is_empty() {
        let ready: Vec<&SliceKey> = remaining
            .iter()
            .copied()
            .filter(|key| {
                modules_by_provides[*key]
                    .depends()
                    .iter()
                    .all(|dep| dep == *key || !remaining.contains(dep))
            })
            .collect();

        if ready.is_empty() {
            let keys: Vec<SliceKey> = remaining.into_iter().cloned().collect();
            error!(keys = ?keys, "circular dependency between modules");
            return Err(ModularError::CircularDependency { keys });
        }

        for key in ready {
            remaining.shift_remove(key);
            sorted.push(modules_by_provides[key].clone());
        }
    }

    let mut referenced: IndexSet<&SliceKey> = IndexSet::new();
    for module in &sorted {
        referenced.extend(module.depends());
    }
    let unmet_dependencies = referenced
        .into_iter()
        .filter(|key| !modules_by_provides.contains_key(*key))
        .cloned()
        .collect();

    Ok(SortedModules {
        modules: sorted,
        unmet_dependencies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleBuilder, ModuleEntry};
    use crate::snapshot::Dependencies;
    use crate::Transition;
    use std::sync::Arc;

    fn module(provides: &str, depends: &[&str]) -> ModuleRef {
        let built = ModuleBuilder::<(), ()>::new()
            .provides(provides)
            .depends(depends.iter().copied())
            .initial(())
            .transition(|_: &(), _: &(), _: &Dependencies<'_>| Transition::Pure(()))
            .build()
            .unwrap();
        Arc::new(ModuleEntry::new(built))
    }

    fn registry(modules: Vec<ModuleRef>) -> IndexMap<SliceKey, ModuleRef> {
        modules
            .into_iter()
            .map(|m| (m.provides().clone(), m))
            .collect()
    }

    fn order(sorted: &SortedModules) -> Vec<String> {
        sorted.modules.iter().map(|m| m.provides().to_string()).collect()
    }

    #[test]
    fn test_dependency_sorts_first() {
        let sorted = sort_modules(&registry(vec![module("b", &["a"]), module("a", &[])])).unwrap();

        assert_eq!(order(&sorted), vec!["a", "b"]);
        assert!(sorted.unmet_dependencies.is_empty());
    }

    #[test]
    fn test_rounds_keep_registration_order() {
        let sorted = sort_modules(&registry(vec![
            module("todos", &[]),
            module("visible", &["todos", "filter"]),
            module("filter", &[]),
            module("stats", &["todos"]),
        ]))
        .unwrap();

        // Round 1: todos, filter. Round 2: visible, stats.
        assert_eq!(order(&sorted), vec!["todos", "filter", "visible", "stats"]);
    }

    #[test]
    fn test_unmet_dependencies_after_removal() {
        let sorted = sort_modules(&registry(vec![module("b", &["a"])])).unwrap();

        assert_eq!(order(&sorted), vec!["b"]);
        assert_eq!(sorted.unmet_dependencies, vec![SliceKey::from("a")]);
    }

    #[test]
    fn test_unmet_dependencies_are_deduplicated_in_first_occurrence_order() {
        let sorted = sort_modules(&registry(vec![
            module("a", &["session", "router"]),
            module("b", &["router", "a", "locale"]),
        ]))
        .unwrap();

        assert_eq!(
            sorted.unmet_dependencies,
            vec![
                SliceKey::from("session"),
                SliceKey::from("router"),
                SliceKey::from("locale")
            ]
        );
    }

    #[test]
    fn test_self_dependency_is_ignored() {
        let sorted = sort_modules(&registry(vec![module("todos", &["todos"])])).unwrap();

        assert_eq!(order(&sorted), vec!["todos"]);
        assert!(sorted.unmet_dependencies.is_empty());
    }

    #[test]
    fn test_two_module_cycle() {
        let result = sort_modules(&registry(vec![module("x", &["y"]), module("y", &["x"])]));

        match result {
            Err(ModularError::CircularDependency { keys }) => {
                assert_eq!(keys, vec![SliceKey::from("x"), SliceKey::from("y")]);
            }
            other => panic!("Expected CircularDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_names_only_stuck_keys() {
        let result = sort_modules(&registry(vec![
            module("root", &[]),
            module("p", &["root", "r"]),
            module("q", &["p"]),
            module("r", &["q"]),
            module("leaf", &["root"]),
        ]));

        match result {
            Err(ModularError::CircularDependency { keys }) => {
                assert_eq!(keys, vec![SliceKey::from("p"), SliceKey::from("q"), SliceKey::from("r")]);
            }
            other => panic!("Expected CircularDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_set() {
        let sorted = sort_modules(&IndexMap::new()).unwrap();
        assert!(sorted.modules.is_empty());
        assert!(sorted.unmet_dependencies.is_empty());
    }

    #[test]
    fn test_random_acyclic_graphs_sort_correctly() {
        let mut rng = fastrand::Rng::with_seed(7);

        for _ in 0..200 {
            let n = rng.usize(1..12);
            // Only depend on lower indices so the graph is acyclic,
            // then register in shuffled order.
            let mut modules: Vec<ModuleRef> = (0..n)
                .map(|i| {
                    let deps: Vec<String> = (0..i)
                        .filter(|_| rng.bool())
                        .map(|j| format!("m{}", j))
                        .collect();
                    let dep_refs: Vec<&str> = deps.iter().map(String::as_str).collect();
                    module(&format!("m{}", i), &dep_refs)
                })
                .collect();
            rng.shuffle(&mut modules);

            let sorted = sort_modules(&registry(modules)).unwrap();
            assert_eq!(sorted.modules.len(), n);

            for (position, m) in sorted.modules.iter().enumerate() {
                for dep in m.depends() {
                    let dep_position = sorted
                        .modules
                        .iter()
                        .position(|other| other.provides() == dep)
                        .unwrap();
                    assert!(
                        dep_position < position,
                        "{} sorted before its dependency {}",
                        m.provides(),
                        dep
                    );
                }
            }
        }
    }
}
