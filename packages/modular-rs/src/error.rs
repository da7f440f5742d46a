//! Structured error types for the modular runtime.
//!
//! `ModularError` provides pattern-matchable errors instead of generic
//! `anyhow::Error`. Every variant is fail-fast: the engine never attempts a
//! partial composition or a silent fallback once one of these is raised.
//!
//! # The Error Boundary Rule
//!
//! > **Graph errors are structured; edge errors are `anyhow`.**
//!
//! - `ModularError` is returned by registry, compiler and container operations
//! - `anyhow` is used at the edges (api functions, configuration loading)
//!
//! # Example
//!
//! ```ignore
//! use modular::ModularError;
//!
//! match store.add_module(TodoModule) {
//!     Ok(_) => {}
//!     Err(ModularError::CircularDependency { keys }) => {
//!         eprintln!("cycle between {:?}", keys);
//!     }
//!     Err(e) => eprintln!("registration failed: {}", e),
//! }
//! ```

use std::fmt;

use thiserror::Error;

use crate::core::SliceKey;

/// Structured error type for composition operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModularError {
    /// A module's shape violates the module contract.
    ///
    /// Raised synchronously at registration (or at `ModuleBuilder::build`);
    /// the registration does not proceed.
    #[error("invalid module {module}: `{field}` {reason}")]
    InvalidModule {
        /// Type name of the offending module.
        module: &'static str,
        /// The missing or malformed field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The dependency graph has no valid topological order.
    #[error("circular dependency between {}", KeyList(.keys))]
    CircularDependency {
        /// Keys that could not be ordered.
        keys: Vec<SliceKey>,
    },

    /// Unmet dependencies are supplied neither by the base state nor by the
    /// external-dependency map.
    #[error(
        "missing external dependencies {}: the base state or external map must provide them",
        KeyList(.keys)
    )]
    MissingExternalDependency {
        /// The keys nobody supplies.
        keys: Vec<SliceKey>,
    },
}

impl ModularError {
    /// Stable tag for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ModularError::InvalidModule { .. } => "invalid_module",
            ModularError::CircularDependency { .. } => "circular_dependency",
            ModularError::MissingExternalDependency { .. } => "missing_external_dependency",
        }
    }

    pub(crate) fn invalid(
        module: &'static str,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        ModularError::InvalidModule {
            module,
            field,
            reason: reason.into(),
        }
    }
}

/// Comma-separated key list for error messages.
struct KeyList<'a>(&'a [SliceKey]);

impl fmt::Display for KeyList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_module_display() {
        let err = ModularError::invalid("TodoModule", "provides", "must not be empty");
        assert_eq!(
            err.to_string(),
            "invalid module TodoModule: `provides` must not be empty"
        );
        assert_eq!(err.kind(), "invalid_module");
    }

    #[test]
    fn test_circular_dependency_names_keys() {
        let err = ModularError::CircularDependency {
            keys: vec!["x".into(), "y".into()],
        };
        assert_eq!(err.to_string(), "circular dependency between x, y");
    }

    #[test]
    fn test_missing_external_dependency_names_keys() {
        let err = ModularError::MissingExternalDependency {
            keys: vec!["session".into()],
        };
        assert!(err.to_string().contains("missing external dependencies session"));
        assert_eq!(err.kind(), "missing_external_dependency");
    }

    #[test]
    fn test_error_is_pattern_matchable() {
        let err = ModularError::CircularDependency {
            keys: vec!["a".into()],
        };

        match &err {
            ModularError::CircularDependency { keys } => {
                assert_eq!(keys, &vec![SliceKey::from("a")]);
            }
            _ => panic!("Expected CircularDependency"),
        }
    }

    #[test]
    fn test_error_can_be_downcast_from_anyhow() {
        let err: anyhow::Error = ModularError::MissingExternalDependency {
            keys: vec!["a".into()],
        }
        .into();

        let modular_err = err.downcast_ref::<ModularError>();
        assert!(matches!(
            modular_err,
            Some(ModularError::MissingExternalDependency { .. })
        ));
    }
}
