//! Runtime configuration.
//!
//! The mode is an explicit value handed to the registry and compiler.
//! [`ModularConfig::from_env`] reads it from `MODULAR_MODE` (and `.env`).

use std::env;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};

/// Environment variable read by [`ModularConfig::from_env`].
pub const MODE_ENV_VAR: &str = "MODULAR_MODE";

/// Checking level of the runtime.
///
/// `Production` skips module validation, skips the unmet-dependency check and
/// hands modules the unrestricted state tree. Behaviour is undefined if the
/// module contract is actually violated in that mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" => Ok(Mode::Production),
            other => Err(anyhow!("unknown mode '{}'", other)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Development => write!(f, "development"),
            Mode::Production => write!(f, "production"),
        }
    }
}

/// Runtime configuration, threaded explicitly into the registry and compiler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModularConfig {
    pub mode: Mode,
}

impl ModularConfig {
    pub fn development() -> Self {
        Self {
            mode: Mode::Development,
        }
    }

    pub fn production() -> Self {
        Self {
            mode: Mode::Production,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let mode = match env::var(MODE_ENV_VAR) {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("{} must be 'development' or 'production'", MODE_ENV_VAR))?,
            Err(_) => Mode::default(),
        };

        Ok(Self { mode })
    }

    pub fn is_production(&self) -> bool {
        self.mode == Mode::Production
    }

    /// Whether module shapes and unmet dependencies are checked.
    pub fn validates(&self) -> bool {
        !self.is_production()
    }

    /// Whether dependency snapshots are restricted to declared keys.
    pub fn restricts_snapshots(&self) -> bool {
        !self.is_production()
    }
}
