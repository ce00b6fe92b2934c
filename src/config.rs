//! Runtime configuration (V5-style, figment-based).
//!
//! Layers, lowest to highest precedence: built-in defaults → an optional
//! TOML file → environment variables prefixed `LABBENCH_`. Nested fields use
//! a double underscore as the path separator (e.g. `LABBENCH_TIMEOUTS__TRANSPORT`,
//! `LABBENCH_SIM__RNG_SEED`), so a single underscore inside a snake_case field
//! name survives unsplit. The force-global-simulation toggle (spec §6) is
//! resolved here, once, as one environment source among others — business
//! logic never reads the environment directly (spec §9 REDESIGN FLAGS).

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::LabResult;

/// Timeouts that apply across transports and sessions (spec §5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timeouts {
    /// Default per-transport-call timeout.
    #[serde(with = "humantime_serde")]
    pub transport: Duration,
    /// Default per-connect timeout.
    #[serde(with = "humantime_serde")]
    pub connect: Duration,
    /// Grace period granted to background tasks after a cancellation signal.
    #[serde(with = "humantime_serde")]
    pub task_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            transport: Duration::from_secs(5),
            connect: Duration::from_secs(10),
            task_grace: Duration::from_secs(2),
        }
    }
}

/// Simulation-engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimConfig {
    /// When `true`, a query with no matching rule fails with `Protocol`
    /// instead of returning an empty string (spec §4.1 step 5, §9).
    pub strict_unmatched: bool,
    /// Seed for the simulator's RNG, so `random.uniform` rules are
    /// reproducible in CI (spec §4.6).
    pub rng_seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            strict_unmatched: false,
            rng_seed: 0,
        }
    }
}

/// Replay-transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayConfig {
    /// Whether unconsumed trailing log entries are a fatal error (`true`)
    /// or merely a warning (`false`, the default per spec §4.1).
    pub fatal_on_unconsumed: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            fatal_on_unconsumed: false,
        }
    }
}

/// Top-level runtime configuration, loaded once at process/bench start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Force every bench to simulate regardless of per-bench `simulate: false`.
    /// Set via `LABBENCH_FORCE_SIMULATE=1` or the `force_simulate` TOML key.
    pub force_simulate: bool,
    /// Directory that namespaced profile keys (`vendor/model`) resolve against.
    pub profile_catalog_dir: String,
    pub timeouts: Timeouts,
    pub sim: SimConfig,
    pub replay: ReplayConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            force_simulate: false,
            profile_catalog_dir: "profiles".to_string(),
            timeouts: Timeouts::default(),
            sim: SimConfig::default(),
            replay: ReplayConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from defaults, an optional TOML file, and
    /// `LABBENCH_*` environment variables, in that precedence order.
    pub fn load(toml_path: Option<&Path>) -> LabResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(RuntimeConfig::default()));

        if let Some(path) = toml_path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("LABBENCH_").split("__"));

        let config: RuntimeConfig = figment.extract()?;
        Ok(config)
    }

    /// Load configuration with no file, environment only (used by tests and
    /// by library consumers that manage their own TOML loading).
    pub fn from_env() -> LabResult<Self> {
        Self::load(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_not_forced_simulate() {
        let cfg = RuntimeConfig::default();
        assert!(!cfg.force_simulate);
        assert_eq!(cfg.timeouts.transport, Duration::from_secs(5));
    }

    #[test]
    #[serial_test::serial]
    fn env_var_forces_simulation() {
        std::env::set_var("LABBENCH_FORCE_SIMULATE", "true");
        let cfg = RuntimeConfig::from_env().expect("config loads");
        assert!(cfg.force_simulate);
        std::env::remove_var("LABBENCH_FORCE_SIMULATE");
    }

    #[test]
    #[serial_test::serial]
    fn env_var_overrides_a_nested_snake_case_field() {
        std::env::set_var("LABBENCH_SIM__RNG_SEED", "42");
        std::env::set_var("LABBENCH_SIM__STRICT_UNMATCHED", "true");
        let cfg = RuntimeConfig::from_env().expect("config loads");
        assert_eq!(cfg.sim.rng_seed, 42);
        assert!(cfg.sim.strict_unmatched);
        std::env::remove_var("LABBENCH_SIM__RNG_SEED");
        std::env::remove_var("LABBENCH_SIM__STRICT_UNMATCHED");
    }
}
