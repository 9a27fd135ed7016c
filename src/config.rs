//! Simulation configuration and environment overrides.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set through [`SimulationBuilder`](crate::SimulationBuilder) methods
//! 2. **Environment variables**: values from `CHANSIM_*` variables
//! 3. **Defaults**: [`SimConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `CHANSIM_POOL_CAPACITY` | `usize` | `pool_capacity` |
//! | `CHANSIM_DEFAULT_STACK_SIZE` | `usize` | `default_stack_size` |
//! | `CHANSIM_POLICY` | `lazy` / `time-ordered` | `policy` |

use crate::error::{Result, SimError};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Environment variable name for the task pool capacity.
pub const ENV_POOL_CAPACITY: &str = "CHANSIM_POOL_CAPACITY";
/// Environment variable name for the default task stack size.
pub const ENV_DEFAULT_STACK_SIZE: &str = "CHANSIM_DEFAULT_STACK_SIZE";
/// Environment variable name for the selection scheduling policy.
pub const ENV_POLICY: &str = "CHANSIM_POLICY";

/// Number of default-sized task slots reserved up front.
pub const DEFAULT_POOL_CAPACITY: usize = 100;
/// Stack-size hint, in bytes, of a default-shaped task.
pub const DEFAULT_STACK_SIZE: usize = 0x8000;

/// How suspended selections are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingPolicy {
    /// Selections resolve against whatever is ready when probed; the
    /// scheduler only tracks the lazy time watermark.
    #[default]
    Lazy,
    /// Suspended selections enter a time-ordered queue and are released one
    /// at a time, earliest candidate first, once nothing else can run.
    TimeOrdered,
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingPolicy::Lazy => f.write_str("lazy"),
            SchedulingPolicy::TimeOrdered => f.write_str("time-ordered"),
        }
    }
}

impl FromStr for SchedulingPolicy {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lazy" => Ok(SchedulingPolicy::Lazy),
            "time-ordered" | "time_ordered" | "timeordered" => Ok(SchedulingPolicy::TimeOrdered),
            other => Err(SimError::Config(format!(
                "unknown scheduling policy {other:?}, expected \"lazy\" or \"time-ordered\""
            ))),
        }
    }
}

/// Tunables for a [`Simulation`](crate::Simulation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Default-sized task slots reserved when the simulation is built.
    pub pool_capacity: usize,
    /// Stack-size hint recorded for tasks spawned with [`StackSize::Default`](crate::StackSize::Default).
    pub default_stack_size: usize,
    /// Selection policy.
    pub policy: SchedulingPolicy,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            default_stack_size: DEFAULT_STACK_SIZE,
            policy: SchedulingPolicy::Lazy,
        }
    }
}

impl SimConfig {
    /// Defaults with the `CHANSIM_*` environment applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Checks values that would make a simulation unusable.
    pub fn validate(&self) -> Result<()> {
        if self.default_stack_size == 0 {
            return Err(SimError::Config(
                "default_stack_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Apply environment variable overrides to a [`SimConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut SimConfig) -> Result<()> {
    apply_overrides_with(config, read_env)
}

// Same as `apply_env_overrides`, reading variables through `lookup`.
fn apply_overrides_with(
    config: &mut SimConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(val) = lookup(ENV_POOL_CAPACITY) {
        config.pool_capacity = parse_usize(ENV_POOL_CAPACITY, &val)?;
    }
    if let Some(val) = lookup(ENV_DEFAULT_STACK_SIZE) {
        config.default_stack_size = parse_usize(ENV_DEFAULT_STACK_SIZE, &val)?;
    }
    if let Some(val) = lookup(ENV_POLICY) {
        config.policy = val
            .parse()
            .map_err(|e| SimError::Config(format!("invalid value for {ENV_POLICY}: {e}")))?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize> {
    let val = val.trim();
    let parsed = match val.strip_prefix("0x").or_else(|| val.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => val.parse::<usize>(),
    };

    parsed.map_err(|e| {
        SimError::Config(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_the_task_pool() {
        let config = SimConfig::default();
        assert_eq!(config.pool_capacity, 100);
        assert_eq!(config.default_stack_size, 0x8000);
        assert_eq!(config.policy, SchedulingPolicy::Lazy);
    }

    #[test]
    fn overrides_apply_only_set_variables() {
        let mut config = SimConfig::default();
        apply_overrides_with(&mut config, env(&[(ENV_POOL_CAPACITY, " 8 ")])).unwrap();

        assert_eq!(config.pool_capacity, 8);
        assert_eq!(config.default_stack_size, DEFAULT_STACK_SIZE);
    }

    #[test]
    fn stack_size_accepts_hex() {
        let mut config = SimConfig::default();
        apply_overrides_with(&mut config, env(&[(ENV_DEFAULT_STACK_SIZE, "0x4000")])).unwrap();
        assert_eq!(config.default_stack_size, 0x4000);
    }

    #[test]
    fn policy_parses_both_spellings() {
        let mut config = SimConfig::default();
        apply_overrides_with(&mut config, env(&[(ENV_POLICY, "Time_Ordered")])).unwrap();
        assert_eq!(config.policy, SchedulingPolicy::TimeOrdered);
        assert_eq!(config.policy.to_string(), "time-ordered");
    }

    #[test]
    fn bad_values_name_the_variable() {
        let mut config = SimConfig::default();
        let err = apply_overrides_with(&mut config, env(&[(ENV_POOL_CAPACITY, "lots")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains(ENV_POOL_CAPACITY), "{err}");

        let err = apply_overrides_with(&mut config, env(&[(ENV_POLICY, "random")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains(ENV_POLICY), "{err}");
    }

    #[test]
    fn zero_stack_size_is_rejected() {
        let config = SimConfig {
            default_stack_size: 0,
            ..SimConfig::default()
        };
        assert!(matches!(config.validate(), Err(SimError::Config(_))));
    }

    #[test]
    fn deserializes_with_missing_fields() {
        let config: SimConfig = serde_json::from_str(r#"{"policy":"time-ordered"}"#).unwrap();
        assert_eq!(config.policy, SchedulingPolicy::TimeOrdered);
        assert_eq!(config.pool_capacity, DEFAULT_POOL_CAPACITY);
    }
}
