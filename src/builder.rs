//! Fluent builder for Simulation construction.
//!
//! Provides a builder pattern interface for creating and configuring
//! [`Simulation`] instances: task pool sizing, scheduling policy, channel
//! tracing and the drain hook.

use crate::config::{self, SchedulingPolicy, SimConfig};
use crate::error::Result;
use crate::runtime::{DrainHook, RunReport, Simulation};
use crate::time::LogicalTime;
use crate::trace::{TraceSink, Tracer};

use std::rc::Rc;

/// Builder for constructing Simulation instances with fluent API.
///
/// Values set through builder methods take precedence over `CHANSIM_*`
/// environment variables, which take precedence over the base configuration.
///
/// # Example
/// ```ignore
/// let mut sim = SimulationBuilder::<u64>::new()
///     .pool_capacity(16)
///     .trace(TraceLog::new())
///     .on_drain(|report| println!("done after {} steps", report.steps))
///     .build()?;
/// ```
pub struct SimulationBuilder<Tm: LogicalTime = u64> {
    base: SimConfig,
    pool_capacity: Option<usize>,
    default_stack_size: Option<usize>,
    policy: Option<SchedulingPolicy>,
    use_env: bool,
    trace: Option<Box<dyn TraceSink>>,
    on_drain: Option<DrainHook<Tm>>,
}

impl<Tm: LogicalTime> Default for SimulationBuilder<Tm> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tm: LogicalTime> SimulationBuilder<Tm> {
    /// Creates a new simulation builder.
    ///
    /// Initializes a builder with the default configuration and environment
    /// overrides enabled.
    pub fn new() -> Self {
        Self {
            base: SimConfig::default(),
            pool_capacity: None,
            default_stack_size: None,
            policy: None,
            use_env: true,
            trace: None,
            on_drain: None,
        }
    }

    /// Replaces the base configuration.
    pub fn config(mut self, config: SimConfig) -> Self {
        self.base = config;
        self
    }

    /// Number of default-sized task slots reserved up front.
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = Some(capacity);
        self
    }

    /// Stack-size hint of a default-shaped task.
    pub fn default_stack_size(mut self, bytes: usize) -> Self {
        self.default_stack_size = Some(bytes);
        self
    }

    pub fn policy(mut self, policy: SchedulingPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Ignores `CHANSIM_*` environment variables.
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// Enables timed channels: every channel created on the simulation emits
    /// enter and exit records to `sink`.
    pub fn trace(mut self, sink: impl TraceSink + 'static) -> Self {
        self.trace = Some(Box::new(sink));
        self
    }

    /// Called with the run report each time [`Simulation::run`] drains.
    pub fn on_drain(mut self, hook: impl FnMut(&RunReport<Tm>) + 'static) -> Self {
        self.on_drain = Some(Box::new(hook));
        self
    }

    /// Resolves the configuration without building a simulation.
    pub fn resolve_config(&self) -> Result<SimConfig> {
        let mut config = self.base.clone();

        if self.use_env {
            config::apply_env_overrides(&mut config)?;
        }
        if let Some(capacity) = self.pool_capacity {
            config.pool_capacity = capacity;
        }
        if let Some(bytes) = self.default_stack_size {
            config.default_stack_size = bytes;
        }
        if let Some(policy) = self.policy {
            config.policy = policy;
        }

        config.validate()?;
        Ok(config)
    }

    /// Builds and returns a configured Simulation instance.
    ///
    /// # Errors
    /// Fails if an environment override is malformed, the configuration is
    /// invalid, or the task pool cannot be reserved.
    pub fn build(self) -> Result<Simulation<Tm>> {
        let config = self.resolve_config()?;
        let tracer = self.trace.map(|sink| Rc::new(Tracer::new(sink)));

        Simulation::from_parts(config, tracer, self.on_drain)
    }
}
