//! Runtime subsystem modules.

pub(crate) mod context;
pub(crate) mod core;
pub(crate) mod coroutine;
pub(crate) mod queue;
pub mod yield_now;

pub use context::{Exit, TaskCx};
pub use self::core::{ParkedTask, RunReport, Simulation};
pub(crate) use self::core::{DrainHook, Kernel};
pub(crate) use coroutine::TaskFuture;
