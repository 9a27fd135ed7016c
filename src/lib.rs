//! Cooperative task scheduler with timing-annotated rendezvous channels.
//!
//! This crate simulates many lightweight tasks that communicate through
//! channels with bounded slack. Every task carries its own logical clock;
//! channel transfers move clocks forward by modeled propagation delay, and the
//! scheduler keeps a lazily advanced watermark to release paused tasks
//! without maintaining a global order over all clocks.
//!
//! # Architecture
//!
//! - **Simulation**: owns the scheduler state and runs tasks until none can run
//! - **TaskCx**: per-task handle for yielding, pausing, exiting and spawning
//! - **ReadyQueue / TimerQueue**: FIFO of runnable tasks and wake-ordered pauses
//! - **Channel**: rendezvous with slack buffering, slot timestamps and probes
//! - **Selection**: channel subscriptions for guarded choice
//! - **Trace**: enter/exit records of channel operations
//! - **SimulationBuilder**: fluent construction with configuration and tracing
//!
//! # Example
//!
//! ```ignore
//! use chansim::{ChannelSpec, Simulation};
//!
//! let mut sim = Simulation::new();
//! let chan = sim.channel::<u32>(ChannelSpec::rendezvous())?;
//!
//! let tx = chan.clone();
//! sim.spawn(move |cx| async move {
//!     tx.send(&cx, 42).await;
//! })?;
//! sim.spawn(move |cx| async move {
//!     assert_eq!(chan.recv(&cx).await, 42);
//! })?;
//!
//! let report = sim.run();
//! assert!(report.is_quiescent());
//! ```

mod builder;
pub mod channel;
pub mod config;
mod error;
mod runtime;
pub mod select;
mod task;
pub mod time;
mod timer;
pub mod trace;
mod utils;

pub use builder::SimulationBuilder;
pub use channel::{Channel, ChannelId, ChannelSpec, DestroyReport, Direction, RecvFuture, SendFuture};
pub use config::{SchedulingPolicy, SimConfig};
pub use error::{Result, SimError};
pub use runtime::yield_now::YieldNow;
pub use runtime::{Exit, ParkedTask, RunReport, Simulation, TaskCx};
pub use select::{Arm, Select, SelectNondet, SelectWait, Selection};
pub use task::{Allocation, StackSize, TaskBuilder, TaskHandle, TaskId, TaskState, UNNAMED_TASK};
pub use time::LogicalTime;
pub use timer::PauseFor;
pub use trace::{JsonLinesSink, TextSink, TraceEvent, TraceKind, TraceLog, TraceSink};
