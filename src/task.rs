//! Tasks: identity, logical clock, lifecycle state and spawning.
//!
//! A task wraps an entry future together with everything the scheduler needs
//! to know about it. Each task owns:
//!
//! - a monotonically assigned [`TaskId`]
//! - a logical time that never decreases over its lifetime
//! - its execution context (the entry future), taken out while it runs
//! - a [`TaskState`] telling which queue, if any, currently holds it
//! - debug provenance: an optional name and the spawn site
//!
//! # Spawning
//!
//! Tasks are created through a [`TaskBuilder`], obtained from
//! [`Simulation::task`](crate::Simulation::task) or [`TaskCx::task`]:
//!
//! ```ignore
//! let sim = Simulation::new();
//!
//! let handle = sim
//!     .task()
//!     .name("producer")
//!     .suspended()
//!     .spawn(|cx| async move {
//!         cx.pause(5).await;
//!     })?;
//!
//! sim.start(handle)?;
//! sim.run();
//! ```
//!
//! # Storage
//!
//! Default-sized tasks are served from a pool reserved when the simulation is
//! built; any other stack size, and pool overflow, gets a dedicated slot that
//! is released when the task exits. See [`Allocation`].

use crate::channel::ChannelId;
use crate::error::{Result, SimError};
use crate::runtime::{Kernel, TaskCx, TaskFuture};
use crate::time::LogicalTime;
pub use crate::utils::slab::Allocation;

use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::rc::Rc;
use tracing::debug;

/// Name reported for tasks spawned without one.
pub const UNNAMED_TASK: &str = "-unknown-";

/// Identity of a task, unique for the lifetime of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    /// The raw numeric id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a task in the simulation's task storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TaskKey(pub(crate) usize);

/// Handle returned when a task is spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    pub(crate) id: TaskId,
    pub(crate) key: TaskKey,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

/// Where a task currently is in its lifecycle.
///
/// A task sits in at most one scheduler or channel queue at a time; the
/// state says which one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Spawned suspended; waiting for an explicit start.
    Created,
    /// In the ready queue.
    Ready,
    /// Currently executing.
    Running,
    /// In the timer queue.
    Sleeping,
    /// Parked on a channel's sender queue.
    SendBlocked(ChannelId),
    /// Parked on a channel's receiver queue.
    RecvBlocked(ChannelId),
    /// Suspended on a selection, waiting for a linked channel to change.
    Selecting,
    /// Queued for a time-ordered choice.
    Choosing,
    /// Suspended on something the scheduler does not know about.
    Stalled,
    /// Finished; about to be removed.
    Exited,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Created => f.write_str("created"),
            TaskState::Ready => f.write_str("ready"),
            TaskState::Running => f.write_str("running"),
            TaskState::Sleeping => f.write_str("sleeping"),
            TaskState::SendBlocked(channel) => write!(f, "blocked sending on {channel}"),
            TaskState::RecvBlocked(channel) => write!(f, "blocked receiving on {channel}"),
            TaskState::Selecting => f.write_str("selecting"),
            TaskState::Choosing => f.write_str("choosing"),
            TaskState::Stalled => f.write_str("stalled"),
            TaskState::Exited => f.write_str("exited"),
        }
    }
}

/// Stack-size hint for a task.
///
/// Tasks run as state machines and have no real stack; the hint only decides
/// whether the task is served from the pre-allocated pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StackSize {
    /// The configured default size (0x8000 bytes unless overridden).
    #[default]
    Default,
    /// An explicit size in bytes. Zero means the default.
    Bytes(usize),
}

impl StackSize {
    pub(crate) fn resolve(self, default: usize) -> usize {
        match self {
            StackSize::Default | StackSize::Bytes(0) => default,
            StackSize::Bytes(n) => n,
        }
    }
}

pub(crate) struct Task<Tm> {
    pub(crate) id: TaskId,
    pub(crate) name: Option<String>,
    pub(crate) location: &'static Location<'static>,
    pub(crate) stack_size: usize,
    pub(crate) time: Tm,
    pub(crate) state: TaskState,
    pub(crate) context: Option<TaskFuture>,
    pub(crate) exit_code: Option<i32>,
    /// Set when a time-ordered choice picked this task.
    pub(crate) granted: bool,
}

impl<Tm: LogicalTime> Task<Tm> {
    pub(crate) fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNNAMED_TASK)
    }

    /// Debug identity, e.g. `[Task  3 (producer), created at src/main.rs:12]`.
    pub(crate) fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!(
                "[Task {:2} ({}), created at {}:{}]",
                self.id.0,
                name,
                self.location.file(),
                self.location.line()
            ),
            None => format!(
                "[Task {:2}, created at {}:{}]",
                self.id.0,
                self.location.file(),
                self.location.line()
            ),
        }
    }
}

/// Configures and spawns a task.
///
/// # Example
/// ```ignore
/// let handle = sim.task().name("worker").stack_size(StackSize::Bytes(1 << 16)).spawn(|cx| async move {
///     cx.yield_now().await;
/// })?;
/// ```
pub struct TaskBuilder<'a, Tm: LogicalTime> {
    kernel: &'a Rc<RefCell<Kernel<Tm>>>,
    name: Option<String>,
    stack_size: StackSize,
    suspended: bool,
    start_at: Option<Tm>,
}

impl<'a, Tm: LogicalTime> TaskBuilder<'a, Tm> {
    pub(crate) fn new(kernel: &'a Rc<RefCell<Kernel<Tm>>>) -> Self {
        Self {
            kernel,
            name: None,
            stack_size: StackSize::Default,
            suspended: false,
            start_at: None,
        }
    }

    /// Debug name used in traces and reports.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, stack_size: StackSize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Do not make the task runnable until it is started explicitly.
    pub fn suspended(mut self) -> Self {
        self.suspended = true;
        self
    }

    /// Initial logical time of the task. Tasks start at zero otherwise.
    pub fn start_at(mut self, time: Tm) -> Self {
        self.start_at = Some(time);
        self
    }

    /// Creates the task and, unless suspended, appends it to the ready queue.
    ///
    /// The entry closure receives the task's [`TaskCx`] and returns the future
    /// the task runs. When that future completes the task exits with status 0.
    ///
    /// # Errors
    /// Returns [`SimError::Allocation`] if task storage cannot grow.
    #[track_caller]
    pub fn spawn<F, Fut>(self, entry: F) -> Result<TaskHandle>
    where
        F: FnOnce(TaskCx<Tm>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let location = Location::caller();

        let handle = {
            let mut kernel = self.kernel.borrow_mut();
            let stack_size = self.stack_size.resolve(kernel.config.default_stack_size);
            let task = Task {
                id: kernel.next_task_id(),
                name: self.name,
                location,
                stack_size,
                time: self.start_at.unwrap_or_else(Tm::zero),
                state: TaskState::Created,
                context: None,
                exit_code: None,
                granted: false,
            };
            kernel.insert_task(task)?
        };

        // The entry may use its context right away, so the kernel is not
        // borrowed while it runs.
        let cx = TaskCx::new(self.kernel.clone(), handle);
        let future: TaskFuture = Box::pin(entry(cx));

        let mut kernel = self.kernel.borrow_mut();
        let task = kernel.task_mut(handle.key);
        task.context = Some(future);

        debug!(
            task = %handle.id,
            name = task.name(),
            stack_size = task.stack_size,
            suspended = self.suspended,
            "spawned task"
        );

        if !self.suspended {
            kernel.make_ready(handle.key);
        }

        Ok(handle)
    }
}

/// Makes a suspended task runnable.
///
/// Starting a task that was not spawned suspended, or was already started,
/// has no effect.
pub(crate) fn start<Tm: LogicalTime>(kernel: &mut Kernel<Tm>, handle: TaskHandle) -> Result<()> {
    let state = kernel
        .lookup(handle)
        .map(|task| task.state)
        .ok_or(SimError::UnknownTask(handle.id))?;

    if state == TaskState::Created {
        kernel.make_ready(handle.key);
    }
    Ok(())
}
