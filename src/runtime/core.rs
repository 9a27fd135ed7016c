//! Cooperative scheduler and the simulation that drives it.
//!
//! Exactly one task runs at a time. A task runs until it reaches a
//! suspension point (blocking send or receive, selection wait, pause, yield
//! or exit); the operation updates the queues and the run loop picks the next
//! task from the ready queue.
//!
//! # Consistent time
//!
//! Tasks keep independent logical clocks. The scheduler tracks a watermark:
//! the largest time of any task taken from the ready queue so far. A paused
//! task is released from the timer queue once the watermark reaches its wake
//! time. When nothing is runnable but timers are pending, the watermark jumps
//! to the earliest wake time.

use crate::channel::{Channel, ChannelId, ChannelSpec};
use crate::config::{SchedulingPolicy, SimConfig};
use crate::error::{Result, SimError};
use crate::runtime::coroutine::{Coroutine, Resumed};
use crate::runtime::queue::{ChoiceQueue, Mark, ReadyQueue, TimerQueue};
use crate::task::{self, Task, TaskBuilder, TaskHandle, TaskId, TaskKey, TaskState};
use crate::time::LogicalTime;
use crate::trace::Tracer;
use crate::utils::slab::{Allocation, Slab};
use crate::{SimulationBuilder, TaskCx};

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Scheduler state shared by the simulation and every task context.
pub(crate) struct Kernel<Tm> {
    pub(crate) config: SimConfig,
    tasks: Slab<Task<Tm>>,
    ready: ReadyQueue,
    timers: TimerQueue<Tm>,
    choices: ChoiceQueue<Tm>,
    watermark: Tm,
    current: Option<TaskKey>,
    next_task: u64,
    next_channel: u64,
    exited: BTreeMap<TaskId, i32>,
    pub(crate) tracer: Option<Rc<Tracer>>,
}

impl<Tm: LogicalTime> Kernel<Tm> {
    pub(crate) fn new(config: SimConfig, tracer: Option<Rc<Tracer>>) -> Result<Self> {
        let tasks = Slab::new(config.pool_capacity).map_err(|source| SimError::Allocation {
            what: "task pool",
            source,
        })?;

        Ok(Self {
            config,
            tasks,
            ready: ReadyQueue::new(),
            timers: TimerQueue::new(),
            choices: ChoiceQueue::new(),
            watermark: Tm::zero(),
            current: None,
            next_task: 0,
            next_channel: 1,
            exited: BTreeMap::new(),
            tracer,
        })
    }

    pub(crate) fn next_task_id(&mut self) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        id
    }

    pub(crate) fn next_channel_id(&mut self) -> ChannelId {
        let id = ChannelId(self.next_channel);
        self.next_channel += 1;
        id
    }

    pub(crate) fn insert_task(&mut self, task: Task<Tm>) -> Result<TaskHandle> {
        let id = task.id;
        let pooled = task.stack_size == self.config.default_stack_size;
        let (index, _) = self
            .tasks
            .insert(task, pooled)
            .map_err(|source| SimError::Allocation {
                what: "task",
                source,
            })?;

        Ok(TaskHandle {
            id,
            key: TaskKey(index),
        })
    }

    pub(crate) fn task(&self, key: TaskKey) -> &Task<Tm> {
        &self.tasks[key.0]
    }

    pub(crate) fn task_mut(&mut self, key: TaskKey) -> &mut Task<Tm> {
        &mut self.tasks[key.0]
    }

    /// The live task named by `handle`, if it has not exited.
    pub(crate) fn lookup(&self, handle: TaskHandle) -> Option<&Task<Tm>> {
        self.tasks
            .get(handle.key.0)
            .filter(|task| task.id == handle.id)
    }

    pub(crate) fn time(&self, key: TaskKey) -> Tm {
        self.tasks[key.0].time
    }

    pub(crate) fn set_time(&mut self, key: TaskKey, time: Tm) {
        self.tasks[key.0].time = time;
    }

    pub(crate) fn current(&self) -> Option<TaskKey> {
        self.current
    }

    pub(crate) fn watermark(&self) -> Tm {
        self.watermark
    }

    /// Appends a task to the ready queue.
    pub(crate) fn make_ready(&mut self, key: TaskKey) {
        let task = &mut self.tasks[key.0];
        debug_assert!(
            task.state != TaskState::Ready,
            "task {} queued twice",
            task.id
        );
        task.state = TaskState::Ready;
        self.ready.push(key);
    }

    /// Records that a task left the run loop for a channel queue or a selection.
    pub(crate) fn park(&mut self, key: TaskKey, state: TaskState) {
        self.tasks[key.0].state = state;
    }

    pub(crate) fn yield_task(&mut self, key: TaskKey) {
        self.make_ready(key);
    }

    /// Moves the task's clock forward by `delta` and queues it on the timers.
    ///
    /// Returns false, leaving the task running, when the wake time would not
    /// be later than the task's current time.
    pub(crate) fn pause(&mut self, key: TaskKey, delta: u64) -> bool {
        let task = &mut self.tasks[key.0];
        let wake = task.time.max(task.time.advance(delta));
        if wake <= task.time {
            return false;
        }

        task.time = wake;
        task.state = TaskState::Sleeping;
        self.timers.insert(wake, key);
        true
    }

    pub(crate) fn exit_task(&mut self, key: TaskKey, code: i32) {
        let task = &mut self.tasks[key.0];
        task.exit_code = Some(code);
        task.state = TaskState::Exited;
    }

    /// A channel linked to the task's selection changed state.
    pub(crate) fn notify_selection(&mut self, key: TaskKey) {
        let Some(task) = self.tasks.get(key.0) else {
            return;
        };

        match task.state {
            TaskState::Selecting => self.make_ready(key),
            TaskState::Choosing => {
                self.choices.mark_stale(key);
            }
            _ => {}
        }
    }

    /// Queues a task for a time-ordered choice.
    pub(crate) fn choose(&mut self, key: TaskKey, time: Tm, ready: bool) {
        let mark = if ready { Mark::Ready } else { Mark::Fresh };
        self.tasks[key.0].state = TaskState::Choosing;
        self.choices.insert(time, key, mark);
    }

    /// Clears and returns the task's grant from the choice queue.
    pub(crate) fn take_grant(&mut self, key: TaskKey) -> bool {
        std::mem::take(&mut self.tasks[key.0].granted)
    }

    /// Picks the next task to run.
    ///
    /// Returns `None` once nothing can become runnable: the ready and timer
    /// queues are empty and no time-ordered choice can be released.
    pub(crate) fn select_next(&mut self) -> Option<TaskKey> {
        loop {
            if let Some(key) = self.ready.pop() {
                let task = &mut self.tasks[key.0];
                task.state = TaskState::Running;
                self.watermark = self.watermark.max(task.time);
                self.current = Some(key);
                self.release_timers();
                trace!(
                    ready = self.ready.len(),
                    timers = self.timers.len(),
                    choices = self.choices.len(),
                    watermark = %self.watermark,
                    "picked next task"
                );
                return Some(key);
            }

            if let Some(wake) = self.timers.next_wake() {
                trace!(watermark = %wake, "advancing to next timer");
                self.watermark = self.watermark.max(wake);
                self.release_timers();
                continue;
            }

            if self.config.policy == SchedulingPolicy::TimeOrdered
                && !self.choices.is_empty()
                && self.release_choice()
            {
                continue;
            }

            debug_assert!(self.ready.is_empty() && self.timers.is_empty());
            self.current = None;
            return None;
        }
    }

    fn release_timers(&mut self) {
        while let Some(key) = self.timers.pop_due(self.watermark) {
            self.make_ready(key);
        }
    }

    // Stale choices re-evaluate one at a time. Once all are evaluated the
    // earliest ready one is granted and every other choice goes stale.
    fn release_choice(&mut self) -> bool {
        if let Some(key) = self.choices.take_first(Mark::Stale) {
            self.make_ready(key);
            return true;
        }

        if let Some(key) = self.choices.take_first(Mark::Ready) {
            trace!(task = %self.tasks[key.0].id, "granting time-ordered choice");
            self.choices.mark_all_stale();
            self.tasks[key.0].granted = true;
            self.make_ready(key);
            return true;
        }

        false
    }

    /// Removes an exited task, recording its status.
    fn retire(&mut self, key: TaskKey) -> Option<Task<Tm>> {
        let task = self.tasks.remove(key.0)?;
        let code = task.exit_code.unwrap_or(0);

        debug!(task = %task.id, name = task.name(), code, time = %task.time, "task exited");
        self.exited.insert(task.id, code);
        if self.current == Some(key) {
            self.current = None;
        }
        Some(task)
    }

    pub(crate) fn describe(&self, key: TaskKey) -> String {
        match self.tasks.get(key.0) {
            Some(task) => task.describe(),
            None => format!("[Task slot {}, gone]", key.0),
        }
    }

    fn parked(&self) -> Vec<ParkedTask<Tm>> {
        self.tasks
            .iter()
            .map(|(_, task)| ParkedTask {
                id: task.id,
                name: task.name.clone(),
                state: task.state,
                time: task.time,
                description: task.describe(),
            })
            .collect()
    }

    fn drain(&mut self) -> Vec<Task<Tm>> {
        self.ready.clear();
        self.timers.clear();
        self.choices.clear();
        self.current = None;
        self.tasks.drain()
    }
}

/// A task still present when the run ended.
#[derive(Debug, Clone)]
pub struct ParkedTask<Tm> {
    pub id: TaskId,
    pub name: Option<String>,
    pub state: TaskState,
    pub time: Tm,
    /// Debug identity including the spawn site.
    pub description: String,
}

/// Summary returned by [`Simulation::run`].
///
/// A run ends when no task can become runnable. Tasks left parked on
/// channels or selections are listed, not treated as an error.
#[derive(Debug, Clone)]
pub struct RunReport<Tm> {
    /// Number of task resumptions performed by this run.
    pub steps: u64,
    /// Scheduler watermark when the run ended.
    pub watermark: Tm,
    /// Exit status of every task that has exited so far.
    pub exited: BTreeMap<TaskId, i32>,
    pub parked: Vec<ParkedTask<Tm>>,
    /// Trace records that could not be written.
    pub trace_failures: u64,
}

impl<Tm> RunReport<Tm> {
    /// True when every task has exited.
    pub fn is_quiescent(&self) -> bool {
        self.parked.is_empty()
    }
}

pub(crate) type DrainHook<Tm> = Box<dyn FnMut(&RunReport<Tm>)>;

/// A simulation: the scheduler, its queues and every task spawned on it.
///
/// # Example
/// ```ignore
/// let mut sim = Simulation::new();
/// let chan = sim.channel::<u32>(ChannelSpec::new(0, 0, 0))?;
///
/// let tx = chan.clone();
/// sim.spawn(move |cx| async move {
///     tx.send(&cx, 42).await;
/// })?;
/// sim.spawn(move |cx| async move {
///     assert_eq!(chan.recv(&cx).await, 42);
/// })?;
///
/// let report = sim.run();
/// assert!(report.is_quiescent());
/// ```
pub struct Simulation<Tm: LogicalTime = u64> {
    kernel: Rc<RefCell<Kernel<Tm>>>,
    on_drain: Option<DrainHook<Tm>>,
}

impl Simulation<u64> {
    /// Creates a simulation with default configuration and `u64` time.
    ///
    /// Environment overrides are not consulted; use [`Simulation::builder`]
    /// for that.
    ///
    /// # Panics
    /// Panics if the default task pool cannot be reserved.
    pub fn new() -> Self {
        match Self::with_config(SimConfig::default()) {
            Ok(sim) => sim,
            Err(err) => panic!("failed to create simulation: {err}"),
        }
    }

    pub fn builder() -> SimulationBuilder<u64> {
        SimulationBuilder::new()
    }
}

impl Default for Simulation<u64> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tm: LogicalTime> Simulation<Tm> {
    /// Creates a simulation from an explicit configuration.
    pub fn with_config(config: SimConfig) -> Result<Self> {
        config.validate()?;
        Self::from_parts(config, None, None)
    }

    pub(crate) fn from_parts(
        config: SimConfig,
        tracer: Option<Rc<Tracer>>,
        on_drain: Option<DrainHook<Tm>>,
    ) -> Result<Self> {
        debug!(
            pool_capacity = config.pool_capacity,
            policy = %config.policy,
            traced = tracer.is_some(),
            "creating simulation"
        );

        Ok(Self {
            kernel: Rc::new(RefCell::new(Kernel::new(config, tracer)?)),
            on_drain,
        })
    }

    /// Returns a builder for a new task.
    pub fn task(&self) -> TaskBuilder<'_, Tm> {
        TaskBuilder::new(&self.kernel)
    }

    /// Spawns a runnable task with default settings.
    ///
    /// # Example
    /// ```ignore
    /// sim.spawn(|cx| async move {
    ///     cx.pause(10).await;
    /// })?;
    /// ```
    #[track_caller]
    pub fn spawn<F, Fut>(&self, entry: F) -> Result<TaskHandle>
    where
        F: FnOnce(TaskCx<Tm>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        self.task().spawn(entry)
    }

    /// Makes a task spawned with [`TaskBuilder::suspended`] runnable.
    pub fn start(&self, handle: TaskHandle) -> Result<()> {
        task::start(&mut self.kernel.borrow_mut(), handle)
    }

    /// Creates a channel carrying values of type `T`.
    pub fn channel<T: 'static>(&self, spec: ChannelSpec) -> Result<Channel<T, Tm>> {
        Channel::create(&self.kernel, spec)
    }

    /// Runs tasks until nothing can become runnable.
    ///
    /// Invokes the drain hook, if one was configured, with the report before
    /// returning it. The simulation stays usable: new tasks can be spawned and
    /// `run` called again.
    pub fn run(&mut self) -> RunReport<Tm> {
        let mut steps = 0;

        loop {
            let next = self.kernel.borrow_mut().select_next();
            let Some(key) = next else {
                break;
            };

            let (id, context) = {
                let mut kernel = self.kernel.borrow_mut();
                let task = kernel.task_mut(key);
                trace!(task = %task.id, time = %task.time, "resuming task");
                (task.id, task.context.take())
            };
            let Some(mut context) = context else {
                panic!("scheduled task {id} has no execution context");
            };

            let resumed = context.resume();
            steps += 1;

            let retired = {
                let mut kernel = self.kernel.borrow_mut();
                let state = kernel.task(key).state;

                match (resumed, state) {
                    (Resumed::Finished, _) | (_, TaskState::Exited) => {
                        kernel.retire(key).map(|task| (task, context))
                    }
                    (Resumed::Suspended, state) => {
                        if state == TaskState::Running {
                            warn!(
                                task = %id,
                                "task suspended outside a scheduler operation and will not be resumed"
                            );
                            kernel.park(key, TaskState::Stalled);
                        }
                        kernel.task_mut(key).context = Some(context);
                        kernel.current = None;
                        None
                    }
                }
            };

            // Dropping a finished task's future may release channel handles
            // and selections, which must not happen while the kernel is borrowed.
            drop(retired);
        }

        let report = {
            let kernel = self.kernel.borrow();
            RunReport {
                steps,
                watermark: kernel.watermark,
                exited: kernel.exited.clone(),
                parked: kernel.parked(),
                trace_failures: kernel.tracer.as_ref().map_or(0, |t| t.failures()),
            }
        };

        debug!(
            steps,
            parked = report.parked.len(),
            watermark = %report.watermark,
            "no runnable tasks left"
        );

        if let Some(hook) = self.on_drain.as_mut() {
            hook(&report);
        }
        report
    }

    /// The scheduler's consistent-time watermark.
    pub fn now(&self) -> Tm {
        self.kernel.borrow().watermark()
    }

    /// Exit status of a task that has exited.
    pub fn exit_status(&self, id: TaskId) -> Option<i32> {
        self.kernel.borrow().exited.get(&id).copied()
    }

    /// Current state of a live task.
    pub fn state(&self, handle: TaskHandle) -> Option<TaskState> {
        self.kernel.borrow().lookup(handle).map(|task| task.state)
    }

    /// Current logical time of a live task.
    pub fn task_time(&self, handle: TaskHandle) -> Option<Tm> {
        self.kernel.borrow().lookup(handle).map(|task| task.time)
    }

    /// How a live task's storage was obtained.
    pub fn allocation(&self, handle: TaskHandle) -> Option<Allocation> {
        let kernel = self.kernel.borrow();
        kernel.lookup(handle)?;
        kernel.tasks.allocation(handle.key.0)
    }

    /// Number of tasks that have not exited.
    pub fn live_tasks(&self) -> usize {
        self.kernel.borrow().tasks.len()
    }

    pub fn config(&self) -> SimConfig {
        self.kernel.borrow().config.clone()
    }

    /// Flushes the trace sink, if tracing is enabled.
    ///
    /// # Errors
    /// Returns [`SimError::Io`] if the sink fails to flush.
    pub fn flush_trace(&self) -> Result<()> {
        let tracer = self.kernel.borrow().tracer.clone();
        if let Some(tracer) = tracer {
            tracer.flush()?;
        }
        Ok(())
    }
}

impl<Tm: LogicalTime> Drop for Simulation<Tm> {
    fn drop(&mut self) {
        // Task futures hold contexts that point back at the kernel.
        let tasks = match self.kernel.try_borrow_mut() {
            Ok(mut kernel) => kernel.drain(),
            Err(_) => return,
        };
        drop(tasks);
    }
}
