//! Task context: the handle a task uses to reach its simulation.
//!
//! Every entry closure receives a [`TaskCx`]. All scheduler operations a task
//! can perform (yield, pause, exit, spawning, channel transfers and
//! selection) go through it, so there is no ambient runtime state.
//!
//! # Panics
//!
//! Operations that read or change the calling task's scheduling state check
//! that the task is the one currently running and panic otherwise, e.g. when
//! a context is moved into another task or used after [`Simulation::run`]
//! returned.
//!
//! [`Simulation::run`]: crate::Simulation::run

use crate::channel::{Channel, ChannelSpec};
use crate::error::Result;
use crate::runtime::core::Kernel;
use crate::runtime::yield_now::YieldNow;
use crate::task::{self, TaskBuilder, TaskHandle, TaskId, TaskKey, UNNAMED_TASK};
use crate::time::LogicalTime;
use crate::timer::PauseFor;

use std::cell::{RefCell, RefMut};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Per-task handle to the simulation.
pub struct TaskCx<Tm: LogicalTime = u64> {
    kernel: Rc<RefCell<Kernel<Tm>>>,
    handle: TaskHandle,
}

impl<Tm: LogicalTime> Clone for TaskCx<Tm> {
    fn clone(&self) -> Self {
        Self {
            kernel: self.kernel.clone(),
            handle: self.handle,
        }
    }
}

impl<Tm: LogicalTime> fmt::Debug for TaskCx<Tm> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCx")
            .field("task", &self.handle.id)
            .finish_non_exhaustive()
    }
}

impl<Tm: LogicalTime> TaskCx<Tm> {
    pub(crate) fn new(kernel: Rc<RefCell<Kernel<Tm>>>, handle: TaskHandle) -> Self {
        Self { kernel, handle }
    }

    /// Borrows the kernel on behalf of the running task.
    ///
    /// # Panics
    /// Panics if this task is not the one currently running.
    pub(crate) fn enter(&self) -> RefMut<'_, Kernel<Tm>> {
        let kernel = self.kernel.borrow_mut();
        if kernel.current() != Some(self.handle.key) {
            panic!(
                "task context for task {} used while that task is not running",
                self.handle.id
            );
        }
        kernel
    }

    pub(crate) fn key(&self) -> TaskKey {
        self.handle.key
    }

    pub(crate) fn kernel(&self) -> &Rc<RefCell<Kernel<Tm>>> {
        &self.kernel
    }

    pub fn id(&self) -> TaskId {
        self.handle.id
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    /// The task's debug name, or `-unknown-`.
    pub fn name(&self) -> String {
        self.kernel
            .borrow()
            .lookup(self.handle)
            .map_or(UNNAMED_TASK, |task| task.name())
            .to_string()
    }

    /// The task's logical time.
    pub fn now(&self) -> Tm {
        self.enter().time(self.handle.key)
    }

    /// Advances the task's own clock by `delta` without suspending.
    pub fn delay(&self, delta: u64) {
        let mut kernel = self.enter();
        let now = kernel.time(self.handle.key);
        kernel.set_time(self.handle.key, now.advance(delta));
    }

    /// Suspends until the scheduler's watermark reaches `now() + delta`.
    ///
    /// Completes immediately, without suspending, when `delta` does not move
    /// the task's clock.
    ///
    /// # Example
    /// ```ignore
    /// cx.pause(10).await;
    /// assert_eq!(cx.now(), 10);
    /// ```
    pub fn pause(&self, delta: u64) -> PauseFor<'_, Tm> {
        PauseFor::new(self, delta)
    }

    /// Moves the task to the back of the ready queue.
    pub fn yield_now(&self) -> YieldNow<'_, Tm> {
        YieldNow::new(self)
    }

    /// Ends the task with `code`. The returned future never completes.
    ///
    /// # Example
    /// ```ignore
    /// if failed {
    ///     cx.exit(1).await;
    /// }
    /// ```
    pub fn exit(&self, code: i32) -> Exit<'_, Tm> {
        Exit { cx: self, code }
    }

    pub fn task(&self) -> TaskBuilder<'_, Tm> {
        TaskBuilder::new(&self.kernel)
    }

    #[track_caller]
    pub fn spawn<F, Fut>(&self, entry: F) -> Result<TaskHandle>
    where
        F: FnOnce(TaskCx<Tm>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        self.task().spawn(entry)
    }

    /// Makes a suspended task runnable.
    pub fn start(&self, handle: TaskHandle) -> Result<()> {
        task::start(&mut self.kernel.borrow_mut(), handle)
    }

    pub fn channel<T: 'static>(&self, spec: ChannelSpec) -> Result<Channel<T, Tm>> {
        Channel::create(&self.kernel, spec)
    }
}

/// Future returned by [`TaskCx::exit`].
#[must_use = "futures do nothing unless awaited"]
pub struct Exit<'a, Tm: LogicalTime> {
    cx: &'a TaskCx<Tm>,
    code: i32,
}

impl<Tm: LogicalTime> Future for Exit<'_, Tm> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
        self.cx.enter().exit_task(self.cx.key(), self.code);
        Poll::Pending
    }
}
