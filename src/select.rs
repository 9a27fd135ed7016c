//! Probes, selection subscriptions and guarded choice.
//!
//! A [`Selection`] is a set of channels a task is interested in. Probing a
//! channel through [`TaskCx::select_probe`] links it into the selection; a
//! task that found nothing ready can then suspend in
//! [`TaskCx::select_wait`] until one of the linked channels changes state.
//!
//! Two choice operations are built on top:
//!
//! - [`TaskCx::select`]: deterministic priority. Arms are probed in order
//!   and the first ready one wins.
//! - [`TaskCx::select_nondet`]: under [`SchedulingPolicy::TimeOrdered`], the
//!   task joins a time-ordered queue and is granted its earliest ready arm
//!   once nothing else can run. Under [`SchedulingPolicy::Lazy`] it behaves
//!   like `select`.
//!
//! # Example
//!
//! ```ignore
//! let index = cx.select(&[Arm::recv(&requests), Arm::recv(&shutdown)]).await;
//! match index {
//!     0 => handle(requests.recv(&cx).await),
//!     _ => return,
//! }
//! ```

use crate::channel::{Channel, ChannelId, Direction};
use crate::config::SchedulingPolicy;
use crate::runtime::{Kernel, TaskCx};
use crate::task::{TaskKey, TaskState};
use crate::time::LogicalTime;

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

/// Implemented by channel cores so a selection can detach itself.
pub(crate) trait Unlink {
    fn unlink(&self, selection: &Rc<RefCell<SelectionState>>);
}

struct Link {
    channel: ChannelId,
    /// Address of the channel core; ids repeat across simulations.
    core: *const (),
    target: Weak<dyn Unlink>,
}

#[derive(Default)]
pub(crate) struct SelectionState {
    waiting: Option<TaskKey>,
    links: Vec<Link>,
}

impl SelectionState {
    /// The task suspended on this selection, if any.
    pub(crate) fn waiting(&self) -> Option<TaskKey> {
        self.waiting
    }
}

/// A set of channels linked for probing.
///
/// Each channel is linked at most once. Dropping the selection unlinks it
/// from every channel.
#[derive(Default)]
pub struct Selection {
    state: Rc<RefCell<SelectionState>>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of linked channels.
    pub fn len(&self) -> usize {
        self.state.borrow().links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `channel` is linked. Clones of a handle count as the same channel.
    pub fn contains<T, Tm: LogicalTime>(&self, channel: &Channel<T, Tm>) -> bool {
        let core = Rc::as_ptr(channel.core()) as *const ();
        self.state.borrow().links.iter().any(|link| link.core == core)
    }

    /// Linked channels in link order.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.state
            .borrow()
            .links
            .iter()
            .map(|link| link.channel)
            .collect()
    }

    /// Unlinks every channel.
    pub fn clear(&self) {
        let links = {
            let mut state = self.state.borrow_mut();
            state.waiting = None;
            std::mem::take(&mut state.links)
        };

        for link in links {
            if let Some(target) = link.target.upgrade() {
                target.unlink(&self.state);
            }
        }
    }

    pub(crate) fn link<T: 'static, Tm: LogicalTime>(&self, channel: &Channel<T, Tm>) {
        if self.contains(channel) {
            return;
        }

        channel.core().borrow_mut().subscribe(Rc::downgrade(&self.state));
        let core = Rc::downgrade(channel.core());
        let target: Weak<dyn Unlink> = core;
        self.state.borrow_mut().links.push(Link {
            channel: channel.id(),
            core: Rc::as_ptr(channel.core()) as *const (),
            target,
        });
    }

    fn wait_on(&self, key: Option<TaskKey>) {
        self.state.borrow_mut().waiting = key;
    }
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("channels", &self.channels())
            .finish()
    }
}

impl Drop for Selection {
    fn drop(&mut self) {
        self.clear();
    }
}

/// A channel operation a selection can probe.
pub(crate) trait Guarded<Tm: LogicalTime> {
    fn link(&self, selection: &Selection);

    fn ready_time(&self, kernel: &Kernel<Tm>, direction: Direction) -> Option<Tm>;
}

impl<T: 'static, Tm: LogicalTime> Guarded<Tm> for Channel<T, Tm> {
    fn link(&self, selection: &Selection) {
        selection.link(self);
    }

    fn ready_time(&self, kernel: &Kernel<Tm>, direction: Direction) -> Option<Tm> {
        self.core().borrow().ready_time(kernel, direction)
    }
}

/// One guard of a choice: a channel and the direction to probe.
pub struct Arm<'a, Tm: LogicalTime = u64> {
    target: &'a dyn Guarded<Tm>,
    direction: Direction,
}

impl<'a, Tm: LogicalTime> Arm<'a, Tm> {
    pub fn send<T: 'static>(channel: &'a Channel<T, Tm>) -> Self {
        Self {
            target: channel,
            direction: Direction::Send,
        }
    }

    pub fn recv<T: 'static>(channel: &'a Channel<T, Tm>) -> Self {
        Self {
            target: channel,
            direction: Direction::Recv,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

// Links `target` and, if the probe holds, moves the task's clock to the time
// the guard became true.
fn probe<Tm: LogicalTime>(
    cx: &TaskCx<Tm>,
    selection: &Selection,
    target: &dyn Guarded<Tm>,
    direction: Direction,
) -> bool {
    target.link(selection);

    let mut kernel = cx.enter();
    match target.ready_time(&kernel, direction) {
        Some(at) => {
            let now = kernel.time(cx.key());
            kernel.set_time(cx.key(), now.max(at));
            true
        }
        None => false,
    }
}

impl<Tm: LogicalTime> TaskCx<Tm> {
    /// Links `channel` into `selection` and probes it.
    ///
    /// If the operation in `direction` would not block, advances the task's
    /// time to when it became possible and returns true. Nothing is
    /// transferred either way.
    pub fn select_probe<T: 'static>(
        &self,
        selection: &Selection,
        channel: &Channel<T, Tm>,
        direction: Direction,
    ) -> bool {
        probe(self, selection, channel, direction)
    }

    /// Suspends until a channel linked into `selection` changes state.
    pub fn select_wait<'a>(&'a self, selection: &'a Selection) -> SelectWait<'a, Tm> {
        SelectWait {
            cx: self,
            selection,
            parked: false,
        }
    }

    /// Waits for the first ready arm, in arm order, and returns its index.
    ///
    /// The chosen operation is not performed; the caller does that next.
    pub fn select<'a>(&'a self, arms: &'a [Arm<'a, Tm>]) -> Select<'a, Tm> {
        Select {
            cx: self,
            arms,
            selection: Selection::new(),
            parked: false,
        }
    }

    /// Nondeterministic choice among `arms`, resolved by the scheduling policy.
    pub fn select_nondet<'a>(&'a self, arms: &'a [Arm<'a, Tm>]) -> SelectNondet<'a, Tm> {
        let policy = self.kernel().borrow().config.policy;
        let inner = match policy {
            SchedulingPolicy::Lazy => Nondet::Priority(self.select(arms)),
            SchedulingPolicy::TimeOrdered => Nondet::TimeOrdered(TimeOrdered {
                cx: self,
                arms,
                selection: Selection::new(),
                chosen: None,
                queued: false,
            }),
        };
        SelectNondet { inner }
    }
}

/// Future returned by [`TaskCx::select_wait`].
#[must_use = "futures do nothing unless awaited"]
pub struct SelectWait<'a, Tm: LogicalTime> {
    cx: &'a TaskCx<Tm>,
    selection: &'a Selection,
    parked: bool,
}

impl<Tm: LogicalTime> Future for SelectWait<'_, Tm> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
        if self.parked {
            self.selection.wait_on(None);
            return Poll::Ready(());
        }

        self.selection.wait_on(Some(self.cx.key()));
        self.cx.enter().park(self.cx.key(), TaskState::Selecting);
        self.parked = true;
        Poll::Pending
    }
}

/// Future returned by [`TaskCx::select`].
#[must_use = "futures do nothing unless awaited"]
pub struct Select<'a, Tm: LogicalTime> {
    cx: &'a TaskCx<Tm>,
    arms: &'a [Arm<'a, Tm>],
    selection: Selection,
    parked: bool,
}

impl<Tm: LogicalTime> Future for Select<'_, Tm> {
    type Output = usize;

    fn poll(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
        if self.parked {
            self.selection.wait_on(None);
            self.parked = false;
        }

        let this = &mut *self;
        for (index, arm) in this.arms.iter().enumerate() {
            if probe(this.cx, &this.selection, arm.target, arm.direction) {
                this.selection.clear();
                return Poll::Ready(index);
            }
        }

        this.selection.wait_on(Some(this.cx.key()));
        this.cx.enter().park(this.cx.key(), TaskState::Selecting);
        this.parked = true;
        Poll::Pending
    }
}

/// Future returned by [`TaskCx::select_nondet`].
#[must_use = "futures do nothing unless awaited"]
pub struct SelectNondet<'a, Tm: LogicalTime> {
    inner: Nondet<'a, Tm>,
}

enum Nondet<'a, Tm: LogicalTime> {
    Priority(Select<'a, Tm>),
    TimeOrdered(TimeOrdered<'a, Tm>),
}

struct TimeOrdered<'a, Tm: LogicalTime> {
    cx: &'a TaskCx<Tm>,
    arms: &'a [Arm<'a, Tm>],
    selection: Selection,
    chosen: Option<usize>,
    queued: bool,
}

impl<Tm: LogicalTime> TimeOrdered<'_, Tm> {
    fn poll_choice(&mut self) -> Poll<usize> {
        let key = self.cx.key();

        if self.queued {
            self.queued = false;
            self.selection.wait_on(None);

            let granted = self.cx.enter().take_grant(key);
            if granted && let Some(index) = self.chosen {
                let arm = &self.arms[index];
                if probe(self.cx, &self.selection, arm.target, arm.direction) {
                    self.selection.clear();
                    return Poll::Ready(index);
                }
            }
        }

        for arm in self.arms {
            arm.target.link(&self.selection);
        }

        {
            let mut kernel = self.cx.enter();
            let earliest = self
                .arms
                .iter()
                .enumerate()
                .filter_map(|(index, arm)| {
                    arm.target
                        .ready_time(&kernel, arm.direction)
                        .map(|at| (at, index))
                })
                .min();

            let now = kernel.time(key);
            self.chosen = earliest.map(|(_, index)| index);
            let candidate = earliest.map_or(now, |(at, _)| now.max(at));
            kernel.choose(key, candidate, earliest.is_some());
        }

        self.selection.wait_on(Some(key));
        self.queued = true;
        Poll::Pending
    }
}

impl<Tm: LogicalTime> Future for SelectNondet<'_, Tm> {
    type Output = usize;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            Nondet::Priority(select) => Pin::new(select).poll(cx),
            Nondet::TimeOrdered(choice) => choice.poll_choice(),
        }
    }
}
