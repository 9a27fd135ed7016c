//! Timing-annotated rendezvous channels with bounded slack.
//!
//! A channel moves each value from exactly one sender to exactly one
//! receiver. With slack `K`, up to `K` values can be buffered before a sender
//! blocks; with `K = 0` every transfer is a rendezvous. Channels carry two
//! timing parameters:
//!
//! - `latency`: fixed per-hop delay; a buffered value picks up
//!   `slack * latency` of pipeline delay
//! - `cycle`: time per stage; `cycle - latency` is charged for every value
//!   already queued ahead
//!
//! # Usage pattern
//!
//! Handles are cheap to clone and can be moved into tasks. Several tasks may
//! send on the same channel: blocked senders queue in arrival order and keep
//! their values until a receiver commits them. The same holds for receivers.
//!
//! # Example
//!
//! ```ignore
//! let chan = sim.channel::<u32>(ChannelSpec::new(2, 1, 3))?;
//!
//! let tx = chan.clone();
//! sim.spawn(move |cx| async move {
//!     for i in 0..3 {
//!         tx.send(&cx, i).await;
//!     }
//! })?;
//! sim.spawn(move |cx| async move {
//!     while chan.can_receive() {
//!         let value = chan.recv(&cx).await;
//!     }
//! })?;
//! ```

mod core;

pub(crate) use self::core::ChannelCore;
use self::core::Outcome;

use crate::error::Result;
use crate::runtime::{Kernel, TaskCx};
use crate::time::LogicalTime;
use crate::trace::{TraceEvent, TraceKind, Tracer};

use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// Identity of a channel within its simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ChannelId(pub(crate) u64);

impl ChannelId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {:x}", self.0)
    }
}

impl fmt::LowerHex for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Which side of a channel an operation or probe concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Recv,
}

/// Buffering and timing parameters of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Values that can be buffered before a sender blocks.
    pub slack: usize,
    /// Fixed per-hop latency.
    pub latency: u64,
    /// Stage cycle time; must not be shorter than `latency`.
    pub cycle: u64,
}

impl ChannelSpec {
    pub fn new(slack: usize, latency: u64, cycle: u64) -> Self {
        Self {
            slack,
            latency,
            cycle,
        }
    }

    /// Zero slack, zero delay.
    pub fn rendezvous() -> Self {
        Self::default()
    }
}

/// Parties that were still blocked when a channel was destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestroyReport {
    pub channel: ChannelId,
    /// Debug identities of parked senders.
    pub senders: Vec<String>,
    /// Debug identities of parked receivers.
    pub receivers: Vec<String>,
}

impl DestroyReport {
    /// True when no task was left blocked on the channel.
    pub fn is_clean(&self) -> bool {
        self.senders.is_empty() && self.receivers.is_empty()
    }
}

/// Handle to a channel carrying values of type `T`.
pub struct Channel<T, Tm: LogicalTime = u64> {
    core: Rc<RefCell<ChannelCore<T, Tm>>>,
    kernel: Weak<RefCell<Kernel<Tm>>>,
    tracer: Option<Rc<Tracer>>,
    spec: ChannelSpec,
    id: ChannelId,
}

impl<T, Tm: LogicalTime> Clone for Channel<T, Tm> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            kernel: self.kernel.clone(),
            tracer: self.tracer.clone(),
            spec: self.spec,
            id: self.id,
        }
    }
}

impl<T, Tm: LogicalTime> fmt::Debug for Channel<T, Tm> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl<T, Tm: LogicalTime> Channel<T, Tm> {
    pub(crate) fn create(kernel: &Rc<RefCell<Kernel<Tm>>>, spec: ChannelSpec) -> Result<Self> {
        let (id, tracer) = {
            let mut kernel = kernel.borrow_mut();
            (kernel.next_channel_id(), kernel.tracer.clone())
        };
        let core = ChannelCore::new(id, &spec)?;

        debug!(
            channel = %id,
            slack = spec.slack,
            latency = spec.latency,
            cycle = spec.cycle,
            traced = tracer.is_some(),
            "created channel"
        );

        Ok(Self {
            core: Rc::new(RefCell::new(core)),
            kernel: Rc::downgrade(kernel),
            tracer,
            spec,
            id,
        })
    }

    pub(crate) fn core(&self) -> &Rc<RefCell<ChannelCore<T, Tm>>> {
        &self.core
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn spec(&self) -> ChannelSpec {
        self.spec
    }

    /// Width in bytes of one payload.
    pub fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    /// Whether send and receive emit trace records.
    pub fn is_traced(&self) -> bool {
        self.tracer.is_some()
    }

    /// Values committed so far; values held by blocked senders are not counted.
    pub fn sent(&self) -> u64 {
        self.core.borrow().sent()
    }

    pub fn received(&self) -> u64 {
        self.core.borrow().received()
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.core.borrow().occupancy() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tasks parked in `direction`.
    pub fn pending(&self, direction: Direction) -> usize {
        self.core.borrow().pending(direction)
    }

    /// True iff a send issued now would complete without blocking.
    pub fn can_send(&self) -> bool {
        self.core.borrow().can_send()
    }

    /// True iff a receive issued now would complete without blocking.
    pub fn can_receive(&self) -> bool {
        self.core.borrow().can_receive()
    }

    /// The raw probe: if an operation in `direction` would not block, the
    /// logical time at which it became possible.
    pub fn ready_time(&self, direction: Direction) -> Option<Tm> {
        let kernel = self.kernel.upgrade()?;
        let kernel = kernel.borrow();
        self.core.borrow().ready_time(&kernel, direction)
    }

    /// Sends `value`, blocking while the buffer is full and no receiver waits.
    ///
    /// # Example
    /// ```ignore
    /// tx.send(&cx, 42).await;
    /// ```
    pub fn send<'a>(&'a self, cx: &'a TaskCx<Tm>, value: T) -> SendFuture<'a, T, Tm> {
        SendFuture {
            channel: self,
            cx,
            value: Some(value),
            parked: false,
        }
    }

    /// Receives the oldest value, blocking while none is available.
    pub fn recv<'a>(&'a self, cx: &'a TaskCx<Tm>) -> RecvFuture<'a, T, Tm> {
        RecvFuture {
            channel: self,
            cx,
            parked: false,
        }
    }

    /// Counters and slot timestamps, one line per slot.
    pub fn dump(&self) -> String {
        self.core.borrow().dump()
    }

    /// Releases this handle and reports any tasks still blocked on the channel.
    ///
    /// Blocked parties are logged at `warn` level; destroying a busy channel
    /// is not an error.
    pub fn destroy(self) -> DestroyReport {
        let (senders, receivers) = {
            let core = self.core.borrow();
            match self.kernel.upgrade() {
                Some(kernel) => core.blocked(Some(&kernel.borrow())),
                None => core.blocked(None),
            }
        };

        let report = DestroyReport {
            channel: self.id,
            senders,
            receivers,
        };

        if report.is_clean() {
            debug!(channel = %self.id, "destroyed channel");
        } else {
            warn!(
                channel = %self.id,
                senders = ?report.senders,
                receivers = ?report.receivers,
                "channel destroyed with blocked tasks"
            );
        }
        report
    }

    fn trace(&self, cx: &TaskCx<Tm>, kind: TraceKind) {
        let Some(tracer) = &self.tracer else {
            return;
        };

        let (label, time) = {
            let kernel = cx.enter();
            let task = kernel.task(cx.key());
            (task.name().to_string(), task.time)
        };

        tracer.record(&TraceEvent {
            label,
            task: cx.id(),
            channel: self.id,
            kind,
            time: time.to_string(),
        });
    }
}

/// Future returned by [`Channel::send`].
#[must_use = "futures do nothing unless awaited"]
pub struct SendFuture<'a, T, Tm: LogicalTime> {
    channel: &'a Channel<T, Tm>,
    cx: &'a TaskCx<Tm>,
    value: Option<T>,
    parked: bool,
}

// The value is moved out by `take`, never pinned.
impl<T, Tm: LogicalTime> Unpin for SendFuture<'_, T, Tm> {}

impl<T, Tm: LogicalTime> Future for SendFuture<'_, T, Tm> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let key = this.cx.key();

        if this.parked {
            if this.channel.core.borrow().is_parked(Direction::Send, key) {
                return Poll::Pending;
            }
            this.parked = false;
            this.channel.trace(this.cx, TraceKind::ExitSend);
            return Poll::Ready(());
        }

        let Some(value) = this.value.take() else {
            panic!("send future polled after completion");
        };

        this.channel.trace(this.cx, TraceKind::EnterSend);

        let outcome = {
            let mut kernel = this.cx.enter();
            this.channel.core.borrow_mut().send(&mut kernel, key, value)
        };

        match outcome {
            Outcome::Done(()) => {
                this.channel.trace(this.cx, TraceKind::ExitSend);
                Poll::Ready(())
            }
            Outcome::Parked => {
                this.parked = true;
                Poll::Pending
            }
        }
    }
}

/// Future returned by [`Channel::recv`].
#[must_use = "futures do nothing unless awaited"]
pub struct RecvFuture<'a, T, Tm: LogicalTime> {
    channel: &'a Channel<T, Tm>,
    cx: &'a TaskCx<Tm>,
    parked: bool,
}

impl<T, Tm: LogicalTime> Future for RecvFuture<'_, T, Tm> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
        let key = self.cx.key();

        if self.parked {
            let delivered = self.channel.core.borrow_mut().take_handoff(key);
            return match delivered {
                Some(value) => {
                    self.parked = false;
                    self.channel.trace(self.cx, TraceKind::ExitRecv);
                    Poll::Ready(value)
                }
                None => Poll::Pending,
            };
        }

        self.channel.trace(self.cx, TraceKind::EnterRecv);

        let outcome = {
            let mut kernel = self.cx.enter();
            self.channel.core.borrow_mut().recv(&mut kernel, key)
        };

        match outcome {
            Outcome::Done(value) => {
                self.channel.trace(self.cx, TraceKind::ExitRecv);
                Poll::Ready(value)
            }
            Outcome::Parked => {
                self.parked = true;
                Poll::Pending
            }
        }
    }
}
