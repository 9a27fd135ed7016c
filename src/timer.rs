//! Timed pause.
//!
//! Provides [`PauseFor`], the future behind [`TaskCx::pause`]. Pausing moves
//! the task's clock to its wake time right away and parks it on the timer
//! queue; the scheduler releases it once its consistent-time watermark
//! reaches that wake time. A pause is a one-shot wake and cannot be reset.

use crate::runtime::TaskCx;
use crate::time::LogicalTime;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A future that completes once the task's wake time has been reached.
///
/// Created via [`TaskCx::pause`]. On the first poll the task is inserted
/// into the timer queue and the poll returns `Poll::Pending`; the next
/// resumption happens when the timer is released and completes the future.
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct PauseFor<'a, Tm: LogicalTime> {
    cx: &'a TaskCx<Tm>,
    delta: u64,
    queued: bool,
}

impl<'a, Tm: LogicalTime> PauseFor<'a, Tm> {
    pub(crate) fn new(cx: &'a TaskCx<Tm>, delta: u64) -> Self {
        Self {
            cx,
            delta,
            queued: false,
        }
    }
}

impl<Tm: LogicalTime> Future for PauseFor<'_, Tm> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
        if self.queued {
            return Poll::Ready(());
        }

        // A delay that does not move the clock is already satisfied.
        if !self.cx.enter().pause(self.cx.key(), self.delta) {
            return Poll::Ready(());
        }

        self.queued = true;
        Poll::Pending
    }
}
