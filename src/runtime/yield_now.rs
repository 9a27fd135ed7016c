use crate::runtime::TaskCx;
use crate::time::LogicalTime;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Voluntary yield: the task goes to the back of the ready queue.
///
/// Returned by [`TaskCx::yield_now`]. The first poll re-enqueues the running
/// task and suspends; the next resumption completes.
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow<'a, Tm: LogicalTime> {
    cx: Option<&'a TaskCx<Tm>>,
    yielded: bool,
}

impl<'a, Tm: LogicalTime> YieldNow<'a, Tm> {
    pub(crate) fn new(cx: &'a TaskCx<Tm>) -> Self {
        Self {
            cx: Some(cx),
            yielded: false,
        }
    }
}

#[cfg(test)]
impl YieldNow<'static, u64> {
    /// Suspends once without touching any scheduler.
    pub(crate) fn detached() -> Self {
        Self {
            cx: None,
            yielded: false,
        }
    }
}

impl<Tm: LogicalTime> Future for YieldNow<'_, Tm> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(());
        }

        if let Some(cx) = self.cx {
            cx.enter().yield_task(cx.key());
        }
        self.yielded = true;
        Poll::Pending
    }
}
