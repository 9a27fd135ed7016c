//! Execution contexts.
//!
//! The scheduler only ever asks a context to run until its next suspension
//! point. Task contexts are compiler-generated state machines: the entry
//! future is polled once per resumption with a waker that does nothing,
//! because every wake-up goes through the scheduler queues instead.

use futures::task::noop_waker_ref;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Boxed entry future of a task.
pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Outcome of resuming a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resumed {
    /// Stopped at a suspension point; may be resumed again.
    Suspended,
    /// Ran to completion.
    Finished,
}

pub(crate) trait Coroutine {
    /// Runs until the next suspension point or completion.
    fn resume(&mut self) -> Resumed;
}

impl Coroutine for TaskFuture {
    fn resume(&mut self) -> Resumed {
        let mut cx = Context::from_waker(noop_waker_ref());

        match self.as_mut().poll(&mut cx) {
            Poll::Ready(()) => Resumed::Finished,
            Poll::Pending => Resumed::Suspended,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::yield_now::YieldNow;

    #[test]
    fn resumes_until_completion() {
        let mut context: TaskFuture = Box::pin(async {
            YieldNow::detached().await;
        });

        assert_eq!(context.resume(), Resumed::Suspended);
        assert_eq!(context.resume(), Resumed::Finished);
    }
}
