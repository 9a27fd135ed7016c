//! Logical time carried by tasks and buffered messages.
//!
//! Simulation time is not wall-clock time. Every task owns its own logical
//! clock and every channel slot remembers when its data (or its free space)
//! became available. The scheduler and the channel protocol only need three
//! things from a time value:
//!
//! - a zero to start every clock from
//! - a way to move forward by a modeled delay ([`LogicalTime::advance`])
//! - a total order, so that "the later of two times" is simply [`Ord::max`]
//!
//! # Example
//!
//! ```ignore
//! use chansim::LogicalTime;
//!
//! let t = u64::zero().advance(10);
//! assert_eq!(t.max(4), 10);
//! ```

use std::fmt::{Debug, Display};

/// A simulation-time value.
///
/// Implementations must be cheap to copy. `Display` is used when a time is
/// rendered into a trace record.
pub trait LogicalTime: Copy + Ord + Debug + Display + 'static {
    /// The initial time of every task and every channel slot.
    fn zero() -> Self;

    /// Returns this time moved forward by `delta` ticks.
    ///
    /// Must never move backwards; implementations saturate instead of
    /// wrapping.
    fn advance(self, delta: u64) -> Self;
}

macro_rules! unsigned_time {
    ($($ty:ty),*) => {
        $(
            impl LogicalTime for $ty {
                fn zero() -> Self {
                    0
                }

                fn advance(self, delta: u64) -> Self {
                    let delta = <$ty>::try_from(delta).unwrap_or(<$ty>::MAX);
                    self.saturating_add(delta)
                }
            }
        )*
    };
}

unsigned_time!(u32, u64, u128);
