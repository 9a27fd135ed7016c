//! Scheduler queues.
//!
//! - [`ReadyQueue`]: FIFO of runnable tasks.
//! - [`TimerQueue`]: paused tasks in ascending wake-time order.
//! - [`ChoiceQueue`]: tasks suspended in a time-ordered selection.
//!
//! None of the queues track membership themselves; the owning task's
//! [`TaskState`](crate::TaskState) is the membership flag.

use crate::task::TaskKey;

use std::collections::VecDeque;

/// FIFO queue of runnable tasks.
///
/// Tasks are appended when they become runnable and taken from the front by
/// the scheduler, so tasks made ready in the same step run in that order.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    queue: VecDeque<TaskKey>,
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueues a task at the back of the queue.
    ///
    /// # Arguments
    /// * `key` - The task to enqueue
    pub(crate) fn push(&mut self, key: TaskKey) {
        self.queue.push_back(key);
    }

    /// Dequeues the task at the front of the queue.
    ///
    /// # Returns
    /// Some(key) if a task is available, None if the queue is empty
    pub(crate) fn pop(&mut self) -> Option<TaskKey> {
        self.queue.pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Paused tasks ordered by wake time.
///
/// Entries with equal wake times keep their insertion order.
#[derive(Debug)]
pub(crate) struct TimerQueue<Tm> {
    entries: VecDeque<(Tm, TaskKey)>,
}

impl<Tm: Ord + Copy> TimerQueue<Tm> {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Inserts `key` before the first entry that wakes strictly later.
    pub(crate) fn insert(&mut self, wake: Tm, key: TaskKey) {
        let index = self.entries.partition_point(|(at, _)| *at <= wake);
        self.entries.insert(index, (wake, key));
    }

    /// Wake time of the earliest entry.
    pub(crate) fn next_wake(&self) -> Option<Tm> {
        self.entries.front().map(|(at, _)| *at)
    }

    /// Removes the earliest entry if it wakes no later than `watermark`.
    pub(crate) fn pop_due(&mut self, watermark: Tm) -> Option<TaskKey> {
        match self.entries.front() {
            Some((at, _)) if *at <= watermark => self.entries.pop_front().map(|(_, key)| key),
            _ => None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Progress of a task through a time-ordered selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mark {
    /// Channel state may have changed since the guards were evaluated.
    Stale,
    /// Guards evaluated, none ready.
    Fresh,
    /// Guards evaluated, at least one ready.
    Ready,
}

#[derive(Debug)]
struct Choice<Tm> {
    time: Tm,
    key: TaskKey,
    mark: Mark,
}

/// Tasks waiting in a time-ordered selection, ordered by candidate time.
#[derive(Debug)]
pub(crate) struct ChoiceQueue<Tm> {
    entries: Vec<Choice<Tm>>,
}

impl<Tm: Ord + Copy> ChoiceQueue<Tm> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, time: Tm, key: TaskKey, mark: Mark) {
        let index = self.entries.partition_point(|choice| choice.time <= time);
        self.entries.insert(index, Choice { time, key, mark });
    }

    /// Flags a queued task for re-evaluation. Returns false if it is not queued.
    pub(crate) fn mark_stale(&mut self, key: TaskKey) -> bool {
        match self.entries.iter_mut().find(|choice| choice.key == key) {
            Some(choice) => {
                choice.mark = Mark::Stale;
                true
            }
            None => false,
        }
    }

    pub(crate) fn mark_all_stale(&mut self) {
        for choice in &mut self.entries {
            choice.mark = Mark::Stale;
        }
    }

    /// Removes the earliest entry carrying `mark`.
    pub(crate) fn take_first(&mut self, mark: Mark) -> Option<TaskKey> {
        let index = self.entries.iter().position(|choice| choice.mark == mark)?;
        Some(self.entries.remove(index).key)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
