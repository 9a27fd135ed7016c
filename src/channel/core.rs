//! Rendezvous protocol state of a single channel.
//!
//! The channel keeps two sequence counters. `send_seq - recv_seq` is the
//! number of buffered values and stays within `0..=slack` between operations.
//! Slots and their timestamps form a ring of `slack + 1` entries; a value sent
//! as number `n` lives in slot `n % (slack + 1)`.
//!
//! Each slot timestamp records when the slot last changed hands: a sender
//! stamps it with the time its value becomes visible (its own time plus the
//! stage delay), a receiver stamps it with the time it consumed the value,
//! which is when the slot becomes free again. Parties move their own clocks to
//! the stamp of the slot they touch before doing anything else, so data is
//! never observed before it was produced and a saturated buffer accumulates
//! backpressure delay.

use crate::channel::{ChannelId, ChannelSpec, Direction};
use crate::error::{Result, SimError};
use crate::runtime::Kernel;
use crate::select::{SelectionState, Unlink};
use crate::task::{TaskId, TaskKey, TaskState};
use crate::time::LogicalTime;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::rc::{Rc, Weak};

/// A task parked on one of the channel's queues.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Parked {
    pub(crate) key: TaskKey,
    pub(crate) id: TaskId,
}

/// Result of a transfer attempt.
#[derive(Debug)]
pub(crate) enum Outcome<T> {
    Done(T),
    Parked,
}

pub(crate) struct ChannelCore<T, Tm> {
    id: ChannelId,
    slack: u64,
    fifo_delay: u64,
    overhead: u64,
    send_seq: u64,
    recv_seq: u64,
    slots: Vec<Option<T>>,
    stamps: Vec<Tm>,
    /// Blocked senders and the values they are waiting to commit.
    senders: VecDeque<(Parked, T)>,
    receivers: VecDeque<Parked>,
    /// Values handed directly to receivers that were parked.
    handoffs: Vec<(TaskKey, T)>,
    subscribers: Vec<Weak<RefCell<SelectionState>>>,
}

impl<T, Tm: LogicalTime> ChannelCore<T, Tm> {
    pub(crate) fn new(id: ChannelId, spec: &ChannelSpec) -> Result<Self> {
        if spec.cycle < spec.latency {
            return Err(SimError::InvalidTiming {
                latency: spec.latency,
                cycle: spec.cycle,
            });
        }

        let len = spec.slack.saturating_add(1);
        let allocation = |source| SimError::Allocation {
            what: "channel buffer",
            source,
        };

        let mut slots = Vec::new();
        slots.try_reserve_exact(len).map_err(allocation)?;
        slots.resize_with(len, || None);

        let mut stamps = Vec::new();
        stamps.try_reserve_exact(len).map_err(allocation)?;
        stamps.resize(len, Tm::zero());

        let slack = spec.slack as u64;

        Ok(Self {
            id,
            slack,
            fifo_delay: slack.saturating_mul(spec.latency),
            overhead: spec.cycle - spec.latency,
            send_seq: 0,
            recv_seq: 0,
            slots,
            stamps,
            senders: VecDeque::new(),
            receivers: VecDeque::new(),
            handoffs: Vec::new(),
            subscribers: Vec::new(),
        })
    }

    fn slot(&self, seq: u64) -> usize {
        (seq % self.stamps.len() as u64) as usize
    }

    /// Delay a value picks up in this stage: per-stage overhead for every
    /// value ahead of it plus the fixed pipeline latency.
    fn stage_delay(&self) -> u64 {
        self.send_seq
            .abs_diff(self.recv_seq)
            .saturating_mul(self.overhead)
            .saturating_add(self.fifo_delay)
    }

    pub(crate) fn occupancy(&self) -> u64 {
        self.send_seq - self.recv_seq
    }

    pub(crate) fn sent(&self) -> u64 {
        self.send_seq
    }

    pub(crate) fn received(&self) -> u64 {
        self.recv_seq
    }

    pub(crate) fn pending(&self, direction: Direction) -> usize {
        match direction {
            Direction::Send => self.senders.len(),
            Direction::Recv => self.receivers.len(),
        }
    }

    pub(crate) fn send(&mut self, kernel: &mut Kernel<Tm>, me: TaskKey, value: T) -> Outcome<()> {
        let id = self.slot(self.send_seq);
        let next = self.slot(self.send_seq + 1);
        let delay = self.stage_delay();

        if let Some(receiver) = self.receivers.pop_front() {
            let mut now = kernel.time(me).max(self.stamps[next]);
            self.stamps[id] = now.advance(delay);

            let mut theirs = kernel.time(receiver.key);
            if self.slack == 0 {
                now = now.max(theirs);
                theirs = now;
            }
            kernel.set_time(me, now);
            kernel.make_ready(receiver.key);

            let read = self.slot(self.recv_seq);
            theirs = theirs.max(self.stamps[read]);
            self.stamps[read] = theirs;
            kernel.set_time(receiver.key, theirs);

            self.handoffs.push((receiver.key, value));
            self.recv_seq += 1;
            self.send_seq += 1;
        } else if self.occupancy() == self.slack {
            // A receiver commits the value into the free slot later.
            let parked = Parked {
                key: me,
                id: kernel.task(me).id,
            };
            self.senders.push_back((parked, value));
            kernel.park(me, TaskState::SendBlocked(self.id));
            self.notify(kernel);
            return Outcome::Parked;
        } else {
            self.slots[id] = Some(value);
            let now = kernel.time(me).max(self.stamps[next]);
            self.stamps[id] = now.advance(delay);
            kernel.set_time(me, now);
            self.send_seq += 1;
        }

        self.notify(kernel);
        Outcome::Done(())
    }

    pub(crate) fn recv(&mut self, kernel: &mut Kernel<Tm>, me: TaskKey) -> Outcome<T> {
        let id = self.slot(self.recv_seq);

        let value = if let Some((sender, pending)) = self.senders.pop_front() {
            // With zero slack the free slot is also the one read below.
            let written = self.slot(self.send_seq);
            self.slots[written] = Some(pending);

            let mut now = kernel.time(me).max(self.stamps[id]);
            self.stamps[id] = now;

            let mut theirs = kernel.time(sender.key);
            if self.slack == 0 {
                now = now.max(theirs);
                theirs = now;
            }
            kernel.set_time(me, now);
            kernel.make_ready(sender.key);

            let value = self.take_slot(id);
            self.recv_seq += 1;

            let next = self.slot(self.send_seq + 1);
            theirs = theirs.max(self.stamps[next]);
            self.stamps[written] = theirs.advance(self.stage_delay());
            kernel.set_time(sender.key, theirs);
            self.send_seq += 1;

            value
        } else if self.send_seq == self.recv_seq {
            self.receivers.push_back(Parked {
                key: me,
                id: kernel.task(me).id,
            });
            kernel.park(me, TaskState::RecvBlocked(self.id));
            self.notify(kernel);
            return Outcome::Parked;
        } else {
            let value = self.take_slot(id);
            let now = kernel.time(me).max(self.stamps[id]);
            self.stamps[id] = now;
            kernel.set_time(me, now);
            self.recv_seq += 1;

            value
        };

        self.notify(kernel);
        Outcome::Done(value)
    }

    fn take_slot(&mut self, index: usize) -> T {
        match self.slots[index].take() {
            Some(value) => value,
            None => panic!("channel {} slot {index} read while empty", self.id),
        }
    }

    /// Whether `key` is still parked in the given direction.
    pub(crate) fn is_parked(&self, direction: Direction, key: TaskKey) -> bool {
        match direction {
            Direction::Send => self.senders.iter().any(|(parked, _)| parked.key == key),
            Direction::Recv => self.receivers.iter().any(|parked| parked.key == key),
        }
    }

    pub(crate) fn take_handoff(&mut self, key: TaskKey) -> Option<T> {
        let index = self.handoffs.iter().position(|(to, _)| *to == key)?;
        Some(self.handoffs.swap_remove(index).1)
    }

    pub(crate) fn can_send(&self) -> bool {
        self.occupancy() != self.slack || !self.receivers.is_empty()
    }

    pub(crate) fn can_receive(&self) -> bool {
        self.send_seq != self.recv_seq || !self.senders.is_empty()
    }

    /// Time at which the probed operation became possible, if it is.
    pub(crate) fn ready_time(&self, kernel: &Kernel<Tm>, direction: Direction) -> Option<Tm> {
        match direction {
            Direction::Recv if self.can_receive() => {
                if self.send_seq == self.recv_seq {
                    self.senders.front().map(|(parked, _)| kernel.time(parked.key))
                } else {
                    Some(self.stamps[self.slot(self.recv_seq)])
                }
            }
            Direction::Send if self.can_send() => {
                if self.occupancy() == self.slack {
                    self.receivers.front().map(|parked| kernel.time(parked.key))
                } else {
                    Some(self.stamps[self.slot(self.send_seq + 1)])
                }
            }
            _ => None,
        }
    }

    pub(crate) fn subscribe(&mut self, selection: Weak<RefCell<SelectionState>>) {
        self.subscribers.push(selection);
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|selection| selection.strong_count() > 0)
            .count()
    }

    /// Wakes every task waiting on a selection linked to this channel.
    fn notify(&mut self, kernel: &mut Kernel<Tm>) {
        self.subscribers
            .retain(|selection| selection.strong_count() > 0);

        for selection in &self.subscribers {
            let waiting = selection
                .upgrade()
                .and_then(|selection| selection.borrow().waiting());
            if let Some(key) = waiting {
                kernel.notify_selection(key);
            }
        }
    }

    /// Debug identities of the parked senders and receivers.
    pub(crate) fn blocked(&self, kernel: Option<&Kernel<Tm>>) -> (Vec<String>, Vec<String>) {
        let describe = |parked: &Parked| match kernel {
            Some(kernel) => kernel.describe(parked.key),
            None => format!("[Task {:2}]", parked.id.as_u64()),
        };

        (
            self.senders.iter().map(|(parked, _)| describe(parked)).collect(),
            self.receivers.iter().map(describe).collect(),
        )
    }

    /// Counters, queue lengths and slot stamps; live slots are marked `*`.
    pub(crate) fn dump(&self) -> String {
        let mut out = format!(
            "{} (sent={}, received={}, senders={}, receivers={})\n",
            self.id,
            self.send_seq,
            self.recv_seq,
            self.senders.len(),
            self.receivers.len()
        );

        let live: Vec<usize> = (self.recv_seq..self.send_seq)
            .map(|seq| self.slot(seq))
            .collect();

        for (index, stamp) in self.stamps.iter().enumerate() {
            let mark = if live.contains(&index) { " *" } else { "" };
            let _ = writeln!(out, "\tstamp[{index}] = {stamp}{mark}");
        }
        out
    }
}

impl<T, Tm> Unlink for RefCell<ChannelCore<T, Tm>> {
    fn unlink(&self, selection: &Rc<RefCell<SelectionState>>) {
        if let Ok(mut core) = self.try_borrow_mut() {
            core.subscribers.retain(|linked| {
                linked.strong_count() > 0 && !std::ptr::eq(linked.as_ptr(), Rc::as_ptr(selection))
            });
        }
    }
}
