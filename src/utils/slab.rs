//! Task storage with a pre-allocated pool for default-shaped tasks.
//!
//! The first `pool` slots are reserved up front. Items that ask for a pooled
//! slot take one of those while any is free; everything else (and pool
//! overflow) is boxed individually and released on removal.

use std::collections::TryReserveError;
use std::ops::{Index, IndexMut};

/// How an entry's storage was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// Served from the pre-allocated pool.
    Pooled,
    /// Allocated on its own and freed when the entry is removed.
    Dedicated,
}

enum Slot<T> {
    Vacant,
    Pooled(T),
    Dedicated(Box<T>),
}

pub(crate) struct Slab<T> {
    slots: Vec<Slot<T>>,
    pool_free: Vec<usize>,
    dedicated_free: Vec<usize>,
    len: usize,
}

impl<T> Slab<T> {
    pub(crate) fn new(pool: usize) -> Result<Self, TryReserveError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(pool)?;
        slots.extend((0..pool).map(|_| Slot::Vacant));

        // Reversed so the lowest index is handed out first.
        let mut pool_free = Vec::new();
        pool_free.try_reserve_exact(pool)?;
        pool_free.extend((0..pool).rev());

        Ok(Self {
            slots,
            pool_free,
            dedicated_free: Vec::new(),
            len: 0,
        })
    }

    /// Stores `item`, preferring a pool slot when `pooled` is set.
    pub(crate) fn insert(
        &mut self,
        item: T,
        pooled: bool,
    ) -> Result<(usize, Allocation), TryReserveError> {
        if pooled && let Some(index) = self.pool_free.pop() {
            self.slots[index] = Slot::Pooled(item);
            self.len += 1;
            return Ok((index, Allocation::Pooled));
        }

        let index = match self.dedicated_free.pop() {
            Some(index) => index,
            None => {
                self.slots.try_reserve(1)?;
                self.slots.push(Slot::Vacant);
                self.slots.len() - 1
            }
        };

        self.slots[index] = Slot::Dedicated(Box::new(item));
        self.len += 1;
        Ok((index, Allocation::Dedicated))
    }

    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        let slot = std::mem::replace(self.slots.get_mut(index)?, Slot::Vacant);

        let item = match slot {
            Slot::Vacant => return None,
            Slot::Pooled(item) => {
                self.pool_free.push(index);
                item
            }
            Slot::Dedicated(boxed) => {
                self.dedicated_free.push(index);
                *boxed
            }
        };

        self.len -= 1;
        Some(item)
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        match self.slots.get(index)? {
            Slot::Vacant => None,
            Slot::Pooled(item) => Some(item),
            Slot::Dedicated(item) => Some(item),
        }
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        match self.slots.get_mut(index)? {
            Slot::Vacant => None,
            Slot::Pooled(item) => Some(item),
            Slot::Dedicated(item) => Some(item),
        }
    }

    pub(crate) fn allocation(&self, index: usize) -> Option<Allocation> {
        match self.slots.get(index)? {
            Slot::Vacant => None,
            Slot::Pooled(_) => Some(Allocation::Pooled),
            Slot::Dedicated(_) => Some(Allocation::Dedicated),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Vacant => None,
                Slot::Pooled(item) => Some((index, item)),
                Slot::Dedicated(item) => Some((index, &**item)),
            })
    }

    /// Removes every entry, returning them so they can be dropped by the caller.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let indices: Vec<usize> = self.iter().map(|(index, _)| index).collect();
        indices
            .into_iter()
            .filter_map(|index| self.remove(index))
            .collect()
    }
}

impl<T> Index<usize> for Slab<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Some(item) => item,
            None => panic!("no live entry at slab index {index}"),
        }
    }
}

impl<T> IndexMut<usize> for Slab<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        match self.get_mut(index) {
            Some(item) => item,
            None => panic!("no live entry at slab index {index}"),
        }
    }
}
