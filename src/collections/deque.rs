//! Lock-guarded double-ended ring buffer.
//!
//! Every operation takes the internal mutex for exactly the duration of the
//! O(1) / O(k) buffer manipulation. Callers never hold the lock across
//! serialization or I/O: batch operations copy items out first.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of slots allocated by [`Deque::new`].
pub const DEFAULT_CAPACITY: usize = 256;

/// Smallest capacity a growing buffer jumps to when it is currently empty.
const MIN_GROWTH: usize = 4;

/// Errors raised by queue operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Dequeue on an empty queue.
    Underflow,
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Underflow => write!(f, "queue underflow: dequeue on an empty queue"),
        }
    }
}

impl std::error::Error for QueueError {}

struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn physical(&self, index: usize) -> usize {
        (self.head + index) % self.capacity()
    }

    /// Move every live item into a fresh buffer of `capacity` slots, front first.
    fn reallocate(&mut self, capacity: usize) {
        debug_assert!(capacity >= self.len);
        let mut slots = Vec::with_capacity(capacity);
        for index in 0..self.len {
            let slot = self.physical(index);
            slots.push(self.slots[slot].take());
        }
        slots.resize_with(capacity, || None);
        self.slots = slots;
        self.head = 0;
    }

    /// Geometric growth: double until `required` items fit.
    fn reserve(&mut self, additional: usize) {
        let required = self.len + additional;
        if required <= self.capacity() {
            return;
        }
        let mut capacity = self.capacity().max(MIN_GROWTH);
        while capacity < required {
            capacity = capacity.saturating_mul(2);
        }
        self.reallocate(capacity);
    }

    fn push_back(&mut self, item: T) {
        self.reserve(1);
        let slot = self.physical(self.len);
        self.slots[slot] = Some(item);
        self.len += 1;
    }

    fn push_front(&mut self, item: T) {
        self.reserve(1);
        let capacity = self.capacity();
        self.head = (self.head + capacity - 1) % capacity;
        self.slots[self.head] = Some(item);
        self.len += 1;
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        item
    }

    fn pop_back(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let slot = self.physical(self.len - 1);
        self.len -= 1;
        self.slots[slot].take()
    }

    fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        self.slots[self.physical(index)].as_ref()
    }

    fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |index| self.get(index))
    }

    fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

/// Concurrent double-ended queue backed by a growable ring buffer.
///
/// Backing storage only ever grows on its own; [`Deque::trim`] is the single
/// place it shrinks, and only when called explicitly.
pub struct Deque<T> {
    inner: Mutex<Ring<T>>,
}

impl<T> Default for Deque<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deque<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Ring::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item at the back.
    pub fn add(&self, item: T) {
        self.lock().push_back(item);
    }

    /// Prepend an item at the front.
    pub fn add_front(&self, item: T) {
        self.lock().push_front(item);
    }

    /// Append all items at the back, keeping their order.
    pub fn add_range<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        let mut ring = self.lock();
        ring.reserve(items.len());
        for item in items {
            ring.push_back(item);
        }
    }

    /// Prepend all items at the front. The first item of `items` becomes the
    /// new front of the queue.
    pub fn add_range_front<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        let mut ring = self.lock();
        ring.reserve(items.len());
        for item in items.into_iter().rev() {
            ring.push_front(item);
        }
    }

    /// Remove and return the front item.
    pub fn dequeue(&self) -> Result<T, QueueError> {
        self.lock().pop_front().ok_or(QueueError::Underflow)
    }

    /// Remove and return the back item.
    pub fn dequeue_back(&self) -> Result<T, QueueError> {
        self.lock().pop_back().ok_or(QueueError::Underflow)
    }

    /// Remove up to `count` items from the front, in queue order.
    pub fn dequeue_range(&self, count: usize) -> Vec<T> {
        let mut ring = self.lock();
        let take = count.min(ring.len);
        let mut items = Vec::with_capacity(take);
        for _ in 0..take {
            match ring.pop_front() {
                Some(item) => items.push(item),
                None => break,
            }
        }
        items
    }

    /// Remove everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        self.dequeue_range(usize::MAX)
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Count queued items matching `predicate` without removing them.
    pub fn count_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        self.lock().iter().filter(|item| predicate(item)).count()
    }

    /// Shrink backing storage to exactly the current item count, which may be
    /// zero. The next insert grows it again from `MIN_GROWTH`.
    pub fn trim(&self) {
        let mut ring = self.lock();
        let len = ring.len;
        if ring.capacity() > len {
            ring.reallocate(len);
        }
    }
}

impl<T: Clone> Deque<T> {
    /// Read the item at `index` (0 = front) without removing it.
    pub fn peek(&self, index: usize) -> Option<T> {
        self.lock().get(index).cloned()
    }

    /// Copy of the queue contents, front to back.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }
}

impl<T: PartialEq> Deque<T> {
    pub fn contains(&self, item: &T) -> bool {
        self.lock().iter().any(|queued| queued == item)
    }
}

impl<T> FromIterator<T> for Deque<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let items: Vec<T> = iter.into_iter().collect();
        let deque = Self::with_capacity(items.len().max(MIN_GROWTH));
        deque.add_range(items);
        deque
    }
}

impl<T> std::fmt::Debug for Deque<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.lock();
        f.debug_struct("Deque")
            .field("len", &ring.len)
            .field("capacity", &ring.capacity())
            .finish()
    }
}
