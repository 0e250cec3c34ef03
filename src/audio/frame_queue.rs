use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, PoisonError},
    time::Duration,
};

/// Bounded FIFO with drop-oldest backpressure.
///
/// Pushing into a full queue evicts the oldest entry first, so a slow
/// consumer always gets the most recent `capacity` items.
#[derive(Debug)]
pub struct DropOldestQueue<T> {
    inner: Mutex<QueueState<T>>,
    not_empty: Condvar,
    capacity: usize,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    dropped: u64,
    closed: bool,
}

impl<T> DropOldestQueue<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                dropped: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Enqueues `item`. Returns `true` if an older item was evicted to make room.
    /// Pushes after [`close`](Self::close) are ignored.
    pub fn push(&self, item: T) -> bool {
        let mut st = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if st.closed {
            return false;
        }
        let mut evicted = false;
        while st.items.len() >= self.capacity {
            st.items.pop_front();
            st.dropped += 1;
            evicted = true;
        }
        st.items.push_back(item);
        drop(st);
        self.not_empty.notify_one();
        evicted
    }

    /// Non-blocking poll.
    pub fn try_pop(&self) -> Option<T> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .pop_front()
    }

    /// Waits up to `timeout` for an item. Returns `None` on timeout or once closed and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut st, _) = self
            .not_empty
            .wait_timeout_while(guard, timeout, |s| s.items.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        st.items.pop_front()
    }

    /// Wakes every waiter and rejects further pushes.
    pub fn close(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
        self.not_empty.notify_all();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items evicted so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dropped
    }
}
