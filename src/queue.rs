//! Inter-stage queues: plain mutex + condvar + `VecDeque`, not a channel
//! crate, because the video queues' drop-oldest-on-full policy isn't
//! expressible through a channel's own backpressure.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A queue bounded to `capacity` items. When full, `push` drops the oldest
/// entry rather than blocking the producer — the capture and mux video paths
/// both rely on this.
pub struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Push an item, dropping the oldest queued item if already at capacity.
    /// Returns the dropped item, if any, so callers can log/count it.
    pub fn push_drop_oldest(&self, item: T) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        let dropped = if guard.len() >= self.capacity {
            guard.pop_front()
        } else {
            None
        };
        guard.push_back(item);
        self.not_empty.notify_one();
        dropped
    }

    /// Pop the oldest item, blocking up to `timeout` for one to appear.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        if guard.is_empty() {
            let (g, _) = self.not_empty.wait_timeout(guard, timeout).unwrap();
            guard = g;
        }
        guard.pop_front()
    }

    /// Non-blocking peek/pop used by the muxer's interleaving loop, which
    /// polls both queues rather than waiting on either alone.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn peek_is_some<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        self.inner.lock().unwrap().front().map(f)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn wake_all(&self) {
        self.not_empty.notify_all();
    }
}

/// An unbounded queue for audio: audio must never be dropped.
pub struct UnboundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> UnboundedQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    pub fn push(&self, item: T) {
        self.inner.lock().unwrap().push_back(item);
        self.not_empty.notify_one();
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        if guard.is_empty() {
            let (g, _) = self.not_empty.wait_timeout(guard, timeout).unwrap();
            guard = g;
        }
        guard.pop_front()
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn peek_is_some<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        self.inner.lock().unwrap().front().map(f)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for UnboundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_queue_drops_oldest_on_overflow() {
        let q = BoundedQueue::new(2);
        assert_eq!(q.push_drop_oldest(1), None);
        assert_eq!(q.push_drop_oldest(2), None);
        assert_eq!(q.push_drop_oldest(3), Some(1));
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), Some(3));
    }

    #[test]
    fn unbounded_queue_never_drops() {
        let q: UnboundedQueue<i32> = UnboundedQueue::new();
        for i in 0..1000 {
            q.push(i);
        }
        assert_eq!(q.len(), 1000);
    }

    #[test]
    fn pop_timeout_returns_none_on_empty() {
        let q: BoundedQueue<i32> = BoundedQueue::new(4);
        assert_eq!(q.pop_timeout(Duration::from_millis(1)), None);
    }
}
