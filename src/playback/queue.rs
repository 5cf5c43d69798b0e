use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use crate::playback::{QueueError, Request};

/// Bounded FIFO of pending requests. A capacity of zero means unbounded.
///
/// None of the operations suspend: the lock is held only for the duration of
/// a push or pop, never across an `.await`.
#[derive(Debug)]
pub struct RequestQueue {
    capacity: usize,
    items: Mutex<VecDeque<Request>>,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Mutex::new(VecDeque::new()),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<Request>> {
        // a panic while holding the lock cannot leave the deque half-updated
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_bounded(&self) -> bool {
        self.capacity > 0
    }

    pub fn enqueue(&self, request: Request) -> Result<(), QueueError> {
        let mut items = self.items();
        if self.is_bounded() && items.len() >= self.capacity {
            return Err(QueueError::Full(self.capacity));
        }

        items.push_back(request);
        Ok(())
    }

    pub fn try_dequeue(&self) -> Option<Request> {
        self.items().pop_front()
    }

    /// Removes every pending request, oldest first.
    pub fn drain_all(&self) -> Vec<Request> {
        let mut drained = Vec::new();
        while let Some(request) = self.try_dequeue() {
            drained.push(request);
        }
        drained
    }

    /// Copy of the pending requests in order, leaving the queue untouched.
    pub fn snapshot(&self) -> Vec<Request> {
        self.items().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.is_bounded() && self.len() >= self.capacity
    }

    /// Free slots, or `None` when unbounded.
    pub fn remaining(&self) -> Option<usize> {
        self.is_bounded().then(|| self.capacity.saturating_sub(self.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::test_utils::request;

    #[test]
    fn rejects_beyond_capacity_without_mutating() {
        let queue = RequestQueue::new(2);

        assert!(queue.enqueue(request("https://example.com/a")).is_ok());
        assert!(queue.enqueue(request("https://example.com/b")).is_ok());
        assert!(queue.is_full());

        let before = queue.snapshot();
        assert_eq!(queue.enqueue(request("https://example.com/c")), Err(QueueError::Full(2)));
        assert_eq!(queue.snapshot(), before);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.remaining(), Some(0));
    }

    #[test]
    fn size_never_exceeds_capacity() {
        for capacity in 1..6 {
            let queue = RequestQueue::new(capacity);
            for i in 0..20 {
                let _ = queue.enqueue(request(&format!("https://example.com/{i}")));
                assert!(queue.len() <= capacity);
                if i % 3 == 0 {
                    queue.try_dequeue();
                }
            }
        }
    }

    #[test]
    fn zero_capacity_is_unbounded() {
        let queue = RequestQueue::new(0);
        for i in 0..100 {
            queue.enqueue(request(&format!("https://example.com/{i}"))).unwrap();
        }

        assert!(!queue.is_full());
        assert_eq!(queue.remaining(), None);
        assert_eq!(queue.len(), 100);
    }

    #[test]
    fn preserves_insertion_order() {
        let queue = RequestQueue::new(0);
        let urls: Vec<String> = (0..10).map(|i| format!("https://example.com/{i}")).collect();
        for url in &urls {
            queue.enqueue(request(url)).unwrap();
        }

        let mut dequeued = Vec::new();
        while let Some(r) = queue.try_dequeue() {
            dequeued.push(r.url.to_string());
        }

        assert_eq!(dequeued, urls);
        assert!(queue.is_empty());
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn drain_empties_in_order_and_snapshot_does_not() {
        let queue = RequestQueue::new(3);
        queue.enqueue(request("https://example.com/a")).unwrap();
        queue.enqueue(request("https://example.com/b")).unwrap();

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(queue.len(), 2);

        let drained = queue.drain_all();
        assert_eq!(drained, snapshot);
        assert!(queue.is_empty());
        assert_eq!(queue.remaining(), Some(3));
    }
}
