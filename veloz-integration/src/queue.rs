use crossbeam_queue::{ArrayQueue, SegQueue};
use std::sync::Arc;
use thiserror::Error;

/// Error returned when pushing to a full [`BoundedQueue`].
///
/// Carries the rejected item back to the producer so the submitting collaborator can shed
/// load without losing it.
#[derive(Clone, Eq, PartialEq, Error)]
#[error("queue full")]
pub struct QueueFull<T>(pub T);

impl<T> std::fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("QueueFull").finish()
    }
}

/// Bounded lock-free MPMC queue.
///
/// Thin wrapper over [`crossbeam_queue::ArrayQueue`]: `push` is release, `try_pop` is
/// acquire, so payloads are published without further fencing. FIFO per producer; no
/// ordering guarantee across producers.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: Arc<ArrayQueue<T>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(ArrayQueue::new(capacity)),
        }
    }

    /// Non-blocking push. Returns [`QueueFull`] with the rejected item when at capacity.
    pub fn push(&self, item: T) -> Result<(), QueueFull<T>> {
        self.inner.push(item).map_err(QueueFull)
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

/// Unbounded lock-free MPMC queue (Michael-Scott via [`crossbeam_queue::SegQueue`]).
///
/// Used where producers must never observe backpressure, such as the engine's cross-thread
/// task submission.
#[derive(Debug)]
pub struct UnboundedQueue<T> {
    inner: Arc<SegQueue<T>>,
}

impl<T> Clone for UnboundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for UnboundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> UnboundedQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SegQueue::new()),
        }
    }

    pub fn push(&self, item: T) {
        self.inner.push(item)
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_queue_push_full_returns_item() {
        let queue = BoundedQueue::new(2);
        queue.push(1).unwrap();
        queue.push(2).unwrap();

        let rejected = queue.push(3).unwrap_err();
        assert_eq!(rejected, QueueFull(3));

        assert_eq!(queue.try_pop(), Some(1));
        queue.push(3).unwrap();
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_unbounded_queue_fifo_per_producer() {
        let queue = UnboundedQueue::new();

        let producers: Vec<_> = (0..4u64)
            .map(|producer| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for sequence in 0..100u64 {
                        queue.push((producer, sequence));
                    }
                })
            })
            .collect();

        for handle in producers {
            handle.join().unwrap();
        }

        // Items from each producer must drain in the order that producer pushed them
        let mut last_seen = [None::<u64>; 4];
        while let Some((producer, sequence)) = queue.try_pop() {
            if let Some(last) = last_seen[producer as usize] {
                assert!(sequence > last, "producer {producer} order violated");
            }
            last_seen[producer as usize] = Some(sequence);
        }

        assert_eq!(last_seen, [Some(99), Some(99), Some(99), Some(99)]);
    }
}
