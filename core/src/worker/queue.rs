//! Bounded FIFO work queue shared by queue-mode worker units
//!
//! A `Mutex<VecDeque>` holds the items; one semaphore counts free slots and
//! another counts filled slots. The mutex is taken only for the push or pop
//! itself and is never held across an `.await`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

use crate::task::TaskDescriptor;

/// A descriptor waiting in the queue, tagged with its distribution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    /// Position in distribution order
    pub sequence: u64,
    /// The descriptor
    pub task: TaskDescriptor,
}

/// Result of a bounded-wait [`WorkQueue::pop`]
#[derive(Debug, PartialEq, Eq)]
pub enum Popped<T> {
    /// An item was taken
    Item(T),
    /// Nothing arrived within the wait; the queue is still open
    Empty,
    /// The queue is closed and has no items left
    Closed,
}

/// A free queue slot held by a producer
#[derive(Debug)]
pub struct Slot<'a, T> {
    queue: &'a WorkQueue<T>,
    permit: SemaphorePermit<'a>,
}

impl<T> Slot<'_, T> {
    /// Put `item` into the reserved slot
    ///
    /// # Errors
    /// Hands the item back if the queue was closed in the meantime.
    pub fn fill(self, item: T) -> Result<(), T> {
        let Slot { queue, permit } = self;
        let mut slots = queue.lock();
        if slots.closed {
            return Err(item);
        }
        permit.forget();
        slots.items.push_back(item);
        queue.filled.add_permits(1);
        Ok(())
    }
}

#[derive(Debug)]
struct Slots<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded multi-producer multi-consumer FIFO
#[derive(Debug)]
pub struct WorkQueue<T> {
    slots: Mutex<Slots<T>>,
    free: Semaphore,
    filled: Semaphore,
    closed: CancellationToken,
    capacity: usize,
}

impl<T> WorkQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Mutex::new(Slots {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            free: Semaphore::new(capacity),
            filled: Semaphore::new(0),
            closed: CancellationToken::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for a free slot without committing an item yet
    ///
    /// Returns `None` if `cancel` fires first or the queue is closed.
    /// Dropping the slot gives it back.
    pub async fn reserve(&self, cancel: &CancellationToken) -> Option<Slot<'_, T>> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            permit = self.free.acquire() => permit.ok()?,
        };
        Some(Slot {
            queue: self,
            permit,
        })
    }

    /// Enqueue an item, waiting for a free slot
    ///
    /// Returns `false` (dropping the item) if `cancel` fires first or the
    /// queue is closed.
    pub async fn push(&self, item: T, cancel: &CancellationToken) -> bool {
        match self.reserve(cancel).await {
            Some(slot) => slot.fill(item).is_ok(),
            None => false,
        }
    }

    /// Take the oldest item, waiting at most `wait`
    pub async fn pop(&self, wait: Duration) -> Popped<T> {
        let permit = tokio::select! {
            biased;
            permit = self.filled.acquire() => permit.ok(),
            _ = self.closed.cancelled() => self.filled.try_acquire().ok(),
            _ = tokio::time::sleep(wait) => return Popped::Empty,
        };

        let Some(permit) = permit else {
            return Popped::Closed;
        };
        permit.forget();

        let mut slots = self.lock();
        match slots.items.pop_front() {
            Some(item) => {
                self.free.add_permits(1);
                Popped::Item(item)
            }
            // Lost the item to drain_remaining.
            None if slots.closed => Popped::Closed,
            None => Popped::Empty,
        }
    }

    /// Stop accepting items and wake blocked producers and consumers
    ///
    /// Items already queued stay poppable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.free.close();
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Remove and return every queued item
    pub fn drain_remaining(&self) -> Vec<T> {
        let mut slots = self.lock();
        let items: Vec<T> = slots.items.drain(..).collect();
        for _ in 0..items.len() {
            match self.filled.try_acquire() {
                Ok(permit) => permit.forget(),
                Err(_) => break,
            }
        }
        self.free.add_permits(items.len());
        items
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = WorkQueue::new(4);
        let token = CancellationToken::new();
        for i in 0..3 {
            assert!(queue.push(i, &token).await);
        }
        assert_eq!(queue.pop(WAIT).await, Popped::Item(0));
        assert_eq!(queue.pop(WAIT).await, Popped::Item(1));
        assert_eq!(queue.pop(WAIT).await, Popped::Item(2));
        assert_eq!(queue.pop(WAIT).await, Popped::Empty);
    }

    #[tokio::test]
    async fn test_push_blocks_when_full() {
        let queue = Arc::new(WorkQueue::new(1));
        let token = CancellationToken::new();
        assert!(queue.push(1, &token).await);

        let pusher = {
            let queue = Arc::clone(&queue);
            let token = token.clone();
            tokio::spawn(async move { queue.push(2, &token).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!pusher.is_finished());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop(WAIT).await, Popped::Item(1));
        assert!(pusher.await.unwrap());
        assert_eq!(queue.pop(WAIT).await, Popped::Item(2));
    }

    #[tokio::test]
    async fn test_push_cancelled() {
        let queue = WorkQueue::new(1);
        let token = CancellationToken::new();
        assert!(queue.push(1, &token).await);
        token.cancel();
        assert!(!queue.push(2, &token).await);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_reserved_slot_counts_against_capacity() {
        let queue = Arc::new(WorkQueue::new(1));
        let token = CancellationToken::new();
        let slot = queue.reserve(&token).await.unwrap();

        let second = {
            let queue = Arc::clone(&queue);
            let token = token.clone();
            tokio::spawn(async move { queue.reserve(&token).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!second.is_finished());

        token.cancel();
        assert!(!second.await.unwrap());
        assert_eq!(slot.fill(7), Ok(()));
        assert_eq!(queue.pop(WAIT).await, Popped::Item(7));
    }

    #[tokio::test]
    async fn test_dropped_slot_is_released() {
        let queue = WorkQueue::new(1);
        let token = CancellationToken::new();
        drop(queue.reserve(&token).await.unwrap());
        assert!(queue.push(1, &token).await);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_fill_after_close_returns_item() {
        let queue = WorkQueue::new(2);
        let token = CancellationToken::new();
        let slot = queue.reserve(&token).await.unwrap();
        queue.close();

        assert_eq!(slot.fill("late"), Err("late"));
        assert!(queue.reserve(&token).await.is_none());
    }

    #[tokio::test]
    async fn test_close_keeps_items_then_reports_closed() {
        let queue = WorkQueue::new(4);
        let token = CancellationToken::new();
        queue.push("a", &token).await;
        queue.close();

        assert!(!queue.push("b", &token).await);
        assert_eq!(queue.pop(WAIT).await, Popped::Item("a"));
        assert_eq!(queue.pop(WAIT).await, Popped::Closed);
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let queue = Arc::new(WorkQueue::<u32>::new(2));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop(Duration::from_secs(10)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped, Popped::Closed);
    }

    #[tokio::test]
    async fn test_drain_remaining() {
        let queue = WorkQueue::new(4);
        let token = CancellationToken::new();
        for i in 0..3 {
            queue.push(i, &token).await;
        }
        queue.close();

        assert_eq!(queue.drain_remaining(), vec![0, 1, 2]);
        assert!(queue.is_empty());
        assert_eq!(queue.pop(WAIT).await, Popped::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_exactly_once() {
        let queue = Arc::new(WorkQueue::new(8));
        let token = CancellationToken::new();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    loop {
                        match queue.pop(WAIT).await {
                            Popped::Item(i) => seen.push(i),
                            Popped::Empty => continue,
                            Popped::Closed => return seen,
                        }
                    }
                })
            })
            .collect();

        for i in 0..500u32 {
            assert!(queue.push(i, &token).await);
        }
        queue.close();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        assert_eq!(all.len(), 500);
        let unique: HashSet<_> = all.into_iter().collect();
        assert_eq!(unique.len(), 500);
    }
}
