//! Bounded async queue with closure semantics.
//!
//! The queue is the delivery channel between agents (producers) and callers
//! or hook drainers (consumers). Once closed, `put` fails; `get` drains any
//! remaining items and then fails with [`EngineError::QueueClosed`].
//! Cloning a queue is cheap and clones share the same buffer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Semaphore, TryAcquireError};

use crate::error::{EngineError, EngineResult};
use crate::types::message::Message;

/// Queue of [`Message`]s, the common instantiation.
pub type MessageQueue = AsyncQueue<Message>;

/// A multi-producer multi-consumer async FIFO queue.
///
/// # Example
///
/// ```rust
/// use tasktree::queue::AsyncQueue;
///
/// # tokio_test::block_on(async {
/// let queue = AsyncQueue::bounded(2);
/// queue.put(1u32).await.unwrap();
/// queue.put(2u32).await.unwrap();
/// assert!(queue.is_full());
/// assert_eq!(queue.get().await.unwrap(), 1);
/// queue.close();
/// assert!(queue.put(3u32).await.is_err());
/// # });
/// ```
#[derive(Debug)]
pub struct AsyncQueue<T> {
    inner: Arc<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    /// Free slots; absent for unbounded queues.
    slots: Option<Semaphore>,
    /// Queued items ready for `get`.
    available: Semaphore,
    closed: AtomicBool,
}

impl<T> Clone for AsyncQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncQueue<T> {
    /// Create an unbounded queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: 0,
                items: Mutex::new(VecDeque::new()),
                slots: None,
                available: Semaphore::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a queue holding at most `capacity` items.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                slots: Some(Semaphore::new(capacity)),
                available: Semaphore::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Add an item, waiting for a free slot if the queue is bounded.
    pub async fn put(&self, item: T) -> EngineResult<()> {
        if self.is_closed() {
            return Err(EngineError::QueueClosed);
        }
        if let Some(slots) = &self.inner.slots {
            let permit = slots.acquire().await.map_err(|_| EngineError::QueueClosed)?;
            permit.forget();
        }
        if self.is_closed() {
            return Err(EngineError::QueueClosed);
        }
        self.push(item);
        Ok(())
    }

    /// Add an item, waiting at most `timeout` for a free slot.
    pub async fn put_timeout(&self, item: T, timeout: Duration) -> EngineResult<()> {
        match tokio::time::timeout(timeout, self.put(item)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(timeout)),
        }
    }

    /// Add an item without waiting; fails if the queue is full or closed.
    pub fn put_nowait(&self, item: T) -> EngineResult<()> {
        if self.is_closed() {
            return Err(EngineError::QueueClosed);
        }
        if let Some(slots) = &self.inner.slots {
            match slots.try_acquire() {
                Ok(permit) => permit.forget(),
                Err(TryAcquireError::NoPermits) => return Err(EngineError::QueueFull),
                Err(TryAcquireError::Closed) => return Err(EngineError::QueueClosed),
            }
        }
        self.push(item);
        Ok(())
    }

    /// Remove and return the oldest item, waiting until one is available.
    ///
    /// After [`close`](Self::close), remaining items are still drained;
    /// only an empty closed queue fails.
    pub async fn get(&self) -> EngineResult<T> {
        match self.inner.available.acquire().await {
            Ok(permit) => {
                permit.forget();
                // a close may race the pop and let another consumer drain
                // this item through the closed path
                self.pop().ok_or(EngineError::QueueClosed)
            }
            Err(_) => self.pop().ok_or(EngineError::QueueClosed),
        }
    }

    /// Remove and return the oldest item, waiting at most `timeout`.
    pub async fn get_timeout(&self, timeout: Duration) -> EngineResult<T> {
        match tokio::time::timeout(timeout, self.get()).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(timeout)),
        }
    }

    /// Remove and return the oldest item without waiting.
    pub fn get_nowait(&self) -> EngineResult<T> {
        match self.inner.available.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.pop().ok_or(EngineError::QueueClosed)
            }
            Err(TryAcquireError::NoPermits) => Err(EngineError::QueueEmpty),
            Err(TryAcquireError::Closed) => self.pop().ok_or(EngineError::QueueClosed),
        }
    }

    /// Whether the queue currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a bounded queue is at capacity. Unbounded queues are never
    /// full.
    pub fn is_full(&self) -> bool {
        self.inner.capacity > 0 && self.len() >= self.inner.capacity
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.inner
            .items
            .lock()
            .map(|items| items.len())
            .unwrap_or(0)
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the queue. Subsequent `put`s fail; pending and subsequent
    /// `get`s drain remaining items and then fail.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(slots) = &self.inner.slots {
            slots.close();
        }
        self.inner.available.close();
    }

    fn push(&self, item: T) {
        if let Ok(mut items) = self.inner.items.lock() {
            items.push_back(item);
        }
        self.inner.available.add_permits(1);
    }

    fn pop(&self) -> Option<T> {
        let item = self
            .inner
            .items
            .lock()
            .ok()
            .and_then(|mut items| items.pop_front());
        if item.is_some() {
            if let Some(slots) = &self.inner.slots {
                slots.add_permits(1);
            }
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = AsyncQueue::new();
        queue.put(1u32).await.unwrap();
        queue.put(2u32).await.unwrap();
        queue.put(3u32).await.unwrap();
        assert_eq!(queue.get().await.unwrap(), 1);
        assert_eq!(queue.get().await.unwrap(), 2);
        assert_eq!(queue.get().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_bounded_capacity() {
        let queue = AsyncQueue::bounded(1);
        queue.put(1u32).await.unwrap();
        assert!(queue.is_full());
        assert!(matches!(
            queue.put_nowait(2),
            Err(EngineError::QueueFull)
        ));
        let err = queue
            .put_timeout(2, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
        assert_eq!(queue.get().await.unwrap(), 1);
        queue.put(2u32).await.unwrap();
    }

    #[tokio::test]
    async fn test_put_unblocks_waiting_get() {
        let queue: AsyncQueue<u32> = AsyncQueue::bounded(4);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.put(7).await.unwrap();
        assert_eq!(consumer.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_close_semantics() {
        let queue = AsyncQueue::new();
        queue.put(1u32).await.unwrap();
        queue.close();
        assert!(queue.is_closed());
        assert!(matches!(
            queue.put(2u32).await,
            Err(EngineError::QueueClosed)
        ));
        // remaining items are drained after close
        assert_eq!(queue.get().await.unwrap(), 1);
        assert!(matches!(
            queue.get().await,
            Err(EngineError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_get() {
        let queue: AsyncQueue<u32> = AsyncQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        assert!(matches!(
            consumer.await.unwrap(),
            Err(EngineError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_get_nowait_and_timeout() {
        let queue: AsyncQueue<u32> = AsyncQueue::new();
        assert!(matches!(
            queue.get_nowait(),
            Err(EngineError::QueueEmpty)
        ));
        let err = queue
            .get_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_fifo_preserved(items in proptest::collection::vec(any::<u32>(), 0..64)) {
                let queue = AsyncQueue::new();
                for item in &items {
                    queue.put_nowait(*item).unwrap();
                }
                let mut drained = Vec::new();
                while let Ok(item) = queue.get_nowait() {
                    drained.push(item);
                }
                prop_assert_eq!(drained, items);
            }

            #[test]
            fn prop_bounded_never_overfills(
                capacity in 1usize..8,
                items in proptest::collection::vec(any::<u32>(), 0..32),
            ) {
                let queue = AsyncQueue::bounded(capacity);
                let mut accepted = 0usize;
                for item in items {
                    if queue.put_nowait(item).is_ok() {
                        accepted += 1;
                    }
                    prop_assert!(queue.len() <= capacity);
                }
                prop_assert_eq!(accepted.min(capacity), queue.len());
            }
        }
    }
}
