//! Bounded hand-off queue between one producer and one consumer

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};

use crate::error::QueueError;

/// Bounded FIFO with timeout-bounded put/get.
///
/// Both ends live in every handle, so a clone can produce, consume or drain
/// and the channel never disconnects while a handle exists.
pub struct FrameQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for FrameQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> FrameQueue<T> {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Put an item, waiting up to `timeout` for space. On timeout the item
    /// is dropped and the caller decides whether to retry.
    pub fn put(&self, item: T, timeout: Duration) -> Result<(), QueueError> {
        match self.tx.send_timeout(item, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Disconnected(_)) => {
                Err(QueueError::Timeout)
            }
        }
    }

    /// Put an item, handing it back if the queue stays full for `timeout`.
    pub fn offer(&self, item: T, timeout: Duration) -> Result<(), T> {
        self.tx.send_timeout(item, timeout).map_err(|e| e.into_inner())
    }

    /// Put without waiting
    pub fn put_nowait(&self, item: T) -> Result<(), QueueError> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                Err(QueueError::Timeout)
            }
        }
    }

    /// Take the oldest item, waiting up to `timeout`
    pub fn get(&self, timeout: Duration) -> Result<T, QueueError> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Err(QueueError::Empty)
            }
        }
    }

    /// Take the oldest item without waiting. Safe to call from a real-time
    /// audio callback.
    pub fn get_nowait(&self) -> Result<T, QueueError> {
        self.rx.try_recv().map_err(|_| QueueError::Empty)
    }

    /// Remove every queued item without processing it; returns how many
    /// were discarded.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Whether the queue is full
    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    /// Maximum number of items
    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new(4);
        for i in 0..3 {
            queue.put(i, Duration::from_millis(5)).unwrap();
        }
        assert_eq!(queue.get(Duration::from_millis(5)), Ok(0));
        assert_eq!(queue.get_nowait(), Ok(1));
        assert_eq!(queue.get_nowait(), Ok(2));
        assert_eq!(queue.get_nowait(), Err(QueueError::Empty));
    }

    #[test]
    fn test_put_times_out_when_full() {
        let queue = FrameQueue::new(1);
        queue.put(1, Duration::from_millis(5)).unwrap();

        let start = Instant::now();
        assert_eq!(queue.put(2, Duration::from_millis(30)), Err(QueueError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert_eq!(queue.offer(3, Duration::from_millis(1)), Err(3));
    }

    #[test]
    fn test_get_times_out_when_empty() {
        let queue: FrameQueue<u32> = FrameQueue::new(2);
        assert_eq!(queue.get(Duration::from_millis(10)), Err(QueueError::Empty));
    }

    #[test]
    fn test_drain() {
        let queue = FrameQueue::new(8);
        for i in 0..5 {
            queue.put_nowait(i).unwrap();
        }
        assert_eq!(queue.drain(), 5);
        assert!(queue.is_empty());
        assert_eq!(queue.drain(), 0);
    }

    #[test]
    fn test_cross_thread_handoff() {
        let queue = FrameQueue::new(2);
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            for i in 0..50u32 {
                while producer.put(i, Duration::from_millis(10)).is_err() {}
            }
        });

        let mut received = Vec::new();
        while received.len() < 50 {
            if let Ok(v) = queue.get(Duration::from_millis(50)) {
                received.push(v);
            }
        }
        handle.join().unwrap();
        assert_eq!(received, (0..50).collect::<Vec<_>>());
    }
}
