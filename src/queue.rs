use std::time::Duration;

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};

use crate::{KvsError, Result};

/// A fixed capacity FIFO queue shared between producers and consumers.
///
/// The queue is backed by a bounded crossbeam [`channel`]: [`push`] blocks while the queue is
/// full and [`pop`] blocks while it is empty. The server uses it to hand accepted client
/// connections from the acceptor over to the connection workers; a full queue stalls the
/// acceptor, and with it any new client, until a worker takes a connection.
///
/// Cloning a `BoundedQueue` gives another handle to the same queue.
///
/// [`channel`]: https://docs.rs/crossbeam/0.8.1/crossbeam/channel/index.html
/// [`push`]: #method.push
/// [`pop`]: #method.pop
#[derive(Debug)]
pub struct BoundedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        BoundedQueue {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> BoundedQueue<T> {
    /// creates a queue that holds at most `capacity` items
    ///
    /// # Errors
    /// a queue needs room for at least one item, a `capacity` of zero is rejected
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(KvsError::Parsing(
                "the queue capacity must be a positive number".to_string(),
            ));
        }
        let (tx, rx) = channel::bounded(capacity);
        Ok(BoundedQueue { tx, rx, capacity })
    }

    /// appends `item` to the back of the queue, waiting for a free slot if the queue is full
    pub fn push(&self, item: T) -> Result<()> {
        self.tx
            .send(item)
            .map_err(|_| KvsError::StringErr("the queue was closed".to_string()))
    }

    /// like [`push`], but gives up once `timeout` has passed without a free slot. A timed out
    /// `item` is handed back as `Ok(Some(item))`.
    ///
    /// [`push`]: #method.push
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<Option<T>> {
        match self.tx.send_timeout(item, timeout) {
            Ok(()) => Ok(None),
            Err(SendTimeoutError::Timeout(item)) => Ok(Some(item)),
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(KvsError::StringErr("the queue was closed".to_string()))
            }
        }
    }

    /// takes the item at the front of the queue, waiting for one if the queue is empty
    pub fn pop(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// takes every item currently waiting in the queue without blocking
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    /// the number of items waiting in the queue
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// returns `true` if no item is waiting in the queue
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// the maximum number of items the queue holds
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
