use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// Result of attempting to enqueue.
///
/// # Example
/// ```rust
/// use mediaflow_core::prelude::{JobQueue, SendOutcome};
///
/// let queue = JobQueue::new();
/// assert_eq!(queue.push(1u8), SendOutcome::Ok);
/// queue.stop();
/// assert_eq!(queue.push(2u8), SendOutcome::Closed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Value was accepted.
    Ok,
    /// Queue is stopped; the value was dropped.
    Closed,
}

/// Result of attempting to dequeue.
#[derive(Debug, PartialEq, Eq)]
pub enum RecvOutcome<T> {
    /// Received value.
    Data(T),
    /// Queue has been stopped.
    Closed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    running: bool,
}

/// Unbounded FIFO shared between one producer context and one worker thread.
///
/// Pushers never block. The worker blocks in [`JobQueue::pop_blocking`] until an item arrives or
/// the queue is stopped; once stopped the worker receives `Closed` even if items remain, and the
/// owner discards them with [`JobQueue::drain`].
///
/// # Example
/// ```rust
/// use mediaflow_core::prelude::{JobQueue, RecvOutcome};
///
/// let queue = JobQueue::new();
/// queue.push("a");
/// queue.push("b");
/// assert_eq!(queue.pop_blocking(), RecvOutcome::Data("a"));
/// assert_eq!(queue.drain(), vec!["b"]);
/// ```
pub struct JobQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JobQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                running: true,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append an item and wake the worker.
    pub fn push(&self, item: T) -> SendOutcome {
        let mut state = self.state.lock();
        if !state.running {
            return SendOutcome::Closed;
        }
        state.items.push_back(item);
        drop(state);
        self.ready.notify_one();
        SendOutcome::Ok
    }

    /// Block until an item is available or the queue is stopped.
    pub fn pop_blocking(&self) -> RecvOutcome<T> {
        let mut state = self.state.lock();
        loop {
            if !state.running {
                return RecvOutcome::Closed;
            }
            if let Some(item) = state.items.pop_front() {
                return RecvOutcome::Data(item);
            }
            self.ready.wait(&mut state);
        }
    }

    /// Remove every queued item, returning them in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        self.state.lock().items.drain(..).collect()
    }

    /// Atomically discard queued items and enqueue the marker `build` makes from them as the
    /// only entry. `build` runs under the queue lock and is not called once the queue is stopped.
    pub fn replace_all(&self, build: impl FnOnce(Vec<T>) -> T) -> SendOutcome {
        let mut state = self.state.lock();
        if !state.running {
            return SendOutcome::Closed;
        }
        let discarded = state.items.drain(..).collect();
        let marker = build(discarded);
        state.items.push_back(marker);
        drop(state);
        self.ready.notify_one();
        SendOutcome::Ok
    }

    /// Clear the running flag and wake every waiter.
    pub fn stop(&self) {
        self.state.lock().running = false;
        self.ready.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
