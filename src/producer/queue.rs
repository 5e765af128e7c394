use crate::event::Event;
use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex, RwLock};
use std::time::Duration;

/// Lock-free bounded client queue sitting between a producer's delivery thread and the
/// drain loop. A full queue never blocks the producer; the newest event is handed back.
#[derive(Debug)]
pub struct ProducerQueue<P> {
    queue: RwLock<ArrayQueue<Event<P>>>,
    ready: Mutex<()>,
    not_empty: Condvar,
}

impl<P> ProducerQueue<P> {
    /// Creates a queue holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: RwLock::new(ArrayQueue::new(capacity.max(1))),
            ready: Mutex::new(()),
            not_empty: Condvar::new(),
        }
    }

    /// Attempts to enqueue an event, returning it inside `QueueOverrun` when saturated.
    pub fn push(&self, event: Event<P>) -> Result<(), QueueOverrun<P>> {
        let pushed = {
            let queue = self.queue.read();
            queue.push(event).map_err(|event| QueueOverrun {
                event,
                capacity: queue.capacity(),
            })
        };
        if pushed.is_ok() {
            let _ready = self.ready.lock();
            self.not_empty.notify_one();
        }
        pushed
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<Event<P>> {
        self.queue.read().pop()
    }

    /// Blocks until the queue holds at least one event or `timeout` elapses.
    pub fn wait_not_empty(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.lock();
        if !self.is_empty() {
            return true;
        }
        let _ = self.not_empty.wait_for(&mut ready, timeout);
        !self.is_empty()
    }

    /// Wakes any thread blocked in `wait_not_empty`.
    pub fn wake(&self) {
        let _ready = self.ready.lock();
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.queue.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.read().capacity()
    }

    /// Swaps in a queue of `capacity`, carrying queued events over oldest first.
    /// Returns how many events no longer fit and were dropped.
    pub fn resize(&self, capacity: usize) -> u64 {
        let capacity = capacity.max(1);
        let mut guard = self.queue.write();
        if guard.capacity() == capacity {
            return 0;
        }
        let resized = ArrayQueue::new(capacity);
        let mut dropped = 0;
        while let Some(event) = guard.pop() {
            if resized.push(event).is_err() {
                dropped += 1;
            }
        }
        *guard = resized;
        dropped
    }
}

/// Returned when pushing onto a saturated client queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOverrun<P> {
    pub event: Event<P>,
    pub capacity: usize,
}

impl<P> QueueOverrun<P> {
    /// Human readable label describing the saturated queue.
    pub fn message(&self) -> String {
        format!(
            "client queue saturated at {} events, dropped id {}",
            self.capacity, self.event.id
        )
    }

    pub fn into_event(self) -> Event<P> {
        self.event
    }
}
