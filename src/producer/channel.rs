use super::queue::ProducerQueue;
use crate::clock::SharedClock;
use crate::collector::cache::CacheInsert;
use crate::collector::coordinator::CollectionCoordinator;
use crate::event::{Event, ProducerId};
use crate::logging::SessionLogger;
use crate::stats::{ProducerStats, StatsTracker};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// How an upstream source hands events to its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerMode {
    /// The source's own delivery thread inserts straight into the reorder cache.
    Push,
    /// The source enqueues into a bounded client queue drained by the drain loop.
    Queue { capacity: usize },
}

/// What happened to an event handed to `ProducerChannel::process`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Cached,
    Queued,
    Rejected,
    Overrun,
    Closed,
}

/// Raw per-producer counters. Rejections and deliveries are attributed by the
/// coordinator, everything else by the channel.
#[derive(Debug, Default)]
pub struct ProducerCounters {
    received: AtomicU64,
    overruns: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    window: Mutex<StatsTracker>,
}

impl ProducerCounters {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub(crate) fn record_received(&self, now_ns: u128) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.window.lock().record(now_ns);
    }

    pub(crate) fn record_overruns(&self, count: u64) {
        self.overruns.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.delivered.store(0, Ordering::Relaxed);
        self.window.lock().reset();
    }

    fn window(&self) -> StatsTracker {
        *self.window.lock()
    }
}

/// One upstream producer as seen by the collector.
pub struct ProducerChannel<P> {
    id: ProducerId,
    queue: Option<ProducerQueue<P>>,
    counters: Arc<ProducerCounters>,
    coordinator: Arc<CollectionCoordinator<P>>,
    closed: AtomicBool,
    /// Held shared for the whole of `process`; `close` takes it exclusively.
    admission: RwLock<()>,
    overrun_reported: AtomicBool,
    clock: SharedClock,
    logger: SessionLogger,
}

impl<P> ProducerChannel<P> {
    pub(crate) fn new(
        id: ProducerId,
        mode: ProducerMode,
        coordinator: Arc<CollectionCoordinator<P>>,
        clock: SharedClock,
        logger: SessionLogger,
    ) -> Self {
        let counters = coordinator.producer_counters(&id);
        let queue = match mode {
            ProducerMode::Push => None,
            ProducerMode::Queue { capacity } => Some(ProducerQueue::new(capacity)),
        };
        Self {
            id,
            queue,
            counters,
            coordinator,
            closed: AtomicBool::new(false),
            admission: RwLock::new(()),
            overrun_reported: AtomicBool::new(false),
            clock,
            logger,
        }
    }

    pub fn id(&self) -> &ProducerId {
        &self.id
    }

    pub fn mode(&self) -> ProducerMode {
        match &self.queue {
            Some(queue) => ProducerMode::Queue {
                capacity: queue.capacity(),
            },
            None => ProducerMode::Push,
        }
    }

    pub fn counters(&self) -> &ProducerCounters {
        &self.counters
    }

    pub(crate) fn queue(&self) -> Option<&ProducerQueue<P>> {
        self.queue.as_ref()
    }

    pub fn queued(&self) -> usize {
        self.queue.as_ref().map_or(0, ProducerQueue::len)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Accepts one event from the source. Never blocks and never fails loudly: every
    /// outcome ends up in a counter. Once `close` has returned, no event admitted
    /// earlier is still in flight.
    pub fn process(&self, event: Event<P>) -> ProcessOutcome {
        let _admitted = self.admission.read();
        if self.is_closed() {
            return ProcessOutcome::Closed;
        }
        self.counters.record_received(self.clock.now_ns());
        let Some(queue) = &self.queue else {
            return match self.coordinator.add_object_to_cache(&self.id, event) {
                CacheInsert::Accepted => ProcessOutcome::Cached,
                CacheInsert::Stale { .. } | CacheInsert::Duplicate => ProcessOutcome::Rejected,
            };
        };
        match queue.push(event) {
            Ok(()) => ProcessOutcome::Queued,
            Err(overrun) => {
                self.counters.record_overruns(1);
                if !self.overrun_reported.swap(true, Ordering::Relaxed) {
                    self.logger.debug(
                        "producer",
                        &format!("producer {}: {}", self.id, overrun.message()),
                    );
                }
                ProcessOutcome::Overrun
            }
        }
    }

    /// Moves up to `max` queued events into the reorder cache, returning how many moved.
    pub fn try_drain_queue(&self, max: usize) -> usize {
        let Some(queue) = &self.queue else {
            return 0;
        };
        let mut moved = 0;
        while moved < max {
            let Some(event) = queue.try_pop() else {
                break;
            };
            self.coordinator.add_object_to_cache(&self.id, event);
            moved += 1;
        }
        if moved > 0 {
            self.overrun_reported.store(false, Ordering::Relaxed);
        }
        moved
    }

    /// Applies a new client queue capacity; events that no longer fit count as overruns.
    pub(crate) fn resize_queue(&self, capacity: usize) {
        if let Some(queue) = &self.queue {
            let dropped = queue.resize(capacity);
            if dropped > 0 {
                self.counters.record_overruns(dropped);
            }
        }
    }

    /// Refuses further events. Waits for in-flight `process` calls to land first.
    pub(crate) fn close(&self) {
        let _exclusive = self.admission.write();
        self.closed.store(true, Ordering::Release);
        if let Some(queue) = &self.queue {
            queue.wake();
        }
    }

    pub fn stats(&self) -> ProducerStats {
        let window = self.counters.window();
        let received = self.counters.received();
        let overruns = self.counters.overruns();
        ProducerStats {
            producer_id: self.id.clone(),
            n_received: received,
            received_rate: window.rate(received),
            n_overruns: overruns,
            overrun_rate: window.rate(overruns),
            n_rejected: self.counters.rejected(),
            n_queued: self.queued() as u64,
            n_delivered: self.counters.delivered(),
        }
    }
}

impl<P> fmt::Debug for ProducerChannel<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerChannel")
            .field("id", &self.id)
            .field("mode", &self.mode())
            .field("received", &self.counters.received())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Cloneable handle an `EventSource` uses to deliver events from its own thread.
pub struct ProducerSink<P> {
    channel: Arc<ProducerChannel<P>>,
}

impl<P> Clone for ProducerSink<P> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<P> ProducerSink<P> {
    pub(crate) fn new(channel: Arc<ProducerChannel<P>>) -> Self {
        Self { channel }
    }

    pub fn producer_id(&self) -> &ProducerId {
        self.channel.id()
    }

    pub fn process(&self, event: Event<P>) -> ProcessOutcome {
        self.channel.process(event)
    }

    /// Convenience wrapper building the event from its parts.
    pub fn send(&self, id: u64, payload: P) -> ProcessOutcome {
        self.process(Event::new(id, payload))
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

impl<P> fmt::Debug for ProducerSink<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProducerSink")
            .field(self.channel.id())
            .finish()
    }
}
