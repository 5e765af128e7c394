use super::cache::{CacheInsert, CachedEvent, ReorderCache};
use super::signal::DrainSignal;
use crate::clock::SharedClock;
use crate::config::{effective_cache_size, ConfigError, KEY_CACHE_SIZE, KEY_OBJECT_ID_OFFSET};
use crate::event::{Event, ProducerId};
use crate::logging::SessionLogger;
use crate::producer::ProducerCounters;
use crate::stats::StatsTracker;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the drain loop should do with the cache right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    Empty,
    /// Still accumulating; the quiet period ends after `remaining`.
    Accumulating { remaining: Duration },
    Ready,
}

#[derive(Debug)]
struct CacheState<P> {
    cache: ReorderCache<P>,
    last_mutation_ns: u128,
}

/// Session-wide cache counters.
#[derive(Debug, Default)]
pub struct CoordinatorCounters {
    collected: AtomicU64,
    rejected: AtomicU64,
    missed: AtomicU64,
    window: Mutex<StatsTracker>,
}

impl CoordinatorCounters {
    pub fn collected(&self) -> u64 {
        self.collected.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }

    pub fn window(&self) -> StatsTracker {
        *self.window.lock()
    }

    fn reset(&self) {
        self.collected.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.missed.store(0, Ordering::Relaxed);
        self.window.lock().reset();
    }
}

/// Routes events from every producer into the shared reorder cache and hands
/// contiguous runs to the drain loop.
///
/// The cache mutex is the only shared-state boundary between producer delivery threads
/// and the drain loop; the drain signal is locked independently.
pub struct CollectionCoordinator<P> {
    state: Mutex<CacheState<P>>,
    signal: DrainSignal,
    cache_size: AtomicU64,
    object_id_offset: AtomicU64,
    n_producers: usize,
    counters: CoordinatorCounters,
    producers: BTreeMap<ProducerId, Arc<ProducerCounters>>,
    clock: SharedClock,
    logger: SessionLogger,
}

impl<P> CollectionCoordinator<P> {
    pub fn new(
        producers: &[ProducerId],
        cache_size: u64,
        object_id_offset: u64,
        clock: SharedClock,
        logger: SessionLogger,
    ) -> Result<Self, ConfigError> {
        if producers.is_empty() {
            return Err(ConfigError::NoProducers);
        }
        validate_cache_size(cache_size)?;
        validate_offset(object_id_offset)?;
        let now = clock.now_ns();
        Ok(Self {
            state: Mutex::new(CacheState {
                cache: ReorderCache::new(),
                last_mutation_ns: now,
            }),
            signal: DrainSignal::new(),
            cache_size: AtomicU64::new(effective_cache_size(cache_size, producers.len())),
            object_id_offset: AtomicU64::new(object_id_offset),
            n_producers: producers.len(),
            counters: CoordinatorCounters::default(),
            producers: producers
                .iter()
                .map(|id| (id.clone(), Arc::new(ProducerCounters::default())))
                .collect(),
            clock,
            logger,
        })
    }

    pub fn n_producers(&self) -> usize {
        self.n_producers
    }

    pub fn signal(&self) -> &DrainSignal {
        &self.signal
    }

    pub fn counters(&self) -> &CoordinatorCounters {
        &self.counters
    }

    pub fn producer(&self, id: &ProducerId) -> Option<&ProducerCounters> {
        self.producers.get(id).map(Arc::as_ref)
    }

    pub(crate) fn producer_counters(&self, id: &ProducerId) -> Arc<ProducerCounters> {
        self.producers.get(id).cloned().unwrap_or_default()
    }

    /// Effective cache size (after the per-producer floor).
    pub fn cache_size(&self) -> u64 {
        self.cache_size.load(Ordering::Relaxed)
    }

    pub fn object_id_offset(&self) -> u64 {
        self.object_id_offset.load(Ordering::Relaxed)
    }

    pub fn cache_len(&self) -> usize {
        self.state.lock().cache.len()
    }

    pub fn last_delivered_id(&self) -> Option<u64> {
        self.state.lock().cache.last_delivered_id()
    }

    pub fn min_cached_id(&self) -> Option<u64> {
        self.state.lock().cache.min_cached_id()
    }

    /// Recomputes the effective cache size; in-flight entries are untouched.
    pub fn configure(&self, cache_size: u64) -> Result<u64, ConfigError> {
        validate_cache_size(cache_size)?;
        let effective = effective_cache_size(cache_size, self.n_producers);
        self.cache_size.store(effective, Ordering::Relaxed);
        Ok(effective)
    }

    pub fn set_object_id_offset(&self, object_id_offset: u64) -> Result<(), ConfigError> {
        validate_offset(object_id_offset)?;
        self.object_id_offset
            .store(object_id_offset, Ordering::Relaxed);
        Ok(())
    }

    /// Offers an event to the cache. Stale and duplicate ids are counted as rejected;
    /// accepted ids wake the drain loop.
    pub fn add_object_to_cache(&self, producer: &ProducerId, event: Event<P>) -> CacheInsert {
        let now = self.clock.now_ns();
        let outcome = {
            let mut state = self.state.lock();
            let outcome = state.cache.insert(producer.clone(), event);
            if outcome.is_accepted() {
                state.last_mutation_ns = now;
            }
            outcome
        };
        if outcome.is_accepted() {
            self.signal.set();
        } else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            if let Some(counters) = self.producers.get(producer) {
                counters.record_rejected();
            }
        }
        outcome
    }

    /// Extracts the next contiguous run, in increasing id order. Empty when the cache is.
    pub fn get_objects_from_cache(&self) -> Vec<CachedEvent<P>> {
        let offset = self.object_id_offset();
        let run = self.state.lock().cache.drain_run(offset);
        if run.is_empty() {
            return run.events;
        }
        if run.missed > 0 {
            self.counters.missed.fetch_add(run.missed, Ordering::Relaxed);
            if let Some(first) = run.events.first() {
                self.logger.debug(
                    "collector",
                    &format!("missed {} objects before id {}", run.missed, first.event.id),
                );
            }
        }
        self.counters
            .collected
            .fetch_add(run.len() as u64, Ordering::Relaxed);
        self.counters.window.lock().record(self.clock.now_ns());
        for entry in &run.events {
            if let Some(counters) = self.producers.get(&entry.producer) {
                counters.record_delivered();
            }
        }
        run.events
    }

    /// Evaluates the fill heuristic: keep accumulating while the cache is below its size
    /// and has been mutated within `fill_timeout`.
    pub fn fill_state(&self, fill_timeout: Duration) -> FillState {
        let now = self.clock.now_ns();
        let state = self.state.lock();
        if state.cache.is_empty() {
            return FillState::Empty;
        }
        if state.cache.len() as u64 >= self.cache_size() {
            return FillState::Ready;
        }
        let quiet_ns = now.saturating_sub(state.last_mutation_ns);
        let timeout_ns = fill_timeout.as_nanos();
        if quiet_ns >= timeout_ns {
            return FillState::Ready;
        }
        let remaining_ns = timeout_ns - quiet_ns;
        FillState::Accumulating {
            remaining: Duration::from_nanos(remaining_ns.min(u128::from(u64::MAX)) as u64),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
        for counters in self.producers.values() {
            counters.reset();
        }
    }
}

impl<P> fmt::Debug for CollectionCoordinator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionCoordinator")
            .field("n_producers", &self.n_producers)
            .field("cache_size", &self.cache_size())
            .field("object_id_offset", &self.object_id_offset())
            .field("cache_len", &self.cache_len())
            .field("counters", &self.counters)
            .finish()
    }
}

fn validate_cache_size(cache_size: u64) -> Result<(), ConfigError> {
    if cache_size == 0 {
        return Err(ConfigError::invalid(KEY_CACHE_SIZE, "must be at least 1"));
    }
    Ok(())
}

fn validate_offset(object_id_offset: u64) -> Result<(), ConfigError> {
    if object_id_offset == 0 {
        return Err(ConfigError::invalid(KEY_OBJECT_ID_OFFSET, "must be at least 1"));
    }
    Ok(())
}
