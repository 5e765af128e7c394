use crate::event::{Event, ProducerId};
use std::collections::BTreeMap;

/// Outcome of offering an event to the reorder cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheInsert {
    Accepted,
    /// Id at or below the last delivered id.
    Stale { last_delivered: u64 },
    /// Id already pending; the first copy is kept.
    Duplicate,
}

impl CacheInsert {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CacheInsert::Accepted)
    }
}

/// A pending event together with the producer that delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEvent<P> {
    pub producer: ProducerId,
    pub event: Event<P>,
}

/// Result of one contiguous-run extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainedRun<P> {
    pub events: Vec<CachedEvent<P>>,
    /// Ids between the previous watermark and the start of this run, judged lost.
    pub missed: u64,
}

impl<P> DrainedRun<P> {
    fn empty() -> Self {
        Self {
            events: Vec::new(),
            missed: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Pending out-of-order events keyed by id, with the delivery watermark.
///
/// Every key is greater than `last_delivered_id`, and `min_cached_id` is the smallest
/// key (or `None` when empty). The structure is not synchronized; the coordinator
/// keeps it behind a single mutex.
#[derive(Debug, Clone)]
pub struct ReorderCache<P> {
    entries: BTreeMap<u64, CachedEvent<P>>,
    min_cached_id: Option<u64>,
    last_delivered_id: Option<u64>,
}

impl<P> Default for ReorderCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> ReorderCache<P> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            min_cached_id: None,
            last_delivered_id: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn min_cached_id(&self) -> Option<u64> {
        self.min_cached_id
    }

    pub fn last_delivered_id(&self) -> Option<u64> {
        self.last_delivered_id
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn insert(&mut self, producer: ProducerId, event: Event<P>) -> CacheInsert {
        let id = event.id;
        if let Some(last_delivered) = self.last_delivered_id {
            if id <= last_delivered {
                return CacheInsert::Stale { last_delivered };
            }
        }
        if self.entries.contains_key(&id) {
            return CacheInsert::Duplicate;
        }
        self.entries.insert(id, CachedEvent { producer, event });
        self.min_cached_id = Some(self.min_cached_id.map_or(id, |min| min.min(id)));
        CacheInsert::Accepted
    }

    /// Removes the run starting at `min_cached_id`. The walk always takes the smallest
    /// pending id and continues while each next id lies within `object_id_offset` of the
    /// one before, so nothing below the new watermark is left behind. Any distance
    /// between the delivered watermark and the run start beyond one offset is reported
    /// as missed; those ids are never waited for again.
    pub fn drain_run(&mut self, object_id_offset: u64) -> DrainedRun<P> {
        let Some(min_cached_id) = self.min_cached_id else {
            return DrainedRun::empty();
        };
        let offset = object_id_offset.max(1);
        let missed = self
            .last_delivered_id
            .map(|last| min_cached_id.saturating_sub(last).saturating_sub(offset))
            .unwrap_or(0);

        let mut events = Vec::new();
        let mut previous: Option<u64> = None;
        while let Some(entry) = self.entries.first_entry() {
            let id = *entry.key();
            if previous.is_some_and(|prev| id > prev.saturating_add(offset)) {
                break;
            }
            events.push(entry.remove());
            previous = Some(id);
        }
        if previous.is_some() {
            self.last_delivered_id = previous;
        }
        self.min_cached_id = self.entries.keys().next().copied();
        DrainedRun { events, missed }
    }
}
