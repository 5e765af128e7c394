//! Collector core: the reorder cache, its coordinator, and the drain loop.

pub mod cache;
pub mod coordinator;
pub mod drain;
pub mod signal;

pub use cache::{CacheInsert, CachedEvent, DrainedRun, ReorderCache};
pub use coordinator::{CollectionCoordinator, CoordinatorCounters, FillState};
pub use drain::{DrainControl, DrainLoop, DrainState};
pub use signal::DrainSignal;
