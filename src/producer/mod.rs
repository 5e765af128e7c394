//! Producer plumbing: per-source channels, bounded client queues, and the source contract.

pub mod channel;
pub mod queue;
pub mod source;

pub use channel::{ProcessOutcome, ProducerChannel, ProducerCounters, ProducerMode, ProducerSink};
pub use queue::{ProducerQueue, QueueOverrun};
pub use source::{EventSource, SourceError};
