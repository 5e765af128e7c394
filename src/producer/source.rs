use super::channel::ProducerSink;
use crate::event::ProducerId;
use thiserror::Error;

/// External transport feeding one producer. The collector subscribes it at session
/// start and unsubscribes it before draining on stop; the source calls the sink from
/// whatever thread it delivers on.
pub trait EventSource<P>: Send {
    fn producer_id(&self) -> ProducerId;

    fn subscribe(&mut self, sink: ProducerSink<P>) -> Result<(), SourceError>;

    fn unsubscribe(&mut self) {}
}

/// Errors raised by an external source while attaching to the collector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("producer {producer} failed to subscribe: {reason}")]
    Subscribe { producer: ProducerId, reason: String },
}

impl SourceError {
    pub fn subscribe(producer: &ProducerId, reason: impl Into<String>) -> Self {
        SourceError::Subscribe {
            producer: producer.clone(),
            reason: reason.into(),
        }
    }
}
