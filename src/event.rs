use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of an upstream producer feeding a collection session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProducerId(Arc<str>);

impl ProducerId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProducerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProducerId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numbered unit of streamed data. The payload is never inspected by the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event<P> {
    pub id: u64,
    pub payload: P,
}

impl<P> Event<P> {
    pub fn new(id: u64, payload: P) -> Self {
        Self { id, payload }
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}
