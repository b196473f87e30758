use std::any::Any;
use std::sync::Arc;

/// An opaque publication on the bus: a topic name, the payload, and the
/// timestamp it was published at.
///
/// Topics carry heterogeneous payload types, so the payload is type-erased
/// here; typed subscribers downcast it back via [`Envelope::payload`].
#[derive(Clone)]
pub struct Envelope {
    topic: String,
    timestamp_ms: u64,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Envelope {
    pub(crate) fn new(topic: impl Into<String>, timestamp_ms: u64, payload: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            topic: topic.into(),
            timestamp_ms,
            payload,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Downcast the payload to its concrete type. `None` if the caller
    /// guessed the wrong type for this topic.
    pub fn payload<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}
