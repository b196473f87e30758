use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::envelope::Envelope;

type Handler = Box<dyn Fn(&Envelope) + Send + Sync>;

/// Named-topic publish/subscribe fabric.
///
/// `publish` invokes every handler registered on the topic synchronously,
/// in subscription order, before returning. A panicking handler is caught
/// and forwarded to the bus's error sink; it does not stop delivery to the
/// remaining handlers, and does not affect any other topic.
///
/// Handlers are reference-counted so `publish` can snapshot the handler
/// list and release the topic lock before dispatching: a handler is free
/// to publish (on this topic or any other) without re-entering the lock
/// it was called under.
#[derive(Clone)]
pub struct MessageBus {
    topics: Arc<Mutex<HashMap<String, Vec<(u64, Arc<Handler>)>>>>,
    error_handlers: Arc<Mutex<Vec<Box<dyn Fn(&str) + Send + Sync>>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A disposer returned by `subscribe`. Call `unsubscribe` to stop further
/// delivery; dropping it without calling `unsubscribe` leaves the handler
/// registered.
pub struct Subscription {
    topics: Arc<Mutex<HashMap<String, Vec<(u64, Arc<Handler>)>>>>,
    topic: String,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(handlers) = self.topics.lock().unwrap().get_mut(&self.topic) {
            handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            error_handlers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a sink for errors raised by panicking handlers.
    pub fn on_error(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.error_handlers.lock().unwrap().push(Box::new(handler));
    }

    fn report_error(&self, message: &str) {
        log::error!("bus handler error: {}", message);
        for handler in self.error_handlers.lock().unwrap().iter() {
            handler(message);
        }
    }

    /// Subscribe a raw envelope handler to `topic`.
    pub fn subscribe(
        &self,
        topic: &str,
        handler: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.topics
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(Box::new(handler))));

        Subscription {
            topics: self.topics.clone(),
            topic: topic.to_string(),
            id,
        }
    }

    /// Subscribe a handler that only sees payloads of type `T`. A payload
    /// published on this topic under a different concrete type is silently
    /// skipped for this subscriber.
    pub fn subscribe_typed<T: 'static>(
        &self,
        topic: &str,
        handler: impl Fn(&T, u64) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(topic, move |envelope| {
            if let Some(payload) = envelope.payload::<T>() {
                handler(payload, envelope.timestamp_ms());
            }
        })
    }

    /// Publish `payload` on `topic`. Invokes every handler registered on
    /// that topic, in subscription order, before returning.
    pub fn publish<T: Any + Send + Sync + 'static>(&self, topic: &str, payload: T, now_ms: u64) {
        let envelope = Envelope::new(topic, now_ms, Arc::new(payload));

        let handlers = {
            let topics = self.topics.lock().unwrap();
            match topics.get(topic) {
                Some(handlers) => handlers.clone(),
                None => return,
            }
        };

        for (_, handler) in handlers.iter() {
            let result = catch_unwind(AssertUnwindSafe(|| handler(&envelope)));
            if let Err(payload) = result {
                self.report_error(&panic_message(&payload));
            }
        }
    }

    /// Number of handlers currently registered on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn handlers_observe_publications_in_subscription_order() {
        let bus = MessageBus::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        for label in ["a", "b", "c"] {
            let order = order.clone();
            bus.subscribe("j1939.rx", move |_| order.lock().unwrap().push(label));
        }

        bus.publish("j1939.rx", 0xF004u32, 0);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn typed_subscriber_ignores_mismatched_payload() {
        let bus = MessageBus::new();
        let seen = Arc::new(StdMutex::new(None));
        let s = seen.clone();
        bus.subscribe_typed::<u32>("j1939.rx", move |pgn, _ts| {
            *s.lock().unwrap() = Some(*pgn);
        });

        bus.publish("j1939.rx", "not a pgn", 0);
        assert!(seen.lock().unwrap().is_none());

        bus.publish("j1939.rx", 0xF004u32, 0);
        assert_eq!(*seen.lock().unwrap(), Some(0xF004));
    }

    #[test]
    fn unsubscribe_stops_further_delivery() {
        let bus = MessageBus::new();
        let hits = Arc::new(StdMutex::new(0usize));
        let h = hits.clone();
        let sub = bus.subscribe("system.heartbeat", move |_| *h.lock().unwrap() += 1);

        bus.publish("system.heartbeat", (), 0);
        assert_eq!(*hits.lock().unwrap(), 1);

        sub.unsubscribe();
        bus.publish("system.heartbeat", (), 10);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn handler_panic_is_caught_and_later_handlers_still_run() {
        let bus = MessageBus::new();
        let errors = Arc::new(StdMutex::new(Vec::new()));
        let e = errors.clone();
        bus.on_error(move |msg| e.lock().unwrap().push(msg.to_string()));

        bus.subscribe("j1939.rx", |_| panic!("boom"));
        let hits = Arc::new(StdMutex::new(0usize));
        let h = hits.clone();
        bus.subscribe("j1939.rx", move |_| *h.lock().unwrap() += 1);

        bus.publish("j1939.rx", 0u32, 0);

        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn handler_may_publish_on_any_topic_without_deadlocking() {
        let bus = MessageBus::new();
        let relayed = Arc::new(StdMutex::new(false));

        let inner_bus = bus.clone();
        bus.subscribe("j1939.rx", move |_| {
            inner_bus.publish("can.rx", 0u32, 0);
        });

        let r = relayed.clone();
        bus.subscribe("can.rx", move |_| *r.lock().unwrap() = true);

        bus.publish("j1939.rx", 0xF004u32, 0);
        assert!(*relayed.lock().unwrap());
    }

    #[test]
    fn publish_to_topic_with_no_subscribers_is_a_no_op() {
        let bus = MessageBus::new();
        bus.publish("can.tx", 0u32, 0);
        assert_eq!(bus.subscriber_count("can.tx"), 0);
    }
}
