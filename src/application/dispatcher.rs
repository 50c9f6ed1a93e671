// Fan-out of device push events to explicit subscriptions
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::event::EventFrame;

type Payload = Arc<Value>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<String, Vec<(u64, mpsc::UnboundedSender<Payload>)>>,
    latest: HashMap<String, Payload>,
}

/// Routes each published frame to every subscription of its topic and keeps
/// the latest payload per topic for synchronous reads.
///
/// Delivery per subscription happens through its own unbounded channel, so
/// the publication order of a topic is preserved for every subscriber.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Mutex<Registry>>,
}

/// Receiving end of one topic. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    topic: String,
    rx: mpsc::UnboundedReceiver<Payload>,
    registry: Weak<Mutex<Registry>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push((id, tx));

        tracing::debug!("Subscription {} registered for {}", id, topic);

        Subscription {
            id,
            topic: topic.to_string(),
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Cache and deliver one frame. Returns the number of subscribers reached.
    pub fn publish(&self, frame: EventFrame) -> usize {
        let payload = Arc::new(frame.payload);
        let mut registry = lock(&self.registry);
        registry.latest.insert(frame.topic.clone(), payload.clone());

        let Some(subscribers) = registry.subscribers.get_mut(&frame.topic) else {
            return 0;
        };

        subscribers.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        subscribers.len()
    }

    /// Latest payload seen for `topic`.
    pub fn latest(&self, topic: &str) -> Option<Arc<Value>> {
        lock(&self.registry).latest.get(topic).cloned()
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock(&self.registry)
            .subscribers
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next payload in publication order; `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Arc<Value>> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<Arc<Value>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        let mut registry = lock(&registry);
        if let Some(subscribers) = registry.subscribers.get_mut(&self.topic) {
            subscribers.retain(|(id, _)| *id != self.id);
            if subscribers.is_empty() {
                registry.subscribers.remove(&self.topic);
            }
        }

        tracing::debug!("Subscription {} for {} dropped", self.id, self.topic);
    }
}
