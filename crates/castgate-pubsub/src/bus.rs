//! In-process topic table.

use std::collections::HashMap;
use std::sync::Arc;

use castgate_core::ConnectionId;
use castgate_core::metrics::{PUBSUB_FANOUT_TOTAL, PUBSUB_PUBLISH_TOTAL};
use dashmap::DashMap;
use metrics::counter;
use serde_json::Value;
use tracing::debug;

use crate::relay::PeerRelay;

/// Something that can receive fanned-out payloads.
///
/// `deliver` must not block: implementations queue the payload and return.
pub trait Subscriber: Send + Sync {
    /// Stable key in the topic table.
    fn subscriber_id(&self) -> &ConnectionId;

    /// Queue `payload` published on `stream`. Returns `false` if it was
    /// dropped.
    fn deliver(&self, stream: &str, payload: &Value) -> bool;
}

type SubscriberSet = HashMap<ConnectionId, Arc<dyn Subscriber>>;

/// Stream → subscriber table.
///
/// Mutations lock only the shard holding the affected stream. A topic
/// exists while it has at least one subscriber.
pub struct PubSubBus {
    topics: DashMap<String, SubscriberSet>,
    relay: Option<Arc<PeerRelay>>,
}

impl PubSubBus {
    /// Single-node bus.
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            relay: None,
        }
    }

    /// Bus that also forwards every local publish to peers.
    pub fn with_relay(relay: Arc<PeerRelay>) -> Self {
        Self {
            topics: DashMap::new(),
            relay: Some(relay),
        }
    }

    /// Add `subscriber` to `topic`. Re-subscribing is a no-op.
    pub fn subscribe(&self, topic: &str, subscriber: Arc<dyn Subscriber>) {
        let id = subscriber.subscriber_id().clone();
        let _ = self
            .topics
            .entry(topic.to_owned())
            .or_default()
            .insert(id, subscriber);
    }

    /// Remove `id` from `topic`, pruning the topic when it empties.
    /// Returns whether the subscriber was present.
    pub fn unsubscribe(&self, topic: &str, id: &ConnectionId) -> bool {
        let removed = match self.topics.get_mut(topic) {
            Some(mut subs) => subs.remove(id).is_some(),
            None => false,
        };
        if removed {
            let _ = self.topics.remove_if(topic, |_, subs| subs.is_empty());
        }
        removed
    }

    /// Publish locally and relay to peers. Returns the local fanout count.
    pub fn publish(&self, topic: &str, payload: &Value) -> usize {
        counter!(PUBSUB_PUBLISH_TOTAL, "origin" => "local").increment(1);
        let delivered = self.fanout(topic, payload);
        if let Some(relay) = &self.relay {
            relay.relay(topic, payload);
        }
        delivered
    }

    /// Deliver a publish received from a peer. Never relayed again.
    pub fn deliver_local(&self, topic: &str, payload: &Value) -> usize {
        counter!(PUBSUB_PUBLISH_TOTAL, "origin" => "peer").increment(1);
        self.fanout(topic, payload)
    }

    fn fanout(&self, topic: &str, payload: &Value) -> usize {
        // Snapshot so subscriber callbacks run without the shard lock.
        let subscribers: Vec<Arc<dyn Subscriber>> = match self.topics.get(topic) {
            Some(subs) => subs.values().cloned().collect(),
            None => return 0,
        };

        let delivered = subscribers
            .iter()
            .filter(|s| s.deliver(topic, payload))
            .count();
        counter!(PUBSUB_FANOUT_TOTAL).increment(delivered as u64);
        debug!(
            stream = topic,
            subscribers = subscribers.len(),
            delivered,
            "published"
        );
        delivered
    }

    /// Number of live topics.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Number of subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |subs| subs.len())
    }

    /// Whether `id` is subscribed to `topic`.
    pub fn is_subscribed(&self, topic: &str, id: &ConnectionId) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|subs| subs.contains_key(id))
    }
}

impl Default for PubSubBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Records every delivery.
    pub(crate) struct Recorder {
        id: ConnectionId,
        pub(crate) received: Mutex<Vec<(String, Value)>>,
        accept: bool,
    }

    impl Recorder {
        pub(crate) fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::from(id),
                received: Mutex::new(Vec::new()),
                accept: true,
            })
        }

        fn rejecting(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::from(id),
                received: Mutex::new(Vec::new()),
                accept: false,
            })
        }

        pub(crate) fn count(&self) -> usize {
            self.received.lock().len()
        }
    }

    impl Subscriber for Recorder {
        fn subscriber_id(&self) -> &ConnectionId {
            &self.id
        }

        fn deliver(&self, stream: &str, payload: &Value) -> bool {
            if self.accept {
                self.received.lock().push((stream.to_owned(), payload.clone()));
            }
            self.accept
        }
    }

    #[test]
    fn publish_reaches_only_topic_subscribers() {
        let bus = PubSubBus::new();
        let a = Recorder::new("a");
        let b = Recorder::new("b");
        let c = Recorder::new("c");
        bus.subscribe("room-1", a.clone());
        bus.subscribe("room-1", b.clone());
        bus.subscribe("room-2", c.clone());

        let delivered = bus.publish("room-1", &json!("hi"));
        assert_eq!(delivered, 2);
        assert_eq!(a.received.lock()[0], ("room-1".to_string(), json!("hi")));
        assert_eq!(b.count(), 1);
        assert_eq!(c.count(), 0);
    }

    #[test]
    fn publish_to_unknown_topic_is_zero() {
        let bus = PubSubBus::new();
        assert_eq!(bus.publish("nobody", &json!(1)), 0);
    }

    #[test]
    fn resubscribe_is_idempotent() {
        let bus = PubSubBus::new();
        let a = Recorder::new("a");
        bus.subscribe("room-1", a.clone());
        bus.subscribe("room-1", a.clone());
        assert_eq!(bus.subscriber_count("room-1"), 1);
        let _ = bus.publish("room-1", &json!("x"));
        assert_eq!(a.count(), 1);
    }

    #[test]
    fn unsubscribe_prunes_empty_topic() {
        let bus = PubSubBus::new();
        let a = Recorder::new("a");
        bus.subscribe("room-1", a.clone());
        assert_eq!(bus.topic_count(), 1);
        assert!(bus.unsubscribe("room-1", a.subscriber_id()));
        assert_eq!(bus.topic_count(), 0);
        assert!(!bus.unsubscribe("room-1", a.subscriber_id()));
    }

    #[test]
    fn unsubscribe_keeps_other_subscribers() {
        let bus = PubSubBus::new();
        let a = Recorder::new("a");
        let b = Recorder::new("b");
        bus.subscribe("room-1", a.clone());
        bus.subscribe("room-1", b.clone());
        let _ = bus.unsubscribe("room-1", a.subscriber_id());
        assert_eq!(bus.topic_count(), 1);
        assert!(bus.is_subscribed("room-1", b.subscriber_id()));
        assert!(!bus.is_subscribed("room-1", a.subscriber_id()));
    }

    #[test]
    fn late_subscriber_gets_no_replay() {
        let bus = PubSubBus::new();
        let early = Recorder::new("early");
        bus.subscribe("room-1", early.clone());
        let _ = bus.publish("room-1", &json!("first"));

        let late = Recorder::new("late");
        bus.subscribe("room-1", late.clone());
        assert_eq!(late.count(), 0);

        let _ = bus.publish("room-1", &json!("second"));
        assert_eq!(early.count(), 2);
        assert_eq!(late.count(), 1);
    }

    #[test]
    fn failed_delivery_does_not_affect_others() {
        let bus = PubSubBus::new();
        let bad = Recorder::rejecting("bad");
        let good = Recorder::new("good");
        bus.subscribe("room-1", bad);
        bus.subscribe("room-1", good.clone());
        assert_eq!(bus.publish("room-1", &json!("x")), 1);
        assert_eq!(good.count(), 1);
    }

    #[test]
    fn deliver_local_fans_out() {
        let bus = PubSubBus::new();
        let a = Recorder::new("a");
        bus.subscribe("room-1", a.clone());
        assert_eq!(bus.deliver_local("room-1", &json!("from peer")), 1);
    }

    #[test]
    fn concurrent_subscribe_unsubscribe() {
        let bus = Arc::new(PubSubBus::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let bus = Arc::clone(&bus);
                std::thread::spawn(move || {
                    let r = Recorder::new(&format!("s{i}"));
                    for _ in 0..100 {
                        bus.subscribe("hot", r.clone());
                        let _ = bus.publish("hot", &json!(i));
                        let _ = bus.unsubscribe("hot", r.subscriber_id());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(bus.subscriber_count("hot"), 0);
    }
}
