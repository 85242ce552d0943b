//! Per-connection subscription bookkeeping.
//!
//! Holds the streams a connection receives and the channels (client
//! identifiers) it has joined. Only the owning connection's gateway path
//! mutates a set, always under that connection's lock.

use std::collections::HashMap;

use castgate_core::Subscription;
use serde_json::Value;

/// Streams and channels of one connection.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    streams: HashMap<String, Subscription>,
    channels: HashMap<String, Option<Value>>,
}

impl SubscriptionSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the subscription for its stream. Returns the one it
    /// replaced.
    pub fn add(&mut self, subscription: Subscription) -> Option<Subscription> {
        self.streams
            .insert(subscription.stream.clone(), subscription)
    }

    /// Remove the subscription to `stream`.
    pub fn remove(&mut self, stream: &str) -> Option<Subscription> {
        self.streams.remove(stream)
    }

    /// Remove every stream requested by `identifier`, keeping the channel.
    pub fn remove_streams_of(&mut self, identifier: &str) -> Vec<Subscription> {
        let streams: Vec<String> = self
            .streams
            .values()
            .filter(|s| s.belongs_to(identifier))
            .map(|s| s.stream.clone())
            .collect();
        streams
            .iter()
            .filter_map(|stream| self.streams.remove(stream))
            .collect()
    }

    /// Leave channel `identifier`, removing its streams.
    pub fn remove_channel(&mut self, identifier: &str) -> Vec<Subscription> {
        let _ = self.channels.remove(identifier);
        self.remove_streams_of(identifier)
    }

    /// Record channel `identifier` as joined with its backend state.
    pub fn add_channel(&mut self, identifier: &str, state: Option<Value>) {
        let _ = self.channels.insert(identifier.to_owned(), state);
    }

    /// Replace the backend state of a joined channel.
    pub fn set_channel_state(&mut self, identifier: &str, state: Value) {
        if let Some(slot) = self.channels.get_mut(identifier) {
            *slot = Some(state);
        }
    }

    /// Backend state of channel `identifier`.
    pub fn channel_state(&self, identifier: &str) -> Option<Value> {
        self.channels.get(identifier).cloned().flatten()
    }

    /// Whether channel `identifier` is joined.
    pub fn has_channel(&self, identifier: &str) -> bool {
        self.channels.contains_key(identifier)
    }

    /// Joined channel identifiers.
    pub fn channel_identifiers(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Subscription to `stream`.
    pub fn get(&self, stream: &str) -> Option<&Subscription> {
        self.streams.get(stream)
    }

    /// Subscribed stream names.
    pub fn stream_names(&self) -> Vec<String> {
        self.streams.keys().cloned().collect()
    }

    /// Remove everything, returning the stream subscriptions.
    pub fn drain(&mut self) -> Vec<Subscription> {
        self.channels.clear();
        self.streams.drain().map(|(_, s)| s).collect()
    }

    /// Number of stream subscriptions.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether there are no stream subscriptions.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
