//! Event bus: publish-by-topic, subscribe-by-topic-set, with a bounded
//! local outbox that absorbs publishes made while the external transport
//! is disconnected.

mod bus;

pub use bus::EventBus;
