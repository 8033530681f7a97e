//! Topic registry: membership tracking and per-topic fan-out.
//!
//! Topics are created lazily on first join and disappear when their
//! subscriber set empties. Delivery is at-most-once and best-effort: a
//! subscriber whose outbound buffer is full or whose transport is gone is
//! dropped from every topic, and the publish call itself never fails.

mod manager;

pub use manager::TopicRegistry;
