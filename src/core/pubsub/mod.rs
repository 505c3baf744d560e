// src/core/pubsub/mod.rs

//! Concrete `PubSub` implementations: a Redis-compatible one for
//! production (the director's `controller-refresh` subject, spec.md §6)
//! and an in-process one for tests.

mod memory;
mod redis_backed;

pub use memory::MemoryPubSub;
pub use redis_backed::RedisPubSub;
