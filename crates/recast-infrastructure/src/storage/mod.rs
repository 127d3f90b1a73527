//! Storage backends.

mod kv;

pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
