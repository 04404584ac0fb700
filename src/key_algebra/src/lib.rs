//! Typed, totally ordered keys and half-open shard ranges (spec.md §4.A).
//!
//! [`Key::to_raw_bytes`]/[`Key::from_raw_bytes`] are the persistence
//! contract: every crate that stores or indexes a mapping bound must go
//! through them rather than comparing [`Key`] values structurally, so that
//! byte-wise order in the store and the cache always matches [`Key`]'s own
//! `Ord`.

mod error;
mod key;
mod range;

pub use error::{Error, Result};
pub use key::{Key, KeyType, KeyValue};
pub use range::ShardRange;
