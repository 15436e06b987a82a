//! Durable itineraries.
//!
//! Each itinerary is stored under its own key in a RocksDB database as a
//! bincode-encoded `Vec<QueueItem>`. Every mutation is a full
//! read-modify-write done under the store lock, so concurrent background
//! tasks never lose each other's updates.

mod queue;

pub use queue::{Itinerary, QueueItem, QueueStore, PLAYABLE_EXTENSION, RAW_EXTENSION};

/// A raw recording waiting for the transcoder.
pub type ConversionItem = QueueItem;

/// A playable recording subject to quota eviction.
pub type RetainedVideoItem = QueueItem;
