//! # Ferrum - Game server production telemetry
//!
//! Polls a game server over its remote console for production and consumption
//! counters, downsamples them into several fixed resolutions and persists each
//! finalized bucket exactly once.
//!
//! ## Key Features
//!
//! - **Binary console client**: framing, request correlation, authentication
//! - **Reconnect on failure**: a broken connection is dropped, never retried inline
//! - **Scripting bridge**: injects a collector function and decodes its JSON
//! - **Multi-resolution store**: lazy bucket folding with per-resolution watermarks
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrum::{MemoryStorage, RecordingFeed, Resolution, Sample, SeriesStore};
//! use std::sync::Arc;
//!
//! let feed = Arc::new(RecordingFeed::new());
//! let store = SeriesStore::new(
//!     "resources",
//!     &Resolution::defaults(),
//!     Box::new(MemoryStorage::new()),
//!     feed.clone(),
//! )
//! .unwrap();
//! store.initialize().unwrap();
//!
//! // Raw samples, roughly one per second of game time
//! for second in 1..=3u64 {
//!     let sample = Sample::empty(second * 60).with("in_iron-plate", second as i64);
//!     store.store(sample).unwrap();
//! }
//!
//! // The one-second resolution has closed its first buckets
//! let finalized = feed.drain();
//! assert_eq!(finalized.len(), 2);
//! assert_eq!(finalized[0].resolution, "seconds");
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Packet types and wire format
//! - [`transport`]: One authenticated console connection
//! - [`client`]: Lazily connecting, failure-dropping console client
//! - [`bridge`]: Script injection and snapshot decoding
//! - [`aggregator`]: Bucket folding for one resolution
//! - [`store`]: Series store over all resolutions
//! - [`storage`]: Persistence collaborator
//! - [`feed`]: Live feed collaborator

// Modules
pub mod aggregator;
pub mod bridge;
pub mod client;
pub mod error;
pub mod feed;
pub mod protocol;
pub mod sample;
pub mod storage;
pub mod store;
pub mod transport;

// Re-exports for convenient access
pub use aggregator::{fold_max, Absorbed, ResolutionAggregator};
pub use bridge::{MetricsBridge, Snapshot};
pub use client::{ClientMetrics, ReconnectingClient, RemoteConsole};
pub use error::{FerrumError, FrameError, Result, StorageError, TransportError};
pub use feed::{FeedEvent, LiveFeed, NullFeed, RecordingFeed};
pub use protocol::{Packet, PacketType};
pub use sample::{
    sorted_resolutions, Resolution, Sample, CONSUMED_PREFIX, PRODUCED_PREFIX, TICKS_PER_SECOND,
};
pub use storage::{BucketStorage, MemoryStorage};
pub use store::SeriesStore;
pub use transport::{ConsoleConfig, ConsoleConnection, DEFAULT_PORT};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
