//! CoreStage - Multi-core block staging engine
//!
//! A simulated data engine that stages 4 KiB blocks through three
//! cooperating layers: an in-memory page cache, an adaptive compressor, and
//! a block-addressed backing store on a single file. Worker cores sweep
//! their assigned segments, read blocks through the cache, transform them,
//! write compressed results back, and report access patterns to a scheduler
//! that rebalances work across cores.
//!
//! # Architecture
//!
//! ```text
//!              ┌──────── Worker(core_id) ────────┐
//!              │  pick offset in own segment     │
//!              │  report access to Scheduler     │
//!              │  maybe steal offset (migration) │
//!              │  buf <- Cache.get(offset, write)│
//!              │  transform(buf, core_id)        │
//!              │  out <- Compressor.encode(buf)  │
//!              │  BackingStore.write(offset,out) │
//!              │  Cache.publish(offset, buf)     │
//!              │  adaptive sleep by load         │
//!              └─────────────────────────────────┘
//!                         │         │
//!                         ▼         ▼
//!                     Scheduler   Cache ── BackingStore (one file)
//!                                  │
//!                                  └── Compressor (zstd / lz4 / gzip)
//! ```
//!
//! # Modules
//!
//! - [`anticipator`] - Markov-style offset predictor gating prefetch
//! - [`cache`] - Sharded write-back page cache with LRU eviction
//! - [`compress`] - Adaptive compression (entropy and prior-ratio policies)
//! - [`config`] - Engine configuration
//! - [`engine`] - Composition root, worker lifecycle
//! - [`error`] - Error types
//! - [`ring`] - Circular snapshot buffer of processed pages
//! - [`scheduler`] - Per-core hot-block queues and migration
//! - [`store`] - Positioned I/O over the backing file
//! - [`worker`] - The per-core staging loop

pub mod anticipator;
pub mod cache;
pub mod compress;
pub mod config;
pub mod engine;
pub mod error;
pub mod ring;
pub mod scheduler;
pub mod store;
pub mod worker;

// Re-export commonly used types
pub use anticipator::Anticipator;
pub use cache::{CacheStats, PageCache};
pub use compress::{CompressionAlgorithm, CompressionManager};
pub use config::{EngineConfig, BLOCK_SIZE};
pub use engine::{Engine, EngineReport};
pub use error::{Error, Result};
pub use ring::RingLog;
pub use scheduler::Scheduler;
pub use store::BackingStore;
