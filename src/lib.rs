//! # PoolKV
//!
//! An embeddable persistent key-value store over a memory-mapped pool file:
//! - Interchangeable index variants selected by name (hash, ordered tree, blackhole)
//! - Transactional mutations with an undo log for crash atomicity
//! - Full-match regex queries over keys
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Engine (facade)                         │
//! │          lifecycle, locking, error translation               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │            ┌──────────────┐
//!                       ├────────────│  KeyPattern  │ (*_like)
//!                       │            └──────────────┘
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Index                                │
//! │          blackhole  |  hashmap  |  btree                     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ transactions
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Pool                                 │
//! │     header │ undo log │ heap (size-class allocator)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use poolkv::Engine;
//!
//! let engine = Engine::create_or_open("btree", "/tmp/example.pool", 8 * 1024 * 1024)?;
//! engine.put(b"10", b"10!")?;
//! assert_eq!(engine.count_like("1.*")?, 1);
//! engine.close();
//! # Ok::<(), poolkv::PoolKvError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod pool;
pub mod index;
pub mod pattern;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{OpenError, PoolKvError, Result};
pub use config::{Config, FlushMode};
pub use engine::Engine;
pub use index::EngineKind;
pub use pattern::KeyPattern;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of PoolKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
