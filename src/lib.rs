//! # kvtxlog
//!
//! The durability layer of a key-value store:
//! - Every Put/Delete recorded as a sequence-numbered event
//! - Pluggable log backends (append-only file, PostgreSQL table)
//! - Asynchronous single-writer persistence with bounded backpressure
//! - Startup recovery by ordered replay
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Request handlers                         │
//! │                 (KvService put/get/delete)                   │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │ enqueue (bounded, 16)        │ get/put/delete
//!                ▼                              ▼
//!   ┌──────────────────────────┐        ┌─────────────┐
//!   │     TransactionLog       │        │ MemoryStore │
//!   │  (single writer thread)  │        │  (RwLock)   │
//!   └─────────────┬────────────┘        └──────▲──────┘
//!                 │                            │ apply in order
//!        ┌────────┴────────┐          ┌────────┴────────┐
//!        ▼                 ▼          │   Coordinator   │
//!   ┌─────────┐     ┌────────────┐    │ (startup replay)│
//!   │  File   │     │ PostgreSQL │    └────────▲────────┘
//!   └────┬────┘     └─────┬──────┘             │
//!        └────────────────┴──── read_events ───┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod txlog;
pub mod store;
pub mod recovery;
pub mod service;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LogError, Result};
pub use config::{BackendConfig, Config, PostgresParams, SyncPolicy};
pub use recovery::{Coordinator, ErrorMonitor, RecoveryReport};
pub use service::KvService;
pub use store::{KeyValueStore, MemoryStore};
pub use txlog::{Event, Operation, TransactionLog};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of kvtxlog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
