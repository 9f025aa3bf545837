//! Slab-allocating key-value cache engine.
//!
//! An in-memory cache storing opaque byte values under opaque byte keys,
//! evicting per-class LRU under memory pressure, with lazy expiration,
//! compare-and-swap versioning, append/prepend concatenation, atomic
//! arithmetic, and deferred-flush semantics. The operation surface is a
//! versioned interface created through [`create_instance`], designed to
//! sit behind a network front-end that drives it from many I/O threads.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use engine::{Cookie, EngineV1, ServerApi, Status, StoreOperation, create_instance};
//!
//! struct Frontend;
//!
//! impl ServerApi for Frontend {
//!     fn notify_io_complete(&self, _cookie: Cookie, _status: Status) {}
//! }
//!
//! # fn main() -> Result<(), engine::EngineError> {
//! let handle = create_instance(1, Arc::new(Frontend))?;
//! handle.initialize("cache_size=16777216")?;
//!
//! let cookie = Cookie::new(1);
//! let mut item = handle.allocate(cookie, b"greeting", 5, 0, 0)?;
//! item.value_mut().unwrap().copy_from_slice(b"hello");
//! handle.store(cookie, &item, StoreOperation::Set)?;
//! drop(item);
//!
//! let found = handle.get(cookie, b"greeting")?;
//! assert_eq!(found.value(), b"hello");
//! # handle.destroy();
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

mod assoc;
mod completion;
mod config;
mod engine;
mod eviction;
mod interface;
mod item;
mod stats;

pub use cache_core::{
    BinaryRequestHeader, Clock, Cookie, EngineError, EngineResult, Response, ServerApi, Status,
    StoreOperation,
};
pub use cache_slab::KEY_MAX;

pub use config::EngineConfig;
pub use engine::SlabEngine;
pub use interface::{ENGINE_INTERFACE_VERSION, EngineHandle, EngineV1, create_instance};
pub use item::ItemHandle;
