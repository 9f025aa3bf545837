//! Shared types for the slab cache engine.
//!
//! This crate holds everything the storage engine and a network front-end
//! must agree on without depending on each other:
//!
//! - [`Status`] and [`EngineError`] - wire-stable response codes and the
//!   typed error used by engine operations
//! - [`StoreOperation`] - store semantics selectors with stable ordinals
//! - [`Clock`] - the process-relative, low-resolution time source
//! - [`Cookie`] - the opaque per-request token used for deferred completion
//! - [`ServerApi`] and the stat/response callback shapes
//! - ASCII-numeric helpers used by the arithmetic operation

#![warn(missing_docs)]
#![warn(clippy::all)]

mod callbacks;
mod cookie;
pub mod numeric;
mod status;
mod time;

pub use callbacks::{AddResponse, AddStat, BinaryRequestHeader, Response, ServerApi};
pub use cookie::Cookie;
pub use status::{EngineError, EngineResult, Status, StoreOperation};
pub use time::{Clock, REALTIME_MAXDELTA, RelTime};
