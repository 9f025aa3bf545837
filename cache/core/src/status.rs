//! Response codes and store-operation selectors.
//!
//! The numeric values cross a wire/ABI boundary and must never change.

use thiserror::Error;

/// Response code for an engine operation.
///
/// The discriminants are wire-stable and shared with the binary protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The command executed successfully.
    Success = 0x00,
    /// The key does not exist.
    KeyNotFound = 0x01,
    /// The key already exists.
    KeyExists = 0x02,
    /// Could not allocate memory.
    OutOfMemory = 0x03,
    /// The item was not stored.
    NotStored = 0x04,
    /// Invalid arguments.
    InvalidArguments = 0x05,
    /// The engine does not support this operation.
    NotSupported = 0x06,
    /// Executing this now would block; completion is signalled later.
    WouldBlock = 0x07,
    /// The data is too big for the engine.
    TooBig = 0x08,
    /// The engine wants more data if the front-end has more available.
    WantMore = 0x09,
    /// Generic failure.
    Failed = 0xff,
}

impl Status {
    /// The wire ordinal for this status.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether this status represents success.
    #[inline]
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

/// Store semantics selector.
///
/// The discriminants are wire-stable.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// Store only if the key is absent.
    Add = 1,
    /// Store unconditionally.
    Set = 2,
    /// Store only if the key is present.
    Replace = 3,
    /// Concatenate after the existing value.
    Append = 4,
    /// Concatenate before the existing value.
    Prepend = 5,
    /// Store only if the caller's CAS matches the current version.
    Cas = 6,
}

/// Error result of an engine operation.
///
/// Every operation has a status-coded outcome; no other error type crosses
/// the engine boundary. [`EngineError::status`] gives the wire ordinal.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// The key does not exist.
    #[error("key not found")]
    KeyNotFound,
    /// The key exists with a different version.
    #[error("key already exists")]
    KeyExists,
    /// Memory could not be obtained, even after eviction had a fair chance.
    #[error("out of memory")]
    OutOfMemory,
    /// A store precondition failed (ADD on present, REPLACE on absent, ...).
    #[error("item not stored")]
    NotStored,
    /// Malformed input: bad key length, bad config, non-numeric value.
    #[error("invalid arguments")]
    InvalidArguments,
    /// The operation is not supported by this engine or configuration.
    #[error("not supported")]
    NotSupported,
    /// The operation would block; the engine will notify the cookie.
    #[error("operation would block")]
    WouldBlock,
    /// The value exceeds the configured maximum item size.
    #[error("item too large")]
    TooBig,
    /// The engine cannot continue to serve this handle.
    #[error("engine failure")]
    Failed,
}

impl EngineError {
    /// The wire-stable status ordinal for this error.
    pub fn status(self) -> Status {
        match self {
            EngineError::KeyNotFound => Status::KeyNotFound,
            EngineError::KeyExists => Status::KeyExists,
            EngineError::OutOfMemory => Status::OutOfMemory,
            EngineError::NotStored => Status::NotStored,
            EngineError::InvalidArguments => Status::InvalidArguments,
            EngineError::NotSupported => Status::NotSupported,
            EngineError::WouldBlock => Status::WouldBlock,
            EngineError::TooBig => Status::TooBig,
            EngineError::Failed => Status::Failed,
        }
    }
}

impl From<EngineError> for Status {
    fn from(e: EngineError) -> Status {
        e.status()
    }
}

impl<T> From<&Result<T, EngineError>> for Status {
    fn from(r: &Result<T, EngineError>) -> Status {
        match r {
            Ok(_) => Status::Success,
            Err(e) => e.status(),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
