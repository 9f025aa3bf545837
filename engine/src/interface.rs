//! The versioned operation surface.
//!
//! A front-end obtains an engine through [`create_instance`], which
//! negotiates an interface version and returns an [`EngineHandle`] whose
//! first field is the negotiated version. Version 1 is the [`EngineV1`]
//! operation set; implementations may advertise a lower version than the
//! front-end's maximum, and a front-end that cannot even speak version 1
//! gets `NotSupported`.

use std::ops::Deref;
use std::sync::Arc;

use cache_core::{
    BinaryRequestHeader, Cookie, EngineError, EngineResult, Response, ServerApi, StoreOperation,
};

use crate::engine::SlabEngine;
use crate::item::ItemHandle;

/// The interface version this engine implements.
pub const ENGINE_INTERFACE_VERSION: u64 = 1;

/// Version 1 of the engine operation surface.
///
/// Every operation is thread-safe and status-coded; no other error type
/// crosses this boundary. Per-request operations take a [`Cookie`]
/// identifying the initiating front-end request; an operation that
/// returns [`EngineError::WouldBlock`] holds the cookie and completes it
/// exactly once through `notify_io_complete`. Only `allocate`, `store`,
/// `arithmetic`, and `get` may defer; everything else completes
/// synchronously with bounded work.
pub trait EngineV1: Send + Sync {
    /// A static description of this engine.
    fn get_info(&self) -> &'static str;

    /// Parse the configuration string and bring the engine live. Called
    /// exactly once after creation.
    fn initialize(&self, config_str: &str) -> EngineResult<()>;

    /// Stop background work and refuse further operations. Memory is
    /// released when the last handle is gone.
    fn destroy(&self);

    /// Reserve a detached item big enough for `key` plus `nbytes` of
    /// value. The caller fills the value, then commits with
    /// [`EngineV1::store`]. The item's reference count is 1 on return.
    fn allocate(
        &self,
        cookie: Cookie,
        key: &[u8],
        nbytes: usize,
        flags: u32,
        exptime: u32,
    ) -> EngineResult<ItemHandle>;

    /// Unlink an item. The physical free is deferred until the last
    /// reference is released.
    fn remove(&self, cookie: Cookie, item: &ItemHandle) -> EngineResult<()>;

    /// Release a reference. Equivalent to dropping the handle.
    fn release(&self, item: ItemHandle) {
        drop(item);
    }

    /// Look up a live item and take a reference on it.
    fn get(&self, cookie: Cookie, key: &[u8]) -> EngineResult<ItemHandle>;

    /// Commit a detached item under one of the six store semantics.
    /// Returns the new CAS stamp.
    fn store(
        &self,
        cookie: Cookie,
        item: &ItemHandle,
        operation: StoreOperation,
    ) -> EngineResult<u64>;

    /// Atomic counter update over an ASCII-decimal value. Returns the new
    /// CAS stamp and the numeric result.
    #[allow(clippy::too_many_arguments)]
    fn arithmetic(
        &self,
        cookie: Cookie,
        key: &[u8],
        increment: bool,
        create: bool,
        delta: u64,
        initial: u64,
        exptime: u32,
    ) -> EngineResult<(u64, u64)>;

    /// Make items stored before now (`when == 0`) or before a future
    /// horizon invisible. Reclamation is lazy.
    fn flush(&self, cookie: Cookie, when: i64) -> EngineResult<()>;

    /// Emit statistics through the callback. The empty key selects the
    /// general set; `slabs`, `items`, `sizes`, and `reset` are the
    /// recognized sub-keys.
    fn get_stats(
        &self,
        cookie: Cookie,
        stat_key: &[u8],
        add_stat: &mut dyn FnMut(&[u8], &[u8], Cookie),
    ) -> EngineResult<()>;

    /// Zero the operation counters.
    fn reset_stats(&self);

    /// Engine-specific extension point for unrecognized commands.
    fn unknown_command(
        &self,
        cookie: Cookie,
        request: &BinaryRequestHeader,
        add_response: &mut dyn FnMut(&Response<'_>, Cookie),
    ) -> EngineResult<()>;

    /// The current relative time.
    fn current_time(&self) -> u32;

    /// Convert a client expiry input to relative time (0 stays 0; small
    /// values are offsets from now; large values are absolute Unix
    /// timestamps).
    fn realtime(&self, exptime: i64) -> u32;

    /// Discard the pending completion of a cancelled request, if any.
    fn forget_cookie(&self, cookie: Cookie);
}

/// The handle returned by [`create_instance`].
///
/// The first field is the negotiated interface version; the engine is
/// reachable through deref.
pub struct EngineHandle {
    /// Negotiated interface version.
    pub interface: u64,
    engine: SlabEngine,
}

impl EngineHandle {
    /// The engine behind this handle.
    pub fn engine(&self) -> &SlabEngine {
        &self.engine
    }
}

impl Deref for EngineHandle {
    type Target = SlabEngine;

    fn deref(&self) -> &SlabEngine {
        &self.engine
    }
}

/// Create an engine instance.
///
/// `max_interface_version` is the highest interface level the front-end
/// supports; the returned handle's version is at most that. `server`
/// carries the callbacks the engine consumes, in particular
/// `notify_io_complete` for deferred operations.
pub fn create_instance(
    max_interface_version: u64,
    server: Arc<dyn ServerApi>,
) -> EngineResult<EngineHandle> {
    if max_interface_version < ENGINE_INTERFACE_VERSION {
        return Err(EngineError::NotSupported);
    }
    Ok(EngineHandle {
        interface: ENGINE_INTERFACE_VERSION,
        engine: SlabEngine::new(server),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sink;

    impl ServerApi for Sink {
        fn notify_io_complete(&self, _cookie: Cookie, _status: cache_core::Status) {}
    }

    #[test]
    fn negotiates_version_one() {
        let handle = create_instance(1, Arc::new(Sink)).unwrap();
        assert_eq!(handle.interface, ENGINE_INTERFACE_VERSION);
        let newer = create_instance(7, Arc::new(Sink)).unwrap();
        assert_eq!(newer.interface, ENGINE_INTERFACE_VERSION);
    }

    #[test]
    fn rejects_prehistoric_frontends() {
        assert_eq!(
            create_instance(0, Arc::new(Sink)).err(),
            Some(EngineError::NotSupported)
        );
    }

    #[test]
    fn info_string_is_static() {
        let handle = create_instance(1, Arc::new(Sink)).unwrap();
        assert!(handle.get_info().starts_with("Slab cache engine"));
    }
}
