//! Item handle: the caller's reference to one stored or detached item.

use std::fmt;
use std::sync::Arc;

use cache_slab::{ItemHeader, Location};

use crate::engine::{Core, EngineShared};

/// One reference to an item.
///
/// Returned by `allocate` (a detached, writable item) and `get` (a linked,
/// shared item). The handle owns one unit of the item's reference count;
/// dropping it is `release`. An item's chunk is recycled only when it is
/// unlinked and the last handle is gone, so the bytes behind a handle are
/// always valid.
pub struct ItemHandle {
    shared: Arc<EngineShared>,
    loc: Location,
}

impl ItemHandle {
    pub(crate) fn new(shared: Arc<EngineShared>, loc: Location) -> Self {
        Self { shared, loc }
    }

    #[inline]
    pub(crate) fn location(&self) -> Location {
        self.loc
    }

    /// Whether this handle belongs to the given engine.
    pub(crate) fn same_engine(&self, shared: &Arc<EngineShared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    #[inline]
    fn core(&self) -> &Core {
        // Handles are only created by an initialized engine, and the core
        // lives until the last Arc (which this handle holds) is gone.
        self.shared
            .core_opt()
            .expect("item handle outlived engine core")
    }

    #[inline]
    fn header(&self) -> &ItemHeader {
        // SAFETY: the handle's refcount unit keeps the chunk from being
        // recycled, so the header stays valid for the handle's lifetime.
        unsafe { self.core().alloc.header(self.loc) }
    }

    /// The item's key.
    #[inline]
    pub fn key(&self) -> &[u8] {
        self.header().key()
    }

    /// The item's value.
    ///
    /// Values are immutable once an item is committed, so this is a
    /// consistent snapshot even under concurrent mutation of the key.
    #[inline]
    pub fn value(&self) -> &[u8] {
        self.header().value()
    }

    /// Mutable access to the value, available only while the item is
    /// detached (between `allocate` and `store`). Returns `None` once the
    /// item has been committed.
    pub fn value_mut(&mut self) -> Option<&mut [u8]> {
        if self.header().is_linked() {
            return None;
        }
        // SAFETY: the item is detached and this is its only handle, so
        // access is exclusive; &mut self prevents aliasing through the
        // handle itself.
        Some(unsafe { self.core().alloc.value_mut(self.loc) })
    }

    /// The item's CAS version stamp. 0 until the first commit.
    #[inline]
    pub fn cas(&self) -> u64 {
        self.header().cas()
    }

    /// Set the CAS stamp used as the comparand by a `CAS` store.
    #[inline]
    pub fn set_cas(&self, cas: u64) {
        self.header().set_cas(cas);
    }

    /// Client flags, returned verbatim.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.header().flags()
    }

    /// Relative expiry time; 0 means never.
    #[inline]
    pub fn exptime(&self) -> u32 {
        self.header().exptime()
    }

    /// The slab class that owns this item's memory.
    #[inline]
    pub fn class_id(&self) -> u8 {
        self.header().class_id()
    }

    /// Value length in bytes.
    #[inline]
    pub fn value_len(&self) -> usize {
        self.header().value_len()
    }
}

impl Drop for ItemHandle {
    fn drop(&mut self) {
        if let Some(core) = self.shared.core_opt() {
            // SAFETY: the handle's refcount unit kept the header alive.
            let header = unsafe { core.alloc.header(self.loc) };
            if header.release_ref() {
                core.alloc.release(self.loc);
            }
        }
    }
}

impl fmt::Debug for ItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemHandle")
            .field("loc", &self.loc)
            .finish()
    }
}
