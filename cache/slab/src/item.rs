//! In-chunk item header.
//!
//! Each chunk holds:
//! - Fixed header (56 bytes)
//! - Key bytes
//! - Value bytes
//! - Padding to the chunk size
//!
//! Plain fields are written once while the item is detached (a single
//! owner, before publication) and are immutable afterwards; everything
//! that changes after publication lives in an atomic. The packed `state`
//! word holds internal flags and the reference count together so that the
//! transition into (unlinked, refcount == 0) happens in exactly one
//! compare-exchange, which designates exactly one freer.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::config::HEADER_SIZE;
use crate::location::{LINK_NONE, RAW_NONE};

/// Internal flag: the item is linked into the table and an LRU chain.
///
/// The low 8 bits of the internal-flags byte pair are reserved for the
/// core; the high 8 bits are free for engine use.
pub const IFLAG_LINKED: u16 = 1 << 0;

/// Item header (56 bytes).
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       8     cas (atomic): version stamp, 0 until first commit
/// 8       8     hash_next (atomic): raw location of the next chain item
/// 16      4     state (atomic): iflag (16 bits) | refcount (16 bits)
/// 20      4     lru_prev (atomic): towards MRU, LINK_NONE at head
/// 24      4     lru_next (atomic): towards LRU, LINK_NONE at tail
/// 28      4     last_bump (atomic): relative time of last MRU move
/// 32      4     exptime: relative expiry, 0 = never
/// 36      4     created (atomic): relative time at commit, re-stamped on link
/// 40      4     flags: client flags, stored verbatim
/// 44      4     value_len
/// 48      1     key_len
/// 49      1     class_id
/// 50      6     reserved
/// ```
///
/// Key bytes follow the header, value bytes follow the key.
#[repr(C)]
pub struct ItemHeader {
    cas: AtomicU64,
    hash_next: AtomicU64,
    state: AtomicU32,
    lru_prev: AtomicU32,
    lru_next: AtomicU32,
    last_bump: AtomicU32,
    exptime: u32,
    created: AtomicU32,
    flags: u32,
    value_len: u32,
    key_len: u8,
    class_id: u8,
    _reserved: [u8; 6],
}

const _: () = assert!(std::mem::size_of::<ItemHeader>() == HEADER_SIZE);
const _: () = assert!(std::mem::align_of::<ItemHeader>() == 8);

#[inline]
fn pack(iflag: u16, refs: u16) -> u32 {
    ((iflag as u32) << 16) | refs as u32
}

#[inline]
fn unpack(state: u32) -> (u16, u16) {
    ((state >> 16) as u16, state as u16)
}

impl ItemHeader {
    /// Initialize a header in a freshly acquired chunk and copy the key.
    ///
    /// The item starts detached with a reference count of 1 (the caller's
    /// handle) and a CAS stamp of 0.
    ///
    /// # Safety
    ///
    /// `ptr` must point to writable chunk memory of at least
    /// `HEADER_SIZE + key.len() + value_len` bytes, exclusively owned by
    /// the caller.
    pub unsafe fn init<'a>(
        ptr: *mut u8,
        class_id: u8,
        key: &[u8],
        value_len: usize,
        flags: u32,
        exptime: u32,
        created: u32,
    ) -> &'a ItemHeader {
        debug_assert!(key.len() <= u8::MAX as usize);
        // SAFETY: caller guarantees exclusive ownership of the chunk.
        unsafe {
            let header = &mut *(ptr as *mut ItemHeader);
            header.cas = AtomicU64::new(0);
            header.hash_next = AtomicU64::new(RAW_NONE);
            header.state = AtomicU32::new(pack(0, 1));
            header.lru_prev = AtomicU32::new(LINK_NONE);
            header.lru_next = AtomicU32::new(LINK_NONE);
            header.last_bump = AtomicU32::new(created);
            header.exptime = exptime;
            header.created = AtomicU32::new(created);
            header.flags = flags;
            header.value_len = value_len as u32;
            header.key_len = key.len() as u8;
            header.class_id = class_id;

            std::ptr::copy_nonoverlapping(key.as_ptr(), ptr.add(HEADER_SIZE), key.len());

            &*(ptr as *const ItemHeader)
        }
    }

    /// Reinterpret chunk memory as a header.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a chunk whose header was initialized by
    /// [`ItemHeader::init`] and not yet recycled.
    #[inline]
    pub unsafe fn from_ptr<'a>(ptr: *const u8) -> &'a ItemHeader {
        // SAFETY: caller guarantees the chunk holds a live header.
        unsafe { &*(ptr as *const ItemHeader) }
    }

    /// The CAS version stamp. 0 until the first commit.
    #[inline]
    pub fn cas(&self) -> u64 {
        self.cas.load(Ordering::Acquire)
    }

    /// Stamp the CAS version. Called while committing, before or at
    /// publication.
    #[inline]
    pub fn set_cas(&self, cas: u64) {
        self.cas.store(cas, Ordering::Release);
    }

    /// Key length in bytes.
    #[inline]
    pub fn key_len(&self) -> usize {
        self.key_len as usize
    }

    /// Value length in bytes.
    #[inline]
    pub fn value_len(&self) -> usize {
        self.value_len as usize
    }

    /// Client flags, returned verbatim.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Relative expiry time; 0 means never.
    #[inline]
    pub fn exptime(&self) -> u32 {
        self.exptime
    }

    /// Relative time the item was committed (allocation time until the
    /// first link re-stamps it).
    #[inline]
    pub fn created(&self) -> u32 {
        self.created.load(Ordering::Acquire)
    }

    /// Re-stamp the commit time. Called while linking, under the owning
    /// bucket lock.
    #[inline]
    pub fn set_created(&self, now: u32) {
        self.created.store(now, Ordering::Release);
    }

    /// The owning size class.
    #[inline]
    pub fn class_id(&self) -> u8 {
        self.class_id
    }

    /// Total footprint: header + key + value.
    #[inline]
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.key_len as usize + self.value_len as usize
    }

    /// Whether the item has expired at relative time `now`.
    #[inline]
    pub fn is_expired(&self, now: u32) -> bool {
        self.exptime != 0 && self.exptime <= now
    }

    /// The internal-flags half of the state word.
    #[inline]
    pub fn iflag(&self) -> u16 {
        unpack(self.state.load(Ordering::Acquire)).0
    }

    /// Whether the item is linked into the table and LRU.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.iflag() & IFLAG_LINKED != 0
    }

    /// Current reference count.
    #[inline]
    pub fn refcount(&self) -> u16 {
        unpack(self.state.load(Ordering::Acquire)).1
    }

    /// Acquire a reference to a linked item.
    ///
    /// Fails if the item is no longer linked or the count would overflow.
    /// Callers must hold the table lock covering this item's bucket, which
    /// is what excludes the unlink-and-free path.
    pub fn try_acquire_ref(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            let (iflag, refs) = unpack(current);
            if iflag & IFLAG_LINKED == 0 || refs == u16::MAX {
                return false;
            }
            let next = pack(iflag, refs + 1);
            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    /// Drop one reference.
    ///
    /// Returns `true` when this call transitioned the item into
    /// (unlinked, refcount == 0): the caller is then the designated freer
    /// and must return the chunk to its class.
    pub fn release_ref(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            let (iflag, refs) = unpack(current);
            debug_assert!(refs > 0, "release with zero refcount");
            let next = pack(iflag, refs.saturating_sub(1));
            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return refs == 1 && iflag & IFLAG_LINKED == 0,
                Err(_) => continue,
            }
        }
    }

    /// Mark the item linked. Called under the owning bucket lock.
    #[inline]
    pub fn set_linked(&self) {
        self.state
            .fetch_or((IFLAG_LINKED as u32) << 16, Ordering::AcqRel);
    }

    /// Clear the linked flag.
    ///
    /// Returns `true` when this call transitioned the item into
    /// (unlinked, refcount == 0): the caller is then the designated freer.
    /// Returns `false` if someone else already unlinked it or references
    /// remain outstanding.
    pub fn clear_linked(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            let (iflag, refs) = unpack(current);
            if iflag & IFLAG_LINKED == 0 {
                return false;
            }
            let next = pack(iflag & !IFLAG_LINKED, refs);
            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return refs == 0,
                Err(_) => continue,
            }
        }
    }

    /// Raw location of the next item in the hash chain.
    #[inline]
    pub fn hash_next(&self) -> u64 {
        self.hash_next.load(Ordering::Acquire)
    }

    /// Set the hash-chain link. Called under the owning bucket lock.
    #[inline]
    pub fn set_hash_next(&self, raw: u64) {
        self.hash_next.store(raw, Ordering::Release);
    }

    /// LRU link towards the MRU end.
    #[inline]
    pub fn lru_prev(&self) -> u32 {
        self.lru_prev.load(Ordering::Acquire)
    }

    /// Set the MRU-side link. Called under the class lock.
    #[inline]
    pub fn set_lru_prev(&self, link: u32) {
        self.lru_prev.store(link, Ordering::Release);
    }

    /// LRU link towards the LRU end.
    #[inline]
    pub fn lru_next(&self) -> u32 {
        self.lru_next.load(Ordering::Acquire)
    }

    /// Set the LRU-side link. Called under the class lock.
    #[inline]
    pub fn set_lru_next(&self, link: u32) {
        self.lru_next.store(link, Ordering::Release);
    }

    /// Relative time of the last MRU move.
    #[inline]
    pub fn last_bump(&self) -> u32 {
        self.last_bump.load(Ordering::Relaxed)
    }

    /// Record an MRU move.
    #[inline]
    pub fn set_last_bump(&self, now: u32) {
        self.last_bump.store(now, Ordering::Relaxed);
    }

    /// The key bytes.
    ///
    /// Valid whenever the header is valid: the key is written before
    /// publication and never changes.
    #[inline]
    pub fn key(&self) -> &[u8] {
        // SAFETY: key bytes follow the header and were written by init.
        unsafe {
            std::slice::from_raw_parts(
                (self as *const Self as *const u8).add(HEADER_SIZE),
                self.key_len as usize,
            )
        }
    }

    /// The value bytes.
    ///
    /// Values are written while the item is detached and immutable once it
    /// is published, so shared reads are always consistent.
    #[inline]
    pub fn value(&self) -> &[u8] {
        // SAFETY: value bytes follow the key within the same chunk.
        unsafe {
            std::slice::from_raw_parts(
                (self as *const Self as *const u8).add(HEADER_SIZE + self.key_len as usize),
                self.value_len as usize,
            )
        }
    }
}
