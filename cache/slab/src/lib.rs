//! Slab allocator for the cache engine.
//!
//! Carves fixed-size chunks out of a bounded set of pages, organised into
//! geometric size classes. Each class owns a free list and the LRU chain
//! for its items; the engine layers the item table, eviction policy, and
//! operation surface on top.
//!
//! # Architecture
//!
//! ```text
//! +--------------------------------------------------+
//! |                  SlabAllocator                   |
//! |                                                  |
//! |  PageReserve (global budget, fixed-size pages)   |
//! |        |            |                            |
//! |        v            v                            |
//! |  +------------+  +------------+                  |
//! |  | SlabClass 0|  | SlabClass 1|   ...            |
//! |  | 96B chunks |  | 120B chunks|                  |
//! |  | free list  |  | free list  |                  |
//! |  | LRU chain  |  | LRU chain  |                  |
//! |  +------------+  +------------+                  |
//! +--------------------------------------------------+
//! ```
//!
//! Chunks are addressed by [`Location`] (class, class-local page, chunk);
//! each chunk starts with an [`ItemHeader`] followed by key and value
//! bytes. Geometric class sizes bound internal fragmentation to
//! `(growth - 1) / growth` per item while keeping the class count small.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod class;
mod config;
mod item;
mod location;
mod page;

use std::io;

pub use class::SlabClass;
pub use config::{
    DEFAULT_CACHE_SIZE, DEFAULT_CHUNK_SIZE, DEFAULT_GROWTH_FACTOR, DEFAULT_ITEM_SIZE_MAX,
    DEFAULT_PAGE_SIZE, HEADER_SIZE, KEY_MAX, SlabConfig, build_class_sizes, select_class,
};
pub use item::{IFLAG_LINKED, ItemHeader};
pub use location::{LINK_NONE, Location, RAW_NONE};
pub use page::PageReserve;

/// The slab allocator: a page reserve plus one [`SlabClass`] per size.
pub struct SlabAllocator {
    sizes: Vec<u32>,
    classes: Vec<SlabClass>,
    reserve: PageReserve,
}

impl SlabAllocator {
    /// Build an allocator for the given geometry.
    ///
    /// With `preallocate` set in the config, the whole page budget is
    /// allocated here.
    pub fn new(config: &SlabConfig) -> io::Result<Self> {
        let sizes = build_class_sizes(config);
        let page_size = config.page_size();
        let budget = config.page_budget();
        let reserve = PageReserve::new(page_size, budget, config.preallocate)?;

        let classes = sizes
            .iter()
            .enumerate()
            .map(|(id, &size)| SlabClass::new(id as u8, size, page_size, budget))
            .collect();

        tracing::debug!(
            classes = sizes.len(),
            page_size,
            budget_pages = budget,
            "slab allocator ready"
        );

        Ok(Self {
            sizes,
            classes,
            reserve,
        })
    }

    /// Chunk sizes by class id.
    #[inline]
    pub fn chunk_sizes(&self) -> &[u32] {
        &self.sizes
    }

    /// All classes, indexed by class id.
    #[inline]
    pub fn classes(&self) -> &[SlabClass] {
        &self.classes
    }

    /// One class by id.
    #[inline]
    pub fn class(&self, class_id: u8) -> Option<&SlabClass> {
        self.classes.get(class_id as usize)
    }

    /// The smallest class that fits a total footprint of `needed` bytes.
    #[inline]
    pub fn select_class(&self, needed: usize) -> Option<u8> {
        select_class(&self.sizes, needed)
    }

    /// Acquire a chunk from a class, or `None` when neither the class
    /// free list nor the page budget can satisfy it.
    pub fn acquire(&self, class_id: u8) -> Option<Location> {
        self.classes
            .get(class_id as usize)?
            .acquire(&self.reserve)
    }

    /// Return a chunk to its class's free list.
    pub fn release(&self, loc: Location) {
        if let Some(class) = self.classes.get(loc.class_id() as usize) {
            class.release(loc);
        }
    }

    /// Header of the item at a location.
    ///
    /// # Safety
    ///
    /// The location must reference a chunk holding a live item header.
    #[inline]
    pub unsafe fn header<'a>(&self, loc: Location) -> &'a ItemHeader {
        // SAFETY: forwarded contract.
        unsafe {
            self.classes[loc.class_id() as usize].header(loc.page(), loc.chunk())
        }
    }

    /// Initialize a fresh item in an acquired chunk: header plus key; the
    /// value area is left for the caller to fill.
    ///
    /// # Safety
    ///
    /// `loc` must have been returned by [`SlabAllocator::acquire`] for a
    /// chunk not yet holding a live item, and the item's total footprint
    /// must fit the class's chunk size.
    pub unsafe fn init_item<'a>(
        &self,
        loc: Location,
        key: &[u8],
        value_len: usize,
        flags: u32,
        exptime: u32,
        created: u32,
    ) -> &'a ItemHeader {
        let class = &self.classes[loc.class_id() as usize];
        debug_assert!(HEADER_SIZE + key.len() + value_len <= class.chunk_size() as usize);
        // SAFETY: the caller owns the freshly acquired chunk exclusively.
        unsafe {
            let ptr = class.chunk_ptr(loc.page(), loc.chunk());
            ItemHeader::init(ptr, loc.class_id(), key, value_len, flags, exptime, created)
        }
    }

    /// Mutable view of the value area of a detached item.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the item: it is detached
    /// (never linked, or already unlinked with this as the only
    /// outstanding reference).
    pub unsafe fn value_mut<'a>(&self, loc: Location) -> &'a mut [u8] {
        let class = &self.classes[loc.class_id() as usize];
        // SAFETY: pointer derived from the page allocation; the caller
        // guarantees exclusivity, so handing out &mut cannot alias.
        unsafe {
            let ptr = class.chunk_ptr(loc.page(), loc.chunk());
            let header = ItemHeader::from_ptr(ptr);
            std::slice::from_raw_parts_mut(
                ptr.add(HEADER_SIZE + header.key_len()),
                header.value_len(),
            )
        }
    }

    /// Bytes currently held in pages.
    #[inline]
    pub fn memory_used(&self) -> usize {
        self.reserve.bytes_in_use()
    }

    /// The configured memory budget, rounded down to whole pages.
    #[inline]
    pub fn memory_limit(&self) -> usize {
        self.reserve.budget_pages() * self.reserve.page_size()
    }

    /// Page size in bytes.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.reserve.page_size()
    }

    /// Total pages the budget affords.
    #[inline]
    pub fn budget_pages(&self) -> usize {
        self.reserve.budget_pages()
    }
}
