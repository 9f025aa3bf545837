//! Page reserve: the global memory budget.
//!
//! All classes draw fixed-size pages from one reserve. The budget is the
//! hard bound on chunk memory; once every page is handed out, acquisition
//! fails and reclamation is the only way forward.

use std::alloc::{self, Layout};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Alignment for page allocations. Generous enough for any header layout
/// and keeps chunks cache-line aligned at page start.
const PAGE_ALIGN: usize = 64;

/// Hands out zeroed, fixed-size pages within a global budget.
///
/// Pages are never returned individually; the reserve owns every
/// allocation for the lifetime of the engine and releases them all on
/// drop.
pub struct PageReserve {
    page_size: usize,
    layout: Layout,
    budget: usize,
    /// Every page ever allocated, for Drop.
    allocated: Mutex<Vec<*mut u8>>,
    /// Preallocated pages not yet handed out.
    pool: Mutex<Vec<*mut u8>>,
    in_use: AtomicUsize,
}

// SAFETY: the raw pointers are to heap pages owned by the reserve; all
// mutation of the containers goes through the mutexes.
unsafe impl Send for PageReserve {}
unsafe impl Sync for PageReserve {}

impl PageReserve {
    /// Create a reserve of `budget` pages of `page_size` bytes each.
    ///
    /// With `preallocate`, every page is allocated (and zeroed) up front;
    /// otherwise pages are allocated on first demand.
    pub fn new(page_size: usize, budget: usize, preallocate: bool) -> io::Result<Self> {
        let layout = Layout::from_size_align(page_size, PAGE_ALIGN)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let reserve = Self {
            page_size,
            layout,
            budget,
            allocated: Mutex::new(Vec::with_capacity(budget)),
            pool: Mutex::new(Vec::new()),
            in_use: AtomicUsize::new(0),
        };

        if preallocate {
            let mut allocated = reserve.allocated.lock();
            let mut pool = reserve.pool.lock();
            for _ in 0..budget {
                let ptr = reserve.alloc_page()?;
                allocated.push(ptr);
                pool.push(ptr);
            }
        }

        Ok(reserve)
    }

    fn alloc_page(&self) -> io::Result<*mut u8> {
        // SAFETY: layout has non-zero size (page_size >= 1 page).
        let ptr = unsafe { alloc::alloc_zeroed(self.layout) };
        if ptr.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "page allocation failed",
            ));
        }
        Ok(ptr)
    }

    /// Take one page, or `None` when the budget is exhausted.
    pub fn grab(&self) -> Option<*mut u8> {
        if let Some(ptr) = self.pool.lock().pop() {
            self.in_use.fetch_add(1, Ordering::Relaxed);
            return Some(ptr);
        }

        let mut allocated = self.allocated.lock();
        if allocated.len() >= self.budget {
            return None;
        }
        match self.alloc_page() {
            Ok(ptr) => {
                allocated.push(ptr);
                self.in_use.fetch_add(1, Ordering::Relaxed);
                Some(ptr)
            }
            Err(e) => {
                tracing::warn!(page_size = self.page_size, "page allocation failed: {e}");
                None
            }
        }
    }

    /// Page size in bytes.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Total pages the budget affords.
    #[inline]
    pub fn budget_pages(&self) -> usize {
        self.budget
    }

    /// Pages handed out so far.
    #[inline]
    pub fn pages_in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Bytes in handed-out pages.
    #[inline]
    pub fn bytes_in_use(&self) -> usize {
        self.pages_in_use() * self.page_size
    }
}

impl Drop for PageReserve {
    fn drop(&mut self) {
        let allocated = self.allocated.get_mut();
        for &ptr in allocated.iter() {
            // SAFETY: each pointer was returned by alloc_zeroed with this
            // layout and is freed exactly once, here.
            unsafe { alloc::dealloc(ptr, self.layout) };
        }
        allocated.clear();
    }
}
