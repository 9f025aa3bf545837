//! Slab geometry: size-class table and page sizing.

/// Item header size in bytes.
pub const HEADER_SIZE: usize = 56;

/// Maximum key length in bytes.
pub const KEY_MAX: usize = 250;

/// Default base chunk size for the smallest class.
pub const DEFAULT_CHUNK_SIZE: usize = 96;

/// Default growth factor between adjacent classes.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.25;

/// Default page size (1 MiB). Pages grow to fit the largest class.
pub const DEFAULT_PAGE_SIZE: usize = 1 << 20;

/// Default memory budget (64 MiB).
pub const DEFAULT_CACHE_SIZE: usize = 64 << 20;

/// Default maximum value size (1 MiB).
pub const DEFAULT_ITEM_SIZE_MAX: usize = 1 << 20;

/// Class ids are u8; one value is kept free so the count stays below 256.
pub const MAX_CLASSES: usize = 255;

/// Geometry inputs for the allocator.
#[derive(Debug, Clone)]
pub struct SlabConfig {
    /// Total memory budget in bytes, shared by all classes.
    pub cache_size: usize,
    /// Chunk size of the smallest class.
    pub chunk_size: usize,
    /// Growth factor between adjacent classes. Must be greater than 1.
    pub growth_factor: f64,
    /// Maximum value size in bytes.
    pub item_size_max: usize,
    /// Reserve the whole page budget at construction.
    pub preallocate: bool,
}

impl Default for SlabConfig {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            item_size_max: DEFAULT_ITEM_SIZE_MAX,
            preallocate: false,
        }
    }
}

impl SlabConfig {
    /// The largest chunk any item can need: header, maximal key, maximal
    /// value.
    pub fn largest_chunk(&self) -> usize {
        align8(HEADER_SIZE + KEY_MAX + self.item_size_max)
    }

    /// Page size for this geometry: at least [`DEFAULT_PAGE_SIZE`], grown
    /// when a single chunk would not fit.
    pub fn page_size(&self) -> usize {
        DEFAULT_PAGE_SIZE.max(self.largest_chunk())
    }

    /// Number of whole pages the budget affords.
    pub fn page_budget(&self) -> usize {
        self.cache_size / self.page_size()
    }
}

/// Compute the chunk-size table for a geometry.
///
/// Sizes grow geometrically from the base chunk size, 8-byte aligned and
/// strictly increasing, ending at the first class that can hold the
/// largest possible item.
pub fn build_class_sizes(config: &SlabConfig) -> Vec<u32> {
    let target = config.largest_chunk();
    let mut size = align8(config.chunk_size.max(HEADER_SIZE + 8));
    let mut sizes = Vec::new();

    while sizes.len() < MAX_CLASSES - 1 && size < target {
        sizes.push(size as u32);
        let next = align8((size as f64 * config.growth_factor).ceil() as usize);
        size = next.max(size + 8);
    }
    sizes.push(target as u32);
    sizes
}

/// Find the smallest class whose chunk fits `needed` bytes.
///
/// `needed` is the total footprint: header + key + value. Returns `None`
/// if no class is large enough.
#[inline]
pub fn select_class(sizes: &[u32], needed: usize) -> Option<u8> {
    if needed > u32::MAX as usize {
        return None;
    }
    match sizes.binary_search(&(needed as u32)) {
        Ok(idx) => Some(idx as u8),
        Err(idx) if idx < sizes.len() => Some(idx as u8),
        Err(_) => None,
    }
}

#[inline]
pub(crate) fn align8(n: usize) -> usize {
    (n + 7) & !7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_strictly_increasing_and_aligned() {
        let sizes = build_class_sizes(&SlabConfig::default());
        assert!(sizes.len() > 10);
        for w in sizes.windows(2) {
            assert!(w[1] > w[0]);
        }
        for &s in &sizes {
            assert_eq!(s % 8, 0);
        }
    }

    #[test]
    fn growth_factor_holds_in_the_middle() {
        let sizes = build_class_sizes(&SlabConfig::default());
        // Skip the first few (minimum-step dominated) and the final
        // (clamped to the largest item) classes.
        for w in sizes[4..sizes.len() - 2].windows(2) {
            let ratio = w[1] as f64 / w[0] as f64;
            assert!(
                (1.15..=1.35).contains(&ratio),
                "ratio {ratio:.3} between {} and {}",
                w[0],
                w[1]
            );
        }
    }

    #[test]
    fn last_class_fits_largest_item() {
        let config = SlabConfig::default();
        let sizes = build_class_sizes(&config);
        let largest = *sizes.last().unwrap() as usize;
        assert!(largest >= HEADER_SIZE + KEY_MAX + config.item_size_max);
    }

    #[test]
    fn select_smallest_fitting_class() {
        let sizes = build_class_sizes(&SlabConfig::default());
        let c = select_class(&sizes, 100).unwrap();
        assert!(sizes[c as usize] >= 100);
        if c > 0 {
            assert!(sizes[c as usize - 1] < 100);
        }
        // Exact fit selects that class.
        let exact = sizes[3] as usize;
        assert_eq!(select_class(&sizes, exact), Some(3));
    }

    #[test]
    fn select_rejects_oversized() {
        let sizes = build_class_sizes(&SlabConfig::default());
        let too_big = *sizes.last().unwrap() as usize + 1;
        assert_eq!(select_class(&sizes, too_big), None);
    }

    #[test]
    fn page_grows_to_fit_largest_chunk() {
        let config = SlabConfig {
            item_size_max: 4 << 20,
            ..Default::default()
        };
        assert!(config.page_size() >= config.largest_chunk());
        let small = SlabConfig {
            item_size_max: 8192,
            ..Default::default()
        };
        assert_eq!(small.page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn tiny_budget_affords_no_pages() {
        let config = SlabConfig {
            cache_size: 1024,
            ..Default::default()
        };
        assert_eq!(config.page_budget(), 0);
    }
}
