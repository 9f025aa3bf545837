//! Item table: a chained hashtable over chunk locations.
//!
//! Chains are threaded through the item headers themselves (each header
//! carries a `hash_next` link), so the table proper is just an array of
//! bucket heads holding raw locations. Buckets are guarded by striped
//! mutexes; the stripe for a key covers that key's bucket in both the
//! primary and the old table, which is what lets expansion migrate a
//! bucket without a global lock.
//!
//! Expansion is incremental: when the load factor passes ~1.5 a doubled
//! table is installed and buckets migrate a batch at a time (driven by the
//! ticker and opportunistically after stores). Lookups consult the old
//! table for buckets the migration watermark has not passed yet, so no
//! request ever pays the full rehash cost.
//!
//! Lock order: stripe mutex, then the table RwLock (read side). The write
//! side (installing or retiring a table) is taken with no stripe held.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use cache_slab::{ItemHeader, Location, RAW_NONE, SlabAllocator};

/// Stripe count upper bound. The actual count is capped by the initial
/// bucket count so a stripe always covers whole buckets of every table
/// generation.
const MAX_STRIPES: usize = 1024;

/// Buckets migrated per housekeeping step.
const MIGRATE_BATCH: usize = 128;

/// Expansion trigger: items > buckets * 3/2.
const GROWTH_NUMERATOR: u64 = 3;
const GROWTH_DENOMINATOR: u64 = 2;

struct Tables {
    primary: Box<[AtomicU64]>,
    mask: u64,
    /// Previous table while an expansion is in flight.
    old: Option<(Box<[AtomicU64]>, u64)>,
}

fn new_buckets(len: usize) -> Box<[AtomicU64]> {
    (0..len).map(|_| AtomicU64::new(RAW_NONE)).collect()
}

/// The item table.
pub(crate) struct ItemTable {
    hash_builder: ahash::RandomState,
    stripes: Box<[Mutex<()>]>,
    stripe_mask: u64,
    tables: RwLock<Tables>,
    /// Old-table buckets below this index have been migrated.
    expand_bucket: AtomicUsize,
    /// Serializes migrators.
    migrate_lock: Mutex<()>,
    expanding: AtomicBool,
    want_expand: AtomicBool,
    count: AtomicU64,
}

impl ItemTable {
    /// Create a table with `2^power` initial buckets.
    pub fn new(power: u8) -> Self {
        let buckets = 1usize << power;
        let stripes = MAX_STRIPES.min(buckets);
        Self {
            hash_builder: ahash::RandomState::new(),
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
            stripe_mask: (stripes - 1) as u64,
            tables: RwLock::new(Tables {
                primary: new_buckets(buckets),
                mask: (buckets - 1) as u64,
                old: None,
            }),
            expand_bucket: AtomicUsize::new(0),
            migrate_lock: Mutex::new(()),
            expanding: AtomicBool::new(false),
            want_expand: AtomicBool::new(false),
            count: AtomicU64::new(0),
        }
    }

    /// Hash a key.
    #[inline]
    pub fn hash(&self, key: &[u8]) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Items in the table.
    #[inline]
    pub fn len(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Primary bucket count.
    pub fn buckets(&self) -> usize {
        self.tables.read().primary.len()
    }

    /// Whether an expansion is in flight.
    #[inline]
    pub fn is_expanding(&self) -> bool {
        self.expanding.load(Ordering::Relaxed)
    }

    /// Whether a housekeeping call would do anything.
    #[inline]
    pub fn wants_housekeeping(&self) -> bool {
        self.want_expand.load(Ordering::Relaxed) || self.is_expanding()
    }

    /// Lock the bucket covering `hash`.
    ///
    /// All reads and mutations of that bucket's chain happen through the
    /// returned guard.
    pub fn bucket<'a>(&'a self, hash: u64, alloc: &'a SlabAllocator) -> BucketGuard<'a> {
        let stripe = self.stripes[(hash & self.stripe_mask) as usize].lock();
        let tables = self.tables.read();
        BucketGuard {
            owner: self,
            alloc,
            tables,
            _stripe: stripe,
            hash,
        }
    }

    /// Start and advance expansion as needed. Call with no locks held.
    pub fn housekeep(&self, alloc: &SlabAllocator) {
        if self.want_expand.swap(false, Ordering::Relaxed) {
            self.start_expand();
        }
        if self.is_expanding() {
            self.migrate(MIGRATE_BATCH, alloc);
        }
    }

    fn start_expand(&self) {
        let mut tables = self.tables.write();
        if tables.old.is_some() {
            return;
        }
        let old_len = tables.primary.len();
        let next = new_buckets(old_len * 2);
        let old = std::mem::replace(&mut tables.primary, next);
        tables.old = Some((old, tables.mask));
        tables.mask = (old_len * 2 - 1) as u64;
        self.expand_bucket.store(0, Ordering::Release);
        self.expanding.store(true, Ordering::Relaxed);
        tracing::debug!(buckets = old_len * 2, "hash table expansion started");
    }

    /// Migrate up to `batch` old-table buckets into the primary.
    fn migrate(&self, batch: usize, alloc: &SlabAllocator) {
        let _serial = self.migrate_lock.lock();
        let mut finished = false;

        for _ in 0..batch {
            let bucket = self.expand_bucket.load(Ordering::Acquire);
            let stripe = self.stripes[(bucket as u64 & self.stripe_mask) as usize].lock();
            let tables = self.tables.read();
            let Some((old, old_mask)) = tables.old.as_ref() else {
                return;
            };
            let old_len = (*old_mask + 1) as usize;
            if bucket >= old_len {
                finished = true;
                break;
            }

            // Move the whole chain; each item rehashes into the doubled
            // table under the stripe that covers both target buckets.
            let mut cur = old[bucket].swap(RAW_NONE, Ordering::AcqRel);
            while cur != RAW_NONE {
                // SAFETY: chain links reference live, linked items.
                let header = unsafe { alloc.header(Location::from_raw(cur)) };
                let next = header.hash_next();
                let idx = (self.hash(header.key()) & tables.mask) as usize;
                header.set_hash_next(tables.primary[idx].load(Ordering::Acquire));
                tables.primary[idx].store(cur, Ordering::Release);
                cur = next;
            }

            self.expand_bucket.store(bucket + 1, Ordering::Release);
            let done = bucket + 1 >= old_len;
            drop(tables);
            drop(stripe);
            if done {
                finished = true;
                break;
            }
        }

        if finished {
            let mut tables = self.tables.write();
            let drained = match &tables.old {
                Some((_, old_mask)) => {
                    self.expand_bucket.load(Ordering::Acquire) >= (*old_mask + 1) as usize
                }
                None => false,
            };
            if drained {
                tables.old = None;
                self.expanding.store(false, Ordering::Relaxed);
                tracing::debug!(
                    buckets = tables.primary.len(),
                    "hash table expansion finished"
                );
            }
        }
    }
}

/// Exclusive access to one bucket's chain.
pub(crate) struct BucketGuard<'a> {
    owner: &'a ItemTable,
    alloc: &'a SlabAllocator,
    tables: RwLockReadGuard<'a, Tables>,
    _stripe: parking_lot::MutexGuard<'a, ()>,
    hash: u64,
}

impl<'a> BucketGuard<'a> {
    fn slot(&self) -> &AtomicU64 {
        if let Some((old, old_mask)) = &self.tables.old {
            let ob = (self.hash & old_mask) as usize;
            if ob >= self.owner.expand_bucket.load(Ordering::Acquire) {
                return &old[ob];
            }
        }
        &self.tables.primary[(self.hash & self.tables.mask) as usize]
    }

    /// Find a key's item. Expired and flushed items are still returned;
    /// liveness is the caller's policy.
    pub fn find(&self, key: &[u8]) -> Option<(Location, &'a ItemHeader)> {
        let mut cur = self.slot().load(Ordering::Acquire);
        while cur != RAW_NONE {
            let loc = Location::from_raw(cur);
            // SAFETY: chain links reference live, linked items.
            let header = unsafe { self.alloc.header(loc) };
            if header.key() == key {
                return Some((loc, header));
            }
            cur = header.hash_next();
        }
        None
    }

    /// Push an item at the head of the chain.
    ///
    /// The caller is responsible for key uniqueness (remove any existing
    /// item for the same key first).
    pub fn insert(&self, loc: Location, header: &ItemHeader) {
        let slot = self.slot();
        header.set_hash_next(slot.load(Ordering::Acquire));
        slot.store(loc.to_raw(), Ordering::Release);

        let count = self.owner.count.fetch_add(1, Ordering::Relaxed) + 1;
        if self.tables.old.is_none() {
            let buckets = self.tables.mask + 1;
            if count * GROWTH_DENOMINATOR > buckets * GROWTH_NUMERATOR {
                self.owner.want_expand.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Remove an item from the chain. Returns whether it was found.
    pub fn remove(&self, loc: Location) -> bool {
        let raw = loc.to_raw();
        let slot = self.slot();
        let mut cur = slot.load(Ordering::Acquire);

        if cur == raw {
            // SAFETY: chain links reference live, linked items.
            let removed = unsafe { self.alloc.header(loc) };
            slot.store(removed.hash_next(), Ordering::Release);
            removed.set_hash_next(RAW_NONE);
            self.owner.count.fetch_sub(1, Ordering::Relaxed);
            return true;
        }

        while cur != RAW_NONE {
            // SAFETY: chain links reference live, linked items.
            let header = unsafe { self.alloc.header(Location::from_raw(cur)) };
            let next = header.hash_next();
            if next == raw {
                // SAFETY: as above.
                let removed = unsafe { self.alloc.header(loc) };
                header.set_hash_next(removed.hash_next());
                removed.set_hash_next(RAW_NONE);
                self.owner.count.fetch_sub(1, Ordering::Relaxed);
                return true;
            }
            cur = next;
        }
        false
    }
}
