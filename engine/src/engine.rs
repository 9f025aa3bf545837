//! The engine proper: operation bodies over the table and the allocator.
//!
//! Mutation is copy-replace: every successful store, concatenation, or
//! arithmetic commits a freshly built item and unlinks the old one.
//! Outstanding read guards therefore always see a consistent snapshot,
//! and an item's CAS stamp never changes once it is linked.
//!
//! Lock order everywhere: bucket stripe, then class. The read-modify-write
//! operations (append/prepend/arithmetic) never allocate under a bucket
//! lock; they snapshot, build, then re-take the lock and verify the CAS
//! stamp is unchanged before committing.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use cache_core::numeric::{format_u64, parse_ascii_u64};
use cache_core::{
    BinaryRequestHeader, Clock, Cookie, EngineError, EngineResult, Response, ServerApi,
    StoreOperation,
};
use cache_slab::{HEADER_SIZE, ItemHeader, KEY_MAX, Location, SlabAllocator};

use crate::assoc::{BucketGuard, ItemTable};
use crate::completion::{self, Completions};
use crate::config::EngineConfig;
use crate::eviction::{self, Reclaim};
use crate::interface::EngineV1;
use crate::item::ItemHandle;
use crate::stats::{self, EngineStats};

/// A successful get bumps its item to MRU at most once per window.
pub(crate) const BUMP_WINDOW_SECS: u32 = 60;

/// Reclaim passes an allocation attempt runs before reporting
/// out-of-memory.
const RECLAIM_ATTEMPTS: usize = 5;

/// Retries for the optimistic read-modify-write loops. Generous: a retry
/// only happens when another mutation of the same key committed first.
const RMW_RETRIES: usize = 64;

/// The slab cache engine.
///
/// Cheap to clone; all clones share one instance. Obtained through
/// [`crate::create_instance`].
#[derive(Clone)]
pub struct SlabEngine {
    pub(crate) shared: Arc<EngineShared>,
}

/// State shared between the engine, its item handles, and its threads.
pub(crate) struct EngineShared {
    server: Arc<dyn ServerApi>,
    state: OnceLock<Core>,
    destroyed: AtomicBool,
}

impl EngineShared {
    #[inline]
    pub(crate) fn core_opt(&self) -> Option<&Core> {
        self.state.get()
    }

    #[inline]
    pub(crate) fn server(&self) -> &dyn ServerApi {
        self.server.as_ref()
    }

    fn stop_threads(&self) {
        if let Some(core) = self.core_opt() {
            core.stop.store(true, Ordering::Release);
            core.completions.shutdown();
            let handles = mem::take(&mut *core.threads.lock());
            let current = std::thread::current().id();
            for handle in handles {
                // An engine thread can run the final teardown itself (it
                // briefly upgrades the shared state); it must not join
                // its own handle.
                if handle.thread().id() == current {
                    continue;
                }
                let _ = handle.join();
            }
        }
    }
}

impl Drop for EngineShared {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

/// Live engine state, built by `initialize`.
pub(crate) struct Core {
    pub(crate) config: EngineConfig,
    pub(crate) clock: Clock,
    pub(crate) alloc: SlabAllocator,
    pub(crate) table: ItemTable,
    pub(crate) stats: EngineStats,
    pub(crate) completions: Completions,
    /// Process-wide version counter; every commit advances it.
    cas_counter: AtomicU64,
    /// Items with a stamp at or below this are flush-invisible.
    flush_cas: AtomicU64,
    /// Scheduled flush horizon in relative time; 0 = none armed.
    flush_horizon: AtomicU32,
    stop: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Core {
    #[inline]
    pub(crate) fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    #[inline]
    fn next_cas(&self) -> u64 {
        self.cas_counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    fn report_cas(&self, cas: u64) -> u64 {
        if self.config.cas_enabled { cas } else { 0 }
    }

    /// Whether a flush makes this item invisible.
    pub(crate) fn is_flushed(&self, header: &ItemHeader, now: u32) -> bool {
        let fence = self.flush_cas.load(Ordering::Acquire);
        if fence != 0 && header.cas() != 0 && header.cas() <= fence {
            return true;
        }
        let horizon = self.flush_horizon.load(Ordering::Acquire);
        horizon != 0 && now >= horizon && header.created() < horizon
    }

    #[inline]
    fn is_live(&self, header: &ItemHeader, now: u32) -> bool {
        !header.is_expired(now) && !self.is_flushed(header, now)
    }

    /// Unlink an item under its bucket lock: chain, LRU, accounting, and
    /// the chunk itself if nothing still references it.
    pub(crate) fn unlink_under_bucket(
        &self,
        bucket: &BucketGuard<'_>,
        loc: Location,
        header: &ItemHeader,
    ) {
        bucket.remove(loc);
        if let Some(class) = self.alloc.class(loc.class_id()) {
            class.lru_remove(loc);
            class.remove_item(header.total_size());
        }
        if header.clear_linked() {
            self.alloc.release(loc);
        }
    }

    /// Unlink an expired or flushed leftover and account the reap.
    pub(crate) fn reap_dead(&self, bucket: &BucketGuard<'_>, loc: Location, header: &ItemHeader) {
        self.unlink_under_bucket(bucket, loc, header);
        if let Some(class) = self.alloc.class(loc.class_id()) {
            class.record_reclaimed();
        }
        stats::incr(&self.stats.reclaimed);
    }

    /// Publish a detached item under its bucket lock.
    fn link_new(&self, bucket: &BucketGuard<'_>, loc: Location, header: &ItemHeader) {
        header.set_linked();
        bucket.insert(loc, header);
        if let Some(class) = self.alloc.class(loc.class_id()) {
            class.lru_insert(loc);
            class.add_item(header.total_size());
        }
        stats::incr(&self.stats.total_items);
    }

    /// Free a detached item built internally (never handed to a caller).
    fn discard_detached(&self, loc: Location, header: &ItemHeader) {
        if header.release_ref() {
            self.alloc.release(loc);
        }
    }

    /// Get a chunk, evicting if allowed and necessary. Returns
    /// `WouldBlock` after parking the cookie when every candidate is
    /// pinned and deferral is enabled.
    fn acquire_or_reclaim(&self, cookie: Cookie, class_id: u8) -> EngineResult<Location> {
        if let Some(loc) = self.alloc.acquire(class_id) {
            return Ok(loc);
        }
        if !self.config.eviction {
            stats::incr(&self.stats.out_of_memory);
            return Err(EngineError::OutOfMemory);
        }
        for _ in 0..RECLAIM_ATTEMPTS {
            match eviction::reclaim(self, class_id) {
                Reclaim::Freed => {
                    if let Some(loc) = self.alloc.acquire(class_id) {
                        return Ok(loc);
                    }
                }
                Reclaim::NoVictim { pinned } => {
                    if pinned && self.config.defer_reclaim {
                        if self.completions.defer(cookie, class_id) {
                            stats::incr(&self.stats.deferred);
                        }
                        return Err(EngineError::WouldBlock);
                    }
                    break;
                }
            }
        }
        stats::incr(&self.stats.out_of_memory);
        Err(EngineError::OutOfMemory)
    }
}

fn validate_key(key: &[u8]) -> EngineResult<()> {
    if key.is_empty() || key.len() > KEY_MAX {
        return Err(EngineError::InvalidArguments);
    }
    Ok(())
}

impl SlabEngine {
    pub(crate) fn new(server: Arc<dyn ServerApi>) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                server,
                state: OnceLock::new(),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    fn core(&self) -> EngineResult<&Core> {
        if self.shared.destroyed.load(Ordering::Acquire) {
            return Err(EngineError::Failed);
        }
        self.shared.core_opt().ok_or(EngineError::Failed)
    }

    /// ADD / SET / REPLACE / CAS: the incoming detached item becomes the
    /// stored item.
    fn store_simple(
        &self,
        core: &Core,
        item: &ItemHandle,
        operation: StoreOperation,
    ) -> EngineResult<u64> {
        // SAFETY: the handle keeps the detached item's chunk alive.
        let new_header = unsafe { core.alloc.header(item.location()) };
        let key = new_header.key();

        let bucket = core.table.bucket(core.table.hash(key), &core.alloc);
        let now = core.clock.now();
        let existing = bucket.find(key);
        let existing_live = existing.filter(|(_, header)| core.is_live(header, now));

        match operation {
            StoreOperation::Add => {
                if existing_live.is_some() {
                    return Err(EngineError::NotStored);
                }
            }
            StoreOperation::Replace => {
                if existing_live.is_none() {
                    if let Some((loc, header)) = existing {
                        core.reap_dead(&bucket, loc, header);
                    }
                    return Err(EngineError::NotStored);
                }
            }
            StoreOperation::Cas => match existing_live {
                None => {
                    if let Some((loc, header)) = existing {
                        core.reap_dead(&bucket, loc, header);
                    }
                    stats::incr(&core.stats.cas_misses);
                    return Err(EngineError::KeyNotFound);
                }
                Some((_, header)) => {
                    if header.cas() != new_header.cas() {
                        stats::incr(&core.stats.cas_badval);
                        return Err(EngineError::KeyExists);
                    }
                    stats::incr(&core.stats.cas_hits);
                }
            },
            _ => {}
        }

        // Displace whatever occupies the key: the live predecessor or a
        // dead leftover.
        if let Some((old_loc, old_header)) = existing {
            if core.is_live(old_header, now) {
                core.unlink_under_bucket(&bucket, old_loc, old_header);
            } else {
                core.reap_dead(&bucket, old_loc, old_header);
            }
        }

        let cas = core.next_cas();
        new_header.set_cas(cas);
        new_header.set_created(now);
        core.link_new(&bucket, item.location(), new_header);
        stats::incr(&core.stats.cmd_set);
        Ok(core.report_cas(cas))
    }

    /// APPEND / PREPEND: build a combined item and swap it in if the
    /// predecessor is unchanged.
    fn store_concat(
        &self,
        core: &Core,
        cookie: Cookie,
        item: &ItemHandle,
        operation: StoreOperation,
    ) -> EngineResult<u64> {
        // SAFETY: the handle keeps the detached delta item alive.
        let delta = unsafe { core.alloc.header(item.location()) };
        let key = delta.key();
        let hash = core.table.hash(key);

        for _ in 0..RMW_RETRIES {
            // Snapshot the predecessor.
            let snapshot = {
                let bucket = core.table.bucket(hash, &core.alloc);
                let now = core.clock.now();
                match bucket.find(key) {
                    Some((_, header)) if core.is_live(header, now) => Some((
                        header.cas(),
                        header.flags(),
                        header.exptime(),
                        header.value().to_vec(),
                    )),
                    _ => None,
                }
            };
            let Some((old_cas, flags, exptime, old_value)) = snapshot else {
                return Err(EngineError::NotStored);
            };

            let new_len = old_value.len() + delta.value_len();
            if new_len > core.config.item_size_max {
                return Err(EngineError::TooBig);
            }
            let class_id = core
                .alloc
                .select_class(HEADER_SIZE + key.len() + new_len)
                .ok_or(EngineError::TooBig)?;

            // Build the combined item with no bucket lock held.
            let loc = core.acquire_or_reclaim(cookie, class_id)?;
            let now = core.clock.now();
            // SAFETY: loc is a freshly acquired chunk, exclusively ours.
            let new_header =
                unsafe { core.alloc.init_item(loc, key, new_len, flags, exptime, now) };
            {
                // SAFETY: still detached and exclusively ours.
                let value = unsafe { core.alloc.value_mut(loc) };
                if operation == StoreOperation::Append {
                    value[..old_value.len()].copy_from_slice(&old_value);
                    value[old_value.len()..].copy_from_slice(delta.value());
                } else {
                    value[..delta.value_len()].copy_from_slice(delta.value());
                    value[delta.value_len()..].copy_from_slice(&old_value);
                }
            }

            // Commit only against the snapshot we concatenated with.
            let bucket = core.table.bucket(hash, &core.alloc);
            match bucket.find(key) {
                Some((cur_loc, cur_header)) if cur_header.cas() == old_cas => {
                    core.unlink_under_bucket(&bucket, cur_loc, cur_header);
                    let cas = core.next_cas();
                    new_header.set_cas(cas);
                    new_header.set_created(core.clock.now());
                    core.link_new(&bucket, loc, new_header);
                    stats::incr(&core.stats.cmd_set);
                    return Ok(core.report_cas(cas));
                }
                _ => core.discard_detached(loc, new_header),
            }
        }

        tracing::warn!("concatenation retries exhausted");
        Err(EngineError::Failed)
    }
}

impl EngineV1 for SlabEngine {
    fn get_info(&self) -> &'static str {
        concat!("Slab cache engine v", env!("CARGO_PKG_VERSION"))
    }

    fn initialize(&self, config_str: &str) -> EngineResult<()> {
        if self.shared.destroyed.load(Ordering::Acquire) || self.shared.core_opt().is_some() {
            return Err(EngineError::Failed);
        }

        let config = EngineConfig::parse(config_str)?;
        let slab_config = config.slab_config();
        if slab_config.page_budget() == 0 {
            return Err(EngineError::OutOfMemory);
        }
        let alloc = SlabAllocator::new(&slab_config).map_err(|_| EngineError::OutOfMemory)?;
        let table = ItemTable::new(config.hash_power);
        let (completions, rx) = Completions::new();

        let core = Core {
            config,
            clock: Clock::new(),
            alloc,
            table,
            stats: EngineStats::new(),
            completions,
            cas_counter: AtomicU64::new(0),
            flush_cas: AtomicU64::new(0),
            flush_horizon: AtomicU32::new(0),
            stop: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        };
        if self.shared.state.set(core).is_err() {
            return Err(EngineError::Failed);
        }
        let Some(core) = self.shared.core_opt() else {
            return Err(EngineError::Failed);
        };

        let ticker = {
            let weak = Arc::downgrade(&self.shared);
            std::thread::Builder::new()
                .name("cache-clock".into())
                .spawn(move || run_ticker(weak))
                .map_err(|_| EngineError::Failed)?
        };
        let worker = completion::spawn_worker(&self.shared, rx).map_err(|_| EngineError::Failed)?;
        core.threads.lock().extend([ticker, worker]);

        tracing::info!(
            cache_size = core.config.cache_size,
            item_size_max = core.config.item_size_max,
            classes = core.alloc.classes().len(),
            eviction = core.config.eviction,
            "engine initialized"
        );
        Ok(())
    }

    fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.stop_threads();
        tracing::info!("engine destroyed");
    }

    fn allocate(
        &self,
        cookie: Cookie,
        key: &[u8],
        nbytes: usize,
        flags: u32,
        exptime: u32,
    ) -> EngineResult<ItemHandle> {
        let core = self.core()?;
        validate_key(key)?;
        if nbytes > core.config.item_size_max {
            return Err(EngineError::TooBig);
        }
        let class_id = core
            .alloc
            .select_class(HEADER_SIZE + key.len() + nbytes)
            .ok_or(EngineError::TooBig)?;
        let loc = core.acquire_or_reclaim(cookie, class_id)?;
        let now = core.clock.now();
        // SAFETY: loc is a freshly acquired chunk, exclusively ours.
        unsafe {
            core.alloc.init_item(loc, key, nbytes, flags, exptime, now);
        }
        Ok(ItemHandle::new(self.shared.clone(), loc))
    }

    fn remove(&self, _cookie: Cookie, item: &ItemHandle) -> EngineResult<()> {
        let core = self.core()?;
        if !item.same_engine(&self.shared) {
            return Err(EngineError::InvalidArguments);
        }
        // SAFETY: the handle keeps the item's chunk alive.
        let header = unsafe { core.alloc.header(item.location()) };
        let bucket = core.table.bucket(core.table.hash(header.key()), &core.alloc);
        match bucket.find(header.key()) {
            Some((loc, found)) if loc == item.location() => {
                core.unlink_under_bucket(&bucket, loc, found);
                Ok(())
            }
            _ => Err(EngineError::KeyNotFound),
        }
    }

    fn get(&self, _cookie: Cookie, key: &[u8]) -> EngineResult<ItemHandle> {
        let core = self.core()?;
        validate_key(key)?;
        stats::incr(&core.stats.cmd_get);

        let bucket = core.table.bucket(core.table.hash(key), &core.alloc);
        let now = core.clock.now();
        let Some((loc, header)) = bucket.find(key) else {
            stats::incr(&core.stats.get_misses);
            return Err(EngineError::KeyNotFound);
        };

        if !core.is_live(header, now) {
            // Lazy expiry: unlink on the way out.
            core.reap_dead(&bucket, loc, header);
            stats::incr(&core.stats.get_misses);
            return Err(EngineError::KeyNotFound);
        }

        if !header.try_acquire_ref() {
            stats::incr(&core.stats.get_misses);
            return Err(EngineError::KeyNotFound);
        }

        // Bump to MRU, suppressed within the window to keep the class
        // lock off the hot path.
        if now.wrapping_sub(header.last_bump()) > BUMP_WINDOW_SECS {
            if let Some(class) = core.alloc.class(loc.class_id()) {
                class.lru_bump(loc);
                header.set_last_bump(now);
            }
        }

        stats::incr(&core.stats.get_hits);
        Ok(ItemHandle::new(self.shared.clone(), loc))
    }

    fn store(
        &self,
        cookie: Cookie,
        item: &ItemHandle,
        operation: StoreOperation,
    ) -> EngineResult<u64> {
        let core = self.core()?;
        if !item.same_engine(&self.shared) {
            return Err(EngineError::InvalidArguments);
        }
        // SAFETY: the handle keeps the detached item's chunk alive.
        let header = unsafe { core.alloc.header(item.location()) };
        if header.is_linked() {
            return Err(EngineError::InvalidArguments);
        }

        let result = match operation {
            StoreOperation::Cas if !core.config.cas_enabled => Err(EngineError::NotSupported),
            StoreOperation::Append | StoreOperation::Prepend => {
                self.store_concat(core, cookie, item, operation)
            }
            _ => self.store_simple(core, item, operation),
        };

        // Opportunistic table housekeeping, off the bucket locks.
        if core.table.wants_housekeeping() {
            core.table.housekeep(&core.alloc);
        }
        result
    }

    fn arithmetic(
        &self,
        cookie: Cookie,
        key: &[u8],
        increment: bool,
        create: bool,
        delta: u64,
        initial: u64,
        exptime: u32,
    ) -> EngineResult<(u64, u64)> {
        let core = self.core()?;
        validate_key(key)?;
        let hash = core.table.hash(key);

        enum Snapshot {
            Present {
                cas: u64,
                flags: u32,
                exptime: u32,
                value: u64,
            },
            Absent,
        }

        for _ in 0..RMW_RETRIES {
            let snapshot = {
                let bucket = core.table.bucket(hash, &core.alloc);
                let now = core.clock.now();
                match bucket.find(key) {
                    Some((_, header)) if core.is_live(header, now) => {
                        let value = parse_ascii_u64(header.value())
                            .ok_or(EngineError::InvalidArguments)?;
                        Snapshot::Present {
                            cas: header.cas(),
                            flags: header.flags(),
                            exptime: header.exptime(),
                            value,
                        }
                    }
                    _ => Snapshot::Absent,
                }
            };

            match snapshot {
                Snapshot::Present {
                    cas: old_cas,
                    flags,
                    exptime: old_exptime,
                    value,
                } => {
                    // Increment wraps at u64; decrement saturates at 0.
                    let result = if increment {
                        value.wrapping_add(delta)
                    } else {
                        value.saturating_sub(delta)
                    };
                    let mut buf = [0u8; 20];
                    let len = format_u64(result, &mut buf);

                    let class_id = core
                        .alloc
                        .select_class(HEADER_SIZE + key.len() + len)
                        .ok_or(EngineError::TooBig)?;
                    let loc = core.acquire_or_reclaim(cookie, class_id)?;
                    let now = core.clock.now();
                    // SAFETY: freshly acquired chunk, exclusively ours.
                    let new_header =
                        unsafe { core.alloc.init_item(loc, key, len, flags, old_exptime, now) };
                    // SAFETY: still detached.
                    unsafe { core.alloc.value_mut(loc) }.copy_from_slice(&buf[..len]);

                    let bucket = core.table.bucket(hash, &core.alloc);
                    match bucket.find(key) {
                        Some((cur_loc, cur_header)) if cur_header.cas() == old_cas => {
                            core.unlink_under_bucket(&bucket, cur_loc, cur_header);
                            let cas = core.next_cas();
                            new_header.set_cas(cas);
                            new_header.set_created(core.clock.now());
                            core.link_new(&bucket, loc, new_header);
                            stats::incr(if increment {
                                &core.stats.incr_hits
                            } else {
                                &core.stats.decr_hits
                            });
                            return Ok((core.report_cas(cas), result));
                        }
                        _ => core.discard_detached(loc, new_header),
                    }
                }
                Snapshot::Absent => {
                    if !create {
                        stats::incr(if increment {
                            &core.stats.incr_misses
                        } else {
                            &core.stats.decr_misses
                        });
                        return Err(EngineError::KeyNotFound);
                    }
                    let mut buf = [0u8; 20];
                    let len = format_u64(initial, &mut buf);
                    let class_id = core
                        .alloc
                        .select_class(HEADER_SIZE + key.len() + len)
                        .ok_or(EngineError::TooBig)?;
                    let loc = core.acquire_or_reclaim(cookie, class_id)?;
                    let now = core.clock.now();
                    // SAFETY: freshly acquired chunk, exclusively ours.
                    let new_header =
                        unsafe { core.alloc.init_item(loc, key, len, 0, exptime, now) };
                    // SAFETY: still detached.
                    unsafe { core.alloc.value_mut(loc) }.copy_from_slice(&buf[..len]);

                    let bucket = core.table.bucket(hash, &core.alloc);
                    let now = core.clock.now();
                    match bucket.find(key) {
                        Some((_, header)) if core.is_live(header, now) => {
                            // Lost the vivification race; retry against
                            // the winner's value.
                            core.discard_detached(loc, new_header);
                        }
                        leftover => {
                            if let Some((dead_loc, dead_header)) = leftover {
                                core.reap_dead(&bucket, dead_loc, dead_header);
                            }
                            let cas = core.next_cas();
                            new_header.set_cas(cas);
                            new_header.set_created(now);
                            core.link_new(&bucket, loc, new_header);
                            stats::incr(if increment {
                                &core.stats.incr_hits
                            } else {
                                &core.stats.decr_hits
                            });
                            return Ok((core.report_cas(cas), initial));
                        }
                    }
                }
            }
        }

        tracing::warn!("arithmetic retries exhausted");
        Err(EngineError::Failed)
    }

    fn flush(&self, _cookie: Cookie, when: i64) -> EngineResult<()> {
        let core = self.core()?;
        stats::incr(&core.stats.cmd_flush);
        if when == 0 {
            // Everything committed up to this point becomes invisible;
            // the version fence is exact even within one clock tick.
            let fence = core.cas_counter.load(Ordering::Acquire);
            core.flush_cas.fetch_max(fence, Ordering::AcqRel);
            tracing::info!(fence, "immediate flush");
        } else {
            let horizon = core.clock.realtime(when);
            core.flush_horizon.store(horizon, Ordering::Release);
            tracing::info!(horizon, "scheduled flush");
        }
        Ok(())
    }

    fn get_stats(
        &self,
        cookie: Cookie,
        stat_key: &[u8],
        add_stat: &mut dyn FnMut(&[u8], &[u8], Cookie),
    ) -> EngineResult<()> {
        let core = self.core()?;
        match stat_key {
            b"" => stats::emit_general(core, cookie, add_stat),
            b"slabs" => stats::emit_slabs(core, cookie, add_stat),
            b"items" => stats::emit_items(core, cookie, add_stat),
            b"sizes" => stats::emit_sizes(core, cookie, add_stat),
            b"reset" => core.stats.reset(),
            _ => return Err(EngineError::InvalidArguments),
        }
        Ok(())
    }

    fn reset_stats(&self) {
        if let Some(core) = self.shared.core_opt() {
            core.stats.reset();
        }
    }

    fn unknown_command(
        &self,
        _cookie: Cookie,
        _request: &BinaryRequestHeader,
        _add_response: &mut dyn FnMut(&Response<'_>, Cookie),
    ) -> EngineResult<()> {
        Err(EngineError::NotSupported)
    }

    fn current_time(&self) -> u32 {
        self.shared.core_opt().map_or(0, |core| core.clock.now())
    }

    fn realtime(&self, exptime: i64) -> u32 {
        self.shared
            .core_opt()
            .map_or(0, |core| core.clock.realtime(exptime))
    }

    fn forget_cookie(&self, cookie: Cookie) {
        if let Some(core) = self.shared.core_opt() {
            if core.completions.forget(cookie) {
                tracing::debug!(?cookie, "pending completion discarded");
            }
        }
    }
}

/// Ticker body: refresh the clock and drive table housekeeping about once
/// per second, checking for shutdown every 100ms.
fn run_ticker(weak: Weak<EngineShared>) {
    loop {
        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(100));
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let Some(core) = shared.core_opt() else {
                return;
            };
            if core.stopping() {
                return;
            }
        }
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let Some(core) = shared.core_opt() else {
            return;
        };
        if core.stopping() {
            return;
        }
        core.clock.update();
        core.table.housekeep(&core.alloc);
    }
}
