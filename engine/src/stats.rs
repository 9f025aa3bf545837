//! Operation counters and stat emission.
//!
//! Counters are per-instance atomics so `reset_stats` can zero them
//! without touching live-state gauges (item counts and byte usage are
//! derived from the classes and survive a reset).

use std::sync::atomic::{AtomicU64, Ordering};

use cache_core::Cookie;

use crate::engine::{BUMP_WINDOW_SECS, Core};

/// Counter set for one engine instance.
#[derive(Debug, Default)]
pub(crate) struct EngineStats {
    pub cmd_get: AtomicU64,
    pub get_hits: AtomicU64,
    pub get_misses: AtomicU64,
    pub cmd_set: AtomicU64,
    pub cmd_flush: AtomicU64,
    pub total_items: AtomicU64,
    pub evictions: AtomicU64,
    pub reclaimed: AtomicU64,
    pub out_of_memory: AtomicU64,
    pub cas_hits: AtomicU64,
    pub cas_badval: AtomicU64,
    pub cas_misses: AtomicU64,
    pub incr_hits: AtomicU64,
    pub incr_misses: AtomicU64,
    pub decr_hits: AtomicU64,
    pub decr_misses: AtomicU64,
    pub deferred: AtomicU64,
    pub notifications: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.cmd_get,
            &self.get_hits,
            &self.get_misses,
            &self.cmd_set,
            &self.cmd_flush,
            &self.total_items,
            &self.evictions,
            &self.reclaimed,
            &self.out_of_memory,
            &self.cas_hits,
            &self.cas_badval,
            &self.cas_misses,
            &self.incr_hits,
            &self.incr_misses,
            &self.decr_hits,
            &self.decr_misses,
            &self.deferred,
            &self.notifications,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Bump a counter.
#[inline]
pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn stat(
    add_stat: &mut dyn FnMut(&[u8], &[u8], Cookie),
    cookie: Cookie,
    key: &str,
    value: impl ToString,
) {
    add_stat(key.as_bytes(), value.to_string().as_bytes(), cookie);
}

/// The general stats set.
pub(crate) fn emit_general(
    core: &Core,
    cookie: Cookie,
    add_stat: &mut dyn FnMut(&[u8], &[u8], Cookie),
) {
    let s = &core.stats;
    let curr_items: u64 = core.alloc.classes().iter().map(|c| c.items()).sum();
    let bytes: u64 = core.alloc.classes().iter().map(|c| c.bytes()).sum();

    stat(add_stat, cookie, "curr_items", curr_items);
    stat(add_stat, cookie, "total_items", s.total_items.load(Ordering::Relaxed));
    stat(add_stat, cookie, "bytes", bytes);
    stat(add_stat, cookie, "engine_maxbytes", core.alloc.memory_limit());
    stat(add_stat, cookie, "bytes_allocated", core.alloc.memory_used());
    stat(add_stat, cookie, "cmd_get", s.cmd_get.load(Ordering::Relaxed));
    stat(add_stat, cookie, "get_hits", s.get_hits.load(Ordering::Relaxed));
    stat(add_stat, cookie, "get_misses", s.get_misses.load(Ordering::Relaxed));
    stat(add_stat, cookie, "cmd_set", s.cmd_set.load(Ordering::Relaxed));
    stat(add_stat, cookie, "cmd_flush", s.cmd_flush.load(Ordering::Relaxed));
    stat(add_stat, cookie, "evictions", s.evictions.load(Ordering::Relaxed));
    stat(add_stat, cookie, "reclaimed", s.reclaimed.load(Ordering::Relaxed));
    stat(add_stat, cookie, "out_of_memory", s.out_of_memory.load(Ordering::Relaxed));
    stat(add_stat, cookie, "cas_hits", s.cas_hits.load(Ordering::Relaxed));
    stat(add_stat, cookie, "cas_badval", s.cas_badval.load(Ordering::Relaxed));
    stat(add_stat, cookie, "cas_misses", s.cas_misses.load(Ordering::Relaxed));
    stat(add_stat, cookie, "incr_hits", s.incr_hits.load(Ordering::Relaxed));
    stat(add_stat, cookie, "incr_misses", s.incr_misses.load(Ordering::Relaxed));
    stat(add_stat, cookie, "decr_hits", s.decr_hits.load(Ordering::Relaxed));
    stat(add_stat, cookie, "decr_misses", s.decr_misses.load(Ordering::Relaxed));
    stat(add_stat, cookie, "deferred_ops", s.deferred.load(Ordering::Relaxed));
    stat(add_stat, cookie, "notifications", s.notifications.load(Ordering::Relaxed));
    stat(add_stat, cookie, "hash_items", core.table.len());
    stat(add_stat, cookie, "hash_buckets", core.table.buckets());
    stat(add_stat, cookie, "hash_is_expanding", core.table.is_expanding() as u8);
    stat(add_stat, cookie, "lru_bump_window", BUMP_WINDOW_SECS);
}

/// Per-class slab geometry and occupancy.
pub(crate) fn emit_slabs(
    core: &Core,
    cookie: Cookie,
    add_stat: &mut dyn FnMut(&[u8], &[u8], Cookie),
) {
    let mut active = 0u64;
    for class in core.alloc.classes() {
        if class.pages() == 0 {
            continue;
        }
        active += 1;
        let id = class.class_id();
        stat(add_stat, cookie, &format!("{id}:chunk_size"), class.chunk_size());
        stat(add_stat, cookie, &format!("{id}:chunks_per_page"), class.chunks_per_page());
        stat(add_stat, cookie, &format!("{id}:total_pages"), class.pages());
        stat(add_stat, cookie, &format!("{id}:used_chunks"), class.items());
        stat(add_stat, cookie, &format!("{id}:free_chunks"), class.free_chunks());
    }
    stat(add_stat, cookie, "active_slabs", active);
    stat(add_stat, cookie, "total_malloced", core.alloc.memory_used());
}

/// Per-class item counters.
pub(crate) fn emit_items(
    core: &Core,
    cookie: Cookie,
    add_stat: &mut dyn FnMut(&[u8], &[u8], Cookie),
) {
    for class in core.alloc.classes() {
        if class.items() == 0 && class.evicted() == 0 && class.reclaimed() == 0 {
            continue;
        }
        let id = class.class_id();
        stat(add_stat, cookie, &format!("items:{id}:number"), class.items());
        stat(add_stat, cookie, &format!("items:{id}:evicted"), class.evicted());
        stat(add_stat, cookie, &format!("items:{id}:reclaimed"), class.reclaimed());
    }
}

/// Chunk-size histogram of live items.
pub(crate) fn emit_sizes(
    core: &Core,
    cookie: Cookie,
    add_stat: &mut dyn FnMut(&[u8], &[u8], Cookie),
) {
    for class in core.alloc.classes() {
        let items = class.items();
        if items == 0 {
            continue;
        }
        stat(add_stat, cookie, &format!("{}", class.chunk_size()), items);
    }
}
