//! Reclamation: expiry reaping and LRU eviction.
//!
//! `reclaim` walks a class's chain from the LRU end under the class lock,
//! collecting unreferenced candidates: expired or flushed items anywhere
//! in the scanned window, and the least-recently-used live item as the
//! eviction victim. Candidates are then killed one at a time under their
//! bucket lock, where the refcount and identity are re-verified - the
//! class lock is released in between, so anything can have happened.
//! Picking under the class lock and killing under the bucket lock keeps
//! the bucket-before-class order intact.

use smallvec::SmallVec;

use cache_slab::Location;

use crate::engine::Core;
use crate::stats;

/// Chain nodes examined per reclaim pass.
pub(crate) const TAIL_SCAN_DEPTH: usize = 50;

/// Outcome of one reclaim pass.
pub(crate) enum Reclaim {
    /// At least one chunk was returned to the class.
    Freed,
    /// Nothing could be freed. `pinned` reports whether candidates were
    /// skipped because of outstanding references - the transient case the
    /// deferred path retries.
    NoVictim { pinned: bool },
}

struct Candidate {
    loc: Location,
    key: SmallVec<[u8; 64]>,
}

/// Try to make chunks available in `class_id`.
pub(crate) fn reclaim(core: &Core, class_id: u8) -> Reclaim {
    let Some(class) = core.alloc.class(class_id) else {
        return Reclaim::NoVictim { pinned: false };
    };
    let now = core.clock.now();

    let mut candidates: SmallVec<[Candidate; 8]> = SmallVec::new();
    let mut victim: Option<Candidate> = None;
    let mut pinned = false;

    class.walk_tail(TAIL_SCAN_DEPTH, |loc, header| {
        if header.refcount() > 0 {
            pinned = true;
            return true;
        }
        if header.is_expired(now) || core.is_flushed(header, now) {
            candidates.push(Candidate {
                loc,
                key: SmallVec::from_slice(header.key()),
            });
        } else if victim.is_none() {
            victim = Some(Candidate {
                loc,
                key: SmallVec::from_slice(header.key()),
            });
        }
        true
    });

    // Reap the dead first; fall back on the LRU victim.
    candidates.extend(victim);

    let mut freed = false;
    for candidate in candidates {
        let hash = core.table.hash(&candidate.key);
        let bucket = core.table.bucket(hash, &core.alloc);

        // Re-verify under the bucket lock: same location, still
        // unreferenced. References are only acquired under this lock, so
        // the check cannot race.
        let Some((loc, header)) = bucket.find(&candidate.key) else {
            continue;
        };
        if loc != candidate.loc || header.refcount() > 0 {
            continue;
        }

        let dead = header.is_expired(core.clock.now()) || core.is_flushed(header, now);
        core.unlink_under_bucket(&bucket, loc, header);
        if dead {
            class.record_reclaimed();
            stats::incr(&core.stats.reclaimed);
        } else {
            class.record_evicted();
            stats::incr(&core.stats.evictions);
            if core.config.verbose > 0 {
                tracing::debug!(class_id, "evicted LRU item");
            }
        }
        freed = true;
    }

    if freed {
        Reclaim::Freed
    } else {
        Reclaim::NoVictim { pinned }
    }
}
