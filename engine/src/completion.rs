//! Deferred completion: the WouldBlock / notify contract.
//!
//! When an operation cannot proceed without waiting (every eviction
//! candidate pinned by outstanding references), the engine parks the
//! cookie here, returns `WouldBlock`, and lets the maintenance thread
//! retry the reclaim off the I/O path. Once the retry resolves, the
//! front-end is told exactly once through `notify_io_complete` and
//! re-drives the request. Cancelled cookies are simply forgotten; their
//! notification is suppressed.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use cache_core::{Cookie, Status};

use crate::engine::EngineShared;
use crate::eviction::{self, Reclaim};
use crate::stats;

/// Reclaim retries before the deferred operation reports out-of-memory.
const DEFER_RETRIES: usize = 50;

/// Pause between deferred reclaim retries.
const DEFER_RETRY_PAUSE: Duration = Duration::from_millis(5);

pub(crate) enum Task {
    Reclaim { cookie: Cookie, class_id: u8 },
    Shutdown,
}

/// Deferred-operation bookkeeping shared between request threads and the
/// maintenance worker.
pub(crate) struct Completions {
    tx: Sender<Task>,
    pending: Mutex<HashSet<Cookie>>,
}

impl Completions {
    pub fn new() -> (Self, Receiver<Task>) {
        let (tx, rx) = unbounded();
        (
            Self {
                tx,
                pending: Mutex::new(HashSet::new()),
            },
            rx,
        )
    }

    /// Park a cookie and queue a reclaim retry for it.
    ///
    /// Returns `false` when the cookie was already parked (a re-drive
    /// raced the pending notification); no second task is queued and
    /// exactly one notification remains outstanding.
    pub fn defer(&self, cookie: Cookie, class_id: u8) -> bool {
        if !self.pending.lock().insert(cookie) {
            return false;
        }
        let _ = self.tx.send(Task::Reclaim { cookie, class_id });
        true
    }

    /// Discard a parked cookie (connection went away). Returns whether it
    /// was pending; its notification will not be delivered.
    pub fn forget(&self, cookie: Cookie) -> bool {
        self.pending.lock().remove(&cookie)
    }

    /// Claim a parked cookie for notification. Returns `false` when it
    /// was cancelled in the meantime.
    fn claim(&self, cookie: Cookie) -> bool {
        self.pending.lock().remove(&cookie)
    }

    /// Ask the worker to exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Task::Shutdown);
    }
}

/// Maintenance worker body: retries deferred reclaims and delivers
/// completions.
pub(crate) fn run_worker(shared: Weak<EngineShared>, rx: Receiver<Task>) {
    loop {
        let task = match rx.recv() {
            Ok(task) => task,
            Err(_) => return,
        };
        let (cookie, class_id) = match task {
            Task::Shutdown => return,
            Task::Reclaim { cookie, class_id } => (cookie, class_id),
        };

        let mut status = Status::OutOfMemory;
        for _ in 0..DEFER_RETRIES {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let Some(core) = shared.core_opt() else {
                return;
            };
            if core.stopping() {
                return;
            }
            match eviction::reclaim(core, class_id) {
                Reclaim::Freed => {
                    status = Status::Success;
                    break;
                }
                Reclaim::NoVictim { .. } => {}
            }
            drop(shared);
            std::thread::sleep(DEFER_RETRY_PAUSE);
        }

        let Some(shared) = shared.upgrade() else {
            return;
        };
        if let Some(core) = shared.core_opt() {
            if core.completions.claim(cookie) {
                stats::incr(&core.stats.notifications);
                tracing::debug!(?cookie, ?status, "deferred operation complete");
                shared.server().notify_io_complete(cookie, status);
            }
        }
    }
}

/// Spawn the maintenance worker for an engine.
pub(crate) fn spawn_worker(
    shared: &Arc<EngineShared>,
    rx: Receiver<Task>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    let weak = Arc::downgrade(shared);
    std::thread::Builder::new()
        .name("cache-maint".into())
        .spawn(move || run_worker(weak, rx))
}
