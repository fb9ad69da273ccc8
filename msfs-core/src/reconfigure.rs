//! Reconfiguration Driver (spec.md §4.5) — accepts a new backend set,
//! diffs it against the running one, and quiesces/reclaims removed
//! backends without blocking request handlers for more than the brief
//! critical sections spec.md §5 allows.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};

use crate::backend::BackendId;
use crate::cache::CacheLineState;
use crate::config::BackendSpec;
use crate::driver::BackendDriver;
use crate::runtime::Runtime;

/// Constructs a [`BackendDriver`] from a [`BackendSpec`]'s `driver` tag.
/// Kept as a trait so `msfs-core` never depends on `msfs-backend`'s
/// concrete drivers (mirrors the narrow `BackendDriver` boundary spec.md
/// §6.1 draws around the core's *own* collaborators).
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Build a driver context for `spec`. Construction failure (bad
    /// credentials, unreachable endpoint, unknown `driver` tag, ...) is
    /// reported as a plain message; the reload driver logs it and skips
    /// the backend rather than aborting the whole reload (spec.md §4.5
    /// step 3).
    async fn build(&self, spec: &BackendSpec) -> Result<Arc<dyn BackendDriver>, String>;
}

/// Outcome of one [`ReconfigurationDriver::reload`] call, for logging and
/// (optionally) surfacing to an operator.
#[derive(Debug, Default, Clone)]
pub struct ReloadReport {
    /// `dir_name`s newly registered this reload.
    pub added: Vec<String>,
    /// `dir_name`s torn down this reload.
    pub removed: Vec<String>,
    /// `dir_name`s present before and after, left untouched (spec.md §4.5
    /// step 2, §9 "Reconfigure-modify": config differences are not
    /// applied to an already-registered backend).
    pub kept: Vec<String>,
    /// `dir_name`s whose construction failed this reload, with a message.
    pub failed: Vec<(String, String)>,
}

/// Drives spec.md §4.5's add/remove/keep diff and the quiesce-then-reclaim
/// sequence for removed backends. Runs one reload at a time; the caller
/// (the `msfs` binary's signal/timer trigger) is responsible for not
/// overlapping calls, per spec.md §4.5: "the entire reload runs in a
/// single worker (not concurrent with other reloads)".
pub struct ReconfigurationDriver {
    runtime: Arc<Runtime>,
}

impl ReconfigurationDriver {
    /// Build a driver bound to `runtime`.
    pub fn new(runtime: Arc<Runtime>) -> Self {
        ReconfigurationDriver { runtime }
    }

    /// Apply `desired` as the new backend set (spec.md §4.5).
    pub async fn reload(
        &self,
        desired: &[BackendSpec],
        factory: &dyn DriverFactory,
    ) -> ReloadReport {
        let mut report = ReloadReport::default();

        let (to_add, to_remove): (Vec<BackendSpec>, Vec<String>) = {
            let state = self.runtime.state.lock();
            let existing: HashSet<String> = state
                .backends
                .list()
                .into_iter()
                .map(|b| b.spec.dir_name.clone())
                .collect();
            let desired_names: HashSet<String> =
                desired.iter().map(|s| s.dir_name.clone()).collect();

            let to_add = desired
                .iter()
                .filter(|s| !existing.contains(&s.dir_name))
                .cloned()
                .collect::<Vec<_>>();
            let to_remove = existing
                .difference(&desired_names)
                .cloned()
                .collect::<Vec<_>>();
            report.kept = existing.intersection(&desired_names).cloned().collect();
            (to_add, to_remove)
        };

        // Remove first: frees capacity (inodes, cache lines, the
        // dir_name itself) before anything new is registered. Spec.md
        // imposes no ordering requirement between add and remove, but
        // this avoids transient `AlreadyExists` surprises if an operator
        // removes and re-adds a `dir_name` with a new config in the same
        // reload.
        for dir_name in &to_remove {
            self.remove_one(dir_name).await;
            report.removed.push(dir_name.clone());
            info!("reload: removed backend '{dir_name}'");
        }

        for spec in to_add {
            let dir_name = spec.dir_name.clone();
            match factory.build(&spec).await {
                Ok(driver) => {
                    let mut state = self.runtime.state.lock();
                    match state.backends.register(spec, driver) {
                        Ok(_) => {
                            report.added.push(dir_name.clone());
                            info!("reload: added backend '{dir_name}'");
                        }
                        Err(err) => {
                            warn!("reload: failed to register backend '{dir_name}': {err}");
                            report.failed.push((dir_name, err.to_string()));
                        }
                    }
                }
                Err(message) => {
                    warn!("reload: failed to construct backend '{dir_name}': {message}");
                    report.failed.push((dir_name, message));
                }
            }
        }

        report
    }

    /// Two-phase removal of one backend (spec.md §4.5 step 4): mark
    /// draining, reclaim dependent inode/cache-line state, wait for
    /// in-flight fetches to drain, then destroy the driver context.
    async fn remove_one(&self, dir_name: &str) {
        let id: BackendId = {
            let mut state = self.runtime.state.lock();
            let Some(id) = state.backends.mark_draining(dir_name) else {
                return;
            };

            // Walk the inode table and detach every inode bound to this
            // backend. Any Clean line among them is removed from the
            // clean-LRU right here. An Inbound line's completing fetch
            // will find its inode gone (cache.rs `run_fetch`) and is
            // unable to attribute its own decrement to this backend, so
            // that decrement happens here instead, atomically with the
            // removal (spec.md invariant 6, §4.5 step 4b/4c). It also
            // can no longer reach its own `notify_waiters()` call once
            // the inode is gone, so any reader already waiting on that
            // line's `Notify` would otherwise hang forever; fire it here
            // instead, while the `CacheLine` (and the only remaining
            // handle to its `Notify`) is still in hand (spec.md
            // invariant 4: every waiter is notified exactly once). The
            // woken reader re-checks `state.inodes` and gets `NotFound`.
            let removed = state.inodes.remove_backend(id);
            let mut inbound_detached: i64 = 0;
            for inode in &removed {
                for (&line_no, line) in &inode.lines {
                    match line.state {
                        CacheLineState::Clean => {
                            state.clean_lru.pop(&(inode.ino, line_no));
                        }
                        CacheLineState::Inbound => {
                            inbound_detached += 1;
                            line.notify.notify_waiters();
                        }
                        CacheLineState::Outbound | CacheLineState::Dirty => {
                            unreachable!("unreachable in read-only mode")
                        }
                    }
                }
            }
            if inbound_detached > 0 {
                state.backends.adjust_inbound(id, -inbound_detached);
            }

            id
        };

        // Wait for every fetch already in flight against this backend to
        // complete (spec.md §4.5 step 4c, §5 "condition variable that
        // signals inbound_count == 0"). Registration and the zero-check
        // happen under the same lock acquisition each iteration, so a
        // decrement can never land in the gap between checking and
        // waiting (spec.md invariant 4's notify-exactly-once discipline,
        // applied here to backend drain rather than a single line).
        loop {
            let rx = {
                let mut state = self.runtime.state.lock();
                state.backends.await_inbound_drained(id)
            };
            match rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => break,
            }
        }

        let mut state = self.runtime.state.lock();
        if let Some(backend) = state.backends.finish_removal(id) {
            // Dropping `backend` here drops its `Arc<dyn BackendDriver>`
            // reference; if this was the last one, the driver context is
            // destroyed now, after every dependent inode and cache line
            // was reclaimed and no fetch remains in flight (spec.md
            // invariant 6, P6).
            drop(backend);
        }
    }
}
