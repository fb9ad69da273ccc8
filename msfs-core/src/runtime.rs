//! Shared runtime: the single global lock guarding backend registry, inode
//! table, and clean-LRU (spec.md §5).

use std::collections::HashMap;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::backend::{BackendId, BackendRegistry};
use crate::config::{BackendSpec, CoreConfig};
use crate::driver::BackendDriver;
use crate::inode::InodeTable;

/// Key identifying one cache line in the clean-LRU: `(inode, line_number)`.
pub type LineKey = (u64, u64);

/// All state protected by the single global lock (spec.md §5): the backend
/// registry, the inode table (and therefore every inode's cache-line map),
/// and the clean-LRU ordering.
pub struct State {
    /// Configured backends.
    pub backends: BackendRegistry,
    /// Resolved paths and their cache-line maps.
    pub inodes: InodeTable,
    /// Recency order of `Clean` cache lines; `Inbound` lines are never
    /// present here (spec.md invariant 2).
    ///
    /// Unbounded by construction: `cache_lines` is enforced entirely by
    /// `cache::prune_if_over_capacity`, which evicts `Clean` lines from
    /// both this structure and their owning inode's map together. Giving
    /// the `lru` crate itself a fixed capacity would make it silently
    /// drop entries on `put()` once full, desyncing it from the inode
    /// table's cache maps without our eviction bookkeeping ever running
    /// (invariant 2 would then be violated the moment a backend-imposed
    /// capacity and the crate's own capacity disagreed).
    pub clean_lru: LruCache<LineKey, ()>,
    /// Count of cache lines currently in `Inbound` state across the whole
    /// engine, used for the capacity invariant (spec.md invariant 3 / P3).
    pub inbound_total: u64,
    /// Reference counts of lines a `read()` call currently has in hand
    /// between releasing the lock to await its waiters and re-acquiring it
    /// to copy their bytes out. `prune_if_over_capacity` must not reclaim a
    /// pinned line: a read spanning more lines than `cache_lines` would
    /// otherwise have an earlier line in its own span evicted by a later
    /// one's fetch completing first (spec.md §8 "`cache_lines = 1` still
    /// services arbitrary-size reads ... without deadlock").
    pub pinned: HashMap<LineKey, u32>,
}

impl State {
    fn new() -> Self {
        State {
            backends: BackendRegistry::new(),
            inodes: InodeTable::new(),
            clean_lru: LruCache::unbounded(),
            inbound_total: 0,
            pinned: HashMap::new(),
        }
    }
}

/// Top-level handle to the core's shared state. Cheap to clone (wraps an
/// `Arc` internally is unnecessary here since `Runtime` itself is always
/// held behind an `Arc` by its callers); holds the validated, effectively
/// immutable engine configuration plus the single mutex-protected [`State`].
pub struct Runtime {
    /// Engine configuration. Not reloadable: spec.md §4.5's reload driver
    /// changes the backend *set*, not `cache_line_size`/`cache_lines`.
    pub config: CoreConfig,
    pub(crate) state: Mutex<State>,
}

impl Runtime {
    /// Build a new runtime from validated configuration, with no backends
    /// registered yet.
    pub fn new(config: CoreConfig) -> crate::error::Result<Self> {
        config.validate()?;
        Ok(Runtime {
            config,
            state: Mutex::new(State::new()),
        })
    }

    /// Diagnostic snapshot of the global `Inbound` count (spec.md §5:
    /// "implementations SHOULD surface `inbound_count` for diagnostics").
    pub fn inbound_total(&self) -> u64 {
        self.state.lock().inbound_total
    }

    /// Diagnostic snapshot of the clean-LRU length.
    pub fn clean_count(&self) -> usize {
        self.state.lock().clean_lru.len()
    }

    /// The key of the current least-recently-used `Clean` line, if any.
    /// Diagnostic only; exposed so eviction order is observable without
    /// reaching into `State` directly.
    pub fn least_recently_used_clean_line(&self) -> Option<LineKey> {
        self.state.lock().clean_lru.peek_lru().map(|(k, _)| *k)
    }

    /// Register a backend whose driver context the caller has already
    /// constructed (spec.md §4.1: construction happens before the backend
    /// is made visible). Used directly at startup for the initial backend
    /// set, where a construction failure is fatal to mounting rather than
    /// something to log-and-skip, unlike [`crate::reconfigure`]'s
    /// treatment of `to_add` failures during a live reload.
    pub fn register_backend(
        &self,
        spec: BackendSpec,
        driver: Arc<dyn BackendDriver>,
    ) -> crate::error::Result<BackendId> {
        self.state.lock().backends.register(spec, driver)
    }

    /// Snapshot of currently registered backends' `dir_name`s, in
    /// registration order.
    pub fn backend_names(&self) -> Vec<String> {
        self.state
            .lock()
            .backends
            .list()
            .into_iter()
            .map(|b| b.spec.dir_name.clone())
            .collect()
    }
}
