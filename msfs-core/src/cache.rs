//! Cache-Line Engine (spec.md §4.3) — allocation, fetch coalescing, the
//! state machine, LRU eviction, and prefetch scheduling.

use std::sync::Arc;

use log::{trace, warn};
use smallvec::SmallVec;
use tokio::sync::Notify;

/// Waiter handles for one `read()` call. Most reads touch a single cache
/// line or a small handful; inlining avoids a heap allocation for the
/// common case, the same tradeoff `fuser::ll::reply`'s `ResponseBuf` makes
/// for its own small scatter lists.
type Waiters = SmallVec<[Arc<Notify>; 4]>;

use crate::driver::DriverError;
use crate::error::Error;
use crate::inode::InodeKind;
use crate::runtime::{LineKey, Runtime, State};

/// Cache-line lifecycle state (spec.md §3 Cache line).
///
/// `Outbound` and `Dirty` are part of the data model spec.md §9 asks
/// implementations to preserve for forward-compatibility with write
/// support, but are unreachable in this read-only release: nothing ever
/// constructs them.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CacheLineState {
    /// A fetch is in flight; the buffer is not yet valid.
    Inbound,
    /// The buffer holds the fetch's outcome (data, or empty on failure);
    /// eligible for eviction.
    Clean,
    /// Unreachable in this release; reserved for write support.
    Outbound,
    /// Unreachable in this release; reserved for write support.
    Dirty,
}

/// One fixed-size chunk of an object's content (spec.md §3 Cache line).
pub struct CacheLine {
    /// Current lifecycle state.
    pub state: CacheLineState,
    /// Byte buffer; empty until `Clean`.
    pub buffer: Vec<u8>,
    /// ETag observed when this line was last successfully fetched. `None`
    /// if the line has never completed a successful fetch.
    pub etag: Option<String>,
    /// Sticky error from the most recent failed fetch (spec.md §4.3 Fetch
    /// worker step 4: "alternative implementations MAY carry a sticky
    /// error on the line" — the alternative this crate takes, since it is
    /// what makes ETag revalidation (§4.2, §8 scenario 3) observable to
    /// the reader that triggered the failing fetch).
    pub error: Option<Error>,
    /// One-shot multi-waiter latch, notified exactly once when this line
    /// leaves `Inbound` (spec.md invariant 4, §9 "Waiter mechanism").
    pub notify: Arc<Notify>,
}

impl CacheLine {
    fn new_inbound() -> Self {
        CacheLine {
            state: CacheLineState::Inbound,
            buffer: Vec::new(),
            etag: None,
            error: None,
            notify: Arc::new(Notify::new()),
        }
    }
}

impl Runtime {
    /// Read `length` bytes of `ino` starting at `offset`, coalescing
    /// concurrent fetches and serving from cache where possible (spec.md
    /// §4.3 `read`).
    ///
    /// Takes `self` behind an `Arc` because a cache miss spawns a detached
    /// fetch-worker task that must be able to outlive this call.
    pub async fn read(self: &Arc<Self>, ino: u64, offset: u64, length: u64) -> crate::error::Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let line_size = self.config.cache_line_size;
        let first_line = offset / line_size;
        let last_line = (offset + length - 1) / line_size;

        let mut waiters: Waiters = SmallVec::new();
        // Lines this call is about to wait on are pinned against eviction
        // for the duration: otherwise, once the lock below is released, a
        // sibling line's fetch could complete and evict an *earlier* line
        // of this same read out from under it before the assembly loop
        // gets a chance to copy its bytes (spec.md §8 boundary: reads
        // spanning more lines than `cache_lines` must still be served).
        // A line absent here (never inserted) is past end-of-object and
        // has nothing to pin.
        let mut pinned_lines: Vec<u64> = Vec::new();
        {
            let mut state = self.state.lock();
            for line_no in first_line..=last_line {
                if let Err(err) = self.ensure_fetching(&mut state, ino, line_no, &mut waiters) {
                    // Unpin whatever this call already pinned before
                    // bailing out — otherwise those lines would be pinned
                    // forever, never reclaimable again.
                    unpin_lines(&mut state, ino, &pinned_lines);
                    return Err(err);
                }
                let has_line = state
                    .inodes
                    .get(ino)
                    .map(|inode| inode.lines.contains_key(&line_no))
                    .unwrap_or(false);
                if has_line {
                    *state.pinned.entry((ino, line_no)).or_insert(0) += 1;
                    pinned_lines.push(line_no);
                }
            }
            for i in 1..=self.config.prefetch_window as u64 {
                let pf_line = last_line + i;
                // Prefetches are best-effort: a missing inode, an EOF
                // line, or an already-fresh line is not an error here,
                // unlike the lines the caller is actually waiting on.
                let mut discard: Waiters = SmallVec::new();
                let _ = self.ensure_fetching(&mut state, ino, pf_line, &mut discard);
            }
        }

        for w in waiters {
            w.notified().await;
        }

        let mut state = self.state.lock();
        let mut out = Vec::with_capacity(length as usize);
        let mut first_err: Option<Error> = None;
        for line_no in first_line..=last_line {
            let Some(inode) = state.inodes.get_mut(ino) else {
                unpin_lines(&mut state, ino, &pinned_lines);
                return Err(Error::NotFound {
                    path: format!("inode {ino}"),
                });
            };
            // Absent means either entirely past end-of-object (never
            // scheduled by `ensure_fetching`) or — pinning notwithstanding
            // — reclaimed by a concurrent reconfiguration that dropped the
            // whole inode (already handled above) or backend removal's own
            // detach pass. Either way this line contributes no bytes,
            // which is exactly EOF truncation's contract (spec.md §8:
            // "reads beyond end-of-object return EOF-truncated results").
            let Some(line) = inode.lines.get(&line_no) else {
                continue;
            };
            debug_assert_eq!(line.state, CacheLineState::Clean);
            state.clean_lru.put((ino, line_no), ());
            if let Some(err) = &line.error {
                if first_err.is_none() {
                    first_err = Some(err.clone());
                }
                continue;
            }
            let line_start = line_no * line_size;
            let start_in_line = offset.saturating_sub(line_start).min(line.buffer.len() as u64);
            let end_offset = offset + length;
            let end_in_line = end_offset
                .saturating_sub(line_start)
                .min(line.buffer.len() as u64);
            if start_in_line < end_in_line {
                out.extend_from_slice(&line.buffer[start_in_line as usize..end_in_line as usize]);
            }
        }
        unpin_lines(&mut state, ino, &pinned_lines);
        self.prune_if_over_capacity(&mut state);
        if let Some(err) = first_err {
            return Err(err);
        }
        Ok(out)
    }

    /// Ensure a fetch is either already satisfied (`Clean`, fresh) or in
    /// flight for `(ino, line_no)`, pushing a `Notify` handle onto
    /// `waiters` in the latter case. Called under the global lock; spawns
    /// the fetch worker task when a new fetch is needed.
    fn ensure_fetching(
        self: &Arc<Self>,
        state: &mut State,
        ino: u64,
        line_no: u64,
        waiters: &mut Waiters,
    ) -> crate::error::Result<()> {
        let inode = state.inodes.get(ino).ok_or_else(|| Error::NotFound {
            path: format!("inode {ino}"),
        })?;
        let required_etag = match &inode.kind {
            InodeKind::File { etag, size, .. } => {
                if line_no * self.config.cache_line_size >= *size {
                    // Entirely past EOF: nothing to fetch. A pure-prefetch
                    // caller silently gets no line scheduled; a real read
                    // request never asks for a line past its own `length`
                    // bound given offset <= size is the caller's contract.
                    return Ok(());
                }
                etag.clone()
            }
            _ => {
                return Err(Error::NotAFile { ino });
            }
        };

        let needs_fetch = match inode.lines.get(&line_no) {
            None => true,
            Some(line) => match line.state {
                CacheLineState::Inbound => {
                    waiters.push(line.notify.clone());
                    false
                }
                CacheLineState::Clean => line.etag.as_deref() != Some(required_etag.as_str()),
                CacheLineState::Outbound | CacheLineState::Dirty => {
                    unreachable!("unreachable in read-only mode")
                }
            },
        };

        if !needs_fetch {
            return Ok(());
        }

        let inode = state.inodes.get_mut(ino).expect("checked above");
        if let Some(old) = inode.lines.remove(&line_no) {
            if old.state == CacheLineState::Clean {
                state.clean_lru.pop(&(ino, line_no));
            }
        }
        let line = CacheLine::new_inbound();
        let notify = line.notify.clone();
        inode.lines.insert(line_no, line);
        state.inbound_total += 1;
        if let Some(backend_id) = inode.kind.backend_id() {
            state.backends.adjust_inbound(backend_id, 1);
        }
        waiters.push(notify);

        let key = match &inode.kind {
            InodeKind::File { key, .. } => key.clone(),
            _ => unreachable!("checked above"),
        };
        let backend_id = inode.kind.backend_id().expect("files are always backend-bound");
        let driver = state
            .backends
            .lookup_by_id(backend_id)
            .map(|b| b.driver.clone());
        if let Some(driver) = driver {
            let rt = self.clone();
            let line_size = self.config.cache_line_size;
            tokio::spawn(async move {
                rt.run_fetch(ino, line_no, line_size, key, required_etag, driver).await;
            });
        }
        Ok(())
    }

    /// Body of the fetch worker task (spec.md §4.3 "Fetch worker"): call
    /// the driver outside the lock, then re-acquire it to commit the
    /// outcome and wake waiters.
    async fn run_fetch(
        self: Arc<Self>,
        ino: u64,
        line_no: u64,
        line_size: u64,
        key: String,
        if_match: String,
        driver: Arc<dyn crate::driver::BackendDriver>,
    ) {
        let outcome = driver.read_file(&key, line_no, line_size, Some(&if_match)).await;

        let mut state = self.state.lock();
        // The inode may have vanished underneath us — a concurrent
        // `reconfigure` removed its owning backend. Discard the result;
        // this is what makes backend removal safe without the fetch
        // worker itself needing to know about drain/teardown (spec.md
        // §4.5, §9 "Interaction between eviction and reconfiguration").
        let Some(inode) = state.inodes.get_mut(ino) else {
            self.finish_inbound(&mut state, ino, None);
            return;
        };
        let Some(line) = inode.lines.get_mut(&line_no) else {
            // Line itself was pruned (shouldn't happen while Inbound, but
            // tolerate it) — nothing left to commit into.
            drop(inode);
            self.finish_inbound(&mut state, ino, None);
            return;
        };

        match outcome {
            Ok(result) => {
                line.state = CacheLineState::Clean;
                line.buffer = result.bytes;
                line.etag = Some(result.etag);
                line.error = None;
            }
            Err(err) => {
                warn!("fetch failed for ino={ino} line={line_no}: {err}");
                line.state = CacheLineState::Clean;
                line.buffer = Vec::new();
                line.etag = None;
                line.error = Some(map_driver_error(ino, err));
            }
        }
        let notify = line.notify.clone();
        state.clean_lru.put((ino, line_no), ());
        let backend_id = inode.kind.backend_id();

        self.finish_inbound(&mut state, ino, backend_id);
        self.prune_if_over_capacity(&mut state);
        notify.notify_waiters();
    }

    fn finish_inbound(
        &self,
        state: &mut State,
        _ino: u64,
        backend_id: Option<crate::backend::BackendId>,
    ) {
        state.inbound_total = state.inbound_total.saturating_sub(1);
        if let Some(id) = backend_id {
            state.backends.adjust_inbound(id, -1);
        }
    }

    /// Reclaim `Clean` lines until the capacity invariant holds (spec.md
    /// §4.3 "LRU and eviction", invariant 3 / P3: the resident sum may
    /// legitimately *equal* `cache_lines`, so this only evicts once the
    /// sum would otherwise exceed it). Must be called while holding the
    /// lock.
    fn prune_if_over_capacity(&self, state: &mut State) {
        // Lines a concurrent `read()` has pinned (awaiting assembly) are
        // skipped rather than evicted; popped-but-skipped entries are
        // stashed here and put back at the end. `clean_lru.len()` strictly
        // decreases every iteration regardless of which branch is taken,
        // so this always terminates even if every resident line is pinned.
        let mut skipped: Vec<LineKey> = Vec::new();
        while state.inbound_total + state.clean_lru.len() as u64 > self.config.cache_lines as u64
        {
            let Some(((ino, line_no), _)) = state.clean_lru.pop_lru() else {
                // Every slot is Inbound; nothing evictable right now. The
                // situation resolves itself as in-flight fetches complete.
                break;
            };
            if state.pinned.contains_key(&(ino, line_no)) {
                skipped.push((ino, line_no));
                continue;
            }
            if let Some(inode) = state.inodes.get_mut(ino) {
                if let Some(line) = inode.lines.remove(&line_no) {
                    trace!(
                        "evicted clean line ino={ino} line={line_no} bytes={}",
                        line.buffer.len()
                    );
                }
            }
        }
        for key in skipped {
            state.clean_lru.put(key, ());
        }
    }
}

/// Release one `read()` call's pin on each of `line_nos` (spec.md §8
/// "`cache_lines = 1` still services arbitrary-size reads ... without
/// deadlock" — see `Runtime::read`). Called under the lock, both on the
/// normal completion path and on every early-return in between pinning and
/// unpinning, so a line is never left pinned forever.
fn unpin_lines(state: &mut State, ino: u64, line_nos: &[u64]) {
    for &line_no in line_nos {
        if let std::collections::hash_map::Entry::Occupied(mut entry) =
            state.pinned.entry((ino, line_no))
        {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
    }
}

/// Map a driver-level error onto the core's own error kind, given the inode
/// the operation concerned (used for [`Error::Stale`]'s `ino` field).
pub(crate) fn map_driver_error(ino: u64, err: DriverError) -> Error {
    match err {
        DriverError::NotFound { path } => Error::NotFound { path },
        DriverError::Stale { .. } => Error::Stale { ino },
        DriverError::Io { path, message } => Error::Io {
            message: format!("{path}: {message}"),
        },
    }
}
