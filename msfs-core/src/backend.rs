//! Backend Registry (spec.md §4.1).

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::BackendSpec;
use crate::driver::BackendDriver;
use crate::error::{Error, Result};

/// Monotonically-assigned identity for one registered backend, stable for
/// the lifetime of the process (never reused, even after the backend is
/// removed).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BackendId(pub u64);

/// Lifecycle state of a registered backend.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BackendState {
    /// Normal operation; new inode lookups may bind to this backend.
    Active,
    /// Slated for removal (spec.md §4.1, §4.5): no new inode lookups bind
    /// to it, but inodes and cache lines already bound are still being
    /// reclaimed.
    Draining,
}

/// One configured object-storage binding (spec.md §3 Backend).
pub struct Backend {
    /// Stable identity, used by inodes' backend references (weak, by
    /// number — spec.md §3 Ownership).
    pub id: BackendId,
    /// Static configuration this backend was registered with.
    pub spec: BackendSpec,
    /// Driver context; constructed once at registration, destroyed once at
    /// teardown.
    pub driver: Arc<dyn BackendDriver>,
    /// Current lifecycle state.
    pub state: BackendState,
    /// Count of `Inbound` cache lines anywhere in the inode table that are
    /// bound to this backend. The reconfiguration driver waits for this to
    /// reach zero before destroying the driver context (spec.md §4.5 step
    /// 4c).
    pub inbound_count: u64,
    /// Registered one-shot wakeups for "`inbound_count` just reached
    /// zero", fired from inside the same lock that decrements the count.
    /// Mirrors `fuser::session::ActiveSession`'s
    /// register-a-receiver-then-drain-senders-under-lock pattern for its
    /// own shutdown signal, which avoids the missed-wakeup race a
    /// check-then-wait split would otherwise have.
    zero_notify: Vec<tokio::sync::oneshot::Sender<()>>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id)
            .field("dir_name", &self.spec.dir_name)
            .field("state", &self.state)
            .field("inbound_count", &self.inbound_count)
            .finish()
    }
}

/// Tracks the set of active backends keyed by `dir_name` (spec.md §4.1).
#[derive(Debug, Default)]
pub struct BackendRegistry {
    by_dir_name: HashMap<String, BackendId>,
    by_id: HashMap<BackendId, Backend>,
    next_id: u64,
}

impl BackendRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend given an already-constructed driver context.
    ///
    /// The driver context itself (opening any long-lived connection/client)
    /// must be constructed by the caller *before* calling this — spec.md
    /// §4.1 requires construction to happen before the backend becomes
    /// visible, and construction may fail for reasons (credentials,
    /// connectivity) this registry has no way to evaluate.
    pub fn register(
        &mut self,
        spec: BackendSpec,
        driver: Arc<dyn BackendDriver>,
    ) -> Result<BackendId> {
        spec.validate()?;
        if self.by_dir_name.contains_key(&spec.dir_name) {
            return Err(Error::AlreadyExists {
                dir_name: spec.dir_name,
            });
        }
        let id = BackendId(self.next_id);
        self.next_id += 1;
        let dir_name = spec.dir_name.clone();
        self.by_dir_name.insert(dir_name, id);
        self.by_id.insert(
            id,
            Backend {
                id,
                spec,
                driver,
                state: BackendState::Active,
                inbound_count: 0,
                zero_notify: Vec::new(),
            },
        );
        Ok(id)
    }

    /// Register a one-shot wakeup for the next time `dir_name`'s
    /// `inbound_count` reaches zero, or return `None` immediately if it is
    /// already zero (or the backend no longer exists). Called and answered
    /// entirely under the caller's hold of the global lock, so there is no
    /// window between the check and the registration for a decrement to
    /// slip through unnoticed.
    pub fn await_inbound_drained(
        &mut self,
        id: BackendId,
    ) -> Option<tokio::sync::oneshot::Receiver<()>> {
        let backend = self.by_id.get_mut(&id)?;
        if backend.inbound_count == 0 {
            return None;
        }
        let (tx, rx) = tokio::sync::oneshot::channel();
        backend.zero_notify.push(tx);
        Some(rx)
    }

    /// Adjust `inbound_count` by `delta` (positive or negative), firing any
    /// registered [`Self::await_inbound_drained`] wakeups if the count
    /// reaches zero. Used both by the fetch worker (one line at a time,
    /// spec.md §4.3) and by reconfigure-remove, which must account for
    /// `Inbound` lines belonging to inodes it is about to delete — those
    /// lines' fetch workers will find the inode gone and can no longer
    /// attribute the decrement to this backend themselves (spec.md §4.5
    /// step 4b).
    pub fn adjust_inbound(&mut self, id: BackendId, delta: i64) {
        let Some(backend) = self.by_id.get_mut(&id) else {
            return;
        };
        if delta >= 0 {
            backend.inbound_count += delta as u64;
        } else {
            backend.inbound_count = backend.inbound_count.saturating_sub((-delta) as u64);
        }
        if backend.inbound_count == 0 {
            for tx in backend.zero_notify.drain(..) {
                let _ = tx.send(());
            }
        }
    }

    /// Mark a backend as draining, the first half of spec.md §4.1's
    /// two-phase unregister. No new inode lookups will bind to it after
    /// this returns.
    pub fn mark_draining(&mut self, dir_name: &str) -> Option<BackendId> {
        let id = *self.by_dir_name.get(dir_name)?;
        if let Some(backend) = self.by_id.get_mut(&id) {
            backend.state = BackendState::Draining;
        }
        Some(id)
    }

    /// Finish removing a backend: drop it from both indices. Callers must
    /// only do this once dependent inode/cache-line state has been
    /// reclaimed and `inbound_count == 0` (spec.md §4.1, invariant 6).
    pub fn finish_removal(&mut self, id: BackendId) -> Option<Backend> {
        let backend = self.by_id.remove(&id)?;
        self.by_dir_name.remove(&backend.spec.dir_name);
        Some(backend)
    }

    /// Look up a backend by its `dir_name`.
    pub fn lookup(&self, dir_name: &str) -> Option<&Backend> {
        let id = self.by_dir_name.get(dir_name)?;
        self.by_id.get(id)
    }

    /// Look up a backend by its stable id.
    pub fn lookup_by_id(&self, id: BackendId) -> Option<&Backend> {
        self.by_id.get(&id)
    }

    /// Mutable lookup by stable id, used by the cache engine to adjust
    /// `inbound_count` under the global lock.
    pub fn lookup_by_id_mut(&mut self, id: BackendId) -> Option<&mut Backend> {
        self.by_id.get_mut(&id)
    }

    /// All active backends, in registration order, for root-directory
    /// listing.
    pub fn list(&self) -> Vec<&Backend> {
        let mut backends: Vec<&Backend> = self.by_id.values().collect();
        backends.sort_by_key(|b| b.id);
        backends
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::MemoryBackend;
    use std::collections::HashMap;

    fn spec(dir_name: &str) -> BackendSpec {
        BackendSpec {
            dir_name: dir_name.to_string(),
            driver: "memory".to_string(),
            bucket: "b".to_string(),
            prefix: String::new(),
            trace_level: 0,
            options: HashMap::new(),
        }
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let mut reg = BackendRegistry::new();
        let id = reg.register(spec("a"), Arc::new(MemoryBackend::new())).unwrap();
        assert_eq!(reg.lookup("a").unwrap().id, id);
        assert_eq!(reg.lookup_by_id(id).unwrap().spec.dir_name, "a");
    }

    #[test]
    fn duplicate_dir_name_is_rejected() {
        let mut reg = BackendRegistry::new();
        reg.register(spec("a"), Arc::new(MemoryBackend::new())).unwrap();
        let err = reg.register(spec("a"), Arc::new(MemoryBackend::new())).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn mark_draining_then_finish_removal_drops_the_backend() {
        let mut reg = BackendRegistry::new();
        let id = reg.register(spec("a"), Arc::new(MemoryBackend::new())).unwrap();
        assert_eq!(reg.mark_draining("a"), Some(id));
        assert_eq!(reg.lookup("a").unwrap().state, BackendState::Draining);
        assert!(reg.finish_removal(id).is_some());
        assert!(reg.lookup("a").is_none());
        assert!(reg.lookup_by_id(id).is_none());
    }

    #[test]
    fn list_is_ordered_by_registration() {
        let mut reg = BackendRegistry::new();
        reg.register(spec("z"), Arc::new(MemoryBackend::new())).unwrap();
        reg.register(spec("a"), Arc::new(MemoryBackend::new())).unwrap();
        let names: Vec<&str> = reg.list().iter().map(|b| b.spec.dir_name.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[test]
    fn await_inbound_drained_fires_exactly_once_at_zero() {
        let mut reg = BackendRegistry::new();
        let id = reg.register(spec("a"), Arc::new(MemoryBackend::new())).unwrap();
        reg.adjust_inbound(id, 2);
        // Still outstanding: registering a receiver should yield one.
        let rx = reg.await_inbound_drained(id);
        assert!(rx.is_some());
        reg.adjust_inbound(id, -1);
        assert!(rx.unwrap().try_recv().is_err(), "not drained yet");
        // Draining to zero with no registered receiver should not panic.
        reg.adjust_inbound(id, -1);
        assert_eq!(reg.lookup_by_id(id).unwrap().inbound_count, 0);
        assert!(reg.await_inbound_drained(id).is_none());
    }
}
