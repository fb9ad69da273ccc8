//! Inode Table (spec.md §4.2, §3 Inode).

use std::collections::HashMap;
use std::time::SystemTime;

use crate::backend::BackendId;
use crate::cache::CacheLine;

/// Synthetic root inode number. Never reused, never torn down.
pub const ROOT_INO: u64 = 1;

/// What an inode represents.
#[derive(Debug, Clone)]
pub enum InodeKind {
    /// The mount root; its children are each backend's synthetic
    /// directory.
    Root,
    /// A backend's synthetic top-level directory (named by its
    /// `dir_name`).
    BackendRoot {
        /// Which backend this directory represents.
        backend: BackendId,
    },
    /// A discovered pseudo-directory (an observed delimited-listing
    /// prefix).
    Directory {
        /// Owning backend.
        backend: BackendId,
        /// Backend-relative key prefix, with no leading or trailing `/`.
        key: String,
    },
    /// A discovered object.
    File {
        /// Owning backend.
        backend: BackendId,
        /// Backend-relative object key.
        key: String,
        /// Size in bytes, as of the last `open` (or first `lookup` if never
        /// opened).
        size: u64,
        /// ETag as of the last `open` (or first `lookup` if never opened);
        /// this is the value supplied as `If-Match` on reads (spec.md
        /// §4.2 Revalidation).
        etag: String,
        /// Last-modified time, as of the last `open` (or first `lookup`).
        mtime: SystemTime,
    },
}

impl InodeKind {
    /// The backend this inode is bound to, if any (the root has none;
    /// spec.md invariant 5).
    pub fn backend_id(&self) -> Option<BackendId> {
        match self {
            InodeKind::Root => None,
            InodeKind::BackendRoot { backend }
            | InodeKind::Directory { backend, .. }
            | InodeKind::File { backend, .. } => Some(*backend),
        }
    }

    /// `true` if this inode represents a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, InodeKind::File { .. })
    }
}

/// In-memory representation of one resolved path (spec.md §3 Inode).
pub struct Inode {
    /// Stable, process-lifetime-unique inode number.
    pub ino: u64,
    /// What this inode represents.
    pub kind: InodeKind,
    /// Per-inode map from line number to cache line (spec.md §3 Ownership:
    /// "Each inode owns its line-number-to-cache-line mapping").
    pub lines: HashMap<u64, CacheLine>,
}

impl Inode {
    pub(crate) fn new(ino: u64, kind: InodeKind) -> Self {
        Inode {
            ino,
            kind,
            lines: HashMap::new(),
        }
    }
}

/// Attributes surfaced by `getattr` (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct Attrs {
    /// Inode number.
    pub ino: u64,
    /// `true` if this is a directory.
    pub is_directory: bool,
    /// Size in bytes (`0` for directories).
    pub size: u64,
    /// Last-modified time (`UNIX_EPOCH` for directories, which have no
    /// backend-reported mtime).
    pub mtime: SystemTime,
}

/// One entry of a directory listing, as returned by
/// [`InodeTable`]-driven `readdir` merge logic in `handlers.rs`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Entry basename (e.g. `.`, `..`, `b`, `c/`).
    pub name: String,
    /// Resolved child inode number, if already known. `.`/`..` always
    /// carry a resolved inode; freshly listed children may not yet have
    /// one assigned until a `lookup` is performed on them (the listing
    /// itself does not allocate inodes eagerly, avoiding allocating inode
    /// numbers for entries nobody ever opens).
    pub ino: Option<u64>,
    /// `true` if this entry is itself a directory.
    pub is_directory: bool,
}

/// Maps mount-relative paths to inodes (spec.md §4.2).
pub struct InodeTable {
    next_ino: u64,
    inodes: HashMap<u64, Inode>,
    /// Resolved `(parent_ino, name) -> ino` cache, populated lazily by
    /// `lookup`.
    children: HashMap<(u64, String), u64>,
}

impl InodeTable {
    /// Construct a table containing only the synthetic root inode.
    pub fn new() -> Self {
        let mut inodes = HashMap::new();
        inodes.insert(ROOT_INO, Inode::new(ROOT_INO, InodeKind::Root));
        InodeTable {
            next_ino: ROOT_INO + 1,
            inodes,
            children: HashMap::new(),
        }
    }

    /// Allocate the next monotonic inode number. Never reused.
    pub fn alloc_ino(&mut self) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    /// Look up an already-resolved child by `(parent, name)`.
    pub fn lookup_cached(&self, parent: u64, name: &str) -> Option<u64> {
        self.children.get(&(parent, name.to_string())).copied()
    }

    /// Record a resolved `(parent, name) -> ino` mapping and insert the
    /// inode itself.
    pub fn insert_resolved(&mut self, parent: u64, name: &str, inode: Inode) -> u64 {
        let ino = inode.ino;
        self.inodes.insert(ino, inode);
        self.children.insert((parent, name.to_string()), ino);
        ino
    }

    /// Immutable inode access.
    pub fn get(&self, ino: u64) -> Option<&Inode> {
        self.inodes.get(&ino)
    }

    /// Mutable inode access (used to update cache-line maps and, on
    /// `open`, refreshed file attributes).
    pub fn get_mut(&mut self, ino: u64) -> Option<&mut Inode> {
        self.inodes.get_mut(&ino)
    }

    /// Remove every inode bound to `backend` (directly, or as a
    /// `BackendRoot`), and every `children` entry that pointed at one of
    /// them. Returns the removed inodes so the caller (the reconfiguration
    /// driver) can reclaim their cache lines from the clean-LRU before
    /// dropping them (spec.md §4.5 step 4b, invariant 6).
    pub fn remove_backend(&mut self, backend: BackendId) -> Vec<Inode> {
        let doomed: Vec<u64> = self
            .inodes
            .iter()
            .filter(|(_, inode)| inode.kind.backend_id() == Some(backend))
            .map(|(ino, _)| *ino)
            .collect();
        self.children.retain(|_, ino| !doomed.contains(ino));
        doomed
            .into_iter()
            .filter_map(|ino| self.inodes.remove(&ino))
            .collect()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::BackendId;

    #[test]
    fn root_exists_with_fixed_number() {
        let table = InodeTable::new();
        assert!(matches!(table.get(ROOT_INO).unwrap().kind, InodeKind::Root));
    }

    #[test]
    fn alloc_ino_is_monotonic_and_never_reuses_root() {
        let mut table = InodeTable::new();
        let a = table.alloc_ino();
        let b = table.alloc_ino();
        assert!(a > ROOT_INO);
        assert!(b > a);
    }

    #[test]
    fn insert_resolved_is_visible_via_lookup_cached() {
        let mut table = InodeTable::new();
        let ino = table.alloc_ino();
        table.insert_resolved(
            ROOT_INO,
            "backend-a",
            Inode::new(ino, InodeKind::BackendRoot { backend: BackendId(0) }),
        );
        assert_eq!(table.lookup_cached(ROOT_INO, "backend-a"), Some(ino));
        assert_eq!(table.lookup_cached(ROOT_INO, "backend-b"), None);
    }

    #[test]
    fn remove_backend_drops_bound_inodes_and_their_child_entries() {
        let mut table = InodeTable::new();
        let kept_backend = BackendId(0);
        let doomed_backend = BackendId(1);

        let kept_ino = table.alloc_ino();
        table.insert_resolved(
            ROOT_INO,
            "kept",
            Inode::new(kept_ino, InodeKind::BackendRoot { backend: kept_backend }),
        );
        let doomed_ino = table.alloc_ino();
        table.insert_resolved(
            ROOT_INO,
            "doomed",
            Inode::new(doomed_ino, InodeKind::BackendRoot { backend: doomed_backend }),
        );

        let removed = table.remove_backend(doomed_backend);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].ino, doomed_ino);

        assert!(table.get(doomed_ino).is_none());
        assert_eq!(table.lookup_cached(ROOT_INO, "doomed"), None);
        assert!(table.get(kept_ino).is_some());
        assert_eq!(table.lookup_cached(ROOT_INO, "kept"), Some(kept_ino));
    }
}
