//! Request Handlers (spec.md §4.4) — the thin facade a user-space filesystem
//! protocol adapter calls into. This module knows nothing about any
//! particular kernel protocol; it exposes plain async operations keyed by
//! inode number and opaque handles.

use std::sync::Arc;
use std::time::SystemTime;

use crate::backend::BackendId;
use crate::cache::map_driver_error;
use crate::driver::{BackendDriver, ListedFile};
use crate::error::{Error, Result};
use crate::inode::{Attrs, DirEntry, Inode, InodeKind};
use crate::runtime::Runtime;

/// An open file handle. Carries no state beyond the inode it was opened
/// against — the ETag it reads against lives on the inode itself and was
/// refreshed by the `open` call that produced this handle (spec.md §4.2
/// Revalidation).
#[derive(Debug, Clone, Copy)]
pub struct FileHandle {
    /// The inode this handle was opened against.
    pub ino: u64,
}

/// An open directory handle. Holds the fully merged, ordered listing
/// computed at `opendir` time, and is walked by position rather than by a
/// backend-supplied cookie: the numeric offset this type hands back plays
/// the same role fuser's own `readdir` callback expects (an opaque `i64`
/// continuation position), while still satisfying spec.md §4.2's
/// requirement that the cookie be stable for the handle's lifetime and that
/// every entry be produced exactly once across pages (R2).
pub struct DirHandle {
    ino: u64,
    entries: Vec<DirEntry>,
}

impl DirHandle {
    /// Entries starting at `offset` (the position of the next entry to
    /// produce), in order.
    pub fn entries_from(&self, offset: usize) -> &[DirEntry] {
        if offset >= self.entries.len() {
            &[]
        } else {
            &self.entries[offset..]
        }
    }

    /// Total entry count, for callers that want to detect end-of-listing.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if this handle's listing is empty (never true in practice:
    /// `.` and `..` are always present).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fixed `statfs` values (spec.md §4.4: "synthesize fixed values; real
/// capacity is not known").
#[derive(Debug, Clone, Copy)]
pub struct StatfsAttrs {
    /// Total blocks (synthetic).
    pub blocks: u64,
    /// Free blocks (synthetic, always 0 — writes are not supported).
    pub blocks_free: u64,
    /// Block size in bytes.
    pub block_size: u32,
    /// Maximum filename length reported to the kernel.
    pub name_max: u32,
}

/// Facade exposed to a protocol adapter. Cheap to clone (wraps a single
/// `Arc<Runtime>`).
#[derive(Clone)]
pub struct Core {
    runtime: Arc<Runtime>,
}

impl Core {
    /// Wrap an already-constructed [`Runtime`].
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Core { runtime }
    }

    /// Direct access to the underlying runtime, e.g. for the reconfiguration
    /// driver or diagnostic accessors.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Resolve `name` under `parent` (spec.md §4.2 `lookup`).
    pub async fn lookup(&self, parent: u64, name: &str) -> Result<Attrs> {
        if let Some(ino) = self.runtime.state.lock().inodes.lookup_cached(parent, name) {
            return self.getattr(ino).await;
        }

        let resolution = self.resolve(parent, name).await?;

        let mut state = self.runtime.state.lock();
        // Another task may have resolved the same (parent, name) while we
        // were awaiting the driver; prefer its result to avoid allocating a
        // second inode number for the same path (spec.md R3).
        if let Some(existing) = state.inodes.lookup_cached(parent, name) {
            let inode = state.inodes.get(existing).expect("just observed");
            return Ok(attrs_of(inode));
        }
        let ino = state.inodes.alloc_ino();
        let inode = Inode::new(ino, resolution);
        let ino = state.inodes.insert_resolved(parent, name, inode);
        let inode = state.inodes.get(ino).expect("just inserted");
        Ok(attrs_of(inode))
    }

    /// Resolve the `InodeKind` for `name` under `parent`, making driver
    /// calls outside the global lock.
    async fn resolve(&self, parent: u64, name: &str) -> Result<InodeKind> {
        enum ParentShape {
            Root,
            Backend {
                backend: BackendId,
                driver: Arc<dyn BackendDriver>,
                base_key: String,
            },
        }

        let shape = {
            let state = self.runtime.state.lock();
            let parent_inode = state.inodes.get(parent).ok_or_else(|| Error::NotFound {
                path: format!("inode {parent}"),
            })?;
            match &parent_inode.kind {
                InodeKind::Root => ParentShape::Root,
                InodeKind::BackendRoot { backend } => {
                    let b = state.backends.lookup_by_id(*backend).ok_or_else(|| {
                        Error::NotFound {
                            path: format!("backend {}", backend.0),
                        }
                    })?;
                    ParentShape::Backend {
                        backend: *backend,
                        driver: b.driver.clone(),
                        base_key: b.spec.prefix.trim_matches('/').to_string(),
                    }
                }
                InodeKind::Directory { backend, key } => {
                    let b = state.backends.lookup_by_id(*backend).ok_or_else(|| {
                        Error::NotFound {
                            path: format!("backend {}", backend.0),
                        }
                    })?;
                    ParentShape::Backend {
                        backend: *backend,
                        driver: b.driver.clone(),
                        base_key: key.clone(),
                    }
                }
                InodeKind::File { .. } => {
                    return Err(Error::NotADirectory {
                        path: name.to_string(),
                    })
                }
            }
        };

        match shape {
            ParentShape::Root => {
                let backend_id = {
                    let state = self.runtime.state.lock();
                    state
                        .backends
                        .lookup(name)
                        .map(|b| b.id)
                        .ok_or_else(|| Error::NotFound {
                            path: name.to_string(),
                        })?
                };
                Ok(InodeKind::BackendRoot { backend: backend_id })
            }
            ParentShape::Backend {
                backend,
                driver,
                base_key,
            } => {
                let candidate = join_key(&base_key, name);
                match driver.stat_file(&candidate, None).await {
                    Ok(stat) => Ok(InodeKind::File {
                        backend,
                        key: candidate,
                        size: stat.size,
                        etag: stat.etag,
                        mtime: stat.mtime,
                    }),
                    Err(crate::driver::DriverError::NotFound { .. }) => {
                        let dir_probe = format!("{candidate}/");
                        match driver.stat_directory(&dir_probe).await {
                            Ok(()) => Ok(InodeKind::Directory {
                                backend,
                                key: candidate,
                            }),
                            Err(crate::driver::DriverError::NotFound { .. }) => {
                                Err(Error::NotFound {
                                    path: candidate,
                                })
                            }
                            Err(other) => Err(map_driver_error(parent, other)),
                        }
                    }
                    Err(other) => Err(map_driver_error(parent, other)),
                }
            }
        }
    }

    /// Attributes for an already-resolved inode (spec.md §4.2 `getattr`).
    pub async fn getattr(&self, ino: u64) -> Result<Attrs> {
        let state = self.runtime.state.lock();
        let inode = state.inodes.get(ino).ok_or_else(|| Error::NotFound {
            path: format!("inode {ino}"),
        })?;
        Ok(attrs_of(inode))
    }

    /// Open a directory handle, eagerly draining and merging every backend
    /// page (spec.md §4.2 "Directory listing").
    pub async fn opendir(&self, ino: u64) -> Result<DirHandle> {
        let shape = {
            let state = self.runtime.state.lock();
            let inode = state.inodes.get(ino).ok_or_else(|| Error::NotFound {
                path: format!("inode {ino}"),
            })?;
            match &inode.kind {
                InodeKind::Root => None,
                InodeKind::BackendRoot { backend } => {
                    let b = state.backends.lookup_by_id(*backend);
                    b.map(|b| (b.driver.clone(), b.spec.prefix.trim_matches('/').to_string()))
                }
                InodeKind::Directory { backend, key } => {
                    let b = state.backends.lookup_by_id(*backend);
                    b.map(|b| (b.driver.clone(), key.clone()))
                }
                InodeKind::File { .. } => return Err(Error::NotADirectory {
                    path: format!("inode {ino}"),
                }),
            }
        };

        let mut entries = vec![
            DirEntry {
                name: ".".to_string(),
                ino: Some(ino),
                is_directory: true,
            },
            DirEntry {
                name: "..".to_string(),
                ino: None,
                is_directory: true,
            },
        ];

        match shape {
            None => {
                // The root: its children are the configured backends, not
                // anything a driver lists.
                let state = self.runtime.state.lock();
                for backend in state.backends.list() {
                    entries.push(DirEntry {
                        name: backend.spec.dir_name.clone(),
                        ino: None,
                        is_directory: true,
                    });
                }
            }
            Some((driver, base_key)) => {
                let mut subdirs: Vec<String> = Vec::new();
                let mut files: Vec<ListedFile> = Vec::new();
                let mut cookie: Option<String> = None;
                loop {
                    let page = driver
                        .list_directory(&base_key, 1000, cookie.as_deref())
                        .await
                        .map_err(|e| map_driver_error(ino, e))?;
                    subdirs.extend(page.subdirs);
                    files.extend(page.files);
                    match page.next_cookie {
                        Some(next) => cookie = Some(next),
                        None => break,
                    }
                }
                entries.extend(merge_listing(subdirs, files));
            }
        }

        Ok(DirHandle { ino, entries })
    }

    /// Return `.`/`..`-inclusive entries starting at `offset`. Resolving
    /// `ino: None` entries to a real inode number is left to the caller
    /// (the protocol adapter, or a subsequent `lookup`): this matches
    /// spec.md §4.2's note that listed children do not need an inode
    /// allocated until actually looked up.
    pub fn readdir<'a>(&self, handle: &'a DirHandle, offset: usize) -> &'a [DirEntry] {
        handle.entries_from(offset)
    }

    /// Open a file, refreshing its recorded attributes (spec.md §4.2
    /// Revalidation: "the attribute etag is recorded at open time").
    pub async fn open(&self, ino: u64) -> Result<FileHandle> {
        let (backend_id, key) = {
            let state = self.runtime.state.lock();
            let inode = state.inodes.get(ino).ok_or_else(|| Error::NotFound {
                path: format!("inode {ino}"),
            })?;
            match &inode.kind {
                InodeKind::File { backend, key, .. } => (*backend, key.clone()),
                _ => return Err(Error::NotAFile { ino }),
            }
        };
        let driver = {
            let state = self.runtime.state.lock();
            state
                .backends
                .lookup_by_id(backend_id)
                .map(|b| b.driver.clone())
                .ok_or_else(|| Error::NotFound {
                    path: format!("inode {ino}"),
                })?
        };

        let stat = driver
            .stat_file(&key, None)
            .await
            .map_err(|e| map_driver_error(ino, e))?;

        let mut state = self.runtime.state.lock();
        if let Some(inode) = state.inodes.get_mut(ino) {
            if let InodeKind::File {
                size, etag, mtime, ..
            } = &mut inode.kind
            {
                *size = stat.size;
                *etag = stat.etag;
                *mtime = stat.mtime;
            }
        }
        Ok(FileHandle { ino })
    }

    /// Read through the cache-line engine (spec.md §4.3 `read`).
    pub async fn read(&self, handle: &FileHandle, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.runtime.read(handle.ino, offset, length).await
    }

    /// Release a file handle. No flush: the filesystem is read-only
    /// (spec.md §4.4 `release`).
    pub fn release(&self, _handle: FileHandle) {}

    /// Release a directory handle.
    pub fn releasedir(&self, _handle: DirHandle) {}

    /// Synthesized filesystem-wide statistics (spec.md §4.4 `statfs`).
    pub fn statfs(&self) -> StatfsAttrs {
        StatfsAttrs {
            blocks: 0,
            blocks_free: 0,
            block_size: 512,
            name_max: 255,
        }
    }
}

fn attrs_of(inode: &Inode) -> Attrs {
    match &inode.kind {
        InodeKind::File { size, mtime, .. } => Attrs {
            ino: inode.ino,
            is_directory: false,
            size: *size,
            mtime: *mtime,
        },
        _ => Attrs {
            ino: inode.ino,
            is_directory: true,
            size: 0,
            mtime: SystemTime::UNIX_EPOCH,
        },
    }
}

fn join_key(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}

/// Merge a backend's common-prefix and file streams into one
/// deterministically ordered listing (spec.md §4.2: "case-sensitive
/// lexicographic by basename; ties broken file-before-directory").
fn merge_listing(subdirs: Vec<String>, files: Vec<ListedFile>) -> Vec<DirEntry> {
    #[derive(Eq, PartialEq)]
    struct Item {
        basename: String,
        is_directory: bool,
    }

    let mut items: Vec<Item> = Vec::with_capacity(subdirs.len() + files.len());
    for prefix in subdirs {
        let basename = prefix.trim_end_matches('/').to_string();
        items.push(Item {
            basename,
            is_directory: true,
        });
    }
    for file in files {
        items.push(Item {
            basename: file.basename,
            is_directory: false,
        });
    }
    items.sort_by(|a, b| {
        a.basename
            .cmp(&b.basename)
            .then_with(|| a.is_directory.cmp(&b.is_directory))
    });
    // Entries carry bare basenames, like any real directory listing; the
    // trailing-slash notation in spec scenarios is shorthand for "this one
    // is a directory", conveyed here via `is_directory` rather than baked
    // into the name.
    items
        .into_iter()
        .map(|item| DirEntry {
            name: item.basename,
            ino: None,
            is_directory: item.is_directory,
        })
        .collect()
}
