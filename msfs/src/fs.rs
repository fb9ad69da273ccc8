//! `fuser::Filesystem` impl (spec.md §4.4) — the thin protocol-adapter
//! layer translating kernel requests into [`msfs_core::Core`] calls.
//!
//! Grounded on `fuser`'s own documented `Filesystem` trait (method
//! signatures and default `reply.opened(0, 0)`/`reply.statfs(...)` shapes
//! read directly off the crate's own `lib.rs`). `msfs-core` knows nothing
//! about FUSE; this module is the only place that does.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, Request,
};
use log::{debug, warn};

use msfs_core::{Attrs, Core, DirHandle, Error, FileHandle};

/// Attribute cache TTL handed back to the kernel on every reply that
/// carries one. Short: the backing object store can change underneath an
/// unopened path at any time (spec.md §5 "Ordering": directory listings
/// and stats are only eventually consistent with the store).
const ATTR_TTL: Duration = Duration::from_secs(1);

/// Translate a core [`Error`] into the errno `fuser` expects (spec.md §7).
fn errno_of(err: &Error) -> i32 {
    err.to_errno().as_raw()
}

/// Build a `fuser::FileAttr` from the core's [`Attrs`], owned by `uid`/`gid`
/// (the user that mounted the filesystem — there is no per-object owner
/// concept in an object store).
fn file_attr(attrs: &Attrs, uid: u32, gid: u32) -> FileAttr {
    let kind = if attrs.is_directory {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    // Read-only: no write bits for anyone, ever (spec.md §1 non-goals,
    // §4.4 "write-side operations ... rejected with ReadOnly").
    let perm = if attrs.is_directory { 0o555 } else { 0o444 };
    FileAttr {
        ino: attrs.ino,
        size: attrs.size,
        blocks: attrs.size.div_ceil(512),
        atime: attrs.mtime,
        mtime: attrs.mtime,
        ctime: attrs.mtime,
        crtime: attrs.mtime,
        kind,
        perm,
        nlink: if attrs.is_directory { 2 } else { 1 },
        uid,
        gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

/// Bridges `fuser`'s synchronous callback API to [`Core`]'s async facade.
/// Every method blocks the calling FUSE worker thread on the shared Tokio
/// runtime for the duration of one request — acceptable here since the
/// runtime is multi-threaded and cache hits resolve without any actual
/// suspension (spec.md §5: "Handler tasks may block while waiting on
/// cache-line completion, and only then").
pub struct Fs {
    core: Core,
    rt: tokio::runtime::Handle,
    uid: u32,
    gid: u32,
    next_fh: AtomicU64,
    open_dirs: Mutex<HashMap<u64, DirHandle>>,
}

impl Fs {
    /// Wrap `core`, driven on `rt`.
    pub fn new(core: Core, rt: tokio::runtime::Handle) -> Self {
        Fs {
            core,
            rt,
            // SAFETY: `getuid`/`getgid` take no arguments and cannot fail.
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            next_fh: AtomicU64::new(1),
            open_dirs: Mutex::new(HashMap::new()),
        }
    }

    fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }
}

impl Filesystem for Fs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.rt.block_on(self.core.lookup(parent, name)) {
            Ok(attrs) => reply.entry(&ATTR_TTL, &file_attr(&attrs, self.uid, self.gid), 0),
            Err(err) => {
                debug!("lookup(parent={parent}, name={name}) -> {err}");
                reply.error(errno_of(&err));
            }
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.rt.block_on(self.core.getattr(ino)) {
            Ok(attrs) => reply.attr(&ATTR_TTL, &file_attr(&attrs, self.uid, self.gid)),
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.rt.block_on(self.core.open(ino)) {
            Ok(FileHandle { .. }) => reply.opened(self.alloc_fh(), 0),
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let handle = FileHandle { ino };
        match self
            .rt
            .block_on(self.core.read(&handle, offset as u64, size as u64))
        {
            Ok(bytes) => reply.data(&bytes),
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.core.release(FileHandle { ino });
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.rt.block_on(self.core.opendir(ino)) {
            Ok(handle) => {
                let fh = self.alloc_fh();
                self.open_dirs.lock().unwrap().insert(fh, handle);
                reply.opened(fh, 0);
            }
            Err(err) => reply.error(errno_of(&err)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let dirs = self.open_dirs.lock().unwrap();
        let Some(handle) = dirs.get(&fh) else {
            drop(dirs);
            warn!("readdir on unknown directory handle {fh} for inode {ino}");
            reply.error(libc::EBADF);
            return;
        };
        let mut next_offset = offset.max(0) as usize;
        for entry in self.core.readdir(handle, next_offset) {
            next_offset += 1;
            let kind = if entry.is_directory {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            // `ino` of 1 is a placeholder for not-yet-resolved children
            // (spec.md §4.2: listed children need no inode allocated
            // until actually looked up); the kernel will `lookup` the
            // name before using it for anything else.
            let child_ino = entry.ino.unwrap_or(msfs_core::ROOT_INO);
            if reply.add(child_ino, next_offset as i64, kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        if let Some(handle) = self.open_dirs.lock().unwrap().remove(&fh) {
            self.core.releasedir(handle);
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let attrs = self.core.statfs();
        reply.statfs(
            attrs.blocks,
            attrs.blocks_free,
            attrs.blocks_free,
            0,
            0,
            attrs.block_size,
            attrs.name_max,
            attrs.block_size,
        );
    }

    // Write-side operations (spec.md §4.4): always `EROFS`, no side
    // effects (P7).

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        reply.error(libc::EROFS);
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        reply.error(libc::EROFS);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        reply.error(libc::EROFS);
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::EROFS);
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::EROFS);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        reply.error(libc::EROFS);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        reply.error(libc::EROFS);
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.error(libc::EROFS);
    }
}
