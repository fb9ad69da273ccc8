//! The read-cache and prefetch engine backing the `msfs` read-only
//! object-storage filesystem (spec.md §§3-5, 7-9).
//!
//! This crate has no dependency on any particular kernel filesystem
//! protocol; it exposes a plain async facade ([`handlers::Core`]) that a
//! protocol adapter (the `msfs` binary's `fuser::Filesystem` impl) drives.

pub mod backend;
pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod handlers;
pub mod inode;
pub mod reconfigure;
pub mod runtime;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use backend::{Backend, BackendId, BackendRegistry, BackendState};
pub use config::{BackendSpec, CoreConfig};
pub use driver::{BackendDriver, DriverError, ETag, FileStat, ListPage, ListedFile, ReadResult};
pub use error::{Error, Result};
pub use handlers::{Core, DirHandle, FileHandle, StatfsAttrs};
pub use inode::{Attrs, DirEntry, InodeKind, ROOT_INO};
pub use reconfigure::ReconfigurationDriver;
pub use runtime::Runtime;
