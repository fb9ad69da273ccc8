//! The `BackendDriver` capability (spec.md §6.1).
//!
//! This is the narrow interface the core depends on; concrete drivers
//! (S3-compatible, AIStore) live in the `msfs-backend` crate and implement
//! this trait. The core calls no other operation on a driver.

use async_trait::async_trait;
use thiserror::Error;

/// Opaque strong validator for one object version.
pub type ETag = String;

/// Errors a [`BackendDriver`] may return. The core maps these onto its own
/// [`crate::error::Error`] (`Stale`, `NotFound`, `Io`) without inspecting
/// anything driver-specific.
#[derive(Debug, Error, Clone)]
pub enum DriverError {
    /// The requested path does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// The path that was requested.
        path: String,
    },
    /// An `if_match` precondition failed, or the object changed underneath
    /// a strong-validator comparison.
    #[error("stale: {path}")]
    Stale {
        /// The path whose precondition failed.
        path: String,
    },
    /// Any transport, protocol, or 5xx failure. Retries are the driver's
    /// own responsibility; by the time this reaches the core, retries (if
    /// any) are exhausted.
    #[error("I/O error for {path}: {message}")]
    Io {
        /// The path being operated on when the error occurred.
        path: String,
        /// Driver-supplied detail.
        message: String,
    },
}

/// Attributes returned by [`BackendDriver::stat_file`].
#[derive(Debug, Clone)]
pub struct FileStat {
    /// Opaque strong validator for this exact object version.
    pub etag: ETag,
    /// Last-modified time, backend-reported.
    pub mtime: std::time::SystemTime,
    /// Object size in bytes.
    pub size: u64,
}

/// One file entry as returned by [`BackendDriver::list_directory`].
#[derive(Debug, Clone)]
pub struct ListedFile {
    /// The file's basename (no path separators).
    pub basename: String,
    /// Opaque strong validator for this exact object version.
    pub etag: ETag,
    /// Last-modified time, backend-reported.
    pub mtime: std::time::SystemTime,
    /// Object size in bytes.
    pub size: u64,
}

/// One page of a directory listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Common prefixes ("subdirectories") observed in this page, each
    /// including the trailing `/`.
    pub subdirs: Vec<String>,
    /// Files observed in this page.
    pub files: Vec<ListedFile>,
    /// Opaque continuation cookie; `None` signals the last page.
    pub next_cookie: Option<String>,
}

/// The result of a successful [`BackendDriver::read_file`] call.
#[derive(Debug, Clone)]
pub struct ReadResult {
    /// The ETag observed for the object version this data came from.
    pub etag: ETag,
    /// The bytes read, possibly short at end-of-object.
    pub bytes: Vec<u8>,
}

/// Narrow capability the core depends on to talk to one configured backend.
///
/// Every method's error variant set matches spec.md §6.1 exactly:
/// `stat_file` and `read_file` may return `NotFound`/`Stale`/`Io`;
/// `stat_directory` and `list_directory` may return `NotFound`/`Io`.
/// Authentication and retries are entirely the driver's own concern.
#[async_trait]
pub trait BackendDriver: Send + Sync + 'static {
    /// Stat a single object. `if_match`, when present, asks the driver to
    /// fail with [`DriverError::Stale`] if the object's current ETag
    /// differs.
    async fn stat_file(
        &self,
        path: &str,
        if_match: Option<&str>,
    ) -> Result<FileStat, DriverError>;

    /// Confirm a directory prefix exists. Drivers MAY differ on whether an
    /// empty (never-listed) prefix is considered present; see spec.md §9.
    async fn stat_directory(&self, path: &str) -> Result<(), DriverError>;

    /// List one page of a directory's immediate children.
    async fn list_directory(
        &self,
        path: &str,
        max_items: usize,
        cookie: Option<&str>,
    ) -> Result<ListPage, DriverError>;

    /// Read one cache line's worth of bytes (or fewer, at end-of-object).
    /// `line_number` addresses the byte range
    /// `[line_number * cache_line_size, (line_number + 1) * cache_line_size)`.
    async fn read_file(
        &self,
        path: &str,
        line_number: u64,
        cache_line_size: u64,
        if_match: Option<&str>,
    ) -> Result<ReadResult, DriverError>;
}
