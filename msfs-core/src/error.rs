//! Error kinds and their POSIX mapping (spec §7).

use thiserror::Error;

/// Canonical error kind surfaced by the core to request handlers.
///
/// Each variant has exactly one POSIX errno mapping via [`Error::to_errno`];
/// see the table in spec.md §7.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Path does not resolve.
    #[error("no such path: {path}")]
    NotFound {
        /// Mount-relative path that failed to resolve.
        path: String,
    },

    /// A parent path component names a file, not a directory.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// The offending path.
        path: String,
    },

    /// `open` was attempted on a directory inode.
    #[error("not a file: inode {ino}")]
    NotAFile {
        /// The directory inode.
        ino: u64,
    },

    /// A write-side operation was attempted against the read-only mount.
    #[error("read-only filesystem")]
    ReadOnly,

    /// An `If-Match` precondition failed, or the backend otherwise signaled
    /// that the object changed since it was opened.
    #[error("stale handle: inode {ino}")]
    Stale {
        /// The inode whose open-time ETag no longer matches.
        ino: u64,
    },

    /// Constructing a backend's driver context failed.
    #[error("backend '{dir_name}' failed to initialize: {message}")]
    BackendInit {
        /// The backend's `dir_name`.
        dir_name: String,
        /// Driver-supplied detail.
        message: String,
    },

    /// Transport, protocol, or 5xx error surfaced by a backend driver.
    #[error("backend I/O error: {message}")]
    Io {
        /// Driver-supplied detail.
        message: String,
    },

    /// A backend with this `dir_name` is already registered.
    #[error("backend '{dir_name}' already exists")]
    AlreadyExists {
        /// The duplicate `dir_name`.
        dir_name: String,
    },

    /// A malformed path or configuration field.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Human-readable detail.
        message: String,
    },
}

impl Error {
    /// Map this error onto the POSIX errno the request handler should
    /// surface to the kernel (spec.md §7).
    pub fn to_errno(&self) -> libc_errno::Errno {
        use libc_errno::Errno;
        match self {
            Error::NotFound { .. } => Errno::ENOENT,
            Error::NotADirectory { .. } => Errno::ENOTDIR,
            Error::NotAFile { .. } => Errno::EISDIR,
            Error::ReadOnly => Errno::EROFS,
            Error::Stale { .. } => Errno::ESTALE,
            Error::BackendInit { .. } => Errno::EIO,
            Error::Io { .. } => Errno::EIO,
            Error::AlreadyExists { .. } => Errno::EEXIST,
            Error::InvalidArgument { .. } => Errno::EINVAL,
        }
    }
}

/// Minimal POSIX errno set this crate needs, kept local so `msfs-core` does
/// not have to depend on `libc` just to name nine constants (the only
/// workspace member that actually talks to the kernel, `msfs`, maps these
/// onto whatever concrete errno type its FUSE binding expects).
pub mod libc_errno {
    /// A POSIX error number.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    #[allow(non_camel_case_types, missing_docs)]
    pub enum Errno {
        ENOENT,
        ENOTDIR,
        EISDIR,
        EROFS,
        ESTALE,
        EIO,
        EEXIST,
        EINVAL,
    }

    impl Errno {
        /// The raw numeric value, matching Linux x86_64 `errno.h`.
        pub fn as_raw(self) -> i32 {
            match self {
                Errno::ENOENT => 2,
                Errno::EIO => 5,
                Errno::EEXIST => 17,
                Errno::ENOTDIR => 20,
                Errno::EISDIR => 21,
                Errno::EINVAL => 22,
                Errno::EROFS => 30,
                Errno::ESTALE => 116,
            }
        }
    }
}

/// Convenience alias for results produced by the core.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn errno_mapping_matches_spec_table() {
        let cases = [
            (Error::NotFound { path: "x".into() }, libc_errno::Errno::ENOENT),
            (
                Error::NotADirectory { path: "x".into() },
                libc_errno::Errno::ENOTDIR,
            ),
            (Error::NotAFile { ino: 1 }, libc_errno::Errno::EISDIR),
            (Error::ReadOnly, libc_errno::Errno::EROFS),
            (Error::Stale { ino: 1 }, libc_errno::Errno::ESTALE),
            (
                Error::BackendInit {
                    dir_name: "d".into(),
                    message: "m".into(),
                },
                libc_errno::Errno::EIO,
            ),
            (
                Error::Io { message: "m".into() },
                libc_errno::Errno::EIO,
            ),
            (
                Error::AlreadyExists { dir_name: "d".into() },
                libc_errno::Errno::EEXIST,
            ),
            (
                Error::InvalidArgument { message: "m".into() },
                libc_errno::Errno::EINVAL,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_errno(), expected);
        }
    }

    #[test]
    fn raw_errno_values_match_linux_x86_64() {
        assert_eq!(libc_errno::Errno::ENOENT.as_raw(), 2);
        assert_eq!(libc_errno::Errno::EIO.as_raw(), 5);
        assert_eq!(libc_errno::Errno::EEXIST.as_raw(), 17);
        assert_eq!(libc_errno::Errno::ENOTDIR.as_raw(), 20);
        assert_eq!(libc_errno::Errno::EISDIR.as_raw(), 21);
        assert_eq!(libc_errno::Errno::EINVAL.as_raw(), 22);
        assert_eq!(libc_errno::Errno::EROFS.as_raw(), 30);
        assert_eq!(libc_errno::Errno::ESTALE.as_raw(), 116);
    }
}
