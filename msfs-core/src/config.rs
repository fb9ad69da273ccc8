//! Configuration schema consumed by the core (spec.md §6.3).
//!
//! Parsing the on-disk config file, path search, and environment variable
//! expansion are external collaborators per spec.md §1; this module only
//! defines the shape of the fields the core actually reads once some outer
//! loader has produced them.

use std::collections::HashMap;

use serde::Deserialize;

/// Engine-wide configuration consumed by [`crate::cache::CacheEngine`] and
/// [`crate::reconfigure::ReconfigurationDriver`].
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Size in bytes of one cache line. SHOULD be a power of two; MUST be
    /// positive (spec.md §4.3).
    pub cache_line_size: u64,
    /// Maximum number of cache-line slots across all inodes.
    pub cache_lines: usize,
    /// Number of additional sequential lines to schedule on each read miss.
    /// `0` disables prefetch.
    #[serde(default)]
    pub prefetch_window: u32,
    /// If present, the reconfiguration driver also runs on this period, in
    /// addition to external signals.
    #[serde(default)]
    pub auto_reload_interval: Option<u64>,
}

impl CoreConfig {
    /// Validate the invariants spec.md §4.3 states as requirements
    /// (`cache_line_size` positive; `cache_lines` nonzero).
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.cache_line_size == 0 {
            return Err(crate::error::Error::InvalidArgument {
                message: "cache_line_size must be positive".to_string(),
            });
        }
        if !self.cache_line_size.is_power_of_two() {
            log::warn!(
                "cache_line_size {} is not a power of two; proceeding, but this is not recommended",
                self.cache_line_size
            );
        }
        if self.cache_lines == 0 {
            return Err(crate::error::Error::InvalidArgument {
                message: "cache_lines must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Static configuration for one backend binding (spec.md §3 Backend, §6.3).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BackendSpec {
    /// Stable top-level subdirectory name under the mount point. Must be a
    /// non-empty path component containing no `/`.
    pub dir_name: String,
    /// Driver-variant tag (e.g. `"s3"`, `"aistore"`).
    pub driver: String,
    /// Backend-specific bucket name.
    pub bucket: String,
    /// Key prefix scoping this backend's visible namespace. May be empty.
    #[serde(default)]
    pub prefix: String,
    /// Backend trace verbosity; forwarded to the driver, not interpreted
    /// by the core.
    #[serde(default)]
    pub trace_level: u8,
    /// Unknown/driver-specific options, passed through verbatim
    /// (unknown keys are ignored per spec.md §6.3; here that means the
    /// core never inspects them itself).
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl BackendSpec {
    /// Validate `dir_name` is a single, non-empty, `/`-free path component
    /// (spec.md §4.1).
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.dir_name.is_empty() || self.dir_name.contains('/') {
            return Err(crate::error::Error::InvalidArgument {
                message: format!(
                    "dir_name '{}' must be a non-empty path component with no '/'",
                    self.dir_name
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn spec(dir_name: &str) -> BackendSpec {
        BackendSpec {
            dir_name: dir_name.to_string(),
            driver: "s3".to_string(),
            bucket: "b".to_string(),
            prefix: String::new(),
            trace_level: 0,
            options: HashMap::new(),
        }
    }

    #[test]
    fn rejects_zero_cache_line_size() {
        let cfg = CoreConfig {
            cache_line_size: 0,
            cache_lines: 8,
            prefetch_window: 0,
            auto_reload_interval: None,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_cache_lines() {
        let cfg = CoreConfig {
            cache_line_size: 1024,
            cache_lines: 0,
            prefetch_window: 0,
            auto_reload_interval: None,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_power_of_two_line_size() {
        let cfg = CoreConfig {
            cache_line_size: 1 << 20,
            cache_lines: 8,
            prefetch_window: 0,
            auto_reload_interval: None,
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn non_power_of_two_line_size_is_a_warning_not_an_error() {
        let cfg = CoreConfig {
            cache_line_size: 1000,
            cache_lines: 8,
            prefetch_window: 0,
            auto_reload_interval: None,
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn dir_name_must_be_non_empty() {
        assert!(spec("").validate().is_err());
    }

    #[test]
    fn dir_name_must_not_contain_slash() {
        assert!(spec("a/b").validate().is_err());
    }

    #[test]
    fn valid_dir_name_passes() {
        assert!(spec("s3-prod").validate().is_ok());
    }
}
