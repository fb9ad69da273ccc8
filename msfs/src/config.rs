//! On-disk configuration loading (spec.md §6.2, §6.3).
//!
//! Path search and environment variable expansion are external
//! collaborators per spec.md §1; this loader accepts a single explicit
//! path, matching §6.2 ("a mount invocation supplies a configuration-file
//! path and a mount point"). Grounded on
//! `stormmathisen-backpak::config::load`'s `toml::from_str` +
//! `anyhow::Context` pattern.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use msfs_core::{BackendSpec, CoreConfig};

/// The on-disk schema: engine configuration plus the backend list
/// (spec.md §6.3). Deserialized directly into the core's own config types
/// — this file adds no fields the core does not already define, since
/// full schema richness (search paths, env expansion) is out of scope.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(flatten)]
    core: CoreConfig,
    #[serde(default)]
    backend: Vec<BackendSpec>,
}

/// Parsed configuration: engine-wide settings plus the configured backend
/// set.
pub struct Config {
    pub core: CoreConfig,
    pub backends: Vec<BackendSpec>,
}

/// Load and parse `path` (spec.md §6.3: "unknown keys are ignored" — `toml`
/// + `serde`'s default deny-unknown-fields-off behavior already gives us
/// that for free).
pub fn load(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("couldn't read config file {}", path.display()))?;
    let raw: RawConfig = toml::from_str(&text)
        .with_context(|| format!("couldn't parse config file {}", path.display()))?;
    Ok(Config {
        core: raw.core,
        backends: raw.backend,
    })
}
