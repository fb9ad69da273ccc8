//! `msfs` — mounts configured S3-compatible/AIStore backends as a
//! read-only FUSE filesystem (spec.md §1, §6.2).
//!
//! Grounded on `fuser`'s own example binaries' CLI/logging wiring style
//! (`clap::Parser` derive, `env_logger::init()` called before anything
//! else) and `stormmathisen-backpak::config::load`'s
//! `toml::from_str`/`anyhow::Context` pattern for the config file itself.

mod config;
mod fs;
mod reload;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fuser::MountOption;
use log::info;
use msfs_core::{Core, Runtime};

/// A read-only FUSE filesystem exposing S3-compatible and AIStore
/// backends as a single mounted namespace.
#[derive(Parser, Debug)]
#[command(name = "msfs", version, about)]
struct Cli {
    /// Path to the TOML configuration file (spec.md §6.2).
    config: PathBuf,

    /// Directory to mount the filesystem at.
    mountpoint: PathBuf,

    /// Allow other users to access the mount (maps to the FUSE
    /// `allow_other` option, spec.md §6.2).
    #[arg(long)]
    allow_other: bool,

    /// Raise logging verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Lower logging verbosity.
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else {
        let level = match verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        builder.filter_level(level);
    }
    builder.init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the Tokio runtime")?;
    let handle = rt.handle().clone();

    let loaded = config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let runtime = Arc::new(Runtime::new(loaded.core).context("invalid core configuration")?);

    rt.block_on(async {
        for spec in &loaded.backends {
            let dir_name = spec.dir_name.clone();
            match msfs_backend::build_driver(&spec.driver, &spec.bucket, &spec.options).await {
                Ok(driver) => {
                    runtime
                        .register_backend(spec.clone(), driver)
                        .with_context(|| format!("registering backend '{dir_name}'"))?;
                    info!("mounted backend '{dir_name}' ({})", spec.driver);
                }
                Err(message) => {
                    anyhow::bail!("backend '{dir_name}' failed to initialize: {message}");
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    })?;

    let core = Core::new(runtime.clone());
    let reconfig = Arc::new(msfs_core::ReconfigurationDriver::new(runtime.clone()));
    {
        // `tokio::spawn` requires an entered runtime context; the spawned
        // reload task itself keeps running on `rt`'s worker threads for
        // as long as the process does, regardless of this guard's scope.
        let _guard = rt.enter();
        reload::spawn(reconfig, cli.config.clone(), loaded.core.auto_reload_interval);
    }

    let mut options = vec![
        MountOption::RO,
        MountOption::FSName("msfs".to_string()),
        MountOption::DefaultPermissions,
    ];
    if cli.allow_other {
        options.push(MountOption::AllowOther);
    }

    info!("mounting msfs at {}", cli.mountpoint.display());
    let filesystem = fs::Fs::new(core, handle);
    fuser::mount2(filesystem, &cli.mountpoint, &options)
        .with_context(|| format!("mounting at {}", cli.mountpoint.display()))?;

    Ok(())
}
