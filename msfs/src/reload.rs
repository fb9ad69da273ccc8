//! External reload triggers (spec.md §4.5, §6.4): a SIGHUP handler and an
//! optional `auto_reload_interval` timer, both driving the same
//! [`ReconfigurationDriver`]. Grounded on `tokio::signal`, already pulled
//! in transitively via `fuser`'s own dependency on `tokio` for its session
//! shutdown plumbing.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};
use msfs_core::reconfigure::{DriverFactory, ReconfigurationDriver};
use msfs_core::{BackendDriver, BackendSpec};

use crate::config;

/// Bridges [`msfs_backend::build_driver`] into [`DriverFactory`], so
/// `msfs-core` never has to depend on `msfs-backend`'s concrete driver
/// types (mirrors the narrow `BackendDriver` boundary spec.md §6.1 draws).
pub struct BackendFactory;

#[async_trait]
impl DriverFactory for BackendFactory {
    async fn build(&self, spec: &BackendSpec) -> Result<Arc<dyn BackendDriver>, String> {
        msfs_backend::build_driver(&spec.driver, &spec.bucket, &spec.options).await
    }
}

/// Run one reload cycle: reread `config_path`, diff it against the
/// running backend set, and apply the result.
async fn run_once(driver: &ReconfigurationDriver, config_path: &std::path::Path) {
    let desired = match config::load(config_path) {
        Ok(cfg) => cfg.backends,
        Err(err) => {
            error!("reload: couldn't reread config at {}: {err:#}", config_path.display());
            return;
        }
    };
    let report = driver.reload(&desired, &BackendFactory).await;
    if !report.added.is_empty() {
        info!("reload: added {:?}", report.added);
    }
    if !report.removed.is_empty() {
        info!("reload: removed {:?}", report.removed);
    }
    for (dir_name, message) in &report.failed {
        warn!("reload: backend '{dir_name}' failed: {message}");
    }
}

/// Spawn the background task driving spec.md §6.4's two reload triggers:
/// a SIGHUP signal, and (if configured) a periodic timer. Exactly one
/// reload runs at a time (spec.md §4.5: "the entire reload runs in a
/// single worker").
pub fn spawn(
    driver: Arc<ReconfigurationDriver>,
    config_path: PathBuf,
    auto_reload_interval: Option<u64>,
) {
    tokio::spawn(async move {
        let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(s) => s,
            Err(err) => {
                error!("reload: couldn't install SIGHUP handler: {err}");
                return;
            }
        };
        let mut timer = auto_reload_interval
            .filter(|secs| *secs > 0)
            .map(|secs| tokio::time::interval(std::time::Duration::from_secs(secs)));

        loop {
            let fire_timer = async {
                match &mut timer {
                    Some(t) => {
                        t.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = sighup.recv() => {
                    info!("reload: SIGHUP received");
                    run_once(&driver, &config_path).await;
                }
                _ = fire_timer => {
                    info!("reload: timer fired");
                    run_once(&driver, &config_path).await;
                }
            }
        }
    });
}
