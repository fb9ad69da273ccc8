//! Concrete [`msfs_core::BackendDriver`] implementations: an S3-compatible
//! driver backed by the `object_store` crate, and an AIStore driver backed
//! by a plain `reqwest` HTTP client. Neither type is known to `msfs-core`
//! itself — it depends only on the `BackendDriver` trait (spec.md §6.1).

pub mod aistore;
pub mod s3;

pub use aistore::AiStoreDriver;
pub use s3::S3Driver;

use std::collections::HashMap;
use std::sync::Arc;

use msfs_core::driver::BackendDriver;

/// Driver-variant tags recognized in [`msfs_core::BackendSpec::driver`].
pub const DRIVER_S3: &str = "s3";
pub const DRIVER_AISTORE: &str = "aistore";

/// Construct the concrete driver named by `driver_tag`, using `bucket`,
/// `prefix`, and the backend's free-form `options` map (spec.md §6.3).
///
/// This is the one place in the repository that knows about every
/// concrete driver; `msfs-core` never sees it (it only sees
/// [`BackendDriver`] trait objects via [`msfs_core::reconfigure::DriverFactory`]).
pub async fn build_driver(
    driver_tag: &str,
    bucket: &str,
    options: &HashMap<String, String>,
) -> Result<Arc<dyn BackendDriver>, String> {
    match driver_tag {
        DRIVER_S3 => {
            let driver = S3Driver::new(bucket, options).map_err(|e| e.to_string())?;
            Ok(Arc::new(driver))
        }
        DRIVER_AISTORE => {
            let driver = AiStoreDriver::new(bucket, options).map_err(|e| e.to_string())?;
            Ok(Arc::new(driver))
        }
        other => Err(format!("unknown driver variant '{other}'")),
    }
}
