//! AIStore [`BackendDriver`] (spec.md §6.1), built on a plain HTTP client.
//!
//! No crate in the retrieval pack targets AIStore specifically, so this is
//! grounded on the nearest pack precedent for "HTTP API as a storage
//! backend": `tvix-store`'s `NixHTTPPathInfoService`
//! (`examples/tvlfyi-tvix/store/src/pathinfoservice/nix_http.rs`) — a
//! `reqwest::Client` held directly (no connection pool wrapper), a base
//! `url::Url` joined with request-specific paths, and `StatusCode`
//! matched directly rather than via `reqwest`'s `.error_for_status()`, so
//! a 404 can be told apart from a real transport failure.
//!
//! AIStore's object API is HTTP GET/HEAD/PUT against
//! `{base_url}/v1/objects/{bucket}/{object}`, and its bucket listing is a
//! POST of a JSON `ListObjectsMsg` action to `{base_url}/v1/buckets/{bucket}`
//! returning a JSON page with a continuation token. The driver below reads
//! only the response headers/fields §6.1 requires (ETag, size, mtime);
//! everything else AIStore's API surfaces is left unparsed.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use msfs_core::driver::{BackendDriver, DriverError, FileStat, ListPage, ListedFile, ReadResult};

/// AIStore REST API driver for one bucket.
pub struct AiStoreDriver {
    client: reqwest::Client,
    base_url: url::Url,
    bucket: String,
    provider: String,
}

impl AiStoreDriver {
    /// Build a driver bound to `bucket`. Recognized `options` keys:
    /// `endpoint` (required — the AIStore gateway base URL), `provider`
    /// (defaults to `"ais"`, matching an on-prem AIStore cluster; set to
    /// `"aws"`/`"gcp"`/`"azure"` for a cloud-backed bucket AIStore fronts).
    pub fn new(bucket: &str, options: &HashMap<String, String>) -> Result<Self, String> {
        let endpoint = options
            .get("endpoint")
            .ok_or_else(|| "aistore driver requires an 'endpoint' option".to_string())?;
        let base_url = url::Url::parse(endpoint).map_err(|e| e.to_string())?;
        let provider = options
            .get("provider")
            .cloned()
            .unwrap_or_else(|| "ais".to_string());
        Ok(AiStoreDriver {
            client: reqwest::Client::new(),
            base_url,
            bucket: bucket.to_string(),
            provider,
        })
    }

    fn object_url(&self, path: &str) -> Result<url::Url, DriverError> {
        self.base_url
            .join(&format!("v1/objects/{}/{}", self.bucket, path))
            .map_err(|e| DriverError::Io {
                path: path.to_string(),
                message: format!("unable to build object URL: {e}"),
            })
    }

    fn bucket_url(&self) -> Result<url::Url, DriverError> {
        self.base_url
            .join(&format!("v1/buckets/{}", self.bucket))
            .map_err(|e| DriverError::Io {
                path: self.bucket.clone(),
                message: format!("unable to build bucket URL: {e}"),
            })
    }
}

/// The subset of AIStore's `ListObjectsMsg` request body this driver sets.
#[derive(Serialize)]
struct ListObjectsRequest<'a> {
    action: &'a str,
    value: ListObjectsValue<'a>,
}

#[derive(Serialize)]
struct ListObjectsValue<'a> {
    prefix: &'a str,
    props: &'a str,
    pagesize: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    continuation_token: Option<&'a str>,
}

/// The subset of AIStore's `BucketList` response this driver reads.
#[derive(Deserialize)]
struct ListObjectsResponse {
    #[serde(default)]
    entries: Vec<ListEntry>,
    #[serde(default)]
    continuation_token: String,
}

#[derive(Deserialize)]
struct ListEntry {
    name: String,
    #[serde(default)]
    checksum: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    atime: String,
}

fn parse_http_date(value: &str) -> SystemTime {
    chrono::DateTime::parse_from_rfc2822(value)
        .map(|dt| SystemTime::from(dt.with_timezone(&chrono::Utc)))
        .unwrap_or(UNIX_EPOCH)
}

fn map_status(path: &str, status: StatusCode) -> DriverError {
    match status {
        StatusCode::NOT_FOUND => DriverError::NotFound {
            path: path.to_string(),
        },
        StatusCode::PRECONDITION_FAILED => DriverError::Stale {
            path: path.to_string(),
        },
        other => DriverError::Io {
            path: path.to_string(),
            message: format!("unexpected status {other}"),
        },
    }
}

#[async_trait]
impl BackendDriver for AiStoreDriver {
    async fn stat_file(&self, path: &str, if_match: Option<&str>) -> Result<FileStat, DriverError> {
        let url = self.object_url(path)?;
        let mut req = self
            .client
            .head(url)
            .query(&[("provider", self.provider.as_str())]);
        if let Some(etag) = if_match {
            req = req.header(reqwest::header::IF_MATCH, etag);
        }
        let resp = req.send().await.map_err(|e| DriverError::Io {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        if !resp.status().is_success() {
            return Err(map_status(path, resp.status()));
        }
        let headers = resp.headers();
        let etag = headers
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let size = headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let mtime = headers
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(parse_http_date)
            .unwrap_or(UNIX_EPOCH);
        Ok(FileStat { etag, mtime, size })
    }

    async fn stat_directory(&self, path: &str) -> Result<(), DriverError> {
        // spec.md §9: the AIStore driver returns NotFound for an
        // empty/never-listed prefix, deliberately inconsistent with the
        // S3 driver's present-directory synthesis.
        let page = self.list_directory(path, 1, None).await?;
        if page.subdirs.is_empty() && page.files.is_empty() {
            Err(DriverError::NotFound {
                path: path.to_string(),
            })
        } else {
            Ok(())
        }
    }

    async fn list_directory(
        &self,
        path: &str,
        max_items: usize,
        cookie: Option<&str>,
    ) -> Result<ListPage, DriverError> {
        let url = self.bucket_url()?;
        let prefix = path.trim_end_matches('/');
        let body = ListObjectsRequest {
            action: "listobjects",
            value: ListObjectsValue {
                prefix,
                props: "name,checksum,size,atime",
                pagesize: max_items,
                continuation_token: cookie,
            },
        };
        let resp = self
            .client
            .post(url)
            .query(&[("provider", self.provider.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| DriverError::Io {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(map_status(path, resp.status()));
        }
        let parsed: ListObjectsResponse = resp.json().await.map_err(|e| DriverError::Io {
            path: path.to_string(),
            message: format!("malformed list response: {e}"),
        })?;

        // AIStore returns every object under `prefix` with full keys, not
        // pre-split into "common prefixes" the way S3's delimiter listing
        // does; the driver performs that split itself, one level below
        // `prefix`, mirroring the core's own merge expectations (spec.md
        // §4.2).
        let mut subdirs = std::collections::BTreeSet::new();
        let mut files = Vec::new();
        for entry in parsed.entries {
            let rel = if prefix.is_empty() {
                entry.name.as_str()
            } else if let Some(stripped) = entry.name.strip_prefix(prefix) {
                stripped.trim_start_matches('/')
            } else {
                continue;
            };
            if rel.is_empty() {
                continue;
            }
            match rel.split_once('/') {
                Some((dir, _)) => {
                    subdirs.insert(format!("{dir}/"));
                }
                None => files.push(ListedFile {
                    basename: rel.to_string(),
                    etag: entry.checksum,
                    mtime: parse_http_date(&entry.atime),
                    size: entry.size,
                }),
            }
        }

        let next_cookie = if parsed.continuation_token.is_empty() {
            None
        } else {
            Some(parsed.continuation_token)
        };

        Ok(ListPage {
            subdirs: subdirs.into_iter().collect(),
            files,
            next_cookie,
        })
    }

    async fn read_file(
        &self,
        path: &str,
        line_number: u64,
        cache_line_size: u64,
        if_match: Option<&str>,
    ) -> Result<ReadResult, DriverError> {
        let url = self.object_url(path)?;
        let start = line_number * cache_line_size;
        let end = start + cache_line_size - 1;

        // AIStore's GET does not honor `If-Match` as a strong precondition
        // the way S3 does (spec.md §4.3 Range handling, §9 "ETag
        // semantics"): emulate it with a HEAD-then-GET. Non-atomic, but
        // the best this driver can do against a server that treats
        // `If-Match` as advisory at best.
        if let Some(expected) = if_match {
            let current = self.stat_file(path, None).await?;
            if current.etag != expected {
                return Err(DriverError::Stale {
                    path: path.to_string(),
                });
            }
        }

        let resp = self
            .client
            .get(url)
            .query(&[("provider", self.provider.as_str())])
            .header(reqwest::header::RANGE, format!("bytes={start}-{end}"))
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| DriverError::Io {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(map_status(path, resp.status()));
        }
        let etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = resp.bytes().await.map_err(|e| DriverError::Io {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(ReadResult {
            etag,
            bytes: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn driver() -> AiStoreDriver {
        let mut options = HashMap::new();
        options.insert("endpoint".to_string(), "http://localhost:8080/".to_string());
        AiStoreDriver::new("data", &options).unwrap()
    }

    #[test]
    fn new_requires_endpoint() {
        let options = HashMap::new();
        assert!(AiStoreDriver::new("data", &options).is_err());
    }

    #[test]
    fn new_defaults_provider_to_ais() {
        let d = driver();
        assert_eq!(d.provider, "ais");
    }

    #[test]
    fn new_honors_explicit_provider() {
        let mut options = HashMap::new();
        options.insert("endpoint".to_string(), "http://localhost:8080/".to_string());
        options.insert("provider".to_string(), "aws".to_string());
        let d = AiStoreDriver::new("data", &options).unwrap();
        assert_eq!(d.provider, "aws");
    }

    #[test]
    fn object_url_joins_bucket_and_path() {
        let d = driver();
        let url = d.object_url("a/b.bin").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/v1/objects/data/a/b.bin");
    }

    #[test]
    fn bucket_url_joins_bucket_name() {
        let d = driver();
        let url = d.bucket_url().unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/v1/buckets/data");
    }

    #[test]
    fn parse_http_date_roundtrips_rfc2822() {
        let t = parse_http_date("Tue, 15 Nov 1994 08:12:31 GMT");
        assert!(t > UNIX_EPOCH);
    }

    #[test]
    fn parse_http_date_falls_back_to_epoch_on_garbage() {
        assert_eq!(parse_http_date("not a date"), UNIX_EPOCH);
    }

    #[test]
    fn map_status_not_found() {
        match map_status("x", StatusCode::NOT_FOUND) {
            DriverError::NotFound { path } => assert_eq!(path, "x"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn map_status_precondition_failed_is_stale() {
        match map_status("x", StatusCode::PRECONDITION_FAILED) {
            DriverError::Stale { path } => assert_eq!(path, "x"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn map_status_other_is_io() {
        match map_status("x", StatusCode::INTERNAL_SERVER_ERROR) {
            DriverError::Io { path, .. } => assert_eq!(path, "x"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
