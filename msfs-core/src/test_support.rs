//! A deterministic in-memory [`BackendDriver`] test double.
//!
//! Lets `#[cfg(test)]` code and the `tests/` scenario suite exercise the
//! cache engine's coalescing, eviction, and staleness behavior (spec.md
//! §8) without any real object storage, and without relying on real wall
//! clock timing to create a race window: callers can hold a path's fetch
//! open with [`MemoryBackend::close_gate`] while they spawn concurrent
//! readers, then release it with [`MemoryBackend::open_gate`] once every
//! reader has had a chance to attach as a waiter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::driver::{BackendDriver, DriverError, FileStat, ListPage, ListedFile, ReadResult};

struct Object {
    bytes: Vec<u8>,
    etag: String,
    mtime: SystemTime,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Object>,
    gates: HashMap<String, Arc<Notify>>,
    read_calls: HashMap<String, u64>,
}

/// An in-memory object store standing in for a real S3-compatible or
/// AIStore endpoint in tests.
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    next_etag: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// An empty backend.
    pub fn new() -> Self {
        MemoryBackend {
            inner: Mutex::new(Inner::default()),
            next_etag: AtomicU64::new(1),
        }
    }

    /// Insert or replace an object, assigning it a fresh ETag (so
    /// re-inserting the same path simulates the backend mutating the
    /// object underneath an open handle, spec.md §8 scenario 3).
    pub fn put(&self, path: &str, bytes: impl Into<Vec<u8>>) {
        let etag = format!("etag-{}", self.next_etag.fetch_add(1, Ordering::SeqCst));
        let mut inner = self.inner.lock();
        inner.objects.insert(
            path.to_string(),
            Object {
                bytes: bytes.into(),
                etag,
                mtime: SystemTime::now(),
            },
        );
    }

    /// The ETag currently recorded for `path`, if it exists.
    pub fn etag_of(&self, path: &str) -> Option<String> {
        self.inner.lock().objects.get(path).map(|o| o.etag.clone())
    }

    /// Number of `read_file` calls observed for `path` so far.
    pub fn read_calls(&self, path: &str) -> u64 {
        self.inner
            .lock()
            .read_calls
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Close the gate for `path`: any `read_file` call against it blocks
    /// until [`Self::open_gate`] is called. Use to force concurrent
    /// readers to coalesce onto the same in-flight fetch.
    pub fn close_gate(&self, path: &str) {
        let mut inner = self.inner.lock();
        inner
            .gates
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Notify::new()));
    }

    /// Release a previously-closed gate, letting any blocked (and all
    /// future) `read_file` calls against `path` proceed.
    pub fn open_gate(&self, path: &str) {
        let gate = self.inner.lock().gates.remove(path);
        if let Some(gate) = gate {
            gate.notify_waiters();
        }
    }

    async fn wait_for_gate(&self, path: &str) {
        let gate = self.inner.lock().gates.get(path).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl BackendDriver for MemoryBackend {
    async fn stat_file(&self, path: &str, if_match: Option<&str>) -> Result<FileStat, DriverError> {
        let inner = self.inner.lock();
        let object = inner.objects.get(path).ok_or_else(|| DriverError::NotFound {
            path: path.to_string(),
        })?;
        if let Some(expected) = if_match {
            if expected != object.etag {
                return Err(DriverError::Stale {
                    path: path.to_string(),
                });
            }
        }
        Ok(FileStat {
            etag: object.etag.clone(),
            mtime: object.mtime,
            size: object.bytes.len() as u64,
        })
    }

    async fn stat_directory(&self, path: &str) -> Result<(), DriverError> {
        let prefix = path.trim_end_matches('/');
        let inner = self.inner.lock();
        let has_children = inner.objects.keys().any(|key| {
            if prefix.is_empty() {
                true
            } else {
                key.starts_with(prefix) && key[prefix.len()..].starts_with('/')
            }
        });
        if has_children {
            Ok(())
        } else {
            Err(DriverError::NotFound {
                path: path.to_string(),
            })
        }
    }

    async fn list_directory(
        &self,
        path: &str,
        max_items: usize,
        cookie: Option<&str>,
    ) -> Result<ListPage, DriverError> {
        let prefix = path.trim_end_matches('/');
        let inner = self.inner.lock();

        let mut subdirs = std::collections::BTreeSet::new();
        let mut files = Vec::new();
        for (key, object) in inner.objects.iter() {
            let rel = if prefix.is_empty() {
                Some(key.as_str())
            } else if key.starts_with(prefix) && key[prefix.len()..].starts_with('/') {
                Some(&key[prefix.len() + 1..])
            } else {
                None
            };
            let Some(rel) = rel else { continue };
            if rel.is_empty() {
                continue;
            }
            match rel.split_once('/') {
                Some((dir, _)) => {
                    subdirs.insert(format!("{dir}/"));
                }
                None => files.push(ListedFile {
                    basename: rel.to_string(),
                    etag: object.etag.clone(),
                    mtime: object.mtime,
                    size: object.bytes.len() as u64,
                }),
            }
        }

        let mut subdirs: Vec<String> = subdirs.into_iter().collect();
        files.sort_by(|a, b| a.basename.cmp(&b.basename));
        subdirs.sort();

        // Paginate the combined, sorted entry stream one unit at a time
        // per page when max_items demands it, exercising the same
        // multi-page merge path a real delimited listing would.
        let mut combined: Vec<(bool, String)> = subdirs
            .iter()
            .map(|s| (true, s.clone()))
            .chain(files.iter().map(|f| (false, f.basename.clone())))
            .collect();
        combined.sort_by(|a, b| a.1.cmp(&b.1));

        let start: usize = cookie.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + max_items).min(combined.len());
        let page = &combined[start.min(combined.len())..end];

        let mut page_subdirs = Vec::new();
        let mut page_files = Vec::new();
        for (is_dir, name) in page {
            if *is_dir {
                page_subdirs.push(name.clone());
            } else {
                page_files.push(
                    files
                        .iter()
                        .find(|f| &f.basename == name)
                        .cloned()
                        .expect("name drawn from files"),
                );
            }
        }

        let next_cookie = if end < combined.len() {
            Some(end.to_string())
        } else {
            None
        };

        if combined.is_empty() && start == 0 {
            return Err(DriverError::NotFound {
                path: path.to_string(),
            });
        }

        Ok(ListPage {
            subdirs: page_subdirs,
            files: page_files,
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
        self.wait_for_gate(path).await;

        let mut inner = self.inner.lock();
        *inner.read_calls.entry(path.to_string()).or_insert(0) += 1;
        let object = inner.objects.get(path).ok_or_else(|| DriverError::NotFound {
            path: path.to_string(),
        })?;
        if let Some(expected) = if_match {
            if expected != object.etag {
                return Err(DriverError::Stale {
                    path: path.to_string(),
                });
            }
        }
        let start = (line_number * cache_line_size) as usize;
        if start >= object.bytes.len() {
            return Ok(ReadResult {
                etag: object.etag.clone(),
                bytes: Vec::new(),
            });
        }
        let end = (start + cache_line_size as usize).min(object.bytes.len());
        Ok(ReadResult {
            etag: object.etag.clone(),
            bytes: object.bytes[start..end].to_vec(),
        })
    }
}
