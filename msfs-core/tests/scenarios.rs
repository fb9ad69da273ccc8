//! End-to-end scenarios (spec.md §8) driven entirely through the public
//! `Core`/`Runtime` facade against an in-memory backend double, with no
//! real object storage involved.

use std::collections::HashMap;
use std::sync::Arc;

use msfs_core::test_support::MemoryBackend;
use msfs_core::{BackendDriver, BackendSpec, Core, CoreConfig, Error, Runtime, ROOT_INO};

fn backend_spec(dir_name: &str) -> BackendSpec {
    BackendSpec {
        dir_name: dir_name.to_string(),
        driver: "memory".to_string(),
        bucket: "test".to_string(),
        prefix: String::new(),
        trace_level: 0,
        options: HashMap::new(),
    }
}

/// Build a `Core` with one backend registered under `dir_name`, and return
/// the inode number of that backend's synthetic root directory.
async fn mount_one(config: CoreConfig, dir_name: &str, backend: Arc<MemoryBackend>) -> (Core, u64) {
    let runtime = Arc::new(Runtime::new(config).expect("valid config"));
    runtime
        .register_backend(backend_spec(dir_name), backend as Arc<dyn BackendDriver>)
        .expect("first registration of a fresh dir_name always succeeds");
    let core = Core::new(runtime);
    let attrs = core
        .lookup(ROOT_INO, dir_name)
        .await
        .expect("backend root resolves under mount root");
    (core, attrs.ino)
}

/// Scenario 1: concurrent readers of the same never-before-read cache line
/// coalesce onto a single backend fetch.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_1_concurrent_reads_coalesce_onto_one_fetch() {
    let line_size = 64 * 1024;
    let mem = Arc::new(MemoryBackend::new());
    mem.put("big.bin", vec![7u8; line_size as usize]);

    let config = CoreConfig {
        cache_line_size: line_size,
        cache_lines: 8,
        prefetch_window: 0,
        auto_reload_interval: None,
    };
    let (core, backend_root) = mount_one(config, "b1", mem.clone()).await;

    let attrs = core.lookup(backend_root, "big.bin").await.unwrap();
    let handle = core.open(attrs.ino).await.unwrap();

    // Hold the fetch open so every spawned reader has a chance to attach
    // as a waiter on the same Inbound line before any of them observe it
    // complete.
    mem.close_gate("big.bin");

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let core = core.clone();
        tasks.push(tokio::spawn(
            async move { core.read(&handle, 0, line_size).await.unwrap() },
        ));
    }
    // Let every spawned task actually run far enough to register as a
    // waiter before releasing the gate.
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
    mem.open_gate("big.bin");

    for task in tasks {
        let bytes = task.await.expect("reader task did not panic");
        assert_eq!(bytes.len(), line_size as usize);
        assert!(bytes.iter().all(|&b| b == 7));
    }

    assert_eq!(
        mem.read_calls("big.bin"),
        1,
        "ten concurrent readers of the same never-fetched line must coalesce onto one backend call"
    );
    assert_eq!(core.runtime().clean_count(), 1);
}

/// Scenario 2: eviction under capacity. `cache_lines=2`, three single-line
/// files read A, B, C, then A again; the resident set settles at `{C, A}`
/// with B evicted, and A incurs a second backend fetch on its reread.
#[tokio::test]
async fn scenario_2_eviction_under_capacity() {
    let line_size = 4096;
    let mem = Arc::new(MemoryBackend::new());
    for name in ["a", "b", "c"] {
        mem.put(name, vec![1u8; line_size as usize]);
    }

    let config = CoreConfig {
        cache_line_size: line_size,
        cache_lines: 2,
        prefetch_window: 0,
        auto_reload_interval: None,
    };
    let (core, backend_root) = mount_one(config, "b1", mem.clone()).await;

    let mut ino = HashMap::new();
    let mut handle = HashMap::new();
    for name in ["a", "b", "c"] {
        let attrs = core.lookup(backend_root, name).await.unwrap();
        ino.insert(name, attrs.ino);
        handle.insert(name, core.open(attrs.ino).await.unwrap());
    }

    core.read(&handle["a"], 0, line_size).await.unwrap();
    core.read(&handle["b"], 0, line_size).await.unwrap();
    core.read(&handle["c"], 0, line_size).await.unwrap();
    assert_eq!(core.runtime().clean_count(), 2, "capacity is never exceeded");
    core.read(&handle["a"], 0, line_size).await.unwrap();

    assert_eq!(mem.read_calls("a"), 2, "a was evicted and had to be refetched");
    assert_eq!(mem.read_calls("b"), 1, "b is the one that got evicted");
    assert_eq!(mem.read_calls("c"), 1);
    assert_eq!(core.runtime().clean_count(), 2);
    assert_eq!(
        core.runtime().least_recently_used_clean_line(),
        Some((ino["c"], 0)),
        "resident set is {{c, a}} with c now the least recently used"
    );
}

/// Scenario 3: the backend mutates an object after `open` but before the
/// first `read`; the stale fetch fails with `Stale`, the error is sticky
/// for that handle, and a fresh `open` observes the new content.
#[tokio::test]
async fn scenario_3_etag_precondition_failure_is_sticky_until_reopen() {
    let line_size = 16;
    let mem = Arc::new(MemoryBackend::new());
    mem.put("f", vec![1u8; line_size as usize]);

    let config = CoreConfig {
        cache_line_size: line_size,
        cache_lines: 8,
        prefetch_window: 0,
        auto_reload_interval: None,
    };
    let (core, backend_root) = mount_one(config, "b1", mem.clone()).await;

    let attrs = core.lookup(backend_root, "f").await.unwrap();
    let stale_handle = core.open(attrs.ino).await.unwrap();

    // The object changes underneath the already-open handle.
    mem.put("f", vec![2u8; line_size as usize]);

    let err = core.read(&stale_handle, 0, line_size).await.unwrap_err();
    assert!(matches!(err, Error::Stale { ino } if ino == attrs.ino));

    // The error is sticky: rereading through the same stale handle fails
    // the same way, without ever serving the new bytes through it.
    let err_again = core.read(&stale_handle, 0, line_size).await.unwrap_err();
    assert!(matches!(err_again, Error::Stale { ino } if ino == attrs.ino));

    // A fresh open re-stats the file and picks up the new etag; reads
    // through the new handle succeed and observe the new content.
    let fresh_handle = core.open(attrs.ino).await.unwrap();
    let bytes = core.read(&fresh_handle, 0, line_size).await.unwrap();
    assert!(bytes.iter().all(|&b| b == 2));
}

/// Scenario 4: removing a backend while one of its fetches is still in
/// flight does not deadlock and does not panic; the in-flight reader sees
/// its handle's inode disappear out from under it.
#[tokio::test]
async fn scenario_4_reconfigure_remove_with_in_flight_fetch() {
    use msfs_core::reconfigure::{DriverFactory, ReconfigurationDriver};

    struct NeverFactory;
    #[async_trait::async_trait]
    impl DriverFactory for NeverFactory {
        async fn build(&self, _spec: &BackendSpec) -> Result<Arc<dyn BackendDriver>, String> {
            unreachable!("this scenario only removes backends")
        }
    }

    let line_size = 16;
    let mem = Arc::new(MemoryBackend::new());
    mem.put("f", vec![1u8; line_size as usize]);
    mem.close_gate("f");

    let config = CoreConfig {
        cache_line_size: line_size,
        cache_lines: 8,
        prefetch_window: 0,
        auto_reload_interval: None,
    };
    let (core, backend_root) = mount_one(config, "b1", mem.clone()).await;
    let attrs = core.lookup(backend_root, "f").await.unwrap();
    let handle = core.open(attrs.ino).await.unwrap();

    let reader_core = core.clone();
    let reader = tokio::spawn(async move { reader_core.read(&handle, 0, line_size).await });
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }

    let driver = ReconfigurationDriver::new(core.runtime().clone());
    let report = driver.reload(&[], &NeverFactory).await;
    assert_eq!(report.removed, vec!["b1".to_string()]);
    assert!(core.runtime().backend_names().is_empty());

    // The stuck reader must be woken promptly, even though its fetch will
    // never complete (the gate release below is only to let the orphaned
    // fetch worker itself finish tidily, not to unblock the reader).
    let result = tokio::time::timeout(std::time::Duration::from_secs(5), reader)
        .await
        .expect("reader must not hang after its backend is removed")
        .expect("reader task did not panic");
    assert!(result.is_err(), "the inode is gone by the time the reader wakes");

    mem.open_gate("f");
}

/// Scenario 5: a read schedules prefetch for the configured number of
/// subsequent lines.
#[tokio::test]
async fn scenario_5_read_schedules_sequential_prefetch() {
    let line_size = 16;
    let mem = Arc::new(MemoryBackend::new());
    mem.put("f", vec![9u8; (line_size * 4) as usize]);

    let config = CoreConfig {
        cache_line_size: line_size,
        cache_lines: 8,
        prefetch_window: 2,
        auto_reload_interval: None,
    };
    let (core, backend_root) = mount_one(config, "b1", mem.clone()).await;
    let attrs = core.lookup(backend_root, "f").await.unwrap();
    let handle = core.open(attrs.ino).await.unwrap();

    core.read(&handle, 0, line_size).await.unwrap();

    // Prefetch is scheduled under the same lock acquisition as the read
    // itself but completes on spawned tasks; give them a chance to land.
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        core.runtime().clean_count(),
        3,
        "line 0 plus a two-line prefetch window should all be resident"
    );
}

/// Scenario 6: directory listings merge a backend's subdirectories and
/// files into one case-sensitive lexicographic order, files before
/// directories on a name tie.
#[tokio::test]
async fn scenario_6_directory_listing_merge_order() {
    let mem = Arc::new(MemoryBackend::new());
    mem.put("b", b"b".to_vec());
    mem.put("a/inner", b"inner".to_vec());
    mem.put("Z", b"z".to_vec());

    let config = CoreConfig {
        cache_line_size: 4096,
        cache_lines: 8,
        prefetch_window: 0,
        auto_reload_interval: None,
    };
    let (core, backend_root) = mount_one(config, "b1", mem.clone()).await;

    let dir = core.opendir(backend_root).await.unwrap();
    let names: Vec<(String, bool)> = core
        .readdir(&dir, 0)
        .iter()
        .map(|e| (e.name.clone(), e.is_directory))
        .collect();

    assert_eq!(
        names,
        vec![
            (".".to_string(), true),
            ("..".to_string(), true),
            ("Z".to_string(), false),
            ("a".to_string(), true),
            ("b".to_string(), false),
        ],
        "case-sensitive lexicographic order, ASCII uppercase sorts first"
    );
}

/// Boundary: a zero-byte object's only line lies entirely at end-of-object;
/// `read` must return zero bytes rather than treat the line as missing.
#[tokio::test]
async fn read_of_zero_byte_object_returns_zero_bytes() {
    let line_size = 4096;
    let mem = Arc::new(MemoryBackend::new());
    mem.put("empty", Vec::<u8>::new());

    let config = CoreConfig {
        cache_line_size: line_size,
        cache_lines: 8,
        prefetch_window: 0,
        auto_reload_interval: None,
    };
    let (core, backend_root) = mount_one(config, "b1", mem.clone()).await;
    let attrs = core.lookup(backend_root, "empty").await.unwrap();
    assert_eq!(attrs.size, 0);
    let handle = core.open(attrs.ino).await.unwrap();

    let bytes = core.read(&handle, 0, line_size).await.unwrap();
    assert!(bytes.is_empty());
}

/// Boundary: reading starting exactly at end-of-object (offset == size)
/// must return zero bytes, not panic.
#[tokio::test]
async fn read_at_offset_equal_to_size_returns_zero_bytes() {
    let line_size = 16;
    let mem = Arc::new(MemoryBackend::new());
    mem.put("f", vec![1u8; line_size as usize]);

    let config = CoreConfig {
        cache_line_size: line_size,
        cache_lines: 8,
        prefetch_window: 0,
        auto_reload_interval: None,
    };
    let (core, backend_root) = mount_one(config, "b1", mem.clone()).await;
    let attrs = core.lookup(backend_root, "f").await.unwrap();
    let handle = core.open(attrs.ino).await.unwrap();

    let bytes = core.read(&handle, line_size, line_size).await.unwrap();
    assert!(bytes.is_empty());
}

/// Boundary: a read whose range runs past end-of-object is truncated to
/// the bytes that actually exist; the fully-past-EOF line it also touches
/// must contribute nothing rather than panic.
#[tokio::test]
async fn read_spanning_past_end_of_object_is_eof_truncated() {
    let line_size = 16;
    let mem = Arc::new(MemoryBackend::new());
    mem.put("f", vec![5u8; line_size as usize]);

    let config = CoreConfig {
        cache_line_size: line_size,
        cache_lines: 8,
        prefetch_window: 0,
        auto_reload_interval: None,
    };
    let (core, backend_root) = mount_one(config, "b1", mem.clone()).await;
    let attrs = core.lookup(backend_root, "f").await.unwrap();
    let handle = core.open(attrs.ino).await.unwrap();

    let bytes = core.read(&handle, 0, line_size * 2).await.unwrap();
    assert_eq!(bytes, vec![5u8; line_size as usize]);
}

/// Boundary: `cache_lines = 1` must still service a read spanning several
/// lines of the same object. Every line is scheduled `Inbound` up front;
/// as each fetch completes it must not evict an earlier line of this same
/// read before the assembly loop copies its bytes out.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_cache_line_capacity_services_multi_line_read() {
    let line_size = 16;
    let mem = Arc::new(MemoryBackend::new());
    let total = (line_size * 3) as usize;
    let content: Vec<u8> = (0..total).map(|i| (i % 256) as u8).collect();
    mem.put("f", content.clone());

    let config = CoreConfig {
        cache_line_size: line_size,
        cache_lines: 1,
        prefetch_window: 0,
        auto_reload_interval: None,
    };
    let (core, backend_root) = mount_one(config, "b1", mem.clone()).await;
    let attrs = core.lookup(backend_root, "f").await.unwrap();
    let handle = core.open(attrs.ino).await.unwrap();

    let bytes = core.read(&handle, 0, line_size * 3).await.unwrap();
    assert_eq!(bytes, content);
}
