//! End-to-end driver behavior with in-process collaborators.
//!
//! Fetching, chunk work and stitching are faked; planning, dispatch,
//! coordination, retries, stage tracking and cleanup are the real ones.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use fanclip_models::{
    clip_key, final_key, source_key, ChunkResult, ChunkSpec, FinalArtifact, RunId, SourceAsset,
};
use fanclip_storage::{LocalStorage, SharedStorage};
use fanclip_worker::{
    ArtifactStitcher, ChunkError, ChunkErrorKind, ChunkWorker, ChunkWorkerFactory, Dispatcher,
    FetchError, PipelineConfig, PipelineDriver, PipelineError, SourceFetcher, StitchError,
    TailPolicy, TaskPoolDispatcher,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeFetcher {
    storage: Arc<LocalStorage>,
    duration: f64,
    fail: bool,
    delay: Duration,
    calls: AtomicU32,
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, _url: &str, run: &RunId) -> Result<SourceAsset, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(FetchError::DownloadFailed("HTTP Error 503".into()));
        }
        let key = source_key(run, "talk.mp4");
        let local = self.storage.root().join("incoming-source");
        tokio::fs::write(&local, b"source").await?;
        self.storage.put_file(&local, &key).await?;
        Ok(SourceAsset::new(key, self.duration, "talk.mp4"))
    }
}

/// Writes `[index]` as the clip for each chunk.
struct FakeWorker {
    run: RunId,
    storage: Arc<LocalStorage>,
    fail: HashSet<usize>,
    hang: HashSet<usize>,
    delay: fn(usize) -> Duration,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl ChunkWorker for FakeWorker {
    async fn process(&self, spec: ChunkSpec) -> Result<ChunkResult, ChunkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep((self.delay)(spec.index)).await;

        if self.hang.contains(&spec.index) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail.contains(&spec.index) {
            return Err(ChunkError::new(spec.index, ChunkErrorKind::Media, "decode failed"));
        }

        let key = clip_key(&self.run, spec.index, spec.start_seconds);
        let local = self
            .storage
            .root()
            .join(format!("incoming-{}-{}", self.run, spec.index));
        tokio::fs::write(&local, format!("[{}]", spec.index))
            .await
            .map_err(|e| ChunkError::new(spec.index, ChunkErrorKind::Media, e.to_string()))?;
        self.storage
            .put_file(&local, &key)
            .await
            .map_err(|e| ChunkError::storage(spec.index, e))?;

        Ok(ChunkResult {
            index: spec.index,
            artifact_ref: key,
            frame_count: (spec.duration() * 30.0).round() as u64,
            duration_seconds: spec.duration(),
        })
    }
}

struct FakeWorkers {
    storage: Arc<LocalStorage>,
    fail: HashSet<usize>,
    hang: HashSet<usize>,
    delay: fn(usize) -> Duration,
    calls: Arc<AtomicU32>,
}

impl ChunkWorkerFactory for FakeWorkers {
    fn for_run(&self, run: &RunId) -> Arc<dyn ChunkWorker> {
        Arc::new(FakeWorker {
            run: run.clone(),
            storage: Arc::clone(&self.storage),
            fail: self.fail.clone(),
            hang: self.hang.clone(),
            delay: self.delay,
            calls: Arc::clone(&self.calls),
        })
    }
}

/// Concatenates clip bytes in the order given.
struct FakeStitcher {
    storage: Arc<LocalStorage>,
    calls: AtomicU32,
    seen_durations: std::sync::Mutex<Vec<f64>>,
}

#[async_trait]
impl ArtifactStitcher for FakeStitcher {
    async fn stitch(&self, run: &RunId, results: &[ChunkResult]) -> Result<FinalArtifact, StitchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let parts: Vec<_> = results.iter().filter(|r| !r.is_empty()).collect();
        if parts.is_empty() {
            return Err(StitchError::NothingToStitch);
        }

        let mut bytes = Vec::new();
        for part in &parts {
            bytes.extend(self.storage.read_bytes(&part.artifact_ref).await?);
        }
        if let Ok(mut seen) = self.seen_durations.lock() {
            seen.extend(parts.iter().map(|p| p.duration_seconds));
        }

        let key = final_key(run);
        let local = self.storage.root().join(format!("incoming-final-{run}"));
        tokio::fs::write(&local, &bytes).await?;
        self.storage.put_file(&local, &key).await?;
        Ok(FinalArtifact::new(key, bytes))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _dir: TempDir,
    storage: Arc<LocalStorage>,
    fetcher: Arc<FakeFetcher>,
    worker_calls: Arc<AtomicU32>,
    stitcher: Arc<FakeStitcher>,
    driver: PipelineDriver,
}

struct Setup {
    duration: f64,
    fetch_fails: bool,
    fetch_delay: Duration,
    fail: Vec<usize>,
    hang: Vec<usize>,
    delay: fn(usize) -> Duration,
    configure: fn(&mut PipelineConfig),
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            duration: 3.0,
            fetch_fails: false,
            fetch_delay: Duration::ZERO,
            fail: Vec::new(),
            hang: Vec::new(),
            delay: |_| Duration::ZERO,
            configure: |_| {},
        }
    }
}

async fn harness(setup: Setup) -> Harness {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(LocalStorage::open(dir.path().join("storage")).await.unwrap());

    let mut config = PipelineConfig {
        work_dir: dir.path().join("work"),
        max_parallel_chunks: 4,
        max_retries: 0,
        retry_base_delay: Duration::from_millis(1),
        ..PipelineConfig::default()
    };
    (setup.configure)(&mut config);

    let fetcher = Arc::new(FakeFetcher {
        storage: Arc::clone(&storage),
        duration: setup.duration,
        fail: setup.fetch_fails,
        delay: setup.fetch_delay,
        calls: AtomicU32::new(0),
    });
    let worker_calls = Arc::new(AtomicU32::new(0));
    let workers = Arc::new(FakeWorkers {
        storage: Arc::clone(&storage),
        fail: setup.fail.into_iter().collect(),
        hang: setup.hang.into_iter().collect(),
        delay: setup.delay,
        calls: Arc::clone(&worker_calls),
    });
    let stitcher = Arc::new(FakeStitcher {
        storage: Arc::clone(&storage),
        calls: AtomicU32::new(0),
        seen_durations: std::sync::Mutex::new(Vec::new()),
    });
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(TaskPoolDispatcher::from_config(&config));

    let driver = PipelineDriver::new(
        config,
        storage.clone(),
        fetcher.clone(),
        dispatcher,
        workers,
        stitcher.clone(),
    );

    Harness {
        _dir: dir,
        storage,
        fetcher,
        worker_calls,
        stitcher,
        driver,
    }
}

fn runs_left(root: &Path) -> usize {
    std::fs::read_dir(root.join("runs"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_a_three_one_second_chunks() {
    let h = harness(Setup::default()).await;

    let output = h.driver.run("https://example.com/v").await.unwrap();

    assert_eq!(output.source_name, "talk.mp4");
    assert_eq!(output.chunks, 3);
    assert_eq!(output.attempts, 1);
    assert_eq!(output.artifact.bytes, b"[0][1][2]");
    assert_eq!(output.artifact.reference, final_key(&output.run_id));
    assert_eq!(h.worker_calls.load(Ordering::SeqCst), 3);
    // Run namespace removed after the attempt.
    assert_eq!(runs_left(h.storage.root()), 0);
}

#[tokio::test]
async fn scenario_b_one_chunk_fails() {
    let h = harness(Setup {
        fail: vec![1],
        ..Setup::default()
    })
    .await;

    let err = h.driver.run("https://example.com/v").await.unwrap_err();

    match &err {
        PipelineError::ChunksFailed { indices, errors } => {
            assert_eq!(indices, &vec![1]);
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].kind, ChunkErrorKind::Media);
        }
        other => panic!("expected ChunksFailed, got {other}"),
    }
    assert_eq!(err.failed_indices(), vec![1]);
    assert_eq!(h.stitcher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(runs_left(h.storage.root()), 0);
}

#[tokio::test]
async fn scenario_b_every_failure_is_listed() {
    let h = harness(Setup {
        duration: 6.0,
        fail: vec![4, 0, 2],
        ..Setup::default()
    })
    .await;

    let err = h.driver.run("https://example.com/v").await.unwrap_err();
    assert_eq!(err.failed_indices(), vec![0, 2, 4]);
    // Siblings still ran to completion.
    assert_eq!(h.worker_calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn scenario_c_short_source_include_partial() {
    let h = harness(Setup {
        duration: 0.4,
        ..Setup::default()
    })
    .await;

    let output = h.driver.run("https://example.com/v").await.unwrap();
    assert_eq!(output.chunks, 1);
    assert_eq!(output.artifact.bytes, b"[0]");

    let seen = h.stitcher.seen_durations.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert!((seen[0] - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn scenario_c_short_source_truncate() {
    let h = harness(Setup {
        duration: 0.4,
        configure: |c| c.tail_policy = TailPolicy::Truncate,
        ..Setup::default()
    })
    .await;

    let err = h.driver.run("https://example.com/v").await.unwrap_err();
    assert!(matches!(err, PipelineError::Stitch(StitchError::NothingToStitch)));
    assert_eq!(h.worker_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_d_fetch_fails_on_every_attempt() {
    let h = harness(Setup {
        fetch_fails: true,
        configure: |c| c.max_retries = 2,
        ..Setup::default()
    })
    .await;

    let err = h.driver.run("https://example.com/v").await.unwrap_err();

    assert!(matches!(err, PipelineError::Fetch(FetchError::DownloadFailed(_))));
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.worker_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.stitcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retry_uses_a_fresh_run_each_attempt() {
    let h = harness(Setup {
        fail: vec![2],
        configure: |c| c.max_retries = 1,
        ..Setup::default()
    })
    .await;

    let err = h.driver.run("https://example.com/v").await.unwrap_err();
    assert_eq!(err.failed_indices(), vec![2]);
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.worker_calls.load(Ordering::SeqCst), 6);
    assert_eq!(runs_left(h.storage.root()), 0);
}

// ---------------------------------------------------------------------------
// Ordering, stitching, timeouts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn order_survives_reverse_completion() {
    let h = harness(Setup {
        duration: 8.0,
        // Later chunks finish first.
        delay: |i| Duration::from_millis((8 - i as u64) * 15),
        configure: |c| c.max_parallel_chunks = 8,
        ..Setup::default()
    })
    .await;

    let output = h.driver.run("https://example.com/v").await.unwrap();
    assert_eq!(output.artifact.bytes, b"[0][1][2][3][4][5][6][7]");
}

#[tokio::test]
async fn order_survives_scrambled_completion() {
    let h = harness(Setup {
        duration: 16.0,
        delay: |i| Duration::from_millis(((i as u64 * 7919 + 13) % 17) * 4),
        configure: |c| c.max_parallel_chunks = 5,
        ..Setup::default()
    })
    .await;

    let output = h.driver.run("https://example.com/v").await.unwrap();
    let expected: String = (0..16).map(|i| format!("[{i}]")).collect();
    assert_eq!(output.artifact.bytes, expected.into_bytes());
}

#[tokio::test]
async fn stitched_duration_is_sum_of_chunks() {
    let h = harness(Setup {
        duration: 12.5,
        configure: |c| c.chunk_length_secs = 2.5,
        ..Setup::default()
    })
    .await;

    let output = h.driver.run("https://example.com/v").await.unwrap();
    assert_eq!(output.chunks, 5);

    let seen = h.stitcher.seen_durations.lock().unwrap().clone();
    let total: f64 = seen.iter().sum();
    assert!((total - 5.0 * 2.5).abs() < 1e-9);
}

#[tokio::test]
async fn chunk_timeout_fails_only_that_chunk() {
    let h = harness(Setup {
        duration: 4.0,
        hang: vec![2],
        configure: |c| c.chunk_timeout = Duration::from_millis(200),
        ..Setup::default()
    })
    .await;

    let err = h.driver.run("https://example.com/v").await.unwrap_err();
    match err {
        PipelineError::ChunksFailed { indices, errors } => {
            assert_eq!(indices, vec![2]);
            assert_eq!(errors[0].kind, ChunkErrorKind::Timeout);
        }
        other => panic!("expected ChunksFailed, got {other}"),
    }
}

#[tokio::test]
async fn run_timeout_bounds_an_attempt() {
    let h = harness(Setup {
        fetch_delay: Duration::from_secs(30),
        configure: |c| c.run_timeout = Some(Duration::from_millis(100)),
        ..Setup::default()
    })
    .await;

    let err = h.driver.run("https://example.com/v").await.unwrap_err();
    assert!(matches!(err, PipelineError::Timeout(_)));
    assert_eq!(h.worker_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn keep_artifacts_leaves_run_namespace() {
    let h = harness(Setup {
        configure: |c| c.keep_artifacts = true,
        ..Setup::default()
    })
    .await;

    let output = h.driver.run("https://example.com/v").await.unwrap();
    assert_eq!(runs_left(h.storage.root()), 1);
    for (index, start) in [0.0, 1.0, 2.0].into_iter().enumerate() {
        assert!(h
            .storage
            .exists(&clip_key(&output.run_id, index, start))
            .await
            .unwrap());
    }
    assert!(h.storage.exists(&final_key(&output.run_id)).await.unwrap());
}
