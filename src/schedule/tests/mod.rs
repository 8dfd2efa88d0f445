use super::*;
use crate::artifacts::{ArtifactAccess, ServedArchive, ServedFile};
use crate::error::{AdapterError, TaskError};
use crate::sandbox::PathSandbox;
use crate::storage::task::SqliteTaskStorage;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::time::sleep;

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    FailFirst(usize),
}

/// Adapter double. URLs containing `panic` or `hang` override the behavior.
struct FakeAdapter {
    behavior: Behavior,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeAdapter {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            gate: None,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn gated(behavior: Behavior, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            gate: Some(gate),
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionAdapter for FakeAdapter {
    fn name(&self) -> &str {
        "fake"
    }

    async fn execute(&self, request: &ExecutionRequest) -> std::result::Result<Value, AdapterError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if request.url.contains("panic") {
            panic!("boom");
        }
        if request.url.contains("hang") {
            std::future::pending::<()>().await;
        }

        let outcome = match self.behavior {
            Behavior::Fail => Err(AdapterError::new("ERROR: Unsupported URL")),
            Behavior::FailFirst(n) if call <= n => Err(AdapterError::new("ERROR: HTTP Error 429")),
            _ => {
                write_outputs(request).await.map(|()| json!({"title": "clip", "ext": "mp4", "id": request.task_id}))
            }
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

// the task directory may already be gone when a test deletes the task mid-run
async fn write_outputs(request: &ExecutionRequest) -> std::result::Result<(), AdapterError> {
    let outputs: [(&str, &[u8]); 2] = [
        ("clip.mp4", b"video bytes"),
        ("clip.en.srt", b"1\n00:00:00,000 --> 00:00:01,000\nhi\n"),
    ];
    for (name, body) in outputs {
        tokio::fs::write(request.target_dir.join(name), body)
            .await
            .map_err(|e| AdapterError::new(e.to_string()))?;
    }
    Ok(())
}

struct Harness {
    dispatcher: JobDispatcher,
    registry: Arc<TaskRegistry>,
    db_url: String,
    dir: TempDir,
}

async fn setup(
    adapter: Arc<FakeAdapter>,
    config: DispatcherConfig,
    relocator: Option<Arc<dyn ArtifactRelocator>>,
) -> Result<Harness> {
    let dir = TempDir::new()?;
    let db_url = format!("sqlite://{}", dir.path().join("data/tasks.db").display());
    let storage = Arc::new(SqliteTaskStorage::new(&db_url).await?);
    let sandbox = Arc::new(PathSandbox::new(dir.path().join("downloads"))?);
    let registry = Arc::new(TaskRegistry::load(storage, sandbox, relocator).await?);
    let dispatcher = JobDispatcher::start(registry.clone(), adapter, config);
    Ok(Harness {
        dispatcher,
        registry,
        db_url,
        dir,
    })
}

fn video(url: &str, label: &str, format: &str) -> SubmitRequest {
    SubmitRequest {
        kind: JobKind::Video,
        url: url.to_string(),
        output_label: label.to_string(),
        params: FormatParams::Video { format: format.to_string() },
    }
}

async fn wait_for_status(registry: &TaskRegistry, task_id: &str, status: TaskStatus) -> Task {
    for _ in 0..500 {
        if let Some(task) = registry.get(task_id).await {
            if task.status == status {
                return task;
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached {}", task_id, status);
}

async fn wait_until<F: Fn() -> bool>(check: F) {
    for _ in 0..500 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

#[tokio::test]
async fn test_video_job_lifecycle_and_archive() -> Result<()> {
    let adapter = FakeAdapter::new(Behavior::Succeed);
    let h = setup(adapter.clone(), DispatcherConfig::default(), None).await?;

    let outcome = h.dispatcher.submit(video("https://media.example/v/1", "L", "best")).await?;
    assert_eq!(outcome.submission, Submission::Created);
    let status = h.registry.get(&outcome.task_id).await.unwrap().status;
    assert!(matches!(status, TaskStatus::Pending | TaskStatus::Running | TaskStatus::Completed));

    let task = wait_for_status(&h.registry, &outcome.task_id, TaskStatus::Completed).await;
    assert_eq!(task.result.as_ref().unwrap()["title"], "clip");
    assert_eq!(task.attempts, 1);
    assert!(task.task_output_path.starts_with(h.dir.path().join("downloads").canonicalize()?.join("L")));

    let access = ArtifactAccess::new(None, Duration::from_secs(60), None);
    let files = access.list_files(&task).await?;
    assert_eq!(files.len(), 2);

    let ServedArchive::Local(archive) = access.serve_archive(&task).await? else {
        panic!("expected a local archive");
    };
    let mut zip = zip::ZipArchive::new(std::fs::File::open(archive.path())?)?;
    assert_eq!(zip.len(), 2);
    let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["clip.en.srt", "clip.mp4"]);
    assert!(zip.by_name("clip.mp4").is_ok());
    Ok(())
}

#[tokio::test]
async fn test_identical_submission_reuses_task() -> Result<()> {
    let adapter = FakeAdapter::new(Behavior::Succeed);
    let h = setup(adapter.clone(), DispatcherConfig::default(), None).await?;

    let first = h.dispatcher.submit(video("https://media.example/v/1", "L", "best")).await?;
    wait_for_status(&h.registry, &first.task_id, TaskStatus::Completed).await;
    let again = h.dispatcher.submit(video(" https://media.example/v/1 ", " L ", "best")).await?;
    assert_eq!(again.task_id, first.task_id);
    assert_eq!(again.submission, Submission::Deduplicated);

    let other_format = h.dispatcher.submit(video("https://media.example/v/1", "L", "worst")).await?;
    let other_label = h.dispatcher.submit(video("https://media.example/v/1", "M", "best")).await?;
    assert_ne!(other_format.task_id, first.task_id);
    assert_ne!(other_label.task_id, first.task_id);
    assert_ne!(other_label.task_id, other_format.task_id);

    wait_for_status(&h.registry, &other_label.task_id, TaskStatus::Completed).await;
    wait_for_status(&h.registry, &other_format.task_id, TaskStatus::Completed).await;
    assert_eq!(adapter.calls(), 3);
    assert_eq!(h.registry.count().await, 3);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_identical_submissions_share_one_task() -> Result<()> {
    let gate = Arc::new(Semaphore::new(0));
    let adapter = FakeAdapter::gated(Behavior::Succeed, gate.clone());
    let h = setup(adapter.clone(), DispatcherConfig::default(), None).await?;

    let submissions = (0..20).map(|_| h.dispatcher.submit(video("https://media.example/v/7", "", "best")));
    let outcomes = futures::future::join_all(submissions).await;

    let first = outcomes[0].as_ref().unwrap().task_id.clone();
    for outcome in &outcomes {
        assert_eq!(outcome.as_ref().unwrap().task_id, first);
    }
    assert_eq!(h.registry.count().await, 1);

    gate.add_permits(1);
    wait_for_status(&h.registry, &first, TaskStatus::Completed).await;
    assert_eq!(adapter.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_label_creates_nothing() -> Result<()> {
    let h = setup(FakeAdapter::new(Behavior::Succeed), DispatcherConfig::default(), None).await?;

    let err = h.dispatcher.submit(video("https://media.example/v/1", "../etc", "best")).await.unwrap_err();
    assert!(matches!(err, TaskError::InvalidInput(_)));
    assert_eq!(h.registry.count().await, 0);
    assert!(!h.dir.path().join("etc").exists());
    assert_eq!(std::fs::read_dir(h.dir.path().join("downloads"))?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_invalid_url_and_params_are_rejected() -> Result<()> {
    let h = setup(FakeAdapter::new(Behavior::Succeed), DispatcherConfig::default(), None).await?;

    let bad_url = h.dispatcher.submit(video("ftp://media.example/v/1", "L", "best")).await;
    assert!(matches!(bad_url, Err(TaskError::InvalidInput(_))));

    let mut mismatch = video("https://media.example/v/1", "L", "best");
    mismatch.kind = JobKind::Audio;
    assert!(matches!(h.dispatcher.submit(mismatch).await, Err(TaskError::InvalidInput(_))));

    let no_subs = SubmitRequest {
        kind: JobKind::Subtitles,
        url: "https://media.example/v/1".into(),
        output_label: "L".into(),
        params: FormatParams::Subtitles {
            languages: vec!["en".into()],
            write_manual: false,
            write_automatic: false,
            convert_to: None,
        },
    };
    assert!(matches!(h.dispatcher.submit(no_subs).await, Err(TaskError::InvalidInput(_))));
    assert_eq!(h.registry.count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_failed_task_is_retried_under_same_id() -> Result<()> {
    let adapter = FakeAdapter::new(Behavior::FailFirst(1));
    let h = setup(adapter.clone(), DispatcherConfig::default(), None).await?;

    let first = h.dispatcher.submit(video("https://media.example/v/2", "L", "best")).await?;
    let failed = wait_for_status(&h.registry, &first.task_id, TaskStatus::Failed).await;
    assert_eq!(failed.error.as_deref(), Some("ERROR: HTTP Error 429"));
    assert!(failed.result.is_none());

    let retry = h.dispatcher.submit(video("https://media.example/v/2", "L", "best")).await?;
    assert_eq!(retry.task_id, first.task_id);
    assert_eq!(retry.submission, Submission::Retried);

    let done = wait_for_status(&h.registry, &first.task_id, TaskStatus::Completed).await;
    assert!(done.error.is_none());
    assert_eq!(done.attempts, 2);
    assert_eq!(h.registry.count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_retry_limit() -> Result<()> {
    let config = DispatcherConfig {
        max_attempts: 2,
        ..DispatcherConfig::default()
    };
    let h = setup(FakeAdapter::new(Behavior::Fail), config, None).await?;
    let request = video("https://media.example/v/3", "L", "best");

    let first = h.dispatcher.submit(request.clone()).await?;
    wait_for_status(&h.registry, &first.task_id, TaskStatus::Failed).await;
    h.dispatcher.submit(request.clone()).await?;
    let failed = wait_for_status(&h.registry, &first.task_id, TaskStatus::Failed).await;
    assert_eq!(failed.attempts, 2);

    match h.dispatcher.submit(request).await {
        Err(TaskError::RetryLimitExceeded { task_id, attempts }) => {
            assert_eq!(task_id, first.task_id);
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected {:?}", other.map(|o| o.task_id)),
    }
    Ok(())
}

#[tokio::test]
async fn test_pool_saturation_keeps_extra_tasks_pending() -> Result<()> {
    let gate = Arc::new(Semaphore::new(0));
    let adapter = FakeAdapter::gated(Behavior::Succeed, gate.clone());
    let config = DispatcherConfig {
        max_workers: 2,
        ..DispatcherConfig::default()
    };
    let h = setup(adapter.clone(), config, None).await?;

    let mut ids = Vec::new();
    for i in 0..5 {
        let url = format!("https://media.example/v/{}", i);
        ids.push(h.dispatcher.submit(video(&url, "L", "best")).await?.task_id);
    }

    wait_until(|| adapter.running.load(Ordering::SeqCst) == 2).await;
    sleep(Duration::from_millis(50)).await;
    let mut pending = 0;
    for id in &ids {
        if h.registry.get(id).await.unwrap().status == TaskStatus::Pending {
            pending += 1;
        }
    }
    assert_eq!(pending, 3);

    gate.add_permits(5);
    for id in &ids {
        wait_for_status(&h.registry, id, TaskStatus::Completed).await;
    }
    assert_eq!(adapter.peak.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_adapter_panic_fails_task_and_worker_survives() -> Result<()> {
    let config = DispatcherConfig {
        max_workers: 1,
        ..DispatcherConfig::default()
    };
    let h = setup(FakeAdapter::new(Behavior::Succeed), config, None).await?;

    let broken = h.dispatcher.submit(video("https://media.example/panic", "L", "best")).await?;
    let failed = wait_for_status(&h.registry, &broken.task_id, TaskStatus::Failed).await;
    assert!(failed.error.unwrap().contains("boom"));

    let fine = h.dispatcher.submit(video("https://media.example/v/ok", "L", "best")).await?;
    wait_for_status(&h.registry, &fine.task_id, TaskStatus::Completed).await;
    Ok(())
}

#[tokio::test]
async fn test_job_timeout_fails_task() -> Result<()> {
    let config = DispatcherConfig {
        job_timeout: Some(Duration::from_millis(100)),
        ..DispatcherConfig::default()
    };
    let h = setup(FakeAdapter::new(Behavior::Succeed), config, None).await?;

    let outcome = h.dispatcher.submit(video("https://media.example/hang", "L", "best")).await?;
    let failed = wait_for_status(&h.registry, &outcome.task_id, TaskStatus::Failed).await;
    assert!(failed.error.unwrap().contains("timed out"));
    Ok(())
}

#[tokio::test]
async fn test_delete_while_running_stays_deleted() -> Result<()> {
    let gate = Arc::new(Semaphore::new(0));
    let adapter = FakeAdapter::gated(Behavior::Succeed, gate.clone());
    let h = setup(adapter.clone(), DispatcherConfig::default(), None).await?;

    let outcome = h.dispatcher.submit(video("https://media.example/v/9", "L", "best")).await?;
    let running = wait_for_status(&h.registry, &outcome.task_id, TaskStatus::Running).await;

    let summary = h.registry.delete(&outcome.task_id).await?;
    assert!(summary.removed_local_path.is_some());
    assert!(!summary.removed_external);
    assert!(!running.task_output_path.exists());

    gate.add_permits(1);
    wait_until(|| adapter.running.load(Ordering::SeqCst) == 0).await;
    sleep(Duration::from_millis(50)).await;

    assert!(h.registry.get(&outcome.task_id).await.is_none());
    let storage = SqliteTaskStorage::new(&h.db_url).await?;
    assert!(storage.get(&outcome.task_id).await?.is_none());

    let again = h.registry.delete(&outcome.task_id).await;
    assert!(matches!(again, Err(TaskError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_registry_refuses_illegal_status_moves() -> Result<()> {
    let dir = TempDir::new()?;
    let db_url = format!("sqlite://{}", dir.path().join("tasks.db").display());
    let storage = Arc::new(SqliteTaskStorage::new(&db_url).await?);
    let sandbox = Arc::new(PathSandbox::new(dir.path().join("downloads"))?);
    let base = sandbox.resolve_base("L")?;
    let registry = TaskRegistry::load(storage.clone(), sandbox, None).await?;

    let task = registry
        .create(JobKind::Video, "https://media.example/v/1", base, FormatParams::Video { format: "best".into() })
        .await?;
    assert!(registry.update(&task.id, |t| t.status = TaskStatus::Completed).await.is_none());
    registry.update(&task.id, Task::mark_running).await.unwrap();
    let completed = registry
        .update(&task.id, |t| t.mark_completed(json!({"title": "clip"})))
        .await
        .unwrap();

    assert!(registry.update(&task.id, |t| t.status = TaskStatus::Pending).await.is_none());
    assert!(registry.update(&task.id, |t| t.mark_failed("late failure")).await.is_none());
    assert!(registry.update(&task.id, Task::mark_running).await.is_none());

    let in_memory = registry.get(&task.id).await.unwrap();
    assert_eq!(in_memory, completed);

    let persisted = Task::try_from(storage.get(&task.id).await?.unwrap())?;
    assert_eq!(persisted.status, TaskStatus::Completed);
    assert_eq!(persisted.attempts, 1);
    assert!(persisted.error.is_none());
    assert_eq!(persisted.result.unwrap()["title"], "clip");

    // unknown ids are ignored without creating a row
    assert!(registry.update("missing", Task::mark_running).await.is_none());
    assert!(storage.get("missing").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_restart_recovery() -> Result<()> {
    let dir = TempDir::new()?;
    let db_url = format!("sqlite://{}", dir.path().join("tasks.db").display());
    let sandbox = Arc::new(PathSandbox::new(dir.path().join("downloads"))?);
    let base = sandbox.resolve_base("L")?;
    let params = FormatParams::Video { format: "best".into() };

    let (running, uploading, pending, completed) = {
        let storage = Arc::new(SqliteTaskStorage::new(&db_url).await?);
        let registry = TaskRegistry::load(storage, sandbox.clone(), None).await?;
        let mut ids = Vec::new();
        for i in 0..4 {
            let url = format!("https://media.example/r/{}", i);
            ids.push(registry.create(JobKind::Video, &url, base.clone(), params.clone()).await?.id);
        }
        registry.update(&ids[0], Task::mark_running).await.unwrap();
        registry.update(&ids[1], Task::mark_running).await.unwrap();
        registry.update(&ids[1], |t| t.status = TaskStatus::Uploading).await.unwrap();
        registry.update(&ids[3], Task::mark_running).await.unwrap();
        registry.update(&ids[3], |t| t.mark_completed(json!({"title": "old"}))).await.unwrap();
        (ids[0].clone(), ids[1].clone(), ids[2].clone(), ids[3].clone())
    };

    let storage = Arc::new(SqliteTaskStorage::new(&db_url).await?);
    let registry = Arc::new(TaskRegistry::load(storage, sandbox, None).await?);
    assert_eq!(registry.count().await, 4);
    let adapter = FakeAdapter::new(Behavior::Succeed);
    let dispatcher = JobDispatcher::start(registry.clone(), adapter.clone(), DispatcherConfig::default());

    let stats = dispatcher.recover().await;
    assert_eq!(stats, RecoveryStats { interrupted: 2, requeued: 1 });

    for id in [&running, &uploading] {
        let task = registry.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some(dispatcher::INTERRUPTED_MESSAGE));
    }
    wait_for_status(&registry, &pending, TaskStatus::Completed).await;
    assert_eq!(registry.get(&completed).await.unwrap().result.unwrap()["title"], "old");
    assert_eq!(adapter.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_relocation_moves_primary_artifact() -> Result<()> {
    let mirror = TempDir::new()?;
    let relocator: Arc<dyn ArtifactRelocator> =
        Arc::new(DirectoryRelocator::new(mirror.path(), "https://cdn.example"));
    let h = setup(FakeAdapter::new(Behavior::Succeed), DispatcherConfig::default(), Some(relocator.clone())).await?;

    let outcome = h.dispatcher.submit(video("https://media.example/v/5", "L", "best")).await?;
    let task = wait_for_status(&h.registry, &outcome.task_id, TaskStatus::Completed).await;

    let external_ref = task.external_artifact_ref.clone().unwrap();
    assert!(external_ref.starts_with(&format!("media/{}/", task.id)));
    assert!(mirror.path().join(&external_ref).is_file());
    let local_name = external_ref.rsplit('/').next().unwrap();
    assert!(!task.task_output_path.join(local_name).exists());

    let access = ArtifactAccess::new(Some(relocator), Duration::from_secs(600), None);
    match access.serve_file(&task, local_name).await? {
        ServedFile::Remote { url, expires_in } => {
            assert!(url.starts_with(&format!("https://cdn.example/{}", external_ref)));
            assert_eq!(expires_in, 600);
        }
        ServedFile::Local(_) => panic!("expected a remote file"),
    }

    // the other output stays local and is served from disk
    let leftover = access.list_files(&task).await?;
    assert_eq!(leftover.len(), 1);
    assert_ne!(leftover[0].name, local_name);
    assert!(matches!(
        access.serve_file(&task, &leftover[0].name).await?,
        ServedFile::Local(ref f) if f.name == leftover[0].name
    ));
    assert!(matches!(
        access.serve_file(&task, "anything").await,
        Err(TaskError::NotFound(_))
    ));

    let summary = h.registry.delete(&task.id).await?;
    assert!(summary.removed_external);
    assert!(!mirror.path().join(&external_ref).exists());
    Ok(())
}

#[tokio::test]
async fn test_relocation_failure_fails_task() -> Result<()> {
    struct BrokenRelocator;

    #[async_trait]
    impl ArtifactRelocator for BrokenRelocator {
        async fn relocate(&self, _: &std::path::Path, _: &str) -> std::result::Result<String, AdapterError> {
            Err(AdapterError::new("bucket unavailable"))
        }
        async fn generate_access(&self, _: &str, _: Duration) -> std::result::Result<String, AdapterError> {
            Err(AdapterError::new("bucket unavailable"))
        }
        async fn remove(&self, _: &str) -> bool {
            false
        }
    }

    let h = setup(
        FakeAdapter::new(Behavior::Succeed),
        DispatcherConfig::default(),
        Some(Arc::new(BrokenRelocator)),
    )
    .await?;
    let outcome = h.dispatcher.submit(video("https://media.example/v/6", "L", "best")).await?;
    let task = wait_for_status(&h.registry, &outcome.task_id, TaskStatus::Failed).await;
    assert_eq!(task.error.as_deref(), Some("bucket unavailable"));
    assert!(task.external_artifact_ref.is_none());
    Ok(())
}

#[tokio::test]
async fn test_shutdown_stops_workers() -> Result<()> {
    let h = setup(FakeAdapter::new(Behavior::Succeed), DispatcherConfig::default(), None).await?;
    h.dispatcher.shutdown().await;

    let outcome = h.dispatcher.submit(video("https://media.example/v/8", "L", "best")).await?;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.registry.get(&outcome.task_id).await.unwrap().status, TaskStatus::Pending);
    Ok(())
}

/// Never finishes on its own. `live` counts jobs whose future is still alive.
struct StuckAdapter {
    live: Arc<AtomicUsize>,
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutionAdapter for StuckAdapter {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn execute(&self, _request: &ExecutionRequest) -> std::result::Result<Value, AdapterError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        let _guard = LiveGuard(self.live.clone());
        std::future::pending::<()>().await;
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn test_shutdown_aborts_running_jobs() -> Result<()> {
    let live = Arc::new(AtomicUsize::new(0));
    let dir = TempDir::new()?;
    let db_url = format!("sqlite://{}", dir.path().join("data/tasks.db").display());
    let storage = Arc::new(SqliteTaskStorage::new(&db_url).await?);
    let sandbox = Arc::new(PathSandbox::new(dir.path().join("downloads"))?);
    let registry = Arc::new(TaskRegistry::load(storage, sandbox, None).await?);
    let adapter = Arc::new(StuckAdapter { live: live.clone() });
    let dispatcher = JobDispatcher::start(registry.clone(), adapter, DispatcherConfig::default());

    let first = dispatcher.submit(video("https://media.example/v/10", "L", "best")).await?;
    let second = dispatcher.submit(video("https://media.example/v/11", "L", "best")).await?;
    wait_for_status(&registry, &first.task_id, TaskStatus::Running).await;
    wait_for_status(&registry, &second.task_id, TaskStatus::Running).await;
    wait_until(|| live.load(Ordering::SeqCst) == 2).await;

    dispatcher.shutdown().await;
    wait_until(|| live.load(Ordering::SeqCst) == 0).await;

    // left for startup recovery
    assert_eq!(registry.get(&first.task_id).await.unwrap().status, TaskStatus::Running);
    assert_eq!(registry.get(&second.task_id).await.unwrap().status, TaskStatus::Running);
    Ok(())
}
