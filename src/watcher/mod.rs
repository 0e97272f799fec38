//! Drop-folder job watcher.
//!
//! A scanner task walks the watch directory on an interval and feeds fresh
//! descriptor paths into a channel; the watcher consumes the channel, claims
//! each path in an in-flight set, and runs the job in its own task. Tests
//! bypass the scanner and feed the channel directly.

pub mod job;

pub use job::{JobDescriptor, JobError, archive_export, is_job_file};

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthError, TokenValidator};
use crate::config::WatcherConfig;
use crate::error::AppError;
use crate::pipeline::Pipeline;

/// Spawn the directory scanner feeding descriptor paths into `tx`.
///
/// Walks `dir` recursively every `interval`, skipping the `skip` subtree
/// (the archive usually lives under the watch directory). Each descriptor
/// is emitted once; a path is forgotten when it disappears from disk, so
/// re-dropping the same filename triggers a fresh event.
pub fn spawn_scanner(
    dir: PathBuf,
    skip: PathBuf,
    interval: Duration,
    tx: UnboundedSender<PathBuf>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let mut found = Vec::new();
            collect_job_files(&dir, &skip, &mut found);
            seen.retain(|path| path.exists());
            for path in found {
                if seen.insert(path.clone()) {
                    debug!(descriptor = %path.display(), "Discovered job descriptor");
                    if tx.send(path).is_err() {
                        return;
                    }
                }
            }
        }
    })
}

fn collect_job_files(dir: &Path, skip: &Path, found: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to read watch directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path != skip {
                collect_job_files(&path, skip, found);
            }
        } else if is_job_file(&path) {
            found.push(path);
        }
    }
}

/// Consumes descriptor events and drives each job to completion.
///
/// A path is claimed in the in-flight set before its task spawns, so
/// duplicate notifications for the same descriptor are dropped until the
/// running job finishes.
#[derive(Clone)]
pub struct JobWatcher {
    processed_dir: PathBuf,
    debounce: Duration,
    validator: Arc<TokenValidator>,
    pipeline: Arc<Pipeline>,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl JobWatcher {
    pub fn new(
        config: &WatcherConfig,
        validator: Arc<TokenValidator>,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        Self {
            processed_dir: config.processed_dir.clone(),
            debounce: config.debounce(),
            validator,
            pipeline,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Consume descriptor events until the channel closes or `shutdown`
    /// resolves. Jobs already spawned keep running either way.
    pub async fn run(self, mut events: UnboundedReceiver<PathBuf>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                maybe_path = events.recv() => {
                    match maybe_path {
                        Some(path) => self.dispatch(path).await,
                        None => {
                            info!("Descriptor channel closed, stopping watcher");
                            return;
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping watcher");
                    return;
                }
            }
        }
    }

    /// Claim the path and spawn its job task. Duplicates are dropped here.
    async fn dispatch(&self, path: PathBuf) {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(path.clone()) {
                debug!(descriptor = %path.display(), "Job already in flight, ignoring duplicate event");
                return;
            }
        }

        let watcher = self.clone();
        tokio::spawn(async move {
            // Give the producer time to finish writing the descriptor.
            tokio::time::sleep(watcher.debounce).await;
            if let Err(e) = watcher.process_job(&path).await {
                error!(descriptor = %path.display(), error = %e, "Job failed");
            }
            watcher.in_flight.lock().await.remove(&path);
        });
    }

    /// Run one job: parse the descriptor, validate its token, upload the
    /// export, then archive. On failure both files stay in place so the
    /// job can be retried by re-dropping the descriptor.
    async fn process_job(&self, descriptor_path: &Path) -> Result<(), AppError> {
        let job = JobDescriptor::load(descriptor_path)?;
        if !job.xml_path.exists() {
            return Err(JobError::SourceMissing(job.xml_path).into());
        }

        info!(
            descriptor = %descriptor_path.display(),
            export = %job.xml_path.display(),
            user = %job.user_id,
            "Starting job"
        );

        // Headless context: a stale token fails the job instead of opening
        // a sign-in page nobody is watching.
        if !self.validator.validate(&job.token).await {
            return Err(AuthError::TokenInvalid.into());
        }

        let report = self
            .pipeline
            .process_export(&job.xml_path, &job.token)
            .await?;

        let archived = archive_export(&job.xml_path, &self.processed_dir, &job.user_id)?;
        std::fs::remove_file(descriptor_path)?;

        info!(
            descriptor = %descriptor_path.display(),
            archived = %archived.display(),
            days = report.days,
            activity_summaries = report.activity_summaries,
            "Job completed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadConfig;
    use crate::export::JsonExportReader;
    use crate::upload::Uploader;
    use wiremock::matchers::{any, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DIGEST: &str = r#"{
        "exportDate": "2024-03-07T09:30:00",
        "records": [
            {"type": "HKQuantityTypeIdentifierStepCount", "startDate": "2024-03-07 08:00:00", "value": 1200}
        ]
    }"#;

    fn test_watcher(server_uri: &str, processed_dir: &Path) -> JobWatcher {
        let config = WatcherConfig {
            processed_dir: processed_dir.to_path_buf(),
            ..WatcherConfig::default()
        };
        let uploader = Uploader::new(&UploadConfig {
            backend_url: server_uri.to_string(),
            chunk_size: 100,
            chunk_delay_ms: 0,
            timeout_secs: 5,
        });
        let pipeline = Pipeline::new(Arc::new(JsonExportReader), uploader);
        JobWatcher::new(
            &config,
            Arc::new(TokenValidator::new(server_uri)),
            Arc::new(pipeline),
        )
    }

    async fn wait_until_gone(path: &Path) {
        for _ in 0..100 {
            if !path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("descriptor was not consumed: {}", path.display());
    }

    #[tokio::test]
    async fn test_duplicate_events_run_the_job_once() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("export.json");
        std::fs::write(&export, DIGEST).unwrap();
        let descriptor = dir.path().join("alice_job.json");
        std::fs::write(
            &descriptor,
            serde_json::json!({"xml_path": export, "token": "tok", "user_id": "alice"}).to_string(),
        )
        .unwrap();
        let processed = dir.path().join("processed");

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/apple-health/user-infos"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/apple-health/daily-summaries"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let watcher = test_watcher(&server.uri(), &processed);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(watcher.run(rx, async move {
            let _ = stop_rx.await;
        }));

        tx.send(descriptor.clone()).unwrap();
        tx.send(descriptor.clone()).unwrap();

        wait_until_gone(&descriptor).await;
        assert!(!export.exists());
        assert!(processed.join("alice").is_dir());

        let _ = stop_tx.send(());
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_export_leaves_descriptor_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = dir.path().join("ghost_job.json");
        std::fs::write(
            &descriptor,
            serde_json::json!({
                "xml_path": dir.path().join("never-written.json"),
                "token": "tok"
            })
            .to_string(),
        )
        .unwrap();
        let processed = dir.path().join("processed");

        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let watcher = test_watcher(&server.uri(), &processed);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(watcher.run(rx, async move {
            let _ = stop_rx.await;
        }));

        tx.send(descriptor.clone()).unwrap();
        // Debounce plus enough slack for the job task to finish failing.
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(descriptor.exists());
        assert!(!processed.exists());

        let _ = stop_tx.send(());
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_scanner_emits_each_descriptor_once() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("processed");
        std::fs::create_dir_all(&processed).unwrap();

        let job1 = dir.path().join("first_job.json");
        std::fs::write(&job1, "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
        std::fs::write(processed.join("done_job.json"), "{}").unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_scanner(
            dir.path().to_path_buf(),
            processed.clone(),
            Duration::from_millis(50),
            tx,
        );

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, job1);

        // Unchanged files are not re-emitted on later scans.
        assert!(
            tokio::time::timeout(Duration::from_millis(300), rx.recv())
                .await
                .is_err()
        );

        let job2 = dir.path().join("second_job.json");
        std::fs::write(&job2, "{}").unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, job2);

        handle.abort();
    }

    #[tokio::test]
    async fn test_scanner_reemits_after_redrop() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("processed");

        let job = dir.path().join("retry_job.json");
        std::fs::write(&job, "{}").unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_scanner(
            dir.path().to_path_buf(),
            processed,
            Duration::from_millis(50),
            tx,
        );

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, job);

        // Deleting the file prunes it from the seen set, so dropping the
        // same name again triggers a fresh event.
        std::fs::remove_file(&job).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(&job, "{}").unwrap();

        let again = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again, job);

        handle.abort();
    }
}
