// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run orchestration.
//!
//! One run drives a function's container through
//! create → start → poll → exit → cleanup:
//!
//! 1. Ensure the image is current (non-forced build).
//! 2. Create the container; if the image vanished, force a rebuild and
//!    create once more.
//! 3. Start it and detach a task that appends its output to the run's log
//!    file. Log failures never fail the run.
//! 4. Poll the container state at a fixed interval until it reports
//!    `exited`. Past the function's timeout every poll requests a stop, but
//!    only the engine's `exited` ends the loop.
//! 5. Parse the exit code, detach container removal, write the banners.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{LogConfig, RunConfig};
use crate::dockerfile::CONTAINER_ROOT;
use crate::engine::{ContainerSpec, EngineClient, VolumeBind, parse_exit_code};
use crate::error::{Error, Result};
use crate::image_builder::{ImageBuilder, image_tag};
use crate::model::{Function, LOG_FILE_SUFFIX};
use crate::storage::{FileKind, FileStore};

const EXITED_STATE: &str = "exited";
const RUNNING_STATE: &str = "running";

/// Append-only log file of one run. Write failures are logged and dropped.
#[derive(Debug, Clone)]
pub struct LogFile {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl LogFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Arc::new(path),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append one line, adding the newline.
    pub async fn line(&self, text: &str) {
        let text = text.trim_end_matches(['\n', '\r']);
        self.append(&format!("{text}\n")).await;
    }

    async fn append(&self, data: &str) {
        let _guard = self.lock.lock().await;
        let written = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path.as_path())
                .await?;
            file.write_all(data.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            error!(path = %self.path.display(), data = %data.trim_end(), error = %e, "Failed to write to log file");
        }
    }
}

/// Runs functions as containers.
pub struct FunctionRunner {
    engine: EngineClient,
    builder: Arc<ImageBuilder>,
    files: FileStore,
    config: RunConfig,
    logs: LogConfig,
    volume_path: Option<PathBuf>,
}

impl FunctionRunner {
    pub fn new(
        engine: EngineClient,
        builder: Arc<ImageBuilder>,
        files: FileStore,
        config: RunConfig,
        logs: LogConfig,
        volume_path: Option<PathBuf>,
    ) -> Self {
        Self {
            engine,
            builder,
            files,
            config,
            logs,
            volume_path,
        }
    }

    /// Run `function` in a container named `container_name` and return its exit code.
    pub async fn run(&self, function: &Function, container_name: &str) -> Result<i64> {
        self.execute(function, container_name)
            .await
            .map_err(|e| Error::Run {
                function: function.name.clone(),
                source: Box::new(e),
            })
    }

    async fn execute(&self, function: &Function, container_name: &str) -> Result<i64> {
        let start = Instant::now();
        let name = &function.name;
        info!(function = %name, container = %container_name, "Starting run");

        let log_path = self
            .files
            .file(
                FileKind::Logs,
                name,
                &format!("{container_name}{LOG_FILE_SUFFIX}"),
            )
            .await?;
        let log_file = LogFile::new(log_path);

        self.builder.build(function, false).await?;

        let spec = self.container_spec(function, container_name).await?;
        self.create(function, &spec).await?;
        self.engine.start(container_name).await?;

        log_file
            .line(&format!("Started function in {}ms", start.elapsed().as_millis()))
            .await;
        log_file.line(&self.logs.separator()).await;
        self.stream_logs(container_name, log_file.clone());

        let exit_code = self
            .wait_for_exit(container_name, function.run_timeout, start)
            .await?;

        if self.config.remove {
            self.remove_detached(container_name);
        }

        log_file.line(&self.logs.separator()).await;
        log_file
            .line(&format!(
                "Function completed after {}ms with exit code: {exit_code}",
                start.elapsed().as_millis()
            ))
            .await;

        info!(function = %name, container = %container_name, exit_code, "Run completed");
        Ok(exit_code)
    }

    async fn container_spec(&self, function: &Function, container_name: &str) -> Result<ContainerSpec> {
        let host_path = match &self.volume_path {
            Some(path) => path.join(&function.name),
            None => {
                let dir = self.files.directory(FileKind::Volume, &function.name).await?;
                std::path::absolute(dir)?
            }
        };

        let mut binds = vec![VolumeBind {
            host_path,
            container_path: CONTAINER_ROOT.to_string(),
            read_only: false,
        }];
        binds.extend(function.volumes.iter().map(|v| VolumeBind {
            host_path: PathBuf::from(&v.host_path),
            container_path: v.container_path.clone(),
            read_only: v.read_only,
        }));

        Ok(ContainerSpec {
            name: container_name.to_string(),
            image: image_tag(&function.name),
            env: function
                .environment_variables
                .iter()
                .map(|kv| format!("{}={}", kv.key, kv.value))
                .collect(),
            binds,
            network_mode: function.network_mode.as_str().to_string(),
            privileged: function.privileged,
        })
    }

    async fn create(&self, function: &Function, spec: &ContainerSpec) -> Result<()> {
        match self.engine.create(spec).await {
            Ok(id) => {
                debug!(container = %spec.name, id = %id, "Container created");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!(function = %function.name, error = %e, "Image missing, rebuilding before create");
                self.builder.build(function, true).await?;
                self.engine.create(spec).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn stream_logs(&self, container_name: &str, log_file: LogFile) {
        let engine = self.engine.clone();
        let container = container_name.to_string();
        tokio::spawn(async move {
            let streamed = engine
                .logs(&container, |chunk| {
                    let log_file = log_file.clone();
                    async move { log_file.line(&chunk).await }
                })
                .await;
            if let Err(e) = streamed {
                warn!(container = %container, error = %e, "Log streaming failed");
            }
        });
    }

    async fn wait_for_exit(&self, container_name: &str, timeout_minutes: u32, start: Instant) -> Result<i64> {
        let timeout = Duration::from_secs(u64::from(timeout_minutes) * 60);
        let stopping = Arc::new(AtomicBool::new(false));

        loop {
            let container = self.engine.get(container_name).await?;
            match container.state.as_str() {
                EXITED_STATE => return Ok(parse_exit_code(&container.status)),
                RUNNING_STATE => {
                    if start.elapsed() > timeout && !stopping.swap(true, Ordering::SeqCst) {
                        warn!(container = %container_name, timeout_minutes, "Run timed out, stopping container");
                        self.stop_detached(container_name, stopping.clone());
                    }
                }
                other => {
                    return Err(Error::UnexpectedContainerState {
                        container: container_name.to_string(),
                        state: other.to_string(),
                    });
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Request a stop without waiting. `stopping` is cleared once the request returns.
    fn stop_detached(&self, container_name: &str, stopping: Arc<AtomicBool>) {
        let engine = self.engine.clone();
        let container = container_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine.stop(&container).await {
                warn!(container = %container, error = %e, "Failed to stop container");
            }
            stopping.store(false, Ordering::SeqCst);
        });
    }

    fn remove_detached(&self, container_name: &str) {
        let engine = self.engine.clone();
        let container = container_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine.remove(&container).await {
                warn!(container = %container, error = %e, "Failed to remove container");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dockerfile::DockerfileGenerator;
    use crate::engine::MockEngine;
    use crate::model::KeyValue;
    use crate::test_support::{catalog, function};
    use tempfile::TempDir;

    struct Harness {
        _tmp: TempDir,
        files: FileStore,
        engine: Arc<MockEngine>,
        runner: FunctionRunner,
    }

    fn harness(engine: MockEngine, remove: bool) -> Harness {
        let tmp = TempDir::new().unwrap();
        let files = FileStore::new(tmp.path());
        let engine = Arc::new(engine);
        let client = EngineClient::new(engine.clone(), 0);
        let config = Config::default();
        let builder = Arc::new(ImageBuilder::new(
            client.clone(),
            DockerfileGenerator::new(files.clone()),
            Arc::new(catalog()),
            config.build.clone(),
        ));
        let runner = FunctionRunner::new(
            client,
            builder,
            files.clone(),
            RunConfig {
                poll_interval: Duration::from_millis(5),
                remove,
                default_timeout_minutes: 30,
            },
            config.logs.clone(),
            None,
        );
        Harness {
            _tmp: tmp,
            files,
            engine,
            runner,
        }
    }

    async fn wait_until_removed(engine: &MockEngine, name: &str) {
        for _ in 0..100 {
            if engine.container(name).await.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("container {name} was not removed");
    }

    #[tokio::test]
    async fn successful_run_writes_banners_and_cleans_up() {
        let h = harness(MockEngine::new(), true);
        let mut f = function("hello");
        f.environment_variables = vec![KeyValue {
            key: "GREETING".to_string(),
            value: "hi".to_string(),
        }];

        let code = h.runner.run(&f, "hello_._1").await.unwrap();

        assert_eq!(code, 0);
        wait_until_removed(&h.engine, "hello_._1").await;

        let log = h.files.file(FileKind::Logs, "hello", "hello_._1.log").await.unwrap();
        let text = tokio::fs::read_to_string(log).await.unwrap();
        assert!(text.starts_with("Started function in "));
        assert!(text.contains(&"-".repeat(50)));
        assert!(text.contains("Function completed after "));
        assert!(text.contains("with exit code: 0\n"));
    }

    #[tokio::test]
    async fn container_spec_carries_function_settings() {
        let h = harness(MockEngine::new(), false);
        let mut f = function("hello");
        f.privileged = true;
        f.environment_variables = vec![KeyValue {
            key: "A".to_string(),
            value: "1".to_string(),
        }];
        f.volumes = vec![crate::model::Volume {
            host_path: "/srv/data".to_string(),
            container_path: "/data".to_string(),
            read_only: true,
        }];

        h.runner.run(&f, "hello_._2").await.unwrap();

        let spec = h.engine.container("hello_._2").await.unwrap();
        assert_eq!(spec.image, "dockyard/hello");
        assert_eq!(spec.env, vec!["A=1".to_string()]);
        assert_eq!(spec.network_mode, "none");
        assert!(spec.privileged);
        assert_eq!(spec.binds.len(), 2);
        assert_eq!(spec.binds[0].container_path, CONTAINER_ROOT);
        assert!(spec.binds[0].host_path.is_absolute());
        assert!(spec.binds[0].host_path.ends_with("dockyard/volume/hello"));
        assert!(spec.binds[1].read_only);
    }

    #[tokio::test]
    async fn nonzero_and_unparseable_exit_codes() {
        let mut engine = MockEngine::new();
        engine.exit_code = 3;
        let h = harness(engine, false);
        assert_eq!(h.runner.run(&function("hello"), "hello_._3").await.unwrap(), 3);

        let mut engine = MockEngine::new();
        engine.exited_status = Some("Exited a while ago".to_string());
        let h = harness(engine, false);
        assert_eq!(h.runner.run(&function("hello"), "hello_._4").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn timed_out_run_ends_only_when_engine_reports_exit() {
        let mut engine = MockEngine::never_exiting();
        engine.stop_delay = Duration::from_millis(60);
        let h = harness(engine, false);
        let mut f = function("hello");
        f.run_timeout = 0;

        let started = std::time::Instant::now();
        let code = h.runner.run(&f, "hello_._5").await.unwrap();

        assert_eq!(code, 143);
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(h.engine.call_count("stop").await >= 1);
        assert!(h.engine.call_count("get").await > 2);
    }

    #[tokio::test]
    async fn running_within_timeout_is_not_stopped() {
        let mut engine = MockEngine::new();
        engine.run_duration = Some(Duration::from_millis(30));
        let h = harness(engine, false);

        let code = h.runner.run(&function("hello"), "hello_._6").await.unwrap();

        assert_eq!(code, 0);
        assert_eq!(h.engine.call_count("stop").await, 0);
    }

    #[tokio::test]
    async fn pruned_image_is_rebuilt_before_create() {
        let h = harness(MockEngine::new(), false);
        let f = function("hello");
        h.runner.run(&f, "hello_._7").await.unwrap();
        h.engine.remove_image("dockyard/hello").await;

        h.runner.run(&f, "hello_._8").await.unwrap();

        assert_eq!(h.engine.call_count("build").await, 2);
        let creates: Vec<_> = h
            .engine
            .calls()
            .await
            .into_iter()
            .filter(|c| c.op == "create" && c.target == "hello_._8")
            .collect();
        assert_eq!(creates.len(), 2);
    }

    #[tokio::test]
    async fn unexpected_state_fails_the_run() {
        let mut engine = MockEngine::never_exiting();
        engine.started_state = Some("paused".to_string());
        let h = harness(engine, false);

        let err = h.runner.run(&function("hello"), "hello_._9").await.unwrap_err();

        let Error::Run { function: name, source } = err else {
            panic!("expected a run error");
        };
        assert_eq!(name, "hello");
        assert!(matches!(
            *source,
            Error::UnexpectedContainerState { ref state, .. } if state == "paused"
        ));
    }

    #[tokio::test]
    async fn engine_failure_is_wrapped_with_function_name() {
        let h = harness(MockEngine::new(), false);
        h.engine.fail_next("start", 1).await;

        let err = h.runner.run(&function("hello"), "hello_._10").await.unwrap_err();

        assert!(err.to_string().starts_with("Run of function hello failed"));
        assert!(matches!(err, Error::Run { ref source, .. } if matches!(**source, Error::Engine(_))));
    }

    #[tokio::test]
    async fn log_output_reaches_the_file() {
        let mut engine = MockEngine::new();
        engine.run_duration = Some(Duration::from_millis(50));
        engine.log_lines = vec!["computing".to_string()];
        let h = harness(engine, false);

        h.runner.run(&function("hello"), "hello_._11").await.unwrap();

        let log = h.files.file(FileKind::Logs, "hello", "hello_._11.log").await.unwrap();
        let text = tokio::fs::read_to_string(log).await.unwrap();
        assert!(text.contains(" computing\n"));
    }

    #[tokio::test]
    async fn log_write_failure_is_swallowed() {
        let tmp = TempDir::new().unwrap();
        let log = LogFile::new(tmp.path().join("missing-dir").join("x.log"));

        log.line("lost").await;

        assert!(!log.path().exists());
    }
}
