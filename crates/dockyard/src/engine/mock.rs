// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock engine for testing.
//!
//! Simulates image builds and container lifecycles in memory. Containers
//! run for `run_duration` after start (or until stopped) and then report
//! `exited` with a Docker-like status text.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::*;

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub op: &'static str,
    pub target: String,
}

#[derive(Debug, Clone)]
enum Phase {
    Created,
    Running { started: Instant },
    Exited { status: String },
}

#[derive(Debug, Clone)]
struct MockContainer {
    id: String,
    spec: ContainerSpec,
    phase: Phase,
    stop_requested: Option<Instant>,
}

#[derive(Debug, Default)]
struct MockState {
    images: HashSet<String>,
    containers: HashMap<String, MockContainer>,
    calls: Vec<MockCall>,
    failures: HashMap<&'static str, u32>,
    builds_in_flight: usize,
    max_builds_in_flight: usize,
    next_id: u64,
}

/// Mock engine for testing.
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
    /// Exit code of containers that finish on their own.
    pub exit_code: i64,
    /// Exit code reported after a stop request.
    pub stopped_exit_code: i64,
    /// How long a started container keeps running. `None` runs until stopped.
    pub run_duration: Option<Duration>,
    /// Simulated image build time.
    pub build_delay: Duration,
    /// Lines emitted by the log stream of every container.
    pub log_lines: Vec<String>,
    /// Status text reported for exited containers instead of `Exited (N) ...`.
    pub exited_status: Option<String>,
    /// Time between a stop request and the container reporting `exited`.
    pub stop_delay: Duration,
    /// State reported for started containers instead of simulating a run.
    pub started_state: Option<String>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create a mock engine whose containers exit with 0 right after start.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            exit_code: 0,
            stopped_exit_code: 143,
            run_duration: Some(Duration::ZERO),
            build_delay: Duration::ZERO,
            log_lines: vec!["hello from dockyard".to_string()],
            exited_status: None,
            stop_delay: Duration::ZERO,
            started_state: None,
        }
    }

    /// Create a mock engine whose containers only exit when stopped.
    pub fn never_exiting() -> Self {
        Self {
            run_duration: None,
            ..Self::new()
        }
    }

    /// Make the next `times` calls of `op` fail with a request error.
    pub async fn fail_next(&self, op: &'static str, times: u32) {
        self.state.lock().await.failures.insert(op, times);
    }

    /// All calls so far, oldest first.
    pub async fn calls(&self) -> Vec<MockCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of calls of `op` so far.
    pub async fn call_count(&self, op: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.op == op)
            .count()
    }

    /// Highest number of builds that overlapped in time.
    pub async fn max_concurrent_builds(&self) -> usize {
        self.state.lock().await.max_builds_in_flight
    }

    pub async fn add_image(&self, tag: &str) {
        self.state.lock().await.images.insert(tag.to_string());
    }

    /// Drop an image, as if pruned out-of-band.
    pub async fn remove_image(&self, tag: &str) {
        self.state.lock().await.images.remove(tag);
    }

    pub async fn has_image(&self, tag: &str) -> bool {
        self.state.lock().await.images.contains(tag)
    }

    /// Spec a container was created with, if it still exists.
    pub async fn container(&self, name: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .await
            .containers
            .get(name)
            .map(|c| c.spec.clone())
    }

    async fn record(&self, op: &'static str, target: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(MockCall {
            op,
            target: target.to_string(),
        });
        if let Some(remaining) = state.failures.get_mut(op)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(EngineError::Request(format!("mock {op} failure")));
        }
        Ok(())
    }

    fn exited_status(&self, code: i64) -> String {
        self.exited_status
            .clone()
            .unwrap_or_else(|| format!("Exited ({code}) Less than a second ago"))
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    fn engine_type(&self) -> &'static str {
        "mock"
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.record("pull", image).await?;
        let reference = if image.contains(':') {
            image.to_string()
        } else {
            format!("{image}:latest")
        };
        self.state.lock().await.images.insert(reference);
        Ok(())
    }

    async fn build_image(&self, dockerfile: &Path, tag: &str) -> Result<()> {
        self.record("build", tag).await?;
        if !dockerfile.exists() {
            return Err(EngineError::NotFound(dockerfile.display().to_string()));
        }

        {
            let mut state = self.state.lock().await;
            state.builds_in_flight += 1;
            state.max_builds_in_flight = state.max_builds_in_flight.max(state.builds_in_flight);
        }
        if !self.build_delay.is_zero() {
            tokio::time::sleep(self.build_delay).await;
        }
        let mut state = self.state.lock().await;
        state.builds_in_flight -= 1;
        state.images.insert(tag.to_string());
        Ok(())
    }

    async fn inspect_image(&self, tag: &str) -> Result<String> {
        self.record("inspect_image", tag).await?;
        if self.state.lock().await.images.contains(tag) {
            Ok(format!("sha256:{tag}"))
        } else {
            Err(EngineError::NotFound(format!("No such image: {tag}")))
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.record("create", &spec.name).await?;
        let mut state = self.state.lock().await;
        if !state.images.contains(&spec.image) {
            return Err(EngineError::NotFound(format!("No such image: {}", spec.image)));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(EngineError::Request(format!(
                "Conflict. The container name {} is already in use",
                spec.name
            )));
        }
        state.next_id += 1;
        let id = format!("mock-{}", state.next_id);
        state.containers.insert(
            spec.name.clone(),
            MockContainer {
                id: id.clone(),
                spec: spec.clone(),
                phase: Phase::Created,
                stop_requested: None,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.record("start", name).await?;
        let mut state = self.state.lock().await;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))?;
        container.phase = Phase::Running {
            started: Instant::now(),
        };
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        self.record("stop", name).await?;
        let mut state = self.state.lock().await;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))?;
        if container.stop_requested.is_none() {
            container.stop_requested = Some(Instant::now());
        }
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        self.record("remove", name).await?;
        self.state
            .lock()
            .await
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))
    }

    async fn get_container(&self, name: &str) -> Result<Option<ContainerSummary>> {
        self.record("get", name).await?;
        let mut state = self.state.lock().await;
        let Some(container) = state.containers.get_mut(name) else {
            return Ok(None);
        };

        if let Phase::Running { started } = container.phase {
            let finished = self
                .run_duration
                .is_some_and(|d| started.elapsed() >= d);
            let stopped = container
                .stop_requested
                .is_some_and(|at| at.elapsed() >= self.stop_delay);
            if stopped {
                container.phase = Phase::Exited {
                    status: self.exited_status(self.stopped_exit_code),
                };
            } else if finished {
                container.phase = Phase::Exited {
                    status: self.exited_status(self.exit_code),
                };
            }
        }

        let (current, status) = match (&container.phase, &self.started_state) {
            (Phase::Created, _) => ("created".to_string(), "Created".to_string()),
            (Phase::Running { .. }, Some(forced)) => (forced.clone(), forced.clone()),
            (Phase::Running { .. }, None) => {
                ("running".to_string(), "Up Less than a second".to_string())
            }
            (Phase::Exited { status }, _) => ("exited".to_string(), status.clone()),
        };

        Ok(Some(ContainerSummary {
            id: container.id.clone(),
            name: name.to_string(),
            state: current,
            status,
        }))
    }

    async fn logs(&self, name: &str) -> Result<LogStream> {
        self.record("logs", name).await?;
        let chunks: Vec<Result<String>> = self
            .log_lines
            .iter()
            .map(|line| Ok(format!("{} {line}\n", Utc::now().to_rfc3339())))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}
