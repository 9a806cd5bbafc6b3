// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine command layer.
//!
//! Wraps a [`ContainerEngine`] so that every operation is retried a bounded
//! number of times, logged at start and completion or failure, and mapped
//! to an [`EngineCommandError`] naming the action and its target.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{ContainerEngine, ContainerSpec, ContainerSummary, EngineError};
use crate::retry::{Backoff, retry_with_backoff};

/// Engine operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Pull,
    Build,
    Create,
    Start,
    Logs,
    Get,
    Stop,
    Remove,
    GetImage,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Pull => "pull",
            Action::Build => "build",
            Action::Create => "create",
            Action::Start => "start",
            Action::Logs => "logs",
            Action::Get => "get",
            Action::Stop => "stop",
            Action::Remove => "remove",
            Action::GetImage => "get_image",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed engine operation, after retries.
#[derive(Debug, Error)]
#[error("Docker {action} failed for {identifier}: {source}")]
pub struct EngineCommandError {
    pub action: Action,
    pub identifier: String,
    #[source]
    pub source: EngineError,
}

impl EngineCommandError {
    /// True when the engine reported the target as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self.source, EngineError::NotFound(_))
    }
}

type CommandResult<T> = std::result::Result<T, EngineCommandError>;

/// Retrying, logging front for a [`ContainerEngine`].
#[derive(Clone)]
pub struct EngineClient {
    engine: Arc<dyn ContainerEngine>,
    retries: u32,
}

impl EngineClient {
    /// `retries` extra attempts are made after a failed one.
    pub fn new(engine: Arc<dyn ContainerEngine>, retries: u32) -> Self {
        Self { engine, retries }
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    pub async fn pull(&self, image: &str) -> CommandResult<()> {
        let engine = &self.engine;
        self.exec(Action::Pull, image, move || engine.pull_image(image))
            .await
    }

    /// Build `tag` from `dockerfile`, then confirm the image exists.
    /// Returns the image id.
    pub async fn build(&self, dockerfile: &Path, tag: &str) -> CommandResult<String> {
        let engine = &self.engine;
        self.exec(Action::Build, tag, move || engine.build_image(dockerfile, tag))
            .await?;
        self.exec(Action::GetImage, tag, move || engine.inspect_image(tag))
            .await
    }

    /// Create a container, returning its id.
    pub async fn create(&self, spec: &ContainerSpec) -> CommandResult<String> {
        let engine = &self.engine;
        self.exec(Action::Create, &spec.name, move || {
            engine.create_container(spec)
        })
        .await
    }

    pub async fn start(&self, name: &str) -> CommandResult<()> {
        let engine = &self.engine;
        self.exec(Action::Start, name, move || engine.start_container(name))
            .await
    }

    pub async fn stop(&self, name: &str) -> CommandResult<()> {
        let engine = &self.engine;
        self.exec(Action::Stop, name, move || engine.stop_container(name))
            .await
    }

    pub async fn remove(&self, name: &str) -> CommandResult<()> {
        let engine = &self.engine;
        self.exec(Action::Remove, name, move || engine.remove_container(name))
            .await
    }

    /// Look a container up by name. A missing container is an error.
    pub async fn get(&self, name: &str) -> CommandResult<ContainerSummary> {
        let engine = &self.engine;
        self.exec(Action::Get, name, move || async move {
            engine
                .get_container(name)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))
        })
        .await
    }

    /// Follow a container's output, handing each chunk to `handler`.
    ///
    /// Completes when the engine closes the stream. A stream that fails
    /// before delivering anything is retried; once output has been handed
    /// out, a failure is surfaced instead of replaying it.
    pub async fn logs<H, Fut>(&self, name: &str, mut handler: H) -> CommandResult<()>
    where
        H: FnMut(String) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let action = Action::Logs;
        info!(action = %action, identifier = %name, "Starting engine command");

        let mut attempt = 0;
        loop {
            let mut delivered = false;
            let outcome: super::Result<()> = async {
                let mut stream = self.engine.logs(name).await?;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    delivered = true;
                    handler(chunk).await;
                }
                Ok(())
            }
            .await;

            match outcome {
                Ok(()) => {
                    info!(action = %action, identifier = %name, "Completed engine command");
                    return Ok(());
                }
                Err(e) if !delivered && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        action = %action,
                        identifier = %name,
                        attempt,
                        error = %e,
                        "Log stream failed, retrying"
                    );
                }
                Err(source) => {
                    error!(action = %action, identifier = %name, error = %source, "Engine command failed");
                    return Err(EngineCommandError {
                        action,
                        identifier: name.to_string(),
                        source,
                    });
                }
            }
        }
    }

    async fn exec<T, F, Fut>(&self, action: Action, identifier: &str, mut op: F) -> CommandResult<T>
    where
        T: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = super::Result<T>>,
    {
        info!(action = %action, identifier = %identifier, "Starting engine command");
        let description = format!("{action} {identifier}");

        match retry_with_backoff(self.retries, Backoff::Immediate, &description, &mut op, |_| true)
            .await
        {
            Ok(response) => {
                debug!(action = %action, identifier = %identifier, response = ?response, "Engine response");
                info!(action = %action, identifier = %identifier, "Completed engine command");
                Ok(response)
            }
            Err(source) => {
                error!(action = %action, identifier = %identifier, error = %source, "Engine command failed");
                Err(EngineCommandError {
                    action,
                    identifier: identifier.to_string(),
                    source,
                })
            }
        }
    }
}
