// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container engine abstraction.
//!
//! [`ContainerEngine`] is the narrow contract dockyard needs from a remote
//! container runtime. [`DockerEngine`] talks to the Docker Engine API,
//! [`MockEngine`] simulates it for tests. Callers never use an engine
//! directly: every call goes through [`EngineClient`], which adds retries,
//! logging, and per-action error mapping.

mod client;
mod docker;
mod mock;

pub use client::{Action, EngineClient, EngineCommandError};
pub use docker::DockerEngine;
pub use mock::MockEngine;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors reported by an engine implementation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The image, container, or other object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The engine rejected or failed the request.
    #[error("Engine request failed: {0}")]
    Request(String),

    /// A streaming response broke off.
    #[error("Stream failed: {0}")]
    Stream(String),

    /// Local I/O failed while preparing a request.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Chunks of combined stdout/stderr. Dropping the stream cancels it.
pub type LogStream = BoxStream<'static, Result<String>>;

/// Host directory mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBind {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeBind {
    /// Docker bind syntax: `host:container[:ro|:rw]`.
    pub fn to_bind_string(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            if self.read_only { "ro" } else { "rw" }
        )
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    pub binds: Vec<VolumeBind>,
    pub network_mode: String,
    pub privileged: bool,
}

/// Snapshot of a container as listed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    /// Machine state, e.g. `running` or `exited`.
    pub state: String,
    /// Human status text, e.g. `Exited (0) 2 seconds ago`.
    pub status: String,
}

/// Remote container runtime.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Short name used in logs.
    fn engine_type(&self) -> &'static str;

    /// Pull an image. A reference without a tag pulls `latest`.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Build an image from a single Dockerfile and tag it.
    async fn build_image(&self, dockerfile: &Path, tag: &str) -> Result<()>;

    /// Return the id of an image, `NotFound` if it does not exist.
    async fn inspect_image(&self, tag: &str) -> Result<String>;

    /// Create a container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, name: &str) -> Result<()>;

    /// Ask a container to stop. Stopping a stopped container succeeds.
    async fn stop_container(&self, name: &str) -> Result<()>;

    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Find a container by exact name, including stopped ones.
    async fn get_container(&self, name: &str) -> Result<Option<ContainerSummary>>;

    /// Follow timestamped stdout/stderr from container start.
    async fn logs(&self, name: &str) -> Result<LogStream>;
}

/// Parse the exit code out of a status text like `Exited (137) 3 seconds ago`.
///
/// Returns -1 when no parenthesised number is present.
pub fn parse_exit_code(status: &str) -> i64 {
    let Some(open) = status.find('(') else {
        return -1;
    };
    let Some(len) = status[open + 1..].find(')') else {
        return -1;
    };
    let code = &status[open + 1..open + 1 + len];
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return -1;
    }
    code.parse().unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_from_status_text() {
        assert_eq!(parse_exit_code("Exited (0) 2 seconds ago"), 0);
        assert_eq!(parse_exit_code("Exited (137) About a minute ago"), 137);
    }

    #[test]
    fn exit_code_defaults_to_minus_one() {
        assert_eq!(parse_exit_code("Up 3 seconds"), -1);
        assert_eq!(parse_exit_code("Exited () now"), -1);
        assert_eq!(parse_exit_code("Exited (-1) now"), -1);
        assert_eq!(parse_exit_code("Exited (abc) now"), -1);
        assert_eq!(parse_exit_code("Exited (12"), -1);
    }

    #[test]
    fn bind_string_includes_mode() {
        let bind = VolumeBind {
            host_path: PathBuf::from("/data/volume/hello"),
            container_path: "/dockyard".to_string(),
            read_only: false,
        };
        assert_eq!(bind.to_bind_string(), "/data/volume/hello:/dockyard:rw");

        let ro = VolumeBind {
            read_only: true,
            ..bind
        };
        assert!(ro.to_bind_string().ends_with(":ro"));
    }
}
