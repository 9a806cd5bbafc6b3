// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker Engine API backend.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bollard::{
    Docker,
    body_full,
    models::{ContainerCreateBody, HostConfig},
    query_parameters::{
        BuildImageOptionsBuilder,
        CreateContainerOptions,
        CreateImageOptions,
        ListContainersOptions,
        LogsOptions,
        RemoveContainerOptions,
        StartContainerOptions,
        StopContainerOptions,
    },
};
use bytes::Bytes;
use futures::StreamExt;
use tracing::debug;

use super::*;
use crate::config::EngineEndpoint;

/// Seconds to wait for the engine on connect and per request.
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Engine backed by a Docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the daemon at `endpoint`.
    pub fn connect(endpoint: &EngineEndpoint) -> Result<Self> {
        let docker = match endpoint {
            EngineEndpoint::Tcp { host, port } => Docker::connect_with_http(
                &format!("http://{host}:{port}"),
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            EngineEndpoint::Socket(path) => Docker::connect_with_socket(
                &path.to_string_lossy(),
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
        }
        .map_err(|e| EngineError::Request(format!("failed to connect to Docker: {e}")))?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Tar archive holding only the Dockerfile, the build context.
fn build_context(dockerfile: &[u8]) -> Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_path("Dockerfile")?;
    header.set_size(dockerfile.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut tar = tar::Builder::new(Vec::new());
    tar.append(&header, dockerfile)?;
    Ok(tar.into_inner()?)
}

/// Split `image[:tag]` into name and tag, defaulting the tag to `latest`.
fn split_reference(image: &str) -> (&str, &str) {
    // A colon before the last slash belongs to a registry port.
    match image.rfind(':') {
        Some(i) if !image[i..].contains('/') => (&image[..i], &image[i + 1..]),
        _ => (image, "latest"),
    }
}

fn map_error(e: bollard::errors::Error) -> EngineError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NotFound(message),
        other => EngineError::Request(other.to_string()),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn engine_type(&self) -> &'static str {
        "docker"
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let (name, tag) = split_reference(image);
        let options = CreateImageOptions {
            from_image: Some(name.to_string()),
            tag: Some(tag.to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let info = result.map_err(map_error)?;
            if let Some(status) = info.status {
                debug!(image = %image, status = %status, "Pull progress");
            }
        }
        Ok(())
    }

    async fn build_image(&self, dockerfile: &Path, tag: &str) -> Result<()> {
        let content = tokio::fs::read(dockerfile).await?;
        let context = build_context(&content)?;

        let options = BuildImageOptionsBuilder::default()
            .dockerfile("Dockerfile")
            .t(tag)
            .rm(true)
            .build();

        let mut stream =
            self.docker
                .build_image(options, None, Some(body_full(Bytes::from(context))));
        while let Some(result) = stream.next().await {
            let info = result.map_err(map_error)?;
            if let Some(error) = info.error {
                return Err(EngineError::Request(error));
            }
            if let Some(line) = info.stream {
                debug!(tag = %tag, line = %line.trim_end(), "Build output");
            }
        }
        Ok(())
    }

    async fn inspect_image(&self, tag: &str) -> Result<String> {
        let image = self.docker.inspect_image(tag).await.map_err(map_error)?;
        Ok(image.id.unwrap_or_default())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let host_config = HostConfig {
            binds: Some(spec.binds.iter().map(VolumeBind::to_bind_string).collect()),
            network_mode: Some(spec.network_mode.clone()),
            privileged: Some(spec.privileged),
            ..Default::default()
        };

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(map_error)?;
        Ok(response.id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions>)
            .await
            .map_err(map_error)
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        match self
            .docker
            .stop_container(name, None::<StopContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(map_error)
    }

    async fn get_container(&self, name: &str) -> Result<Option<ContainerSummary>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let options = ListContainersOptions {
            all: true,
            filters: Some(filters),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_error)?;

        // The name filter matches substrings; keep the exact match.
        let wanted = format!("/{name}");
        let found = containers.into_iter().find(|c| {
            c.names
                .as_ref()
                .is_some_and(|names| names.iter().any(|n| n == &wanted || n == name))
        });

        Ok(found.map(|c| ContainerSummary {
            id: c.id.unwrap_or_default(),
            name: name.to_string(),
            state: c.state.map(|s| s.to_string()).unwrap_or_default(),
            status: c.status.unwrap_or_default(),
        }))
    }

    async fn logs(&self, name: &str) -> Result<LogStream> {
        let options = LogsOptions {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let stream = self
            .docker
            .logs(name, Some(options))
            .map(|chunk| match chunk {
                Ok(output) => Ok(String::from_utf8_lossy(&output.into_bytes()).into_owned()),
                Err(e) => Err(EngineError::Stream(e.to_string())),
            });
        Ok(stream.boxed())
    }
}
