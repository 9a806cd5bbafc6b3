// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wiring and lifecycle of a dockyard process.
//!
//! [`Services`] assembles every component from a config, an engine, a store
//! and a code-type catalog. [`DockyardRuntime`] adds bootstrap and the HTTP
//! server on top, and can be embedded in an existing tokio application:
//!
//! ```rust,ignore
//! let runtime = DockyardRuntime::builder()
//!     .config(Config::from_env()?)
//!     .build()
//!     .start()
//!     .await?;
//!
//! // ...
//!
//! runtime.shutdown().await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::code_types::CodeTypeCatalog;
use crate::config::Config;
use crate::deployment::Deployer;
use crate::dockerfile::DockerfileGenerator;
use crate::engine::{ContainerEngine, DockerEngine, EngineClient};
use crate::functions::FunctionService;
use crate::image_builder::ImageBuilder;
use crate::maintenance::Maintenance;
use crate::persistence::{Persistence, SqlitePersistence};
use crate::run_logs::RunLogService;
use crate::runner::FunctionRunner;
use crate::runs::RunService;
use crate::scheduler::TaskScheduler;
use crate::server;
use crate::storage::FileStore;
use crate::validation::FunctionValidator;

/// Every component of a dockyard process, wired together.
pub struct Services {
    pub config: Config,
    pub catalog: Arc<CodeTypeCatalog>,
    pub store: Arc<dyn Persistence>,
    pub engine: EngineClient,
    pub files: FileStore,
    pub builder: Arc<ImageBuilder>,
    pub scheduler: Arc<TaskScheduler>,
    pub runs: Arc<RunService>,
    pub logs: Arc<RunLogService>,
    pub functions: Arc<FunctionService>,
    pub maintenance: Arc<Maintenance>,
}

impl Services {
    pub fn new(
        config: Config,
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn Persistence>,
        catalog: CodeTypeCatalog,
    ) -> Arc<Self> {
        let catalog = Arc::new(catalog);
        let files = FileStore::new(&config.base_path);
        let engine = EngineClient::new(engine, config.engine.retries);

        let builder = Arc::new(ImageBuilder::new(
            engine.clone(),
            DockerfileGenerator::new(files.clone()),
            catalog.clone(),
            config.build.clone(),
        ));
        let runner = Arc::new(FunctionRunner::new(
            engine.clone(),
            builder.clone(),
            files.clone(),
            config.run.clone(),
            config.logs.clone(),
            config.volume_path.clone(),
        ));
        let scheduler = Arc::new(TaskScheduler::new());
        let runs = Arc::new(RunService::new(store.clone(), runner));
        let logs = Arc::new(RunLogService::new(files.clone(), config.logs.clone()));

        let functions = Arc::new(FunctionService::new(
            store.clone(),
            FunctionValidator::new(catalog.clone(), config.run.default_timeout_minutes),
            Deployer::new(files.clone(), catalog.clone(), config.deploy.clone()),
            builder.clone(),
            scheduler.clone(),
            runs.clone(),
            files.clone(),
        ));
        let maintenance = Arc::new(Maintenance::new(
            store.clone(),
            catalog.clone(),
            engine.clone(),
            builder.clone(),
            scheduler.clone(),
            functions.clone(),
            runs.clone(),
            logs.clone(),
            config.maintenance.clone(),
        ));

        Arc::new(Self {
            config,
            catalog,
            store,
            engine,
            files,
            builder,
            scheduler,
            runs,
            logs,
            functions,
            maintenance,
        })
    }
}

/// Builder for a [`DockyardRuntime`]. Components left unset are created from
/// the config at start.
#[derive(Default)]
pub struct DockyardRuntimeBuilder {
    config: Option<Config>,
    engine: Option<Arc<dyn ContainerEngine>>,
    store: Option<Arc<dyn Persistence>>,
    catalog: Option<CodeTypeCatalog>,
}

impl DockyardRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default: [`Config::default`].
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Default: a Docker daemon at the configured endpoint.
    pub fn engine(mut self, engine: Arc<dyn ContainerEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Default: SQLite at the configured database URL.
    pub fn persistence(mut self, store: Arc<dyn Persistence>) -> Self {
        self.store = Some(store);
        self
    }

    /// Default: loaded from the configured code types file.
    pub fn catalog(mut self, catalog: CodeTypeCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn build(self) -> DockyardRuntimeConfig {
        DockyardRuntimeConfig {
            config: self.config.unwrap_or_default(),
            engine: self.engine,
            store: self.store,
            catalog: self.catalog,
        }
    }
}

/// Resolved builder state, ready to [`start`](Self::start).
pub struct DockyardRuntimeConfig {
    config: Config,
    engine: Option<Arc<dyn ContainerEngine>>,
    store: Option<Arc<dyn Persistence>>,
    catalog: Option<CodeTypeCatalog>,
}

impl DockyardRuntimeConfig {
    /// Connect missing components, bootstrap timers and serve HTTP.
    pub async fn start(self) -> Result<DockyardRuntime> {
        let config = self.config;

        let engine = match self.engine {
            Some(engine) => engine,
            None => Arc::new(
                DockerEngine::connect(&config.engine.endpoint)
                    .context("failed to connect to the container engine")?,
            ),
        };
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(
                SqlitePersistence::connect(&config.database_url)
                    .await
                    .with_context(|| format!("failed to open database {}", config.database_url))?,
            ),
        };
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => CodeTypeCatalog::load(&config.code_types_file)
                .await
                .with_context(|| {
                    format!(
                        "failed to load code types from {}",
                        config.code_types_file.display()
                    )
                })?,
        };

        let listener = TcpListener::bind(config.http_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.http_addr))?;
        let local_addr = listener.local_addr()?;

        let services = Services::new(config, engine, store, catalog);
        let bootstrap_handle = services.maintenance.bootstrap().await?;

        let shutdown = CancellationToken::new();
        let server_handle = tokio::spawn(server::serve(
            listener,
            server::router(services.clone()),
            shutdown.clone(),
        ));

        info!(addr = %local_addr, "Dockyard started");

        Ok(DockyardRuntime {
            services,
            local_addr,
            shutdown,
            server_handle,
            bootstrap_handle: Some(bootstrap_handle),
        })
    }
}

/// A running dockyard process.
pub struct DockyardRuntime {
    services: Arc<Services>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    server_handle: JoinHandle<std::io::Result<()>>,
    bootstrap_handle: Option<JoinHandle<()>>,
}

impl DockyardRuntime {
    pub fn builder() -> DockyardRuntimeBuilder {
        DockyardRuntimeBuilder::new()
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Address the HTTP server listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
    }

    /// Wait for the initial image update and function scheduling to finish.
    pub async fn wait_for_bootstrap(&mut self) {
        if let Some(handle) = self.bootstrap_handle.take()
            && let Err(e) = handle.await
        {
            error!(error = %e, "Bootstrap task panicked");
        }
    }

    /// Cancel every timer and stop the HTTP server gracefully.
    pub async fn shutdown(self) -> Result<()> {
        info!("Dockyard shutting down");
        self.services.scheduler.delete_all().await;
        if let Some(handle) = &self.bootstrap_handle {
            handle.abort();
        }
        self.shutdown.cancel();

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("Dockyard shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "HTTP server error during shutdown");
                Err(e.into())
            }
            Err(e) => {
                error!(error = %e, "HTTP server task panicked");
                Err(anyhow::anyhow!("server task panicked: {e}"))
            }
        }
    }
}
