// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function registry operations.
//!
//! Ties the store to the side effects a definition change implies: image
//! builds, timers, staged files and run records.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::deployment::Deployer;
use crate::error::{Error, Result};
use crate::image_builder::ImageBuilder;
use crate::model::{BuildStatus, Function, FunctionRequest, RunRecord};
use crate::persistence::Persistence;
use crate::runs::RunService;
use crate::scheduler::{TaskCallback, TaskScheduler};
use crate::storage::FileStore;
use crate::validation::FunctionValidator;

/// A function together with its transient build and deployment state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionView {
    #[serde(flatten)]
    pub function: Function,
    pub build_status: Option<BuildStatus>,
    pub pending_changes: bool,
}

pub struct FunctionService {
    store: Arc<dyn Persistence>,
    validator: FunctionValidator,
    deployer: Deployer,
    builder: Arc<ImageBuilder>,
    scheduler: Arc<TaskScheduler>,
    runs: Arc<RunService>,
    files: FileStore,
}

impl FunctionService {
    pub fn new(
        store: Arc<dyn Persistence>,
        validator: FunctionValidator,
        deployer: Deployer,
        builder: Arc<ImageBuilder>,
        scheduler: Arc<TaskScheduler>,
        runs: Arc<RunService>,
        files: FileStore,
    ) -> Self {
        Self {
            store,
            validator,
            deployer,
            builder,
            scheduler,
            runs,
            files,
        }
    }

    pub async fn get(&self, name: &str) -> Result<FunctionView> {
        let function = self.load(name).await?;
        self.view(function).await
    }

    pub async fn list(&self) -> Result<Vec<FunctionView>> {
        let mut views = Vec::new();
        for function in self.store.list_functions().await? {
            views.push(self.view(function).await?);
        }
        Ok(views)
    }

    /// Register a new function, stage its main file, start its first image
    /// build in the background and install its timer.
    pub async fn create(&self, request: FunctionRequest) -> Result<FunctionView> {
        let existing = self.store.get_function(&request.name).await?;
        let function = self
            .validator
            .validate_and_create(request, existing.as_ref())?;

        self.store.save_function(&function).await?;
        self.deployer.create_main_file(&function).await?;
        self.spawn_build(&function, true);
        self.schedule(&function).await?;

        info!(function = %function.name, "Created function");
        self.view(function).await
    }

    /// Merge the provided fields into a stored function.
    pub async fn update(&self, request: FunctionRequest) -> Result<FunctionView> {
        let stored = self.load(&request.name).await?;
        let function = self.validator.validate_and_update(request, stored)?;

        self.store.save_function(&function).await?;
        self.spawn_build(&function, false);
        self.schedule(&function).await?;

        info!(function = %function.name, "Updated function");
        self.view(function).await
    }

    pub async fn trigger(&self, name: &str) -> Result<RunRecord> {
        self.runs.trigger(name).await
    }

    /// Promote the staged tree and stamp the deployment time.
    pub async fn deploy(&self, name: &str) -> Result<FunctionView> {
        let mut function = self.load(name).await?;
        self.deployer.deploy(name).await?;
        function.deployment_details.last_deployed = Some(Utc::now());
        self.store.save_function(&function).await?;
        self.view(function).await
    }

    /// Remove a function with its timer, files, run records and build state.
    pub async fn delete(&self, name: &str) -> Result<String> {
        let function = self.load(name).await?;
        self.store.delete_function(&function.name).await?;
        self.scheduler.delete_task(name).await;
        if let Err(e) = self.files.delete_all(name).await {
            warn!(function = %name, error = %e, "Failed to delete function files");
        }
        self.runs.delete_of(name).await?;
        self.builder.forget(name);

        info!(function = %name, "Deleted function");
        Ok(function.name)
    }

    pub async fn delete_all(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for function in self.store.list_functions().await? {
            deleted.push(self.delete(&function.name).await?);
        }
        Ok(deleted)
    }

    /// Install, replace or remove the function's timer to match its schedule.
    pub async fn schedule(&self, function: &Function) -> Result<()> {
        self.scheduler
            .create_or_update_task(
                &function.name,
                function.schedule.as_ref(),
                trigger_callback(self.runs.clone(), function.name.clone()),
            )
            .await
    }

    async fn load(&self, name: &str) -> Result<Function> {
        self.store
            .get_function(name)
            .await?
            .ok_or_else(|| Error::FunctionNotFound(name.to_string()))
    }

    async fn view(&self, function: Function) -> Result<FunctionView> {
        let build_status = self.builder.status(&function.name);
        let pending_changes = self.deployer.has_changes(&function.name).await?;
        Ok(FunctionView {
            function,
            build_status,
            pending_changes,
        })
    }

    fn spawn_build(&self, function: &Function, force: bool) {
        let builder = self.builder.clone();
        let function = function.clone();
        tokio::spawn(async move {
            if let Err(e) = builder.build(&function, force).await {
                error!(function = %function.name, error = %e, "Background build failed");
            }
        });
    }
}

fn trigger_callback(runs: Arc<RunService>, name: String) -> TaskCallback {
    Arc::new(move || {
        let runs = runs.clone();
        let name = name.clone();
        Box::pin(async move {
            if let Err(e) = runs.trigger(&name).await {
                error!(function = %name, error = %e, "Scheduled trigger failed");
            }
        })
    })
}
