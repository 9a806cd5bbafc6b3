// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Housekeeping tasks and process bootstrap.
//!
//! Three cron timers are registered at bootstrap:
//! - `update-images-task`: pull every code type's base image and force a
//!   rebuild of the functions using it
//! - `delete-old-run-details-task`: drop finished run records past retention
//! - `delete-old-logs-task`: drop log files past retention
//!
//! Bootstrap also clears any leftover timers and, once the first image
//! update finishes, re-registers a timer for every function whose schedule
//! is enabled.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::code_types::CodeTypeCatalog;
use crate::config::MaintenanceConfig;
use crate::engine::EngineClient;
use crate::error::Result;
use crate::functions::FunctionService;
use crate::image_builder::ImageBuilder;
use crate::persistence::Persistence;
use crate::run_logs::RunLogService;
use crate::runs::RunService;
use crate::scheduler::{Schedule, TaskCallback, TaskScheduler};

pub const UPDATE_IMAGES_TASK_ID: &str = "update-images-task";
pub const DELETE_RUN_RECORDS_TASK_ID: &str = "delete-old-run-details-task";
pub const DELETE_LOGS_TASK_ID: &str = "delete-old-logs-task";

pub struct Maintenance {
    store: Arc<dyn Persistence>,
    catalog: Arc<CodeTypeCatalog>,
    engine: EngineClient,
    builder: Arc<ImageBuilder>,
    scheduler: Arc<TaskScheduler>,
    functions: Arc<FunctionService>,
    runs: Arc<RunService>,
    logs: Arc<RunLogService>,
    config: MaintenanceConfig,
}

impl Maintenance {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Persistence>,
        catalog: Arc<CodeTypeCatalog>,
        engine: EngineClient,
        builder: Arc<ImageBuilder>,
        scheduler: Arc<TaskScheduler>,
        functions: Arc<FunctionService>,
        runs: Arc<RunService>,
        logs: Arc<RunLogService>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            engine,
            builder,
            scheduler,
            functions,
            runs,
            logs,
            config,
        }
    }

    /// Pull each code type's base image and force-rebuild its functions.
    /// Failures are logged per code type or function and never abort the pass.
    pub async fn update_images(&self) {
        info!("Updating images");
        for code_type in self.catalog.all() {
            debug!(code_type = %code_type.name, image = %code_type.from, "Updating code type");
            if let Err(e) = self.engine.pull(&code_type.from).await {
                error!(code_type = %code_type.name, error = %e, "Failed to pull base image");
                continue;
            }
            let functions = match self.store.list_functions_by_code_type(&code_type.name).await {
                Ok(functions) => functions,
                Err(e) => {
                    error!(code_type = %code_type.name, error = %e, "Failed to list functions");
                    continue;
                }
            };
            for function in functions {
                match self.builder.build(&function, true).await {
                    Ok(()) => debug!(function = %function.name, "Updated function image"),
                    Err(e) => error!(function = %function.name, error = %e, "Failed to update function image"),
                }
            }
        }
        info!("Updated images");
    }

    pub async fn delete_old_run_records(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.config.run_records_retention_days));
        info!(cutoff = %cutoff, "Deleting old run records");
        self.runs.delete_ended_before(cutoff).await
    }

    pub async fn delete_old_logs(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.config.logs_retention_days));
        info!(cutoff = %cutoff, "Deleting old logs");
        self.logs.delete_before(cutoff).await
    }

    /// Register a timer for every stored function with an enabled schedule.
    pub async fn schedule_functions(&self) -> Result<usize> {
        let mut scheduled = 0;
        for function in self.store.list_functions().await? {
            if function.schedule.as_ref().is_some_and(|s| s.on) {
                self.functions.schedule(&function).await?;
                scheduled += 1;
            }
        }
        info!(scheduled, "Scheduled functions");
        Ok(scheduled)
    }

    /// Reset timers and start housekeeping. Returns the handle of the initial
    /// image update, which re-registers function timers when it finishes.
    pub async fn bootstrap(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        self.scheduler.delete_all().await;

        let this = self.clone();
        let initial = tokio::spawn(async move {
            this.update_images().await;
            if let Err(e) = this.schedule_functions().await {
                error!(error = %e, "Failed to schedule functions");
            }
        });

        self.register(UPDATE_IMAGES_TASK_ID, &self.config.image_update_cron, |m| {
            Box::pin(async move { m.update_images().await })
        })
        .await?;
        self.register(DELETE_RUN_RECORDS_TASK_ID, &self.config.run_records_cleanup_cron, |m| {
            Box::pin(async move {
                if let Err(e) = m.delete_old_run_records().await {
                    error!(error = %e, "Failed to delete run records");
                }
            })
        })
        .await?;
        self.register(DELETE_LOGS_TASK_ID, &self.config.logs_cleanup_cron, |m| {
            Box::pin(async move {
                if let Err(e) = m.delete_old_logs().await {
                    error!(error = %e, "Failed to delete logs");
                }
            })
        })
        .await?;

        Ok(initial)
    }

    async fn register<F>(self: &Arc<Self>, id: &str, cron: &str, task: F) -> Result<()>
    where
        F: Fn(Arc<Self>) -> futures::future::BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let this = self.clone();
        let callback: TaskCallback = Arc::new(move || task(this.clone()));
        self.scheduler
            .create_or_update_task(id, Some(&Schedule::cron(cron)), callback)
            .await
    }
}
