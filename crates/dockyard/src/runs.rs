// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tracked runs: every trigger leaves a run record behind.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::model::{Function, RunRecord, RunRecordFilter};
use crate::persistence::Persistence;
use crate::runner::FunctionRunner;

pub struct RunService {
    store: Arc<dyn Persistence>,
    runner: Arc<FunctionRunner>,
}

impl RunService {
    pub fn new(store: Arc<dyn Persistence>, runner: Arc<FunctionRunner>) -> Self {
        Self { store, runner }
    }

    /// Start a run of `function_name` and return its IN_PROGRESS record.
    ///
    /// The run itself continues in the background; its record is finalized
    /// exactly once, as SUCCESS with the exit code or FAILURE with the error.
    pub async fn trigger(&self, function_name: &str) -> Result<RunRecord> {
        let function = self
            .store
            .get_function(function_name)
            .await?
            .ok_or_else(|| Error::FunctionNotFound(function_name.to_string()))?;
        self.start(function).await
    }

    async fn start(&self, function: Function) -> Result<RunRecord> {
        let now = Utc::now();
        let record = RunRecord {
            start_time: now,
            ..RunRecord::in_progress(function.container_name(now), function.name.clone())
        };
        self.store.save_run_record(&record).await?;
        info!(function = %function.name, run = %record.id, "Triggered run");

        let store = self.store.clone();
        let runner = self.runner.clone();
        let pending = record.clone();
        tokio::spawn(async move {
            let finished = match runner.run(&function, &pending.id).await {
                Ok(exit_code) => pending.succeeded(exit_code),
                Err(e) => {
                    error!(function = %function.name, error = %e, "Run failed");
                    pending.failed(e.to_string())
                }
            };
            if let Err(e) = store.save_run_record(&finished).await {
                error!(run = %finished.id, error = %e, "Failed to save run record");
            }
        });

        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<RunRecord> {
        self.store
            .get_run_record(id)
            .await?
            .ok_or_else(|| Error::RunRecordNotFound(id.to_string()))
    }

    pub async fn list(&self, filter: &RunRecordFilter) -> Result<Vec<RunRecord>> {
        self.store.list_run_records(filter).await
    }

    pub async fn delete_of(&self, function_name: &str) -> Result<u64> {
        self.store.delete_run_records_of(function_name).await
    }

    /// Drop records that ended before `cutoff`.
    pub async fn delete_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let removed = self.store.delete_run_records_ended_before(cutoff).await?;
        info!(removed, cutoff = %cutoff, "Deleted old run records");
        Ok(removed)
    }
}
