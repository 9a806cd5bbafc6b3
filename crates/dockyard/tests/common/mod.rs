// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared setup for dockyard integration tests.
//!
//! Every test gets its own storage area, in-memory SQLite store and
//! [`MockEngine`], wired through [`Services`] exactly as the binary does.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use dockyard::code_types::{CodeType, CodeTypeCatalog};
use dockyard::config::Config;
use dockyard::engine::MockEngine;
use dockyard::model::{BuildStatus, FunctionRequest, RunRecord, RunStatus};
use dockyard::persistence::SqlitePersistence;
use dockyard::runtime::Services;

pub struct TestContext {
    pub services: Arc<Services>,
    pub engine: Arc<MockEngine>,
    pub config: Config,
    _tmp: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_engine(MockEngine::new()).await
    }

    pub async fn with_engine(engine: MockEngine) -> Self {
        let tmp = TempDir::new().expect("Failed to create temp dir");
        let config = test_config(&tmp);
        let engine = Arc::new(engine);
        let store = SqlitePersistence::in_memory()
            .await
            .expect("Failed to open in-memory store");

        let services = Services::new(
            config.clone(),
            engine.clone(),
            Arc::new(store),
            catalog(),
        );

        Self {
            services,
            engine,
            config,
            _tmp: tmp,
        }
    }

    /// Register a python function with default settings.
    pub async fn create_function(&self, name: &str) {
        self.services
            .functions
            .create(request(name))
            .await
            .expect("Failed to create function");
    }

    /// Poll until the build of `name` leaves IN_PROGRESS.
    pub async fn wait_for_build(&self, name: &str) -> BuildStatus {
        for _ in 0..400 {
            match self.services.builder.status(name) {
                Some(BuildStatus::InProgress) | None => {}
                Some(status) => return status,
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("build of {name} did not finish");
    }

    /// Poll until the run record `id` is finalized.
    pub async fn wait_for_run(&self, id: &str) -> RunRecord {
        for _ in 0..400 {
            let record = self
                .services
                .runs
                .get(id)
                .await
                .expect("Run record should exist");
            if record.status != RunStatus::InProgress {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run {id} did not finish");
    }
}

pub fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.base_path = tmp.path().to_path_buf();
    config.http_addr = "127.0.0.1:0".parse().expect("valid address");
    config.engine.retries = 0;
    config.build.backoff_initial = Duration::from_millis(1);
    config.build.backoff_max = Duration::from_millis(20);
    config.run.poll_interval = Duration::from_millis(5);
    config.deploy.retry_delay = Duration::from_millis(1);
    config
}

pub fn python() -> CodeType {
    CodeType {
        name: "python".to_string(),
        from: "python:3.12-slim".to_string(),
        pre_install_commands: vec![],
        install_command: "pip install".to_string(),
        post_install_commands: vec![],
        entrypoint: "python".to_string(),
        main_file_name: "main.py".to_string(),
    }
}

pub fn catalog() -> CodeTypeCatalog {
    CodeTypeCatalog::new([python()])
}

pub fn request(name: &str) -> FunctionRequest {
    FunctionRequest {
        name: name.to_string(),
        code_type_name: Some("python".to_string()),
        ..Default::default()
    }
}
