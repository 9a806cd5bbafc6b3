// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for dockyard.

use thiserror::Error;

use crate::engine::EngineCommandError;

/// Dockyard errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A container engine operation failed after its retries.
    #[error(transparent)]
    Engine(#[from] EngineCommandError),

    /// Function was not found.
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// Code type was not found.
    #[error("Code type not found: {0}")]
    CodeTypeNotFound(String),

    /// Run record was not found.
    #[error("Run record not found: {0}")]
    RunRecordNotFound(String),

    /// No log file exists for the container.
    #[error("Run logs not found: {0}")]
    RunLogsNotFound(String),

    /// A request field failed validation.
    #[error("Bad input: {0}")]
    BadInput(String),

    /// A function with this name already exists.
    #[error("Function already exists: {0}")]
    FunctionAlreadyExists(String),

    /// The staged tree has no changes to deploy.
    #[error("Function already deployed: {0}")]
    FunctionAlreadyDeployed(String),

    /// Another build holds the slot for this function.
    #[error("Build already in progress for function: {0}")]
    BuildInProgress(String),

    /// Writing the build context file failed.
    #[error("Failed to create Dockerfile for function {function}: {source}")]
    DockerfileCreation {
        function: String,
        #[source]
        source: std::io::Error,
    },

    /// Copying or creating files of a function's trees failed.
    #[error("Deployment of function {function} failed: {source}")]
    Deployment {
        function: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine reported a container state the run loop cannot handle.
    #[error("Unexpected state '{state}' of container {container}")]
    UnexpectedContainerState { container: String, state: String },

    /// Schedule could not be turned into a trigger.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A run failed somewhere in its pipeline.
    #[error("Run of function {function} failed: {source}")]
    Run {
        function: String,
        #[source]
        source: Box<Error>,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the lookup failures surfaced as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::FunctionNotFound(_)
                | Error::CodeTypeNotFound(_)
                | Error::RunRecordNotFound(_)
                | Error::RunLogsNotFound(_)
        )
    }
}

/// Result type using dockyard Error.
pub type Result<T> = std::result::Result<T, Error>;
