// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain types shared across the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::Schedule;

/// Delimiter between function name and timestamp in container names.
pub const CONTAINER_NAME_DELIMITER: &str = "_._";

/// Suffix of per-run log files.
pub const LOG_FILE_SUFFIX: &str = ".log";

/// Timestamp layout embedded in container names. Sorts lexicographically.
pub const CONTAINER_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.6f";

/// Key/value pair used for tags and environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// Extra bind mount declared by a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Container network mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Host,
    #[default]
    None,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Host => "host",
            NetworkMode::None => "none",
        }
    }
}

/// Persisted deployment bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDetails {
    pub last_deployed: Option<DateTime<Utc>>,
}

/// A registered function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    pub code_type_name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub additional_commands: Vec<String>,
    #[serde(default)]
    pub environment_variables: Vec<KeyValue>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub network_mode: NetworkMode,
    #[serde(default)]
    pub privileged: bool,
    /// Run timeout in minutes.
    pub run_timeout: u32,
    #[serde(default)]
    pub deployment_details: DeploymentDetails,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Function {
    /// Container name for a run started at `at`.
    pub fn container_name(&self, at: DateTime<Utc>) -> String {
        container_name(&self.name, at)
    }
}

pub fn container_name(function: &str, at: DateTime<Utc>) -> String {
    format!(
        "{function}{CONTAINER_NAME_DELIMITER}{}",
        at.format(CONTAINER_TIMESTAMP_FORMAT)
    )
}

/// Split a container (or log file) name into function name and timestamp.
pub fn split_container_name(name: &str) -> Option<(&str, &str)> {
    let name = name.strip_suffix(LOG_FILE_SUFFIX).unwrap_or(name);
    name.split_once(CONTAINER_NAME_DELIMITER)
}

/// Body of create/update requests. Every field but the name is optional so
/// that an update can carry only what changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRequest {
    #[serde(default)]
    pub name: String,
    pub tags: Option<Vec<KeyValue>>,
    pub code_type_name: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub additional_commands: Option<Vec<String>>,
    pub environment_variables: Option<Vec<KeyValue>>,
    pub volumes: Option<Vec<Volume>>,
    pub network_mode: Option<NetworkMode>,
    pub privileged: Option<bool>,
    pub run_timeout: Option<u32>,
    pub schedule: Option<Schedule>,
}

/// Image build status of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    InProgress,
    Success,
    Failure,
}

/// Outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    InProgress,
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "IN_PROGRESS",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILURE",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN_PROGRESS" => Ok(RunStatus::InProgress),
            "SUCCESS" => Ok(RunStatus::Success),
            "FAILURE" => Ok(RunStatus::Failure),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Persisted outcome of one run. The id is the container name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub function_name: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
    pub error_message: Option<String>,
}

impl RunRecord {
    pub fn in_progress(id: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            function_name: function_name.into(),
            status: RunStatus::InProgress,
            start_time: Utc::now(),
            end_time: None,
            exit_code: None,
            error_message: None,
        }
    }

    pub fn succeeded(mut self, exit_code: i64) -> Self {
        self.status = RunStatus::Success;
        self.exit_code = Some(exit_code);
        self.end_time = Some(Utc::now());
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = RunStatus::Failure;
        self.error_message = Some(message.into());
        self.end_time = Some(Utc::now());
        self
    }
}

/// Filter for listing run records.
#[derive(Debug, Clone, Default)]
pub struct RunRecordFilter {
    pub function_names: Vec<String>,
    pub statuses: Vec<RunStatus>,
    pub exit_codes: Vec<i64>,
    /// Inclusive lower bound on start time.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on start time.
    pub to: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn container_name_has_no_colons_and_splits_back() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap();
        let name = container_name("hello", at);
        assert_eq!(name, "hello_._2024-05-01T12-30-45.000000");
        assert!(!name.contains(':'));

        let file = format!("{name}.log");
        let (function, ts) = split_container_name(&file).unwrap();
        assert_eq!(function, "hello");
        assert_eq!(ts, "2024-05-01T12-30-45.000000");
    }

    #[test]
    fn run_status_parses_case_insensitively() {
        assert_eq!("success".parse::<RunStatus>().unwrap(), RunStatus::Success);
        assert_eq!(
            "IN_PROGRESS".parse::<RunStatus>().unwrap(),
            RunStatus::InProgress
        );
        assert!("done".parse::<RunStatus>().is_err());
    }

    #[test]
    fn run_record_transitions_set_end_time() {
        let record = RunRecord::in_progress("hello_._x", "hello");
        assert!(record.end_time.is_none());

        let done = record.clone().succeeded(3);
        assert_eq!(done.status, RunStatus::Success);
        assert_eq!(done.exit_code, Some(3));
        assert!(done.end_time.is_some());

        let failed = record.failed("boom");
        assert_eq!(failed.status, RunStatus::Failure);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
    }
}
