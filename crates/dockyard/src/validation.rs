// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Checks and defaults applied to create/update requests.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;

use crate::code_types::CodeTypeCatalog;
use crate::error::{Error, Result};
use crate::model::{DeploymentDetails, Function, FunctionRequest, KeyValue, Volume};
use crate::scheduler::{Schedule, ScheduleKind, Trigger};

static FUNCTION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][-a-z0-9_]*$").expect("constant regex pattern is valid")
});

/// Whether `name` can be used as a function name, and so as an image
/// repository, container name prefix and storage directory.
pub fn is_valid_function_name(name: &str) -> bool {
    FUNCTION_NAME.is_match(name)
}

/// Validates requests against the code-type catalog.
#[derive(Clone)]
pub struct FunctionValidator {
    catalog: Arc<CodeTypeCatalog>,
    default_run_timeout: u32,
}

impl FunctionValidator {
    pub fn new(catalog: Arc<CodeTypeCatalog>, default_run_timeout: u32) -> Self {
        Self {
            catalog,
            default_run_timeout,
        }
    }

    /// Validate a create request and build the new function with defaults.
    ///
    /// `existing` is the stored function with the same name, if any.
    pub fn validate_and_create(
        &self,
        request: FunctionRequest,
        existing: Option<&Function>,
    ) -> Result<Function> {
        not_blank("name", &request.name)?;
        check("name", FUNCTION_NAME.is_match(&request.name))?;
        let code_type_name = request.code_type_name.clone().unwrap_or_default();
        not_blank("codeTypeName", &code_type_name)?;
        self.validate_fields(&request)?;
        self.catalog.get(&code_type_name)?;

        if existing.is_some() {
            return Err(Error::FunctionAlreadyExists(request.name));
        }

        let now = Utc::now();
        Ok(Function {
            name: request.name,
            tags: request.tags.unwrap_or_default(),
            code_type_name,
            dependencies: request.dependencies.unwrap_or_default(),
            additional_commands: request.additional_commands.unwrap_or_default(),
            environment_variables: request.environment_variables.unwrap_or_default(),
            volumes: request.volumes.unwrap_or_default(),
            network_mode: request.network_mode.unwrap_or_default(),
            privileged: request.privileged.unwrap_or(false),
            run_timeout: request.run_timeout.unwrap_or(self.default_run_timeout),
            deployment_details: DeploymentDetails::default(),
            schedule: request.schedule,
            created_at: now,
            updated_at: now,
        })
    }

    /// Validate an update request and merge it into the stored function.
    /// Absent fields keep their stored value; the name never changes.
    pub fn validate_and_update(&self, request: FunctionRequest, mut stored: Function) -> Result<Function> {
        not_blank("name", &request.name)?;
        self.validate_fields(&request)?;
        if let Some(code_type_name) = &request.code_type_name {
            self.catalog.get(code_type_name)?;
        }

        stored.updated_at = Utc::now();
        if let Some(tags) = request.tags {
            stored.tags = tags;
        }
        if let Some(code_type_name) = request.code_type_name {
            stored.code_type_name = code_type_name;
        }
        if let Some(dependencies) = request.dependencies {
            stored.dependencies = dependencies;
        }
        if let Some(commands) = request.additional_commands {
            stored.additional_commands = commands;
        }
        if let Some(env) = request.environment_variables {
            stored.environment_variables = env;
        }
        if let Some(volumes) = request.volumes {
            stored.volumes = volumes;
        }
        if let Some(network_mode) = request.network_mode {
            stored.network_mode = network_mode;
        }
        if let Some(privileged) = request.privileged {
            stored.privileged = privileged;
        }
        if let Some(run_timeout) = request.run_timeout {
            stored.run_timeout = run_timeout;
        }
        if request.schedule.is_some() {
            stored.schedule = request.schedule;
        }
        Ok(stored)
    }

    fn validate_fields(&self, request: &FunctionRequest) -> Result<()> {
        if let Some(timeout) = request.run_timeout {
            check("runTimeout", timeout > 0)?;
        }
        if let Some(schedule) = &request.schedule {
            validate_schedule(schedule)?;
        }
        if let Some(volumes) = &request.volumes {
            validate_volumes(volumes)?;
        }
        string_list("dependencies", request.dependencies.as_deref())?;
        string_list("additionalCommands", request.additional_commands.as_deref())?;
        pair_list("tags", request.tags.as_deref())?;
        pair_list("environmentVariables", request.environment_variables.as_deref())
    }
}

fn check(field: &str, condition: bool) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::BadInput(field.to_string()))
    }
}

fn not_blank(field: &str, value: &str) -> Result<()> {
    check(field, !value.trim().is_empty())
}

fn validate_schedule(schedule: &Schedule) -> Result<()> {
    let field = match &schedule.kind {
        ScheduleKind::Cron { .. } => "schedule.cron",
        ScheduleKind::FixedDelay { .. } => "schedule.delay",
    };
    check(field, Trigger::from_kind(&schedule.kind).is_ok())
}

fn validate_volumes(volumes: &[Volume]) -> Result<()> {
    for volume in volumes {
        not_blank("volumes.containerPath", &volume.container_path)?;
        not_blank("volumes.hostPath", &volume.host_path)?;
    }
    Ok(())
}

fn string_list(field: &str, values: Option<&[String]>) -> Result<()> {
    values
        .unwrap_or_default()
        .iter()
        .try_for_each(|value| not_blank(field, value))
}

fn pair_list(field: &str, pairs: Option<&[KeyValue]>) -> Result<()> {
    let pairs = pairs.unwrap_or_default();
    for pair in pairs {
        not_blank(&format!("{field}.key"), &pair.key)?;
        not_blank(&format!("{field}.value"), &pair.value)?;
    }
    let unique: HashSet<&str> = pairs.iter().map(|p| p.key.as_str()).collect();
    check(field, unique.len() == pairs.len())
}
