// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fixtures shared by unit tests.

use chrono::Utc;

use crate::code_types::{CodeType, CodeTypeCatalog};
use crate::model::{DeploymentDetails, Function, NetworkMode};

pub fn python() -> CodeType {
    CodeType {
        name: "python".to_string(),
        from: "python:3.12-slim".to_string(),
        pre_install_commands: vec!["apt-get update".to_string()],
        install_command: "pip install".to_string(),
        post_install_commands: vec![],
        entrypoint: "python".to_string(),
        main_file_name: "main.py".to_string(),
    }
}

pub fn catalog() -> CodeTypeCatalog {
    CodeTypeCatalog::new([python()])
}

pub fn function(name: &str) -> Function {
    Function {
        name: name.to_string(),
        tags: vec![],
        code_type_name: "python".to_string(),
        dependencies: vec![],
        additional_commands: vec![],
        environment_variables: vec![],
        volumes: vec![],
        network_mode: NetworkMode::None,
        privileged: false,
        run_timeout: 30,
        deployment_details: DeploymentDetails::default(),
        schedule: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
