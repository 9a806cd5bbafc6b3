// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Code-type catalog: reusable build templates keyed by name.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// A build template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeType {
    pub name: String,
    /// Base image.
    pub from: String,
    #[serde(default)]
    pub pre_install_commands: Vec<String>,
    /// Install command prefix; dependencies are appended space-separated.
    pub install_command: String,
    #[serde(default)]
    pub post_install_commands: Vec<String>,
    pub entrypoint: String,
    pub main_file_name: String,
}

/// Catalog entry as read from disk, before mandatory fields are checked.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCodeType {
    name: Option<String>,
    from: Option<String>,
    #[serde(default)]
    pre_install_commands: Vec<String>,
    install_command: Option<String>,
    #[serde(default)]
    post_install_commands: Vec<String>,
    entrypoint: Option<String>,
    main_file_name: Option<String>,
}

impl RawCodeType {
    fn into_code_type(self) -> Option<CodeType> {
        Some(CodeType {
            name: self.name?,
            from: self.from?,
            pre_install_commands: self.pre_install_commands,
            install_command: self.install_command?,
            post_install_commands: self.post_install_commands,
            entrypoint: self.entrypoint?,
            main_file_name: self.main_file_name?,
        })
    }
}

/// Read-only lookup of code types.
#[derive(Debug, Clone, Default)]
pub struct CodeTypeCatalog {
    types: BTreeMap<String, CodeType>,
}

impl CodeTypeCatalog {
    pub fn new(types: impl IntoIterator<Item = CodeType>) -> Self {
        Self {
            types: types.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    /// Parse a JSON array of code types, skipping incomplete entries.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Vec<serde_json::Value> = serde_json::from_str(json)?;
        let mut types = Vec::with_capacity(raw.len());
        for value in raw {
            let parsed = serde_json::from_value::<RawCodeType>(value.clone())
                .ok()
                .and_then(RawCodeType::into_code_type);
            match parsed {
                Some(code_type) => types.push(code_type),
                None => warn!(
                    code_type = %value,
                    "Code type is missing a mandatory field and will be ignored"
                ),
            }
        }
        Ok(Self::new(types))
    }

    /// Load the catalog from a JSON file.
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        let catalog = Self::from_json(&json)?;
        info!(path = %path.display(), count = catalog.types.len(), "Loaded code types");
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Result<&CodeType> {
        self.types
            .get(name)
            .ok_or_else(|| Error::CodeTypeNotFound(name.to_string()))
    }

    pub fn all(&self) -> Vec<CodeType> {
        self.types.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"[
        {
            "name": "python",
            "from": "python:3.12-slim",
            "installCommand": "pip install",
            "entrypoint": "python",
            "mainFileName": "main.py"
        },
        {
            "name": "broken",
            "from": "alpine"
        }
    ]"#;

    #[test]
    fn incomplete_entries_are_skipped() {
        let catalog = CodeTypeCatalog::from_json(CATALOG).unwrap();

        let all = catalog.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "python");
        assert!(all[0].pre_install_commands.is_empty());
    }

    #[test]
    fn unknown_code_type_is_not_found() {
        let catalog = CodeTypeCatalog::from_json(CATALOG).unwrap();

        assert_eq!(catalog.get("python").unwrap().main_file_name, "main.py");
        assert!(matches!(
            catalog.get("broken"),
            Err(Error::CodeTypeNotFound(name)) if name == "broken"
        ));
    }
}
