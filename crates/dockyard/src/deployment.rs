// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Promotion of the staged resources tree to the active volume tree.
//!
//! Users edit files under the `resources` kind. Nothing reaches a running
//! container until [`Deployer::deploy`] copies that tree over the `volume`
//! kind, which is what the runner bind-mounts.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info};

use crate::code_types::CodeTypeCatalog;
use crate::config::DeployConfig;
use crate::error::{Error, Result};
use crate::model::Function;
use crate::retry::{Backoff, retry_with_backoff};
use crate::storage::{FileKind, FileStore};

#[derive(Clone)]
pub struct Deployer {
    files: FileStore,
    catalog: Arc<CodeTypeCatalog>,
    config: DeployConfig,
}

impl Deployer {
    pub fn new(files: FileStore, catalog: Arc<CodeTypeCatalog>, config: DeployConfig) -> Self {
        Self {
            files,
            catalog,
            config,
        }
    }

    /// Create an empty main file in the staged tree unless one exists.
    pub async fn create_main_file(&self, function: &Function) -> Result<()> {
        let main_file = &self.catalog.get(&function.code_type_name)?.main_file_name;
        let name = &function.name;
        self.with_retry(name, "create main file", || async move {
            let path = self.files.file(FileKind::Resources, name, main_file).await?;
            if !tokio::fs::try_exists(&path).await? {
                tokio::fs::File::create(&path).await?;
                debug!(function = %name, path = %path.display(), "Created main file");
            }
            Ok(())
        })
        .await
    }

    /// True when the staged tree differs from the active one: a different
    /// number of files, a staged file missing from the active tree, or a
    /// staged file newer than its active copy.
    pub async fn has_changes(&self, function: &str) -> Result<bool> {
        let staged = walk(&self.files.dir_path(FileKind::Resources, function)).await?;
        let active = walk(&self.files.dir_path(FileKind::Volume, function)).await?;
        if staged.len() != active.len() {
            return Ok(true);
        }
        Ok(staged.iter().any(|(path, modified)| match active.get(path) {
            Some(copied) => modified > copied,
            None => true,
        }))
    }

    /// Replace the active tree with the staged tree.
    pub async fn deploy(&self, function: &str) -> Result<()> {
        if !self.has_changes(function).await? {
            return Err(Error::FunctionAlreadyDeployed(function.to_string()));
        }
        self.with_retry(function, "deploy", || async move {
            let staged = self.files.directory(FileKind::Resources, function).await?;
            let active = self.files.directory(FileKind::Volume, function).await?;
            self.files
                .delete_dir_files(FileKind::Volume, function, false)
                .await?;
            copy_tree(&staged, &active).await
        })
        .await?;
        info!(function = %function, "Deployed resources");
        Ok(())
    }

    async fn with_retry<F, Fut>(&self, function: &str, description: &str, op: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        retry_with_backoff(
            self.config.retries,
            Backoff::Fixed(self.config.retry_delay),
            description,
            op,
            |_: &io::Error| true,
        )
        .await
        .map_err(|source| Error::Deployment {
            function: function.to_string(),
            source,
        })
    }
}

/// Regular files below `root`, keyed by relative path. Missing root → empty.
async fn walk(root: &Path) -> io::Result<HashMap<PathBuf, SystemTime>> {
    let mut files = HashMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            let path = entry.path();
            if metadata.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                files.insert(relative.to_path_buf(), metadata.modified()?);
            }
        }
    }
    Ok(files)
}

async fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((source, target)) = pending.pop() {
        tokio::fs::create_dir_all(&target).await?;
        let mut entries = tokio::fs::read_dir(&source).await?;
        while let Some(entry) = entries.next_entry().await? {
            let destination = target.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), destination));
            } else {
                tokio::fs::copy(entry.path(), destination).await?;
            }
        }
    }
    Ok(())
}
