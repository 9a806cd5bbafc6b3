// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dockerfile synthesis with a per-function cache.
//!
//! The build context of a function is a single generated Dockerfile named
//! `<hash>_<timestamp>`, where `hash` covers the function's dependencies,
//! additional commands and code type. A file whose name starts with the
//! current hash is reused; anything else in the directory is stale and is
//! replaced.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::code_types::CodeType;
use crate::error::{Error, Result};
use crate::model::{CONTAINER_TIMESTAMP_FORMAT, Function};
use crate::storage::{FileKind, FileStore};

/// Directory the function's volume is mounted at inside the container.
pub const CONTAINER_ROOT: &str = "/dockyard";

/// Hex characters kept from the digest.
const HASH_LEN: usize = 16;

/// Incremental, unambiguous content fingerprint.
#[derive(Default)]
pub(crate) struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub(crate) fn str(mut self, value: &str) -> Self {
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value.as_bytes());
        self
    }

    pub(crate) fn list(mut self, values: &[String]) -> Self {
        self.hasher.update((values.len() as u64).to_le_bytes());
        values.iter().fold(self, |fp, v| fp.str(v))
    }

    pub(crate) fn finish(self) -> String {
        let mut hex = format!("{:x}", self.hasher.finalize());
        hex.truncate(HASH_LEN);
        hex
    }
}

/// Content hash of everything that shapes a function's Dockerfile.
pub fn dockerfile_hash(function: &Function, code_type: &CodeType) -> String {
    Fingerprint::default()
        .list(&function.dependencies)
        .list(&function.additional_commands)
        .str(&code_type.name)
        .str(&code_type.from)
        .list(&code_type.pre_install_commands)
        .str(&code_type.install_command)
        .list(&code_type.post_install_commands)
        .str(&code_type.entrypoint)
        .str(&code_type.main_file_name)
        .finish()
}

/// Render the Dockerfile text.
pub fn render(function: &Function, code_type: &CodeType) -> String {
    let mut out = String::new();
    let mut line = |text: String| {
        let _ = writeln!(out, "{text}");
    };

    line(format!("FROM {}", code_type.from));
    for command in &code_type.pre_install_commands {
        line(format!("RUN {command}"));
    }
    let dependencies = function.dependencies.join(" ");
    if !dependencies.trim().is_empty() {
        line(format!("RUN {} {dependencies}", code_type.install_command));
    }
    for command in &code_type.post_install_commands {
        line(format!("RUN {command}"));
    }
    for command in &function.additional_commands {
        line(format!("RUN {command}"));
    }
    line(format!("ENTRYPOINT [\"{}\"]", code_type.entrypoint));
    line(format!(
        "CMD [\"{CONTAINER_ROOT}/{}\"]",
        code_type.main_file_name
    ));
    out
}

/// Generates and caches build context files.
#[derive(Debug, Clone)]
pub struct DockerfileGenerator {
    files: FileStore,
}

impl DockerfileGenerator {
    pub fn new(files: FileStore) -> Self {
        Self { files }
    }

    /// Return the cached Dockerfile for `function`, generating it on a miss.
    pub async fn dockerfile(&self, function: &Function, code_type: &CodeType) -> Result<PathBuf> {
        let name = &function.name;
        let hash = dockerfile_hash(function, code_type);

        let existing = self
            .files
            .list_files(FileKind::Dockerfile, name)
            .await
            .map_err(|source| Error::DockerfileCreation {
                function: name.clone(),
                source,
            })?;

        for file in existing {
            let cached = file
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&hash));
            if cached {
                debug!(function = %name, path = %file.display(), "Reusing cached Dockerfile");
                return Ok(file);
            }
            match tokio::fs::remove_file(&file).await {
                Ok(()) => debug!(function = %name, path = %file.display(), "Deleted stale Dockerfile"),
                Err(e) => warn!(function = %name, path = %file.display(), error = %e, "Failed to delete stale Dockerfile"),
            }
        }

        self.create(function, code_type, &hash).await
    }

    async fn create(&self, function: &Function, code_type: &CodeType, hash: &str) -> Result<PathBuf> {
        let file_name = format!("{hash}_{}", Utc::now().format(CONTAINER_TIMESTAMP_FORMAT));
        let write = async {
            let path = self
                .files
                .file(FileKind::Dockerfile, &function.name, &file_name)
                .await?;
            tokio::fs::write(&path, render(function, code_type)).await?;
            Ok::<_, std::io::Error>(path)
        };

        let path = write.await.map_err(|source| Error::DockerfileCreation {
            function: function.name.clone(),
            source,
        })?;
        info!(function = %function.name, path = %path.display(), "Saved new Dockerfile");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::python;
    use tempfile::TempDir;

    fn function(dependencies: &[&str]) -> Function {
        let mut f = crate::test_support::function("hello");
        f.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        f.additional_commands = vec!["echo ready".to_string()];
        f
    }

    #[test]
    fn renders_directives_in_order() {
        let text = render(&function(&["requests", "numpy"]), &python());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "FROM python:3.12-slim",
                "RUN apt-get update",
                "RUN pip install requests numpy",
                "RUN echo ready",
                "ENTRYPOINT [\"python\"]",
                "CMD [\"/dockyard/main.py\"]",
            ]
        );
    }

    #[test]
    fn no_install_line_without_dependencies() {
        let text = render(&function(&[]), &python());
        assert!(!text.contains("pip install"));
    }

    #[test]
    fn hash_separates_list_boundaries() {
        let mut a = function(&["ab"]);
        a.additional_commands = vec!["c".to_string()];
        let mut b = function(&["a"]);
        b.additional_commands = vec!["bc".to_string()];
        assert_ne!(dockerfile_hash(&a, &python()), dockerfile_hash(&b, &python()));
    }

    #[tokio::test]
    async fn identical_inputs_reuse_the_cached_file() {
        let tmp = TempDir::new().unwrap();
        let generator = DockerfileGenerator::new(FileStore::new(tmp.path()));
        let f = function(&["requests"]);

        let first = generator.dockerfile(&f, &python()).await.unwrap();
        let second = generator.dockerfile(&f, &python()).await.unwrap();

        assert_eq!(first, second);
        let name = first.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(&format!("{}_", dockerfile_hash(&f, &python()))));
    }

    #[tokio::test]
    async fn changed_dependency_replaces_the_old_file() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        let generator = DockerfileGenerator::new(store.clone());

        let old = generator
            .dockerfile(&function(&["requests"]), &python())
            .await
            .unwrap();
        let new = generator
            .dockerfile(&function(&["requests", "flask"]), &python())
            .await
            .unwrap();

        assert_ne!(old, new);
        assert!(!old.exists());
        let files = store.list_files(FileKind::Dockerfile, "hello").await.unwrap();
        assert_eq!(files, vec![new.clone()]);
        let text = tokio::fs::read_to_string(&new).await.unwrap();
        assert!(text.contains("RUN pip install requests flask"));
    }
}
