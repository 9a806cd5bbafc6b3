// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reading and pruning per-run log files.
//!
//! Log files are named `<container name>.log`, so the timestamp embedded in
//! the name orders them and bounds date filters without opening the file.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::LogConfig;
use crate::error::{Error, Result};
use crate::model::{CONTAINER_TIMESTAMP_FORMAT, LOG_FILE_SUFFIX, split_container_name};
use crate::storage::{FileKind, FileStore};
use crate::validation::is_valid_function_name;

/// Selection of log files. Empty lists match everything.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub function_names: Vec<String>,
    pub container_names: Vec<String>,
    /// Inclusive lower bound on the run timestamp.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the run timestamp.
    pub to: Option<DateTime<Utc>>,
}

pub struct RunLogService {
    files: FileStore,
    config: LogConfig,
}

impl RunLogService {
    pub fn new(files: FileStore, config: LogConfig) -> Self {
        Self { files, config }
    }

    /// Header block followed by the log of one run.
    pub async fn get(&self, container_name: &str) -> Result<String> {
        let function = split_container_name(container_name)
            .map(|(function, _)| function)
            .unwrap_or(container_name);
        if !is_valid_function_name(function) || !is_plain_file_name(container_name) {
            return Err(Error::BadInput("containerName".to_string()));
        }
        let path = self
            .files
            .dir_path(FileKind::Logs, function)
            .join(log_file_name(container_name));
        self.read(&path).await
    }

    /// Matching logs, newest run first, each with its header block.
    pub async fn list(&self, filter: &LogFilter) -> Result<String> {
        if !filter
            .function_names
            .iter()
            .all(|name| is_valid_function_name(name))
        {
            return Err(Error::BadInput("functionNames".to_string()));
        }

        let dirs = if filter.function_names.is_empty() {
            self.files.list_directories(FileKind::Logs).await?
        } else {
            filter
                .function_names
                .iter()
                .map(|name| self.files.dir_path(FileKind::Logs, name))
                .collect()
        };

        let wanted: Vec<String> = filter
            .container_names
            .iter()
            .map(|name| log_file_name(name))
            .collect();
        let from = filter.from.map(format_timestamp);
        let to = filter.to.map(format_timestamp);

        let mut selected: Vec<(String, PathBuf)> = Vec::new();
        for dir in dirs {
            for path in list_dir(&dir).await? {
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned)
                else {
                    continue;
                };
                if !wanted.is_empty() && !wanted.contains(&file_name) {
                    continue;
                }
                let timestamp = timestamp_of(&file_name);
                if from.as_deref().is_some_and(|from| timestamp < from)
                    || to.as_deref().is_some_and(|to| timestamp >= to)
                {
                    continue;
                }
                selected.push((file_name, path));
            }
        }
        selected.sort_by(|a, b| {
            timestamp_of(&b.0)
                .cmp(timestamp_of(&a.0))
                .then_with(|| b.0.cmp(&a.0))
        });

        let mut out = String::new();
        for (_, path) in selected {
            out.push_str(&self.read(&path).await?);
        }
        Ok(out)
    }

    /// Remove log files of runs started before `cutoff`.
    pub async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff = format_timestamp(cutoff);
        let mut removed = 0;
        for dir in self.files.list_directories(FileKind::Logs).await? {
            for path in list_dir(&dir).await? {
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if timestamp_of(file_name) >= cutoff.as_str() {
                    continue;
                }
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete log file"),
                }
            }
        }
        info!(removed, "Deleted old log files");
        Ok(removed)
    }

    async fn read(&self, path: &Path) -> Result<String> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::RunLogsNotFound(file_name));
            }
            Err(e) => return Err(e.into()),
        };

        let separator = self.config.header_separator();
        let mut out = format!("{separator}\n{file_name}\n{separator}\n");
        for line in content.lines() {
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }
}

fn log_file_name(container_name: &str) -> String {
    format!("{container_name}{LOG_FILE_SUFFIX}")
}

/// No separators or parent references, so joining it stays inside its directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.contains("..")
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(CONTAINER_TIMESTAMP_FORMAT).to_string()
}

/// Timestamp part of a log file name; the whole name if it has none.
fn timestamp_of(file_name: &str) -> &str {
    split_container_name(file_name)
        .map(|(_, ts)| ts)
        .unwrap_or(file_name)
}

async fn list_dir(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::container_name;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    async fn write_log(files: &FileStore, function: &str, hour: u32, body: &str) -> String {
        let name = container_name(function, at(hour));
        let path = files
            .file(FileKind::Logs, function, &log_file_name(&name))
            .await
            .unwrap();
        tokio::fs::write(path, body).await.unwrap();
        name
    }

    fn service(dir: &TempDir) -> (RunLogService, FileStore) {
        let files = FileStore::new(dir.path());
        (
            RunLogService::new(files.clone(), Config::default().logs),
            files,
        )
    }

    #[tokio::test]
    async fn get_prefixes_the_header() {
        let dir = TempDir::new().unwrap();
        let (logs, files) = service(&dir);
        let name = write_log(&files, "hello", 1, "line one\nline two").await;

        let text = logs.get(&name).await.unwrap();
        let separator = "=".repeat(50);
        assert_eq!(
            text,
            format!("{separator}\n{name}.log\n{separator}\nline one\nline two\n")
        );
    }

    #[tokio::test]
    async fn missing_log_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (logs, _) = service(&dir);
        assert!(matches!(
            logs.get("hello_._2024-05-01T01-00-00.000000").await,
            Err(Error::RunLogsNotFound(name)) if name == "hello_._2024-05-01T01-00-00.000000.log"
        ));
    }

    #[tokio::test]
    async fn list_filters_and_orders_newest_first() {
        let dir = TempDir::new().unwrap();
        let (logs, files) = service(&dir);
        let a1 = write_log(&files, "a", 1, "a1").await;
        let a3 = write_log(&files, "a", 3, "a3").await;
        let b2 = write_log(&files, "b", 2, "b2").await;

        let all = logs.list(&LogFilter::default()).await.unwrap();
        let pos = |name: &str| all.find(name).unwrap();
        assert!(pos(&a3) < pos(&b2));
        assert!(pos(&b2) < pos(&a1));

        let only_a = logs
            .list(&LogFilter {
                function_names: vec!["a".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(only_a.contains("a1") && only_a.contains("a3"));
        assert!(!only_a.contains("b2"));
        assert!(only_a.find("a3").unwrap() < only_a.find("a1").unwrap());

        let window = logs
            .list(&LogFilter {
                from: Some(at(2)),
                to: Some(at(3)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(window.contains(&b2));
        assert!(!window.contains(&a1) && !window.contains(&a3));

        let by_container = logs
            .list(&LogFilter {
                container_names: vec![a1.clone()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(by_container.contains("a1"));
        assert!(!by_container.contains("a3"));
    }

    #[tokio::test]
    async fn newer_run_of_an_earlier_function_comes_first() {
        let dir = TempDir::new().unwrap();
        let (logs, files) = service(&dir);
        let b1 = write_log(&files, "b", 1, "b1").await;
        let a3 = write_log(&files, "a", 3, "a3").await;

        let all = logs.list(&LogFilter::default()).await.unwrap();
        assert!(all.find(&a3).unwrap() < all.find(&b1).unwrap());
    }

    #[tokio::test]
    async fn names_cannot_escape_the_logs_directory() {
        let dir = TempDir::new().unwrap();
        let (logs, files) = service(&dir);
        write_log(&files, "hello", 1, "hello").await;

        let outside = dir.path().join("secret");
        tokio::fs::create_dir_all(&outside).await.unwrap();
        let stolen = "passwd_._2024-05-01T01-00-00.000000";
        tokio::fs::write(outside.join(format!("{stolen}.log")), "TOP SECRET")
            .await
            .unwrap();

        let escaped = logs
            .list(&LogFilter {
                function_names: vec!["../../secret".into()],
                ..Default::default()
            })
            .await;
        assert!(matches!(escaped, Err(Error::BadInput(field)) if field == "functionNames"));

        for name in [
            "../../secret/passwd_._2024-05-01T01-00-00.000000",
            "hello_._../../../secret/passwd",
            "..",
        ] {
            assert!(
                matches!(logs.get(name).await, Err(Error::BadInput(field)) if field == "containerName"),
                "{name}"
            );
        }
    }

    #[tokio::test]
    async fn delete_before_removes_older_files_only() {
        let dir = TempDir::new().unwrap();
        let (logs, files) = service(&dir);
        let old = write_log(&files, "a", 1, "old").await;
        let new = write_log(&files, "a", 5, "new").await;

        assert_eq!(logs.delete_before(at(3)).await.unwrap(), 1);
        assert!(logs.get(&old).await.is_err());
        assert!(logs.get(&new).await.is_ok());
    }
}
