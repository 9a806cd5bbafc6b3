// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! On-disk storage area.
//!
//! Layout: `<base>/dockyard/<kind>/<function>/<file>`.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Root directory name under the base path.
const ROOT_DIR: &str = "dockyard";

/// Artifact kinds kept per function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Generated build context files.
    Dockerfile,
    /// Deployed tree, bind-mounted into the container.
    Volume,
    /// Staged tree edited by users.
    Resources,
    /// Per-run log files.
    Logs,
}

impl FileKind {
    pub const ALL: [FileKind; 4] = [
        FileKind::Dockerfile,
        FileKind::Volume,
        FileKind::Resources,
        FileKind::Logs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Dockerfile => "dockerfile",
            FileKind::Volume => "volume",
            FileKind::Resources => "resources",
            FileKind::Logs => "logs",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves and manages files of the storage area.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            root: base_path.as_ref().join(ROOT_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one kind, without creating it.
    pub fn kind_dir(&self, kind: FileKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    /// Directory of a function for one kind, without creating it.
    pub fn dir_path(&self, kind: FileKind, function: &str) -> PathBuf {
        self.kind_dir(kind).join(function)
    }

    /// Path of a file, creating its parent directories.
    pub async fn file(&self, kind: FileKind, function: &str, file: &str) -> io::Result<PathBuf> {
        let dir = self.directory(kind, function).await?;
        Ok(dir.join(file))
    }

    /// Directory of a function for one kind, creating it.
    pub async fn directory(&self, kind: FileKind, function: &str) -> io::Result<PathBuf> {
        let dir = self.dir_path(kind, function);
        if !tokio::fs::try_exists(&dir).await? {
            tokio::fs::create_dir_all(&dir).await?;
            debug!(kind = %kind, function = %function, "Created directory");
        }
        Ok(dir)
    }

    /// Entries directly inside a function's directory. Missing directory → empty.
    pub async fn list_files(&self, kind: FileKind, function: &str) -> io::Result<Vec<PathBuf>> {
        list(&self.dir_path(kind, function)).await
    }

    /// Function directories that exist for one kind.
    pub async fn list_directories(&self, kind: FileKind) -> io::Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for path in list(&self.kind_dir(kind)).await? {
            if tokio::fs::metadata(&path).await?.is_dir() {
                dirs.push(path);
            }
        }
        Ok(dirs)
    }

    /// Delete the contents of a function's directory, and optionally the directory.
    pub async fn delete_dir_files(
        &self,
        kind: FileKind,
        function: &str,
        remove_dir: bool,
    ) -> io::Result<()> {
        let dir = self.dir_path(kind, function);
        for path in list(&dir).await? {
            if tokio::fs::metadata(&path).await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        if remove_dir && tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir(&dir).await?;
        }
        Ok(())
    }

    /// Delete every kind of artifact for a function.
    pub async fn delete_all(&self, function: &str) -> io::Result<()> {
        for kind in FileKind::ALL {
            self.delete_dir_files(kind, function, true).await?;
        }
        Ok(())
    }
}

async fn list(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_path_creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());

        let path = store
            .file(FileKind::Logs, "hello", "hello_._t.log")
            .await
            .unwrap();

        assert_eq!(
            path,
            tmp.path().join("dockyard/logs/hello/hello_._t.log")
        );
        assert!(path.parent().unwrap().is_dir());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn listing_missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());

        assert!(store.list_files(FileKind::Volume, "nope").await.unwrap().is_empty());
        assert!(store.list_directories(FileKind::Logs).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_all_removes_every_kind() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        for kind in FileKind::ALL {
            let file = store.file(kind, "hello", "a.txt").await.unwrap();
            tokio::fs::write(&file, "x").await.unwrap();
        }
        let nested = store.directory(FileKind::Resources, "hello").await.unwrap().join("lib");
        tokio::fs::create_dir_all(&nested).await.unwrap();
        tokio::fs::write(nested.join("b.txt"), "y").await.unwrap();

        store.delete_all("hello").await.unwrap();

        for kind in FileKind::ALL {
            assert!(!store.dir_path(kind, "hello").exists());
        }
    }

    #[tokio::test]
    async fn delete_dir_files_can_keep_directory() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        let file = store.file(FileKind::Volume, "hello", "main.py").await.unwrap();
        tokio::fs::write(&file, "print(1)").await.unwrap();

        store
            .delete_dir_files(FileKind::Volume, "hello", false)
            .await
            .unwrap();

        assert!(store.dir_path(FileKind::Volume, "hello").is_dir());
        assert!(store.list_files(FileKind::Volume, "hello").await.unwrap().is_empty());
    }
}
