// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Image build orchestration.
//!
//! At most one build per function is in flight. A caller claims the build
//! slot by moving the function's status to `IN_PROGRESS` with an atomic
//! compare-and-swap (or insert-if-absent for a first build); a caller that
//! loses the race sees [`Error::BuildInProgress`] and backs off. Builds of
//! unrelated functions never contend.
//!
//! The slot is released by the build that claimed it, also when that build
//! is cancelled. Forgetting a function mid-build defers removal of its
//! status until the build releases the slot.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use dashmap::mapref::entry::Entry;
use tracing::{debug, error, info, warn};

use crate::code_types::CodeTypeCatalog;
use crate::config::BuildConfig;
use crate::dockerfile::{DockerfileGenerator, Fingerprint};
use crate::engine::EngineClient;
use crate::error::{Error, Result};
use crate::model::{BuildStatus, Function};
use crate::retry::{Backoff, retry_with_backoff};

/// Image tag of a function.
pub fn image_tag(function: &str) -> String {
    format!("dockyard/{function}")
}

/// Fingerprint of the inputs that decide whether an image is stale.
pub fn build_hash(function: &Function) -> String {
    Fingerprint::default()
        .str(&function.code_type_name)
        .list(&function.dependencies)
        .list(&function.additional_commands)
        .finish()
}

/// Builds function images, deduplicating concurrent and redundant builds.
pub struct ImageBuilder {
    engine: EngineClient,
    dockerfiles: DockerfileGenerator,
    catalog: Arc<CodeTypeCatalog>,
    config: BuildConfig,
    statuses: DashMap<String, BuildStatus>,
    hashes: DashMap<String, String>,
    /// Functions forgotten while their build was in flight.
    forgotten: DashSet<String>,
}

impl ImageBuilder {
    pub fn new(
        engine: EngineClient,
        dockerfiles: DockerfileGenerator,
        catalog: Arc<CodeTypeCatalog>,
        config: BuildConfig,
    ) -> Self {
        Self {
            engine,
            dockerfiles,
            catalog,
            config,
            statuses: DashMap::new(),
            hashes: DashMap::new(),
            forgotten: DashSet::new(),
        }
    }

    /// Current build status, `None` if the function was never built.
    pub fn status(&self, function: &str) -> Option<BuildStatus> {
        self.statuses.get(function).map(|s| *s)
    }

    /// Drop all build bookkeeping for a deleted function.
    ///
    /// A build in flight keeps its slot; its status is dropped when it ends.
    pub fn forget(&self, function: &str) {
        if let Entry::Occupied(entry) = self.statuses.entry(function.to_string()) {
            if *entry.get() == BuildStatus::InProgress {
                self.forgotten.insert(function.to_string());
            } else {
                entry.remove();
            }
        }
        self.hashes.remove(function);
    }

    /// Make sure the function's image is current.
    ///
    /// Without `force`, a function whose last build succeeded with the same
    /// inputs is left alone. Contention with another build of the same
    /// function is retried with exponential backoff.
    pub async fn build(&self, function: &Function, force: bool) -> Result<()> {
        let hash = build_hash(function);
        let backoff = Backoff::Exponential {
            initial: self.config.backoff_initial,
            max: self.config.backoff_max,
        };
        let description = format!("build image of {}", function.name);

        retry_with_backoff(
            self.config.retries,
            backoff,
            &description,
            || self.try_build(function, force, &hash),
            |e| matches!(e, Error::BuildInProgress(_)),
        )
        .await
    }

    async fn try_build(&self, function: &Function, force: bool, hash: &str) -> Result<()> {
        let name = &function.name;
        if !force && self.is_current(name, hash) {
            debug!(function = %name, "Image is up to date, skipping build");
            return Ok(());
        }

        let slot = self.claim(name)?;
        self.hashes.remove(name);
        info!(function = %name, force, "Building image");

        match self.run_build(function).await {
            Ok(image_id) => {
                self.hashes.insert(name.clone(), hash.to_string());
                slot.release(BuildStatus::Success);
                info!(function = %name, image_id = %image_id, "Image built");
                Ok(())
            }
            Err(e) => {
                slot.release(BuildStatus::Failure);
                error!(function = %name, error = %e, "Image build failed");
                Err(e)
            }
        }
    }

    async fn run_build(&self, function: &Function) -> Result<String> {
        let code_type = self.catalog.get(&function.code_type_name)?;
        let dockerfile = self.dockerfiles.dockerfile(function, code_type).await?;
        let image_id = self
            .engine
            .build(&dockerfile, &image_tag(&function.name))
            .await?;
        Ok(image_id)
    }

    fn is_current(&self, function: &str, hash: &str) -> bool {
        self.status(function) == Some(BuildStatus::Success)
            && self.hashes.get(function).is_some_and(|h| h.as_str() == hash)
    }

    /// Take the build slot or report that someone else holds it.
    fn claim(&self, function: &str) -> Result<BuildSlot<'_>> {
        let claimed = match self.status(function) {
            Some(BuildStatus::InProgress) => false,
            Some(previous) => self.compare_and_swap(function, previous, BuildStatus::InProgress),
            None => self.insert_if_absent(function, BuildStatus::InProgress),
        };
        if claimed {
            Ok(BuildSlot {
                builder: self,
                function: function.to_string(),
                released: false,
            })
        } else {
            Err(Error::BuildInProgress(function.to_string()))
        }
    }

    /// End the build holding the slot of `function`.
    fn finish(&self, function: &str, status: BuildStatus) {
        if let Entry::Occupied(mut entry) = self.statuses.entry(function.to_string()) {
            if self.forgotten.remove(function).is_some() {
                entry.remove();
                self.hashes.remove(function);
            } else if *entry.get() == BuildStatus::InProgress {
                entry.insert(status);
            }
        }
    }

    fn compare_and_swap(&self, function: &str, expected: BuildStatus, new: BuildStatus) -> bool {
        match self.statuses.get_mut(function) {
            Some(mut status) if *status == expected => {
                *status = new;
                true
            }
            _ => false,
        }
    }

    fn insert_if_absent(&self, function: &str, status: BuildStatus) -> bool {
        match self.statuses.entry(function.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(status);
                true
            }
        }
    }
}

/// The claimed build slot of one function. Dropping it unreleased, as when
/// the build future is cancelled, records a failure.
struct BuildSlot<'a> {
    builder: &'a ImageBuilder,
    function: String,
    released: bool,
}

impl BuildSlot<'_> {
    fn release(mut self, status: BuildStatus) {
        self.released = true;
        self.builder.finish(&self.function, status);
    }
}

impl Drop for BuildSlot<'_> {
    fn drop(&mut self) {
        if !self.released {
            warn!(function = %self.function, "Build cancelled");
            self.builder.finish(&self.function, BuildStatus::Failure);
        }
    }
}
