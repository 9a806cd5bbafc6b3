// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function and run-record store.
//!
//! The services talk to the [`Persistence`] trait; [`SqlitePersistence`] is
//! the bundled backend.

pub mod sqlite;

pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Function, RunRecord, RunRecordFilter};

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn get_function(&self, name: &str) -> Result<Option<Function>>;

    /// Insert or replace a function by name.
    async fn save_function(&self, function: &Function) -> Result<()>;

    /// Returns whether a row was removed.
    async fn delete_function(&self, name: &str) -> Result<bool>;

    /// All functions ordered by name.
    async fn list_functions(&self) -> Result<Vec<Function>>;

    async fn list_functions_by_code_type(&self, code_type_name: &str) -> Result<Vec<Function>>;

    /// Insert or replace a run record by id.
    async fn save_run_record(&self, record: &RunRecord) -> Result<()>;

    async fn get_run_record(&self, id: &str) -> Result<Option<RunRecord>>;

    /// Matching records, newest start time first. Empty filter lists match
    /// everything; `from` is inclusive and `to` exclusive.
    async fn list_run_records(&self, filter: &RunRecordFilter) -> Result<Vec<RunRecord>>;

    async fn delete_run_records_of(&self, function_name: &str) -> Result<u64>;

    /// Remove records whose end time is before `cutoff`. Unfinished records stay.
    async fn delete_run_records_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
