// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed store.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::Persistence;
use crate::error::{Error, Result};
use crate::model::{Function, RunRecord, RunRecordFilter, RunStatus};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct RunRecordRow {
    id: String,
    function_name: String,
    status: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    exit_code: Option<i64>,
    error_message: Option<String>,
}

impl TryFrom<RunRecordRow> for RunRecord {
    type Error = Error;

    fn try_from(row: RunRecordRow) -> Result<Self> {
        let status: RunStatus = row.status.parse().map_err(Error::Other)?;
        Ok(RunRecord {
            id: row.id,
            function_name: row.function_name,
            status,
            start_time: row.start_time,
            end_time: row.end_time,
            exit_code: row.exit_code,
            error_message: row.error_message,
        })
    }
}

const RUN_RECORD_COLUMNS: &str =
    "SELECT id, function_name, status, start_time, end_time, exit_code, error_message FROM run_records";

impl SqlitePersistence {
    /// Wrap an existing pool. Migrations are not run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database URL and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Open (creating if needed) a database file, its parent directories
    /// included, and run migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::connect(&format!("sqlite:{}?mode=rwc", path.to_string_lossy())).await
    }

    /// Private in-memory database, used by tests and throwaway runtimes.
    pub async fn in_memory() -> Result<Self> {
        // A single connection keeps every query on the same memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn functions_where(&self, code_type_name: Option<&str>) -> Result<Vec<Function>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT definition
            FROM functions
            WHERE (?1 IS NULL OR code_type_name = ?1)
            ORDER BY name
            "#,
        )
        .bind(code_type_name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(definition,)| serde_json::from_str(&definition).map_err(Error::from))
            .collect()
    }
}

fn push_in_list<'a, T>(
    builder: &mut QueryBuilder<'a, Sqlite>,
    column: &str,
    values: impl IntoIterator<Item = T>,
) where
    T: 'a + sqlx::Encode<'a, Sqlite> + sqlx::Type<Sqlite> + Send,
{
    builder.push(" AND ").push(column).push(" IN (");
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn get_function(&self, name: &str) -> Result<Option<Function>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT definition FROM functions WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(definition,)| serde_json::from_str(&definition).map_err(Error::from))
            .transpose()
    }

    async fn save_function(&self, function: &Function) -> Result<()> {
        let definition = serde_json::to_string(function)?;
        sqlx::query(
            r#"
            INSERT INTO functions (name, code_type_name, definition, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(name) DO UPDATE SET
                code_type_name = excluded.code_type_name,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&function.name)
        .bind(&function.code_type_name)
        .bind(definition)
        .bind(function.created_at)
        .bind(function.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_function(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM functions WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_functions(&self) -> Result<Vec<Function>> {
        self.functions_where(None).await
    }

    async fn list_functions_by_code_type(&self, code_type_name: &str) -> Result<Vec<Function>> {
        self.functions_where(Some(code_type_name)).await
    }

    async fn save_run_record(&self, record: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO run_records (id, function_name, status, start_time, end_time, exit_code, error_message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                end_time = excluded.end_time,
                exit_code = excluded.exit_code,
                error_message = excluded.error_message
            "#,
        )
        .bind(&record.id)
        .bind(&record.function_name)
        .bind(record.status.as_str())
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.exit_code)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_run_record(&self, id: &str) -> Result<Option<RunRecord>> {
        let row: Option<RunRecordRow> =
            sqlx::query_as(&format!("{RUN_RECORD_COLUMNS} WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(RunRecord::try_from).transpose()
    }

    async fn list_run_records(&self, filter: &RunRecordFilter) -> Result<Vec<RunRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(RUN_RECORD_COLUMNS);
        builder.push(" WHERE 1 = 1");

        if !filter.function_names.is_empty() {
            push_in_list(&mut builder, "function_name", filter.function_names.iter().cloned());
        }
        if !filter.statuses.is_empty() {
            push_in_list(&mut builder, "status", filter.statuses.iter().map(|s| s.as_str()));
        }
        if !filter.exit_codes.is_empty() {
            push_in_list(&mut builder, "exit_code", filter.exit_codes.iter().copied());
        }
        if let Some(from) = filter.from {
            builder.push(" AND start_time >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            builder.push(" AND start_time < ").push_bind(to);
        }
        builder.push(" ORDER BY start_time DESC, id DESC");

        let rows: Vec<RunRecordRow> = builder.build_query_as::<RunRecordRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(RunRecord::try_from).collect()
    }

    async fn delete_run_records_of(&self, function_name: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM run_records WHERE function_name = ?")
            .bind(function_name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_run_records_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM run_records WHERE end_time IS NOT NULL AND end_time < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
