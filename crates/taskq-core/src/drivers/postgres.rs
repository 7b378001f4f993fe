//! Postgres driver.
//!
//! `pop` claims one row with a single `FOR UPDATE SKIP LOCKED` statement
//! inside a transaction. The transaction travels with the claim as its
//! continuation: the resolving `UPDATE` runs in it and commits it, and
//! `cleanup` commits whatever is still open.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use tracing::{debug, info, instrument, warn};

use crate::config::{PostgresConfig, validate_identifier};
use crate::domain::{QueueError, Task, TaskData, TaskInit, TaskRow, TaskState};
use crate::ports::driver::missing_continuation;
use crate::ports::{
    ClaimedTask, Continuation, Driver, IdGenerator, Resolution, SystemClock, UlidGenerator,
};

type ClaimTx = Transaction<'static, Postgres>;

/// Row shape returned by the claim statement.
#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: String,
    key: String,
    name: String,
    created_at: DateTime<Utc>,
    created_by: String,
    do_after: DateTime<Utc>,
    state: String,
    data: Json<serde_json::Value>,
    last_attempted: DateTime<Utc>,
    last_attempt_message: String,
}

impl QueueRow {
    fn into_row(self) -> Result<TaskRow, QueueError> {
        let data = match self.data.0 {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => TaskData::new(),
            other => {
                return Err(QueueError::Decode(format!(
                    "task {} payload is not an object: {other}",
                    self.id
                )));
            }
        };
        Ok(TaskRow {
            id: self.id.parse()?,
            key: self.key,
            name: self.name,
            created_at: self.created_at,
            created_by: self.created_by,
            do_after: self.do_after,
            state: self.state.parse()?,
            data,
            last_attempted: self.last_attempted,
            last_attempt_message: self.last_attempt_message,
        })
    }
}

/// Driver over one Postgres table, shared safely by any number of
/// processes.
pub struct PostgresDriver {
    pool: PgPool,
    /// Quoted, optionally schema-qualified table name.
    table: String,
    /// Unqualified table name, used to derive index names.
    table_name: String,
    /// Quoted primary key column, `<table>_id`.
    pk: String,
    stale_claim_window: Duration,
    ids: UlidGenerator<SystemClock>,
}

impl PostgresDriver {
    /// Open a pool from `config` and wrap it.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| QueueError::Store(format!("failed to connect to postgres: {e}")))?;
        info!(
            table = %config.table,
            schema = config.schema.as_deref().unwrap_or("(default)"),
            "connected to postgres"
        );
        Self::from_pool(pool, config)
    }

    /// Wrap an existing pool. Table and schema names are validated before
    /// they are spliced into any statement.
    pub fn from_pool(pool: PgPool, config: &PostgresConfig) -> Result<Self, QueueError> {
        validate_identifier("table", &config.table)?;
        if let Some(schema) = &config.schema {
            validate_identifier("schema", schema)?;
        }

        let table = match &config.schema {
            Some(schema) => format!("\"{schema}\".\"{}\"", config.table),
            None => format!("\"{}\"", config.table),
        };
        Ok(Self {
            pool,
            table,
            table_name: config.table.clone(),
            pk: format!("\"{}_id\"", config.table),
            stale_claim_window: config.stale_claim_window(),
            ids: UlidGenerator::new(SystemClock),
        })
    }

    /// Override `stale_claim_window_secs` from the config.
    pub fn with_stale_claim_window(mut self, window: Duration) -> Self {
        self.stale_claim_window = window;
        self
    }

    /// Underlying pool, for statements outside the driver contract.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the queue table and its claim index if they do not exist.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn ensure_schema(&self) -> Result<(), QueueError> {
        if let Some((schema, _)) = self.table.split_once('.') {
            sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
                .execute(&self.pool)
                .await?;
        }

        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                {pk} TEXT PRIMARY KEY,
                task_key TEXT NOT NULL,
                task_name TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                created_by TEXT NOT NULL DEFAULT '',
                do_after TIMESTAMPTZ NOT NULL DEFAULT now(),
                state TEXT NOT NULL,
                data JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                last_attempted TIMESTAMPTZ NOT NULL DEFAULT now(),
                last_attempt_message TEXT NOT NULL DEFAULT ''
            )",
            table = self.table,
            pk = self.pk,
        );
        sqlx::query(&create_table).execute(&self.pool).await?;

        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS \"{name}_state_attempted_idx\"
                ON {table} (state, last_attempted)",
            name = self.table_name,
            table = self.table,
        );
        sqlx::query(&create_index).execute(&self.pool).await?;

        debug!("queue schema ready");
        Ok(())
    }

    fn claim_sql(&self) -> String {
        format!(
            "WITH next AS (
                SELECT {pk} FROM {table}
                WHERE do_after <= now()
                  AND (
                    state = 'READY'
                    OR (state IN ('IN_PROGRESS', 'IN PROGRESS', 'RETRY')
                        AND last_attempted < now() - make_interval(secs => $1))
                  )
                ORDER BY last_attempted ASC, created_at ASC, {pk} ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE {table} t
            SET state = 'RETRY', last_attempted = now(), last_attempt_message = 'Attempting'
            FROM next
            WHERE t.{pk} = next.{pk}
            RETURNING t.{pk} AS id, t.task_key AS key, t.task_name AS name, t.created_at,
                      t.created_by, t.do_after, t.state, t.data, t.last_attempted,
                      t.last_attempt_message",
            pk = self.pk,
            table = self.table,
        )
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn name(&self) -> &'static str {
        "PostgresDriver"
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn clear(&self) -> Result<(), QueueError> {
        sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(task_name = %init.name, task_key = %init.key))]
    async fn add_task(&self, init: TaskInit) -> Result<(), QueueError> {
        let id = self.ids.generate_task_id();
        let sql = format!(
            "INSERT INTO {table}
                ({pk}, data, state, task_key, task_name, created_at, created_by,
                 last_attempted, last_attempt_message, do_after)
             VALUES ($1, $2, 'READY', $3, $4, now(), $5, now(), 'Created', COALESCE($6, now()))",
            table = self.table,
            pk = self.pk,
        );
        sqlx::query(&sql)
            .bind(id.to_storage())
            .bind(Json(&init.data))
            .bind(&init.key)
            .bind(&init.name)
            .bind(&init.created_by)
            .bind(init.do_after)
            .execute(&self.pool)
            .await?;
        debug!(task_id = %id, "task added");
        Ok(())
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn pop(&self) -> Result<ClaimedTask, QueueError> {
        let mut tx: ClaimTx = self.pool.begin().await?;

        // RowNotFound maps to NoTasks; the empty transaction rolls back on drop.
        let row = sqlx::query_as::<_, QueueRow>(&self.claim_sql())
            .bind(self.stale_claim_window.as_secs_f64())
            .fetch_one(&mut *tx)
            .await?;

        match row.into_row() {
            Ok(row) => {
                debug!(task_id = %row.id, task_name = %row.name, "task claimed");
                Ok(ClaimedTask::new(Task::from(row), Continuation::new(tx)))
            }
            Err(err) => {
                // Keep the claim: the row stays in RETRY instead of being
                // handed out again on the next poll.
                tx.commit().await?;
                Err(err)
            }
        }
    }

    #[instrument(skip_all, fields(task_id = %task.task().id()))]
    async fn cleanup(&self, task: &mut ClaimedTask) {
        let Some(continuation) = task.take_continuation() else {
            return;
        };
        if let Ok(tx) = continuation.downcast::<ClaimTx>()
            && let Err(e) = tx.commit().await
        {
            warn!(task_id = %task.task().id(), error = %e, "failed to commit claim on cleanup");
        }
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn refresh_retry(&self, age: Duration) -> Result<(), QueueError> {
        let sql = format!(
            "UPDATE {} SET state = 'READY', last_attempted = now()
             WHERE state = 'RETRY' AND last_attempted < now() - make_interval(secs => $1)",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(age.as_secs_f64())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            debug!(refreshed = result.rows_affected(), "retry tasks made ready");
        }
        Ok(())
    }

    #[instrument(skip_all, fields(task_id = %task.task().id(), resolution = ?resolution))]
    async fn resolve(
        &self,
        task: &mut ClaimedTask,
        resolution: Resolution,
        message: &str,
    ) -> Result<(), QueueError> {
        let next = task.task().state().apply(resolution.event())?;
        let mut tx = task
            .take_continuation_as::<ClaimTx>()
            .ok_or_else(|| missing_continuation(task))?;

        let sql = format!(
            "UPDATE {table} SET state = $1, last_attempted = now(), last_attempt_message = $2
             WHERE {pk} = $3",
            table = self.table,
            pk = self.pk,
        );
        let updated = sqlx::query(&sql)
            .bind(next.as_str())
            .bind(message)
            .bind(task.task().id().to_storage())
            .execute(&mut *tx)
            .await;

        match updated {
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback after failed state update also failed");
                }
                Err(e.into())
            }
        }
    }

    async fn queue_length(&self) -> Result<i64, QueueError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn task_count(&self, name: &str) -> Result<i64, QueueError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE task_name = $1 AND state NOT IN ($2, $3)",
            self.table
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(name)
            .bind(TaskState::Cancelled.as_str())
            .bind(TaskState::Done.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
