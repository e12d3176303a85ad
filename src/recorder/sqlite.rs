/// SQLite execution recorder
///
/// Stores run headers in `execution_runs` and steps in `execution_steps`. The
/// at-most-once firing policy is a partial UNIQUE index over guarded runs that are
/// running or fired, so two scans racing on the same entity cannot both open a run:
/// the second insert fails and is reported as `RecorderError::AlreadyFired`.

use crate::automation::types::{NodeKind, TriggerKind};
use crate::recorder::{
    error::RecorderError,
    types::{
        EntityKey, ExecutionRun, ExecutionStep, HttpDetails, RunMetrics, RunStatus, StepStatus,
    },
    ExecutionRecorder,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::{BTreeMap, HashSet};

/// Candidates per `IN (...)` query, well under SQLite's bound-parameter limit
const FIRED_QUERY_CHUNK: usize = 400;

#[derive(Debug, Clone)]
pub struct SqliteRecorder {
    pool: SqlitePool,
}

impl SqliteRecorder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<(), RecorderError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_runs (
                id TEXT PRIMARY KEY,
                automation_id TEXT NOT NULL,
                automation_version INTEGER NOT NULL,
                tenant_id TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                entity_reference TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                status TEXT NOT NULL,
                guarded INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                total_nodes INTEGER NOT NULL DEFAULT 0,
                total_edges INTEGER NOT NULL DEFAULT 0,
                nodes_visited INTEGER NOT NULL DEFAULT 0,
                actions_executed INTEGER NOT NULL DEFAULT 0,
                actions_succeeded INTEGER NOT NULL DEFAULT 0,
                actions_failed INTEGER NOT NULL DEFAULT 0,
                conditions_evaluated INTEGER NOT NULL DEFAULT 0,
                execution_time_ms INTEGER,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_guarded_firing
            ON execution_runs(automation_id, trigger_type, entity_reference)
            WHERE guarded = 1 AND status IN ('running', 'completed', 'completed_with_errors')
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_runs_trigger_tenant_entity
            ON execution_runs(trigger_type, tenant_id, entity_reference, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_runs_automation_started
            ON execution_runs(automation_id, started_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_steps (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES execution_runs(id),
                step_order INTEGER NOT NULL,
                node_id TEXT NOT NULL,
                node_kind TEXT NOT NULL,
                node_subtype TEXT NOT NULL,
                status TEXT NOT NULL,
                input_data JSON NOT NULL,
                output_data JSON NOT NULL,
                http_method TEXT,
                http_url TEXT,
                http_request_headers JSON,
                http_request_body TEXT,
                http_status_code INTEGER,
                http_latency_ms INTEGER,
                error_message TEXT,
                started_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                UNIQUE (run_id, step_order)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ExecutionRecorder for SqliteRecorder {
    async fn open_run(&self, run: &ExecutionRun) -> Result<(), RecorderError> {
        let result = sqlx::query(
            r#"
            INSERT INTO execution_runs (
                id, automation_id, automation_version, tenant_id, trigger_type,
                entity_reference, correlation_id, status, guarded, started_at,
                total_nodes, total_edges
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.automation_id)
        .bind(run.automation_version)
        .bind(&run.tenant_id)
        .bind(&run.trigger_type)
        .bind(&run.entity_reference)
        .bind(&run.correlation_id)
        .bind(run.status.as_str())
        .bind(run.guarded)
        .bind(timestamp(&run.started_at))
        .bind(run.metrics.total_nodes as i64)
        .bind(run.metrics.total_edges as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if run.guarded && db_err.is_unique_violation() => {
                Err(RecorderError::AlreadyFired {
                    automation_id: run.automation_id.clone(),
                    trigger_type: run.trigger_type.clone(),
                    entity_reference: run.entity_reference.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append_step(&self, step: &ExecutionStep) -> Result<(), RecorderError> {
        let http = step.http.as_ref();
        let http_headers = http.map(|h| serde_json::to_string(&h.headers)).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO execution_steps (
                id, run_id, step_order, node_id, node_kind, node_subtype, status,
                input_data, output_data, http_method, http_url, http_request_headers,
                http_request_body, http_status_code, http_latency_ms, error_message,
                started_at, duration_ms
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&step.id)
        .bind(&step.run_id)
        .bind(step.step_order as i64)
        .bind(&step.node_id)
        .bind(step.node_kind.as_str())
        .bind(&step.node_subtype)
        .bind(step.status.as_str())
        .bind(serde_json::to_string(&step.input_data)?)
        .bind(serde_json::to_string(&step.output_data)?)
        .bind(http.map(|h| h.method.clone()))
        .bind(http.map(|h| h.url.clone()))
        .bind(http_headers)
        .bind(http.and_then(|h| h.body.clone()))
        .bind(http.and_then(|h| h.status_code).map(|code| code as i64))
        .bind(http.and_then(|h| h.latency_ms))
        .bind(&step.error_message)
        .bind(timestamp(&step.started_at))
        .bind(step.duration_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finish_run(&self, run: &ExecutionRun) -> Result<(), RecorderError> {
        let m = &run.metrics;
        let result = sqlx::query(
            r#"
            UPDATE execution_runs SET
                status = ?,
                completed_at = ?,
                total_nodes = ?,
                total_edges = ?,
                nodes_visited = ?,
                actions_executed = ?,
                actions_succeeded = ?,
                actions_failed = ?,
                conditions_evaluated = ?,
                execution_time_ms = ?,
                error_message = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.completed_at.as_ref().map(timestamp))
        .bind(m.total_nodes as i64)
        .bind(m.total_edges as i64)
        .bind(m.nodes_visited as i64)
        .bind(m.actions_executed as i64)
        .bind(m.actions_succeeded as i64)
        .bind(m.actions_failed as i64)
        .bind(m.conditions_evaluated as i64)
        .bind(run.execution_time_ms)
        .bind(&run.error_message)
        .bind(&run.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RecorderError::RunNotOpen(run.id.clone()));
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<ExecutionRun>, RecorderError> {
        let row = sqlx::query("SELECT * FROM execution_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut run = run_from_row(&row)?;
                run.steps = self.list_steps(run_id).await?;
                Ok(Some(run))
            }
            None => Ok(None),
        }
    }

    async fn list_steps(&self, run_id: &str) -> Result<Vec<ExecutionStep>, RecorderError> {
        let rows = sqlx::query("SELECT * FROM execution_steps WHERE run_id = ? ORDER BY step_order ASC")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(step_from_row).collect()
    }

    async fn list_runs(
        &self,
        automation_id: &str,
        limit: u32,
    ) -> Result<Vec<ExecutionRun>, RecorderError> {
        let rows = sqlx::query(
            "SELECT * FROM execution_runs WHERE automation_id = ? ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(automation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(run_from_row).collect()
    }

    async fn fired_entities(
        &self,
        trigger: TriggerKind,
        candidates: &[EntityKey],
    ) -> Result<HashSet<EntityKey>, RecorderError> {
        let mut fired = HashSet::new();

        for chunk in candidates.chunks(FIRED_QUERY_CHUNK) {
            let rows = vec!["(?, ?)"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT DISTINCT tenant_id, entity_reference FROM execution_runs \
                 WHERE trigger_type = ? AND guarded = 1 \
                 AND status IN ('completed', 'completed_with_errors') \
                 AND (tenant_id, entity_reference) IN (VALUES {})",
                rows
            );

            let mut query = sqlx::query(&sql).bind(trigger.as_str());
            for key in chunk {
                query = query.bind(&key.tenant_id).bind(&key.entity_reference);
            }

            for row in query.fetch_all(&self.pool).await? {
                fired.insert(EntityKey {
                    tenant_id: row.try_get("tenant_id")?,
                    entity_reference: row.try_get("entity_reference")?,
                });
            }
        }

        Ok(fired)
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RecorderError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| RecorderError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

fn count(row: &SqliteRow, column: &str) -> Result<u32, RecorderError> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| RecorderError::Corrupt(format!("{} out of range: {}", column, value)))
}

fn run_from_row(row: &SqliteRow) -> Result<ExecutionRun, RecorderError> {
    let status: String = row.try_get("status")?;
    let started_at: String = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(ExecutionRun {
        id: row.try_get("id")?,
        automation_id: row.try_get("automation_id")?,
        automation_version: row.try_get("automation_version")?,
        tenant_id: row.try_get("tenant_id")?,
        trigger_type: row.try_get("trigger_type")?,
        entity_reference: row.try_get("entity_reference")?,
        correlation_id: row.try_get("correlation_id")?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| RecorderError::Corrupt(format!("unknown run status '{}'", status)))?,
        guarded: row.try_get("guarded")?,
        started_at: parse_timestamp(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
        metrics: RunMetrics {
            total_nodes: count(row, "total_nodes")?,
            total_edges: count(row, "total_edges")?,
            nodes_visited: count(row, "nodes_visited")?,
            actions_executed: count(row, "actions_executed")?,
            actions_succeeded: count(row, "actions_succeeded")?,
            actions_failed: count(row, "actions_failed")?,
            conditions_evaluated: count(row, "conditions_evaluated")?,
        },
        execution_time_ms: row.try_get("execution_time_ms")?,
        error_message: row.try_get("error_message")?,
        steps: Vec::new(),
    })
}

fn step_from_row(row: &SqliteRow) -> Result<ExecutionStep, RecorderError> {
    let node_kind: String = row.try_get("node_kind")?;
    let status: String = row.try_get("status")?;
    let input_data: String = row.try_get("input_data")?;
    let output_data: String = row.try_get("output_data")?;
    let started_at: String = row.try_get("started_at")?;

    let http = match row.try_get::<Option<String>, _>("http_method")? {
        Some(method) => {
            let headers: Option<String> = row.try_get("http_request_headers")?;
            let headers: BTreeMap<String, String> = match headers {
                Some(json) => serde_json::from_str(&json)?,
                None => BTreeMap::new(),
            };
            let status_code: Option<i64> = row.try_get("http_status_code")?;
            Some(HttpDetails {
                method,
                url: row.try_get::<Option<String>, _>("http_url")?.unwrap_or_default(),
                headers,
                body: row.try_get("http_request_body")?,
                status_code: status_code.and_then(|code| u16::try_from(code).ok()),
                latency_ms: row.try_get("http_latency_ms")?,
            })
        }
        None => None,
    };

    Ok(ExecutionStep {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        step_order: count(row, "step_order")?,
        node_id: row.try_get("node_id")?,
        node_kind: match node_kind.as_str() {
            "trigger" => NodeKind::Trigger,
            "condition" => NodeKind::Condition,
            "action" => NodeKind::Action,
            other => return Err(RecorderError::Corrupt(format!("unknown node kind '{}'", other))),
        },
        node_subtype: row.try_get("node_subtype")?,
        status: StepStatus::parse(&status)
            .ok_or_else(|| RecorderError::Corrupt(format!("unknown step status '{}'", status)))?,
        input_data: serde_json::from_str(&input_data)?,
        output_data: serde_json::from_str(&output_data)?,
        http,
        error_message: row.try_get("error_message")?,
        started_at: parse_timestamp(&started_at)?,
        duration_ms: row.try_get("duration_ms")?,
    })
}
