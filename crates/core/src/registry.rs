//! Durable application registry
//!
//! SQLite-backed store for declared applications, their executions, captured
//! log entries, and dependency records. The registry is the single source of
//! truth for declared state; only the lifecycle controller writes to it.
//! Schema setup runs through embedded migrations so a fresh database file is
//! ready on first open.

use crate::app::{AppKind, AppPayload, AppStatus, Application, Dependency, DependencyStatus};
use crate::console::{LogEntry, LogLevel, LogStreamKind};
use crate::errors::{RegistryError, Result};
use crate::execution::{Execution, ExecutionState, ExitInfo, ResourceUsage};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, instrument};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Row shape for the `applications` table
#[derive(Debug, sqlx::FromRow)]
struct ApplicationRow {
    app_id: String,
    name: String,
    version: String,
    description: String,
    kind: String,
    language: Option<String>,
    payload: String,
    signals: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_started_at: Option<DateTime<Utc>>,
    total_runtime_secs: i64,
}

impl ApplicationRow {
    fn into_application(self, dependencies: Vec<Dependency>) -> Result<Application> {
        let kind = AppKind::from_str(&self.kind)
            .map_err(|e| RegistryError::Database(sqlx::Error::Decode(e.into())))?;
        let status = AppStatus::from_str(&self.status)
            .map_err(|e| RegistryError::Database(sqlx::Error::Decode(e.into())))?;
        let payload: AppPayload = serde_json::from_str(&self.payload)
            .map_err(|e| RegistryError::Database(sqlx::Error::Decode(e.into())))?;
        let signals: Vec<String> = serde_json::from_str(&self.signals)
            .map_err(|e| RegistryError::Database(sqlx::Error::Decode(e.into())))?;

        Ok(Application {
            id: self.app_id,
            name: self.name,
            version: self.version,
            description: self.description,
            kind,
            language: self.language,
            payload,
            dependencies,
            signals,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_started_at: self.last_started_at,
            total_runtime_secs: self.total_runtime_secs,
        })
    }
}

/// Row shape for the `executions` table
#[derive(Debug, sqlx::FromRow)]
struct ExecutionRow {
    execution_id: String,
    app_id: String,
    container_id: Option<String>,
    pid: Option<i64>,
    state: String,
    cpu_percent: Option<f64>,
    memory_bytes: Option<i64>,
    last_heartbeat: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    exit_forced: bool,
    exit_reason: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRow {
    fn into_execution(self) -> Result<Execution> {
        let state = ExecutionState::from_str(&self.state)
            .map_err(|e| RegistryError::Database(sqlx::Error::Decode(e.into())))?;

        let resources = match (self.cpu_percent, self.memory_bytes) {
            (Some(cpu), Some(mem)) => Some(ResourceUsage {
                cpu_percent: cpu,
                memory_bytes: mem.max(0) as u64,
            }),
            _ => None,
        };

        let exit = if self.exit_code.is_some() || self.exit_forced || self.exit_reason.is_some() {
            Some(ExitInfo {
                code: self.exit_code,
                forced: self.exit_forced,
                reason: self.exit_reason.unwrap_or_default(),
            })
        } else {
            None
        };

        Ok(Execution {
            id: self.execution_id,
            app_id: self.app_id,
            container_id: self.container_id,
            pid: self.pid,
            state,
            resources,
            last_heartbeat: self.last_heartbeat,
            exit,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

/// Row shape for the `logs` table
#[derive(Debug, sqlx::FromRow)]
struct LogRow {
    execution_id: String,
    stream: String,
    ts: DateTime<Utc>,
    content: String,
    level: String,
}

impl LogRow {
    fn into_entry(self) -> LogEntry {
        let stream = match self.stream.as_str() {
            "stderr" => LogStreamKind::Stderr,
            "status" => LogStreamKind::Status,
            "system" => LogStreamKind::System,
            _ => LogStreamKind::Stdout,
        };
        let level = match self.level.as_str() {
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        };
        LogEntry {
            execution_id: self.execution_id,
            stream,
            timestamp: self.ts,
            content: self.content,
            level,
        }
    }
}

/// SQLite-backed registry
#[derive(Clone)]
pub struct Registry {
    pool: SqlitePool,
}

impl Registry {
    /// Wrap an existing pool (migrations must already have run).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `path` and run migrations.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(RegistryError::Io)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(RegistryError::Database)?;

        MIGRATOR.run(&pool).await.map_err(RegistryError::Migration)?;
        debug!("registry opened");
        Ok(Self { pool })
    }

    /// In-memory registry for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(RegistryError::Database)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(RegistryError::Database)?;
        MIGRATOR.run(&pool).await.map_err(RegistryError::Migration)?;
        Ok(Self { pool })
    }

    // ------------------------------------------------------------------
    // Applications
    // ------------------------------------------------------------------

    /// Persist a new application together with its dependency records.
    pub async fn insert_application(&self, app: &Application) -> Result<()> {
        let payload = serde_json::to_string(&app.payload)
            .map_err(|e| RegistryError::Database(sqlx::Error::Encode(e.into())))?;
        let signals = serde_json::to_string(&app.signals)
            .map_err(|e| RegistryError::Database(sqlx::Error::Encode(e.into())))?;

        let mut tx = self.pool.begin().await.map_err(RegistryError::Database)?;

        sqlx::query(
            r#"
            INSERT INTO applications
                (app_id, name, version, description, kind, language, payload,
                 signals, status, created_at, updated_at, last_started_at,
                 total_runtime_secs)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&app.id)
        .bind(&app.name)
        .bind(&app.version)
        .bind(&app.description)
        .bind(app.kind.as_str())
        .bind(&app.language)
        .bind(&payload)
        .bind(&signals)
        .bind(app.status.as_str())
        .bind(app.created_at)
        .bind(app.updated_at)
        .bind(app.last_started_at)
        .bind(app.total_runtime_secs)
        .execute(&mut *tx)
        .await
        .map_err(RegistryError::Database)?;

        for dep in &app.dependencies {
            sqlx::query(
                r#"
                INSERT INTO dependencies (app_id, ecosystem, name, constraint_expr, status)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&app.id)
            .bind(&dep.ecosystem)
            .bind(&dep.name)
            .bind(&dep.constraint)
            .bind(dep.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(RegistryError::Database)?;
        }

        tx.commit().await.map_err(RegistryError::Database)?;
        Ok(())
    }

    /// Fetch an application with its dependency records.
    pub async fn get_application(&self, app_id: &str) -> Result<Option<Application>> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT app_id, name, version, description, kind, language, payload,
                   signals, status, created_at, updated_at, last_started_at,
                   total_runtime_secs
            FROM applications
            WHERE app_id = ?
            "#,
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        match row {
            Some(row) => {
                let deps = self.dependencies(app_id).await?;
                Ok(Some(row.into_application(deps)?))
            }
            None => Ok(None),
        }
    }

    /// List applications, optionally filtered by declared status.
    pub async fn list_applications(&self, status: Option<AppStatus>) -> Result<Vec<Application>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, ApplicationRow>(
                    r#"
                    SELECT app_id, name, version, description, kind, language, payload,
                           signals, status, created_at, updated_at, last_started_at,
                           total_runtime_secs
                    FROM applications
                    WHERE status = ?
                    ORDER BY created_at
                    "#,
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, ApplicationRow>(
                    r#"
                    SELECT app_id, name, version, description, kind, language, payload,
                           signals, status, created_at, updated_at, last_started_at,
                           total_runtime_secs
                    FROM applications
                    ORDER BY created_at
                    "#,
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(RegistryError::Database)?;

        let mut apps = Vec::with_capacity(rows.len());
        for row in rows {
            let deps = self.dependencies(&row.app_id).await?;
            apps.push(row.into_application(deps)?);
        }
        Ok(apps)
    }

    /// Update an application's declared status (and `updated_at`).
    pub async fn update_status(&self, app_id: &str, status: AppStatus) -> Result<()> {
        sqlx::query("UPDATE applications SET status = ?, updated_at = ? WHERE app_id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(app_id)
            .execute(&self.pool)
            .await
            .map_err(RegistryError::Database)?;
        Ok(())
    }

    /// Record a successful start.
    pub async fn mark_started(&self, app_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE applications SET status = ?, last_started_at = ?, updated_at = ? WHERE app_id = ?",
        )
        .bind(AppStatus::Running.as_str())
        .bind(at)
        .bind(at)
        .bind(app_id)
        .execute(&self.pool)
        .await
        .map_err(RegistryError::Database)?;
        Ok(())
    }

    /// Add a finished run's duration to the cumulative runtime counter.
    pub async fn add_runtime(&self, app_id: &str, secs: i64) -> Result<()> {
        sqlx::query(
            "UPDATE applications SET total_runtime_secs = total_runtime_secs + ? WHERE app_id = ?",
        )
        .bind(secs.max(0))
        .bind(app_id)
        .execute(&self.pool)
        .await
        .map_err(RegistryError::Database)?;
        Ok(())
    }

    /// Delete an application; executions, logs, and dependency records
    /// cascade with it.
    pub async fn delete_application(&self, app_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM applications WHERE app_id = ?")
            .bind(app_id)
            .execute(&self.pool)
            .await
            .map_err(RegistryError::Database)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dependencies
    // ------------------------------------------------------------------

    /// Dependency records for an application, in declaration order.
    pub async fn dependencies(&self, app_id: &str) -> Result<Vec<Dependency>> {
        let rows = sqlx::query_as::<_, (String, String, String, String)>(
            r#"
            SELECT ecosystem, name, constraint_expr, status
            FROM dependencies
            WHERE app_id = ?
            ORDER BY rowid
            "#,
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        Ok(rows
            .into_iter()
            .map(|(ecosystem, name, constraint, status)| Dependency {
                ecosystem,
                name,
                constraint,
                status: DependencyStatus::from_str(&status).unwrap_or(DependencyStatus::Pending),
            })
            .collect())
    }

    /// Update one dependency's resolution outcome.
    pub async fn set_dependency_status(
        &self,
        app_id: &str,
        ecosystem: &str,
        name: &str,
        status: DependencyStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE dependencies SET status = ? WHERE app_id = ? AND ecosystem = ? AND name = ?",
        )
        .bind(status.as_str())
        .bind(app_id)
        .bind(ecosystem)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(RegistryError::Database)?;
        Ok(())
    }

    /// Mark every dependency of an application with the same status.
    pub async fn set_all_dependency_statuses(
        &self,
        app_id: &str,
        status: DependencyStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE dependencies SET status = ? WHERE app_id = ?")
            .bind(status.as_str())
            .bind(app_id)
            .execute(&self.pool)
            .await
            .map_err(RegistryError::Database)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Executions
    // ------------------------------------------------------------------

    /// Persist a new execution attempt.
    pub async fn insert_execution(&self, execution: &Execution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO executions
                (execution_id, app_id, container_id, pid, state, cpu_percent,
                 memory_bytes, last_heartbeat, exit_code, exit_forced,
                 exit_reason, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.app_id)
        .bind(&execution.container_id)
        .bind(execution.pid)
        .bind(execution.state.as_str())
        .bind(execution.resources.map(|r| r.cpu_percent))
        .bind(execution.resources.map(|r| r.memory_bytes as i64))
        .bind(execution.last_heartbeat)
        .bind(execution.exit.as_ref().and_then(|e| e.code))
        .bind(execution.exit.as_ref().map(|e| e.forced).unwrap_or(false))
        .bind(execution.exit.as_ref().map(|e| e.reason.clone()))
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .execute(&self.pool)
        .await
        .map_err(RegistryError::Database)?;
        Ok(())
    }

    /// Fetch one execution.
    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT execution_id, app_id, container_id, pid, state, cpu_percent,
                   memory_bytes, last_heartbeat, exit_code, exit_forced,
                   exit_reason, started_at, finished_at
            FROM executions
            WHERE execution_id = ?
            "#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        row.map(ExecutionRow::into_execution).transpose()
    }

    /// The application's live execution (running or paused), if any.
    /// At most one execution per application is ever live.
    pub async fn active_execution(&self, app_id: &str) -> Result<Option<Execution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT execution_id, app_id, container_id, pid, state, cpu_percent,
                   memory_bytes, last_heartbeat, exit_code, exit_forced,
                   exit_reason, started_at, finished_at
            FROM executions
            WHERE app_id = ? AND state IN ('running', 'paused')
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        row.map(ExecutionRow::into_execution).transpose()
    }

    /// The most recent execution for an application regardless of state.
    pub async fn latest_execution(&self, app_id: &str) -> Result<Option<Execution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT execution_id, app_id, container_id, pid, state, cpu_percent,
                   memory_bytes, last_heartbeat, exit_code, exit_forced,
                   exit_reason, started_at, finished_at
            FROM executions
            WHERE app_id = ?
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        row.map(ExecutionRow::into_execution).transpose()
    }

    /// Every live execution across all applications (used for recovery
    /// after a controller restart).
    pub async fn live_executions(&self) -> Result<Vec<Execution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT execution_id, app_id, container_id, pid, state, cpu_percent,
                   memory_bytes, last_heartbeat, exit_code, exit_forced,
                   exit_reason, started_at, finished_at
            FROM executions
            WHERE state IN ('running', 'paused')
            ORDER BY started_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        rows.into_iter().map(ExecutionRow::into_execution).collect()
    }

    /// Attach the container handle and pid assigned by the orchestrator.
    pub async fn set_execution_container(
        &self,
        execution_id: &str,
        container_id: &str,
        pid: Option<i64>,
    ) -> Result<()> {
        sqlx::query("UPDATE executions SET container_id = ?, pid = ? WHERE execution_id = ?")
            .bind(container_id)
            .bind(pid)
            .bind(execution_id)
            .execute(&self.pool)
            .await
            .map_err(RegistryError::Database)?;
        Ok(())
    }

    /// Update a live execution's state.
    pub async fn update_execution_state(
        &self,
        execution_id: &str,
        state: ExecutionState,
    ) -> Result<()> {
        sqlx::query("UPDATE executions SET state = ? WHERE execution_id = ?")
            .bind(state.as_str())
            .bind(execution_id)
            .execute(&self.pool)
            .await
            .map_err(RegistryError::Database)?;
        Ok(())
    }

    /// Record a successful health poll.
    pub async fn record_heartbeat(
        &self,
        execution_id: &str,
        resources: Option<ResourceUsage>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE executions
            SET cpu_percent = ?, memory_bytes = ?, last_heartbeat = ?
            WHERE execution_id = ?
            "#,
        )
        .bind(resources.map(|r| r.cpu_percent))
        .bind(resources.map(|r| r.memory_bytes as i64))
        .bind(at)
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .map_err(RegistryError::Database)?;
        Ok(())
    }

    /// Finalize a terminated execution with its exit outcome.
    pub async fn finalize_execution(
        &self,
        execution_id: &str,
        state: ExecutionState,
        exit: &ExitInfo,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE executions
            SET state = ?, exit_code = ?, exit_forced = ?, exit_reason = ?,
                finished_at = ?
            WHERE execution_id = ?
            "#,
        )
        .bind(state.as_str())
        .bind(exit.code)
        .bind(exit.forced)
        .bind(&exit.reason)
        .bind(finished_at)
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .map_err(RegistryError::Database)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------

    /// Append one captured log entry.
    pub async fn append_log(&self, app_id: &str, entry: &LogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO logs (app_id, execution_id, stream, ts, content, level)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(app_id)
        .bind(&entry.execution_id)
        .bind(entry.stream.as_str())
        .bind(entry.timestamp)
        .bind(&entry.content)
        .bind(entry.level.as_str())
        .execute(&self.pool)
        .await
        .map_err(RegistryError::Database)?;
        Ok(())
    }

    /// Log entries for one execution in append order, newest `limit` rows
    /// when a limit is given.
    pub async fn logs_for_execution(
        &self,
        execution_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<LogEntry>> {
        let rows = match limit {
            Some(limit) => {
                sqlx::query_as::<_, LogRow>(
                    r#"
                    SELECT execution_id, stream, ts, content, level
                    FROM (
                        SELECT id, execution_id, stream, ts, content, level
                        FROM logs
                        WHERE execution_id = ?
                        ORDER BY id DESC
                        LIMIT ?
                    )
                    ORDER BY id
                    "#,
                )
                .bind(execution_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, LogRow>(
                    r#"
                    SELECT execution_id, stream, ts, content, level
                    FROM logs
                    WHERE execution_id = ?
                    ORDER BY id
                    "#,
                )
                .bind(execution_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(RegistryError::Database)?;

        Ok(rows.into_iter().map(LogRow::into_entry).collect())
    }

    /// Every log entry captured for an application, across executions, in
    /// append order.
    pub async fn logs_for_application(&self, app_id: &str) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT execution_id, stream, ts, content, level
            FROM logs
            WHERE app_id = ?
            ORDER BY id
            "#,
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        Ok(rows.into_iter().map(LogRow::into_entry).collect())
    }

    /// Every execution id that captured output for an application, including
    /// deploy-time install consoles that have no `executions` row.
    pub async fn execution_ids_for_application(&self, app_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT execution_id FROM executions WHERE app_id = ?
            UNION
            SELECT DISTINCT execution_id FROM logs WHERE app_id = ?
            "#,
        )
        .bind(app_id)
        .bind(app_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Delete log rows older than `cutoff`; returns the number removed.
    pub async fn prune_logs(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM logs WHERE ts < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(RegistryError::Database)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppPayload;

    fn sample_app(id: &str) -> Application {
        let now = Utc::now();
        Application {
            id: id.to_string(),
            name: "Speed Display".to_string(),
            version: "1.0.0".to_string(),
            description: "prints vehicle speed".to_string(),
            kind: AppKind::InterpretedScript,
            language: Some("python".to_string()),
            payload: AppPayload {
                source_code: Some("print('hi')".to_string()),
                artifact: None,
                entry_point: "main.py".to_string(),
                args: vec![],
                env: Default::default(),
                working_dir: None,
            },
            dependencies: vec![Dependency {
                ecosystem: "pip".to_string(),
                name: "numpy".to_string(),
                constraint: ">=1.26".to_string(),
                status: DependencyStatus::Pending,
            }],
            signals: vec!["Vehicle.Speed".to_string()],
            status: AppStatus::Installing,
            created_at: now,
            updated_at: now,
            last_started_at: None,
            total_runtime_secs: 0,
        }
    }

    #[tokio::test]
    async fn test_application_round_trip() {
        let registry = Registry::open_in_memory().await.unwrap();
        let app = sample_app("speed-display");
        registry.insert_application(&app).await.unwrap();

        let loaded = registry
            .get_application("speed-display")
            .await
            .unwrap()
            .expect("application exists");
        assert_eq!(loaded.name, "Speed Display");
        assert_eq!(loaded.kind, AppKind::InterpretedScript);
        assert_eq!(loaded.status, AppStatus::Installing);
        assert_eq!(loaded.dependencies.len(), 1);
        assert_eq!(loaded.dependencies[0].requirement(), "numpy>=1.26");
        assert_eq!(loaded.signals, vec!["Vehicle.Speed"]);
        assert_eq!(
            loaded.payload.source_code.as_deref(),
            Some("print('hi')")
        );
    }

    #[tokio::test]
    async fn test_unknown_application_is_none() {
        let registry = Registry::open_in_memory().await.unwrap();
        assert!(registry.get_application("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_update_and_list_filter() {
        let registry = Registry::open_in_memory().await.unwrap();
        registry.insert_application(&sample_app("a")).await.unwrap();
        registry.insert_application(&sample_app("b")).await.unwrap();

        registry.update_status("a", AppStatus::Installed).await.unwrap();

        let installed = registry
            .list_applications(Some(AppStatus::Installed))
            .await
            .unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].id, "a");

        let all = registry.list_applications(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_dependency_status_updates() {
        let registry = Registry::open_in_memory().await.unwrap();
        registry.insert_application(&sample_app("a")).await.unwrap();

        registry
            .set_dependency_status("a", "pip", "numpy", DependencyStatus::Failed)
            .await
            .unwrap();

        let deps = registry.dependencies("a").await.unwrap();
        assert_eq!(deps[0].status, DependencyStatus::Failed);
    }

    #[tokio::test]
    async fn test_execution_lifecycle_round_trip() {
        let registry = Registry::open_in_memory().await.unwrap();
        registry.insert_application(&sample_app("a")).await.unwrap();

        let mut execution = Execution::new("a");
        execution.container_id = Some("c0ffee".to_string());
        registry.insert_execution(&execution).await.unwrap();

        let active = registry.active_execution("a").await.unwrap().unwrap();
        assert_eq!(active.id, execution.id);
        assert_eq!(active.state, ExecutionState::Running);
        assert_eq!(active.container_id.as_deref(), Some("c0ffee"));

        let exit = ExitInfo {
            code: Some(0),
            forced: false,
            reason: "exited".to_string(),
        };
        registry
            .finalize_execution(&execution.id, ExecutionState::Stopped, &exit, Utc::now())
            .await
            .unwrap();

        assert!(registry.active_execution("a").await.unwrap().is_none());
        let finished = registry.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(finished.state, ExecutionState::Stopped);
        assert_eq!(finished.exit.unwrap().code, Some(0));
        assert!(finished.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_cascade_delete_removes_children() {
        let registry = Registry::open_in_memory().await.unwrap();
        registry.insert_application(&sample_app("a")).await.unwrap();

        let execution = Execution::new("a");
        registry.insert_execution(&execution).await.unwrap();
        registry
            .append_log("a", &LogEntry::stdout(&execution.id, "hello"))
            .await
            .unwrap();

        registry.delete_application("a").await.unwrap();

        assert!(registry.get_execution(&execution.id).await.unwrap().is_none());
        assert!(registry.dependencies("a").await.unwrap().is_empty());
        assert!(registry
            .logs_for_execution(&execution.id, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_log_order_and_limit() {
        let registry = Registry::open_in_memory().await.unwrap();
        registry.insert_application(&sample_app("a")).await.unwrap();
        let execution = Execution::new("a");
        registry.insert_execution(&execution).await.unwrap();

        for i in 0..5 {
            registry
                .append_log("a", &LogEntry::stdout(&execution.id, format!("line {}", i)))
                .await
                .unwrap();
        }

        let all = registry.logs_for_execution(&execution.id, None).await.unwrap();
        let contents: Vec<_> = all.iter().map(|e| e.content.clone()).collect();
        assert_eq!(contents, vec!["line 0", "line 1", "line 2", "line 3", "line 4"]);

        let tail = registry
            .logs_for_execution(&execution.id, Some(2))
            .await
            .unwrap();
        let contents: Vec<_> = tail.iter().map(|e| e.content.clone()).collect();
        assert_eq!(contents, vec!["line 3", "line 4"]);
    }

    #[tokio::test]
    async fn test_execution_ids_include_install_consoles() {
        let registry = Registry::open_in_memory().await.unwrap();
        registry.insert_application(&sample_app("a")).await.unwrap();

        let execution = Execution::new("a");
        registry.insert_execution(&execution).await.unwrap();

        // An install console captures output without an executions row.
        registry
            .append_log("a", &LogEntry::system("a-install-1", "installing", LogLevel::Info))
            .await
            .unwrap();

        let mut ids = registry.execution_ids_for_application("a").await.unwrap();
        ids.sort();
        let mut expected = vec![execution.id.clone(), "a-install-1".to_string()];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_prune_logs_by_age() {
        let registry = Registry::open_in_memory().await.unwrap();
        registry.insert_application(&sample_app("a")).await.unwrap();
        let execution = Execution::new("a");
        registry.insert_execution(&execution).await.unwrap();

        let mut old = LogEntry::stdout(&execution.id, "ancient");
        old.timestamp = Utc::now() - chrono::Duration::hours(100);
        registry.append_log("a", &old).await.unwrap();
        registry
            .append_log("a", &LogEntry::stdout(&execution.id, "fresh"))
            .await
            .unwrap();

        let pruned = registry
            .prune_logs(Utc::now() - chrono::Duration::hours(72))
            .await
            .unwrap();
        assert_eq!(pruned, 1);

        let remaining = registry.logs_for_execution(&execution.id, None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "fresh");
    }

    #[tokio::test]
    async fn test_runtime_accumulation() {
        let registry = Registry::open_in_memory().await.unwrap();
        registry.insert_application(&sample_app("a")).await.unwrap();

        registry.mark_started("a", Utc::now()).await.unwrap();
        registry.add_runtime("a", 30).await.unwrap();
        registry.add_runtime("a", 12).await.unwrap();

        let app = registry.get_application("a").await.unwrap().unwrap();
        assert_eq!(app.total_runtime_secs, 42);
        assert_eq!(app.status, AppStatus::Running);
        assert!(app.last_started_at.is_some());
    }
}
