//! SQLite-backed deployment recorder.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{DeploymentAction, DeploymentError, DeploymentLog, DeploymentRecorder, DeploymentStatus};
use crate::db;

const LOG_COLUMNS: &str =
    "id, attendee_id, workshop_id, action, status, output, error, started_at, completed_at";

/// SQLite-backed deployment recorder.
///
/// Rows are never deleted, including when the owning workshop is purged.
pub struct SqliteDeploymentRecorder {
    conn: Mutex<Connection>,
}

impl SqliteDeploymentRecorder {
    pub fn new(path: &Path) -> Result<Self, DeploymentError> {
        let conn = db::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, DeploymentError> {
        let conn = db::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), DeploymentError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS deployment_logs (
                id TEXT PRIMARY KEY,
                attendee_id TEXT NOT NULL,
                workshop_id TEXT NOT NULL,
                action TEXT NOT NULL,
                status TEXT NOT NULL,
                output TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            );

            -- One open record per attendee.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_deployment_logs_open
                ON deployment_logs(attendee_id) WHERE completed_at IS NULL;

            CREATE INDEX IF NOT EXISTS idx_deployment_logs_attendee
                ON deployment_logs(attendee_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_deployment_logs_started
                ON deployment_logs(started_at);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DeploymentError> {
        self.conn
            .lock()
            .map_err(|_| DeploymentError::Database("deployment recorder lock poisoned".to_string()))
    }

    fn row_to_log(row: &rusqlite::Row) -> rusqlite::Result<DeploymentLog> {
        let action_raw: String = row.get(3)?;
        let status_raw: String = row.get(4)?;

        Ok(DeploymentLog {
            id: row.get(0)?,
            attendee_id: row.get(1)?,
            workshop_id: row.get(2)?,
            action: action_raw
                .parse()
                .map_err(|e| db::conversion_error(3, e))?,
            status: status_raw
                .parse()
                .map_err(|e| db::conversion_error(4, e))?,
            output: row.get(5)?,
            error: row.get(6)?,
            started_at: db::timestamp_column(row, 7)?,
            completed_at: db::optional_timestamp_column(row, 8)?,
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<DeploymentLog>, DeploymentError> {
        let sql = format!("SELECT {} FROM deployment_logs WHERE id = ?", LOG_COLUMNS);
        Ok(conn.query_row(&sql, params![id], Self::row_to_log).optional()?)
    }

    fn query_logs(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<DeploymentLog>, DeploymentError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_log)?;

        let mut logs = Vec::new();
        for row_result in rows {
            logs.push(row_result?);
        }
        Ok(logs)
    }
}

impl DeploymentRecorder for SqliteDeploymentRecorder {
    fn begin(
        &self,
        attendee_id: &str,
        workshop_id: &str,
        action: DeploymentAction,
    ) -> Result<DeploymentLog, DeploymentError> {
        let conn = self.lock()?;
        let log = DeploymentLog {
            id: uuid::Uuid::new_v4().to_string(),
            attendee_id: attendee_id.to_string(),
            workshop_id: workshop_id.to_string(),
            action,
            status: DeploymentStatus::Running,
            output: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };

        let result = conn.execute(
            "INSERT INTO deployment_logs (id, attendee_id, workshop_id, action, status, started_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                log.id,
                log.attendee_id,
                log.workshop_id,
                log.action.as_str(),
                log.status.as_str(),
                db::format_timestamp(&log.started_at),
            ],
        );

        match result {
            Ok(_) => {
                debug!(log_id = %log.id, attendee_id, action = %action, "Opened deployment record");
                Ok(log)
            }
            Err(e) if db::is_unique_violation(&e) => Err(DeploymentError::Conflict {
                attendee_id: attendee_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn complete(
        &self,
        log_id: &str,
        status: DeploymentStatus,
        output: Option<&str>,
        error: Option<&str>,
    ) -> Result<DeploymentLog, DeploymentError> {
        if status.is_open() {
            return Err(DeploymentError::InvalidStatus(status));
        }

        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE deployment_logs SET status = ?, output = ?, error = ?, completed_at = ? WHERE id = ? AND completed_at IS NULL",
            params![
                status.as_str(),
                output,
                error,
                db::format_timestamp(&Utc::now()),
                log_id,
            ],
        )?;

        if affected == 0 {
            return Err(DeploymentError::NotFound(log_id.to_string()));
        }

        debug!(log_id, status = %status, "Closed deployment record");
        Self::fetch(&conn, log_id)?.ok_or_else(|| DeploymentError::NotFound(log_id.to_string()))
    }

    fn open_record(&self, attendee_id: &str) -> Result<Option<DeploymentLog>, DeploymentError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM deployment_logs WHERE attendee_id = ? AND completed_at IS NULL",
            LOG_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![attendee_id], Self::row_to_log)
            .optional()?)
    }

    fn stale_open_records(
        &self,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DeploymentLog>, DeploymentError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM deployment_logs WHERE completed_at IS NULL AND started_at < ? ORDER BY started_at ASC LIMIT ?",
            LOG_COLUMNS
        );
        let cutoff = db::format_timestamp(&started_before);
        Self::query_logs(&conn, &sql, &[&cutoff, &limit])
    }

    fn history(&self, attendee_id: &str) -> Result<Vec<DeploymentLog>, DeploymentError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM deployment_logs WHERE attendee_id = ? ORDER BY started_at DESC, rowid DESC",
            LOG_COLUMNS
        );
        Self::query_logs(&conn, &sql, &[&attendee_id])
    }

    fn last_completed(
        &self,
        attendee_id: &str,
        action: DeploymentAction,
    ) -> Result<Option<DeploymentLog>, DeploymentError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM deployment_logs WHERE attendee_id = ? AND action = ? AND completed_at IS NOT NULL ORDER BY completed_at DESC, rowid DESC LIMIT 1",
            LOG_COLUMNS
        );
        Ok(conn
            .query_row(
                &sql,
                params![attendee_id, action.as_str()],
                Self::row_to_log,
            )
            .optional()?)
    }
}
