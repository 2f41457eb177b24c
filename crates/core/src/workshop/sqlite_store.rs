//! SQLite-backed workshop store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    Attendee, CreateAttendeeRequest, CreateWorkshopRequest, Status, StoreError, Workshop,
    WorkshopFilter, WorkshopStore,
};
use crate::db;

const WORKSHOP_COLUMNS: &str = "id, name, starts_at, ends_at, timezone, status, status_pinned, \
     deletion_scheduled_at, created_at, updated_at";

const ATTENDEE_COLUMNS: &str = "id, workshop_id, name, email, status, external_id, project_id, \
     health_failures, last_error, created_at, updated_at";

/// SQLite-backed workshop store.
pub struct SqliteWorkshopStore {
    conn: Mutex<Connection>,
}

impl SqliteWorkshopStore {
    /// Create a new SQLite workshop store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = db::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite workshop store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = db::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workshops (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                starts_at TEXT NOT NULL,
                ends_at TEXT NOT NULL,
                timezone TEXT NOT NULL,
                status TEXT NOT NULL,
                status_pinned INTEGER NOT NULL DEFAULT 0,
                deletion_scheduled_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK (ends_at > starts_at)
            );

            CREATE TABLE IF NOT EXISTS attendees (
                id TEXT PRIMARY KEY,
                workshop_id TEXT NOT NULL REFERENCES workshops(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status <> 'planning'),
                external_id TEXT,
                project_id TEXT,
                health_failures INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_workshops_deletion ON workshops(deletion_scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_attendees_workshop ON attendees(workshop_id);
            CREATE INDEX IF NOT EXISTS idx_attendees_status ON attendees(status);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("workshop store lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &WorkshopFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ref due_at) = filter.deletion_due_at {
            conditions.push("deletion_scheduled_at IS NOT NULL AND deletion_scheduled_at <= ?");
            params.push(Box::new(db::format_timestamp(due_at)));
        }

        if filter.with_attendees {
            conditions.push("EXISTS (SELECT 1 FROM attendees a WHERE a.workshop_id = workshops.id)");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_workshop(row: &rusqlite::Row) -> rusqlite::Result<Workshop> {
        let status_raw: String = row.get(5)?;
        let status = status_raw
            .parse::<Status>()
            .map_err(|e| db::conversion_error(5, e))?;

        Ok(Workshop {
            id: row.get(0)?,
            name: row.get(1)?,
            starts_at: db::timestamp_column(row, 2)?,
            ends_at: db::timestamp_column(row, 3)?,
            timezone: row.get(4)?,
            status,
            status_pinned: row.get(6)?,
            deletion_scheduled_at: db::optional_timestamp_column(row, 7)?,
            created_at: db::timestamp_column(row, 8)?,
            updated_at: db::timestamp_column(row, 9)?,
        })
    }

    fn row_to_attendee(row: &rusqlite::Row) -> rusqlite::Result<Attendee> {
        let status_raw: String = row.get(4)?;
        let status = status_raw
            .parse::<Status>()
            .map_err(|e| db::conversion_error(4, e))?;

        Ok(Attendee {
            id: row.get(0)?,
            workshop_id: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            status,
            external_id: row.get(5)?,
            project_id: row.get(6)?,
            health_failures: row.get(7)?,
            last_error: row.get(8)?,
            created_at: db::timestamp_column(row, 9)?,
            updated_at: db::timestamp_column(row, 10)?,
        })
    }

    fn fetch_workshop(conn: &Connection, id: &str) -> Result<Option<Workshop>, StoreError> {
        let sql = format!("SELECT {} FROM workshops WHERE id = ?", WORKSHOP_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_workshop)
            .optional()?)
    }

    fn fetch_attendee(conn: &Connection, id: &str) -> Result<Option<Attendee>, StoreError> {
        let sql = format!("SELECT {} FROM attendees WHERE id = ?", ATTENDEE_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_attendee)
            .optional()?)
    }

    /// Run an UPDATE against one workshop and return the updated row.
    fn update_workshop(
        &self,
        id: &str,
        assignments: &str,
        mut values: Vec<Box<dyn rusqlite::ToSql>>,
    ) -> Result<Workshop, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE workshops SET {}, updated_at = ? WHERE id = ?",
            assignments
        );
        values.push(Box::new(db::format_timestamp(&Utc::now())));
        values.push(Box::new(id.to_string()));
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|p| p.as_ref()).collect();

        let affected = conn.execute(&sql, param_refs.as_slice())?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("workshop {}", id)));
        }
        Self::fetch_workshop(&conn, id)?
            .ok_or_else(|| StoreError::NotFound(format!("workshop {}", id)))
    }

    /// Run an UPDATE against one attendee and return the updated row.
    fn update_attendee(
        &self,
        id: &str,
        assignments: &str,
        mut values: Vec<Box<dyn rusqlite::ToSql>>,
    ) -> Result<Attendee, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE attendees SET {}, updated_at = ? WHERE id = ?",
            assignments
        );
        values.push(Box::new(db::format_timestamp(&Utc::now())));
        values.push(Box::new(id.to_string()));
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|p| p.as_ref()).collect();

        let affected = conn.execute(&sql, param_refs.as_slice())?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("attendee {}", id)));
        }
        Self::fetch_attendee(&conn, id)?
            .ok_or_else(|| StoreError::NotFound(format!("attendee {}", id)))
    }
}

impl WorkshopStore for SqliteWorkshopStore {
    fn create_workshop(&self, request: CreateWorkshopRequest) -> Result<Workshop, StoreError> {
        request.validate().map_err(StoreError::InvalidInput)?;

        let conn = self.lock()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO workshops (id, name, starts_at, ends_at, timezone, status, status_pinned, deletion_scheduled_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
            params![
                id,
                request.name,
                db::format_timestamp(&request.starts_at),
                db::format_timestamp(&request.ends_at),
                request.timezone,
                Status::Planning.as_str(),
                request.deletion_scheduled_at.as_ref().map(db::format_timestamp),
                db::format_timestamp(&now),
                db::format_timestamp(&now),
            ],
        )?;

        Ok(Workshop {
            id,
            name: request.name,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            timezone: request.timezone,
            status: Status::Planning,
            status_pinned: false,
            deletion_scheduled_at: request.deletion_scheduled_at,
            created_at: now,
            updated_at: now,
        })
    }

    fn get_workshop(&self, id: &str) -> Result<Option<Workshop>, StoreError> {
        let conn = self.lock()?;
        Self::fetch_workshop(&conn, id)
    }

    fn list_workshops(&self, filter: &WorkshopFilter) -> Result<Vec<Workshop>, StoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM workshops {} ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
            WORKSHOP_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_workshop)?;

        let mut workshops = Vec::new();
        for row_result in rows {
            workshops.push(row_result?);
        }
        Ok(workshops)
    }

    fn update_workshop_status(&self, id: &str, status: Status) -> Result<Workshop, StoreError> {
        self.update_workshop(id, "status = ?", vec![Box::new(status.as_str())])
    }

    fn set_status_pinned(&self, id: &str, pinned: bool) -> Result<Workshop, StoreError> {
        self.update_workshop(id, "status_pinned = ?", vec![Box::new(pinned)])
    }

    fn schedule_deletion(
        &self,
        id: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<Workshop, StoreError> {
        self.update_workshop(
            id,
            "deletion_scheduled_at = ?",
            vec![Box::new(at.as_ref().map(db::format_timestamp))],
        )
    }

    fn delete_workshop(&self, id: &str) -> Result<Workshop, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let workshop = Self::fetch_workshop(&tx, id)?
            .ok_or_else(|| StoreError::NotFound(format!("workshop {}", id)))?;

        tx.execute("DELETE FROM attendees WHERE workshop_id = ?", params![id])?;
        tx.execute("DELETE FROM workshops WHERE id = ?", params![id])?;
        tx.commit()?;

        Ok(workshop)
    }

    fn add_attendee(&self, request: CreateAttendeeRequest) -> Result<Attendee, StoreError> {
        if request.email.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "attendee email must not be empty".to_string(),
            ));
        }

        let conn = self.lock()?;
        if Self::fetch_workshop(&conn, &request.workshop_id)?.is_none() {
            return Err(StoreError::NotFound(format!(
                "workshop {}",
                request.workshop_id
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO attendees (id, workshop_id, name, email, status, health_failures, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 0, ?, ?)",
            params![
                id,
                request.workshop_id,
                request.name,
                request.email,
                Status::Deploying.as_str(),
                db::format_timestamp(&now),
                db::format_timestamp(&now),
            ],
        )?;

        Ok(Attendee {
            id,
            workshop_id: request.workshop_id,
            name: request.name,
            email: request.email,
            status: Status::Deploying,
            external_id: None,
            project_id: None,
            health_failures: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn get_attendee(&self, id: &str) -> Result<Option<Attendee>, StoreError> {
        let conn = self.lock()?;
        Self::fetch_attendee(&conn, id)
    }

    fn list_attendees(&self, workshop_id: &str) -> Result<Vec<Attendee>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM attendees WHERE workshop_id = ? ORDER BY created_at ASC, id ASC",
            ATTENDEE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![workshop_id], Self::row_to_attendee)?;

        let mut attendees = Vec::new();
        for row_result in rows {
            attendees.push(row_result?);
        }
        Ok(attendees)
    }

    fn list_attendees_by_status(
        &self,
        status: Status,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Attendee>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM attendees WHERE status = ? ORDER BY updated_at ASC, id ASC LIMIT ? OFFSET ?",
            ATTENDEE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![status.as_str(), limit, offset],
            Self::row_to_attendee,
        )?;

        let mut attendees = Vec::new();
        for row_result in rows {
            attendees.push(row_result?);
        }
        Ok(attendees)
    }

    fn update_attendee_status(
        &self,
        id: &str,
        status: Status,
        last_error: Option<&str>,
    ) -> Result<Attendee, StoreError> {
        if !status.is_attendee_status() {
            return Err(StoreError::InvalidInput(format!(
                "attendee cannot be {}",
                status
            )));
        }
        self.update_attendee(
            id,
            "status = ?, last_error = ?",
            vec![
                Box::new(status.as_str()),
                Box::new(last_error.map(str::to_string)),
            ],
        )
    }

    fn set_attendee_handles(
        &self,
        id: &str,
        external_id: Option<&str>,
        project_id: Option<&str>,
    ) -> Result<Attendee, StoreError> {
        self.update_attendee(
            id,
            "external_id = ?, project_id = ?",
            vec![
                Box::new(external_id.map(str::to_string)),
                Box::new(project_id.map(str::to_string)),
            ],
        )
    }

    fn record_health_probe(&self, id: &str, healthy: bool) -> Result<u32, StoreError> {
        let conn = self.lock()?;
        let sql = if healthy {
            "UPDATE attendees SET health_failures = 0 WHERE id = ? RETURNING health_failures"
        } else {
            "UPDATE attendees SET health_failures = health_failures + 1 WHERE id = ? RETURNING health_failures"
        };

        conn.query_row(sql, params![id], |row| row.get(0))
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("attendee {}", id)))
    }
}
