//! SQLite-backed task and assignment store
//!
//! Each record is stored as a JSON body plus the columns needed for lookups
//! and the version check. Task locations are kept in a GeoJSON Point column
//! (`[lng, lat]` ordering); that column is authoritative when a task is
//! read back.

use beacon_core::GeoCoordinate;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::{AssignmentStore, TaskStore};
use crate::assignment::{Assignment, AssignmentStatus};
use crate::error::{StoreError, StoreResult};
use crate::input::TaskFilter;
use crate::task::Task;

/// GeoJSON Point geometry
#[derive(Debug, Serialize, Deserialize)]
struct GeoJsonPoint {
    #[serde(rename = "type")]
    kind: String,
    coordinates: [f64; 2],
}

fn location_to_column(location: Option<&GeoCoordinate>) -> StoreResult<Option<String>> {
    location
        .map(|coord| {
            serde_json::to_string(&GeoJsonPoint {
                kind: "Point".to_string(),
                coordinates: coord.to_geojson_point(),
            })
        })
        .transpose()
        .map_err(StoreError::from)
}

fn location_from_column(column: Option<String>) -> StoreResult<Option<GeoCoordinate>> {
    let Some(text) = column else {
        return Ok(None);
    };
    let point: GeoJsonPoint = serde_json::from_str(&text)?;
    // Stored coordinates were validated on the way in; keep them as written
    Ok(Some(
        GeoCoordinate::from_geojson_point(point.coordinates).unwrap_or(GeoCoordinate {
            latitude: point.coordinates[1],
            longitude: point.coordinates[0],
        }),
    ))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Task and assignment store over one SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a database file, creating parent directories
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening dispatch store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                mission_id TEXT NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                created_at TEXT NOT NULL,
                deleted_at TEXT,
                location TEXT,
                version INTEGER NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS assignments (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                responder_id TEXT NOT NULL,
                status TEXT NOT NULL,
                assigned_at TEXT NOT NULL,
                version INTEGER NOT NULL,
                body TEXT NOT NULL,
                UNIQUE (task_id, responder_id)
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_mission ON tasks(mission_id, status);
            CREATE INDEX IF NOT EXISTS idx_assignments_task ON assignments(task_id);
            CREATE INDEX IF NOT EXISTS idx_assignments_responder ON assignments(responder_id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn decode_task(body: String, location: Option<String>, version: i64) -> StoreResult<Task> {
        let mut task: Task = serde_json::from_str(&body)?;
        task.location = location_from_column(location)?;
        task.version = version as u64;
        Ok(task)
    }

    fn decode_assignment(body: String, version: i64) -> StoreResult<Assignment> {
        let mut assignment: Assignment = serde_json::from_str(&body)?;
        assignment.version = version as u64;
        Ok(assignment)
    }

    fn query_assignments(
        conn: &Connection,
        sql: &str,
        key: &str,
    ) -> StoreResult<Vec<Assignment>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut assignments = Vec::new();
        for row in rows {
            let (body, version) = row?;
            assignments.push(Self::decode_assignment(body, version)?);
        }
        Ok(assignments)
    }
}

impl TaskStore for SqliteStore {
    fn insert_task(&self, task: &Task) -> StoreResult<()> {
        let body = serde_json::to_string(task)?;
        let location = location_to_column(task.location.as_ref())?;

        self.lock()?.execute(
            r#"
            INSERT INTO tasks (
                id, mission_id, status, priority, created_at, deleted_at,
                location, version, body
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                task.id,
                task.mission_id,
                task.status.as_str(),
                task.priority.as_str(),
                task.created_at.to_rfc3339(),
                task.deleted_at.map(|t| t.to_rfc3339()),
                location,
                task.version as i64,
                body,
            ],
        )?;

        debug!(task_id = %task.id, "Task inserted");
        Ok(())
    }

    fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>> {
        let row = self
            .lock()?
            .query_row(
                "SELECT body, location, version FROM tasks WHERE id = ?1",
                params![task_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(body, location, version)| Self::decode_task(body, location, version))
            .transpose()
    }

    fn update_task(&self, task: &Task) -> StoreResult<Task> {
        let mut next = task.clone();
        next.version = task.version + 1;
        let body = serde_json::to_string(&next)?;
        let location = location_to_column(next.location.as_ref())?;

        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
            UPDATE tasks
            SET status = ?1, priority = ?2, deleted_at = ?3, location = ?4,
                body = ?5, version = version + 1
            WHERE id = ?6 AND version = ?7
            "#,
            params![
                next.status.as_str(),
                next.priority.as_str(),
                next.deleted_at.map(|t| t.to_rfc3339()),
                location,
                body,
                task.id,
                task.version as i64,
            ],
        )?;

        if changed == 1 {
            return Ok(next);
        }

        let exists = conn
            .query_row("SELECT 1 FROM tasks WHERE id = ?1", params![task.id], |_| Ok(()))
            .optional()?
            .is_some();
        if exists {
            Err(StoreError::VersionConflict {
                entity: "task",
                id: task.id.clone(),
                expected: task.version,
            })
        } else {
            Err(StoreError::Missing {
                entity: "task",
                id: task.id.clone(),
            })
        }
    }

    fn find_by_mission_and_status(
        &self,
        mission_id: &str,
        filter: &TaskFilter,
    ) -> StoreResult<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT body, location, version FROM tasks
            WHERE mission_id = ?1
              AND deleted_at IS NULL
              AND (?2 IS NULL OR status = ?2)
              AND (?3 IS NULL OR priority = ?3)
            "#,
        )?;
        let rows = stmt.query_map(
            params![
                mission_id,
                filter.status.map(|s| s.as_str()),
                filter.priority.map(|p| p.as_str()),
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;

        let mut tasks = Vec::new();
        for row in rows {
            let (body, location, version) = row?;
            tasks.push(Self::decode_task(body, location, version)?);
        }
        Ok(tasks)
    }
}

impl AssignmentStore for SqliteStore {
    fn insert_assignment(&self, assignment: &Assignment) -> StoreResult<()> {
        let body = serde_json::to_string(assignment)?;

        let result = self.lock()?.execute(
            r#"
            INSERT INTO assignments (
                id, task_id, responder_id, status, assigned_at, version, body
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                assignment.id,
                assignment.task_id,
                assignment.responder_id,
                assignment.status.as_str(),
                assignment.assigned_at.to_rfc3339(),
                assignment.version as i64,
                body,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateAssignment {
                task_id: assignment.task_id.clone(),
                responder_id: assignment.responder_id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn find_by_task_and_responder(
        &self,
        task_id: &str,
        responder_id: &str,
    ) -> StoreResult<Option<Assignment>> {
        let row = self
            .lock()?
            .query_row(
                "SELECT body, version FROM assignments WHERE task_id = ?1 AND responder_id = ?2",
                params![task_id, responder_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        row.map(|(body, version)| Self::decode_assignment(body, version))
            .transpose()
    }

    fn find_by_task(&self, task_id: &str) -> StoreResult<Vec<Assignment>> {
        let conn = self.lock()?;
        Self::query_assignments(
            &conn,
            "SELECT body, version FROM assignments WHERE task_id = ?1 ORDER BY assigned_at, id",
            task_id,
        )
    }

    fn find_by_responder(
        &self,
        responder_id: &str,
        statuses: &[AssignmentStatus],
    ) -> StoreResult<Vec<Assignment>> {
        let conn = self.lock()?;
        let all = Self::query_assignments(
            &conn,
            "SELECT body, version FROM assignments WHERE responder_id = ?1 ORDER BY assigned_at, id",
            responder_id,
        )?;
        Ok(all
            .into_iter()
            .filter(|a| statuses.contains(&a.status))
            .collect())
    }

    fn update_assignment(&self, assignment: &Assignment) -> StoreResult<Assignment> {
        let mut next = assignment.clone();
        next.version = assignment.version + 1;
        let body = serde_json::to_string(&next)?;

        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
            UPDATE assignments
            SET status = ?1, body = ?2, version = version + 1
            WHERE task_id = ?3 AND responder_id = ?4 AND version = ?5
            "#,
            params![
                next.status.as_str(),
                body,
                assignment.task_id,
                assignment.responder_id,
                assignment.version as i64,
            ],
        )?;

        if changed == 1 {
            return Ok(next);
        }

        let exists = conn
            .query_row(
                "SELECT 1 FROM assignments WHERE task_id = ?1 AND responder_id = ?2",
                params![assignment.task_id, assignment.responder_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            Err(StoreError::VersionConflict {
                entity: "assignment",
                id: assignment.id.clone(),
                expected: assignment.version,
            })
        } else {
            Err(StoreError::Missing {
                entity: "assignment",
                id: assignment.id.clone(),
            })
        }
    }
}
