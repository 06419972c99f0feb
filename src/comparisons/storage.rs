use crate::comparisons::naming::derive_display_name;
use crate::comparisons::types::{Comparison, Project, ProjectRevision};
use crate::database::{Database, DbError};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tracing::info;

impl Database {
    /// Create the comparison and project tables
    pub fn create_comparison_tables(&self) -> Result<(), DbError> {
        let conn = self.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS comparisons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL,
                revision_a_id INTEGER NOT NULL,
                revision_b_id INTEGER NOT NULL,
                changes_count INTEGER NOT NULL DEFAULT 0,
                diff_payload TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                external_id TEXT,
                FOREIGN KEY (file_id) REFERENCES files(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_comparisons_file_id ON comparisons(file_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                description TEXT,
                owner TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS project_revisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL,
                comparison_id INTEGER NOT NULL,
                revision_number INTEGER NOT NULL,
                display_name TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (project_id) REFERENCES projects(id),
                FOREIGN KEY (comparison_id) REFERENCES comparisons(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_project_revisions_project_id
             ON project_revisions(project_id)",
            [],
        )?;

        Ok(())
    }

    /// Record a diff result between two revisions of a file.
    ///
    /// Both revisions must exist and belong to the named file; their order is
    /// the caller's choice.
    pub fn record_comparison(
        &self,
        file_id: i64,
        revision_a_id: i64,
        revision_b_id: i64,
        changes_count: i64,
        diff_payload: &serde_json::Value,
    ) -> Result<i64, DbError> {
        if file_id <= 0 || revision_a_id <= 0 || revision_b_id <= 0 {
            return Err(DbError::Validation(
                "comparison requires a file id and two revision ids".to_string(),
            ));
        }

        let conn = self.connect()?;

        let file_exists: Option<i64> = conn
            .query_row("SELECT id FROM files WHERE id = ?1", [file_id], |row| {
                row.get(0)
            })
            .optional()?;
        if file_exists.is_none() {
            return Err(DbError::NotFound(format!("file {}", file_id)));
        }

        for revision_id in [revision_a_id, revision_b_id] {
            let belongs: i64 = conn.query_row(
                "SELECT COUNT(*) FROM file_revisions WHERE id = ?1 AND file_id = ?2",
                [revision_id, file_id],
                |row| row.get(0),
            )?;
            if belongs == 0 {
                return Err(DbError::NotFound(format!(
                    "revision {} of file {}",
                    revision_id, file_id
                )));
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO comparisons (file_id, revision_a_id, revision_b_id, changes_count, diff_payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file_id,
                revision_a_id,
                revision_b_id,
                changes_count,
                diff_payload.to_string(),
                now
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get a comparison by id
    pub fn get_comparison(&self, comparison_id: i64) -> Result<Option<Comparison>, DbError> {
        let conn = self.connect()?;
        let comparison = conn
            .query_row(
                "SELECT id, file_id, revision_a_id, revision_b_id, changes_count, diff_payload, created_at, synced, external_id
                 FROM comparisons WHERE id = ?1",
                [comparison_id],
                map_comparison,
            )
            .optional()?;
        Ok(comparison)
    }

    /// List comparison history, newest first, optionally for one file
    pub fn list_comparisons(&self, file_id: Option<i64>) -> Result<Vec<Comparison>, DbError> {
        let conn = self.connect()?;

        let mut comparisons = Vec::new();
        if let Some(file_id) = file_id {
            let mut stmt = conn.prepare(
                "SELECT id, file_id, revision_a_id, revision_b_id, changes_count, diff_payload, created_at, synced, external_id
                 FROM comparisons WHERE file_id = ?1 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt.query_map([file_id], map_comparison)?;
            for row in rows {
                comparisons.push(row?);
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, file_id, revision_a_id, revision_b_id, changes_count, diff_payload, created_at, synced, external_id
                 FROM comparisons ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt.query_map([], map_comparison)?;
            for row in rows {
                comparisons.push(row?);
            }
        }
        Ok(comparisons)
    }

    /// One-way transition of the external-sync flag and identifier.
    ///
    /// The first call wins; repeat calls are a no-op, so the sync collaborator
    /// may safely retry.
    pub fn mark_synced(&self, comparison_id: i64, external_id: &str) -> Result<(), DbError> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE comparisons SET synced = 1, external_id = ?2 WHERE id = ?1 AND synced = 0",
            params![comparison_id, external_id],
        )?;

        if updated == 0 {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT id FROM comparisons WHERE id = ?1",
                    [comparison_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(DbError::NotFound(format!("comparison {}", comparison_id)));
            }
        }
        Ok(())
    }

    /// Create a project
    pub fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        owner: Option<&str>,
    ) -> Result<Project, DbError> {
        if name.trim().is_empty() {
            return Err(DbError::Validation("project name is required".to_string()));
        }

        let conn = self.connect()?;
        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO projects (name, description, owner, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, description, owner, now],
        )?;

        Ok(Project {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            description: description.map(String::from),
            owner: owner.map(String::from),
            active: true,
            updated_at: now,
        })
    }

    /// Get a project by id
    pub fn get_project(&self, project_id: i64) -> Result<Option<Project>, DbError> {
        let conn = self.connect()?;
        let project = conn
            .query_row(
                "SELECT id, name, description, owner, active, updated_at
                 FROM projects WHERE id = ?1",
                [project_id],
                map_project,
            )
            .optional()?;
        Ok(project)
    }

    /// List projects by name
    pub fn list_projects(&self) -> Result<Vec<Project>, DbError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, owner, active, updated_at
             FROM projects ORDER BY name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([], map_project)?;

        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    /// Attach a comparison to a project as its next numbered revision.
    ///
    /// The display name is derived from the two raw source filenames with
    /// revision suffixes stripped. Numbering is max(existing)+1 over all rows
    /// of the project, soft-deleted ones included, so numbers are never
    /// reused. This is the only writer of project revision numbers.
    pub fn attach_to_project(
        &self,
        project_id: i64,
        comparison_id: i64,
        filename_a: &str,
        filename_b: &str,
    ) -> Result<ProjectRevision, DbError> {
        let _guard = self.write_guard()?;
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let project_exists: Option<i64> = tx
            .query_row("SELECT id FROM projects WHERE id = ?1", [project_id], |row| {
                row.get(0)
            })
            .optional()?;
        if project_exists.is_none() {
            return Err(DbError::NotFound(format!("project {}", project_id)));
        }

        let comparison_exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM comparisons WHERE id = ?1",
                [comparison_id],
                |row| row.get(0),
            )
            .optional()?;
        if comparison_exists.is_none() {
            return Err(DbError::NotFound(format!("comparison {}", comparison_id)));
        }

        let revision_number: i64 = tx.query_row(
            "SELECT COALESCE(MAX(revision_number), 0) + 1 FROM project_revisions WHERE project_id = ?1",
            [project_id],
            |row| row.get(0),
        )?;

        let display_name = derive_display_name(filename_a, filename_b);
        let now = chrono::Utc::now().timestamp_millis();

        tx.execute(
            "INSERT INTO project_revisions (project_id, comparison_id, revision_number, display_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![project_id, comparison_id, revision_number, display_name, now],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE projects SET updated_at = ?1 WHERE id = ?2",
            params![now, project_id],
        )?;

        tx.commit()?;

        info!(project_id, revision_number, display_name = %display_name, "attached comparison to project");

        Ok(ProjectRevision {
            id,
            project_id,
            comparison_id,
            revision_number,
            display_name,
            created_at: now,
            deleted: false,
        })
    }

    /// List a project's live revisions in numbering order
    pub fn list_project_revisions(&self, project_id: i64) -> Result<Vec<ProjectRevision>, DbError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, project_id, comparison_id, revision_number, display_name, created_at, deleted
             FROM project_revisions
             WHERE project_id = ?1 AND deleted = 0
             ORDER BY revision_number",
        )?;
        let rows = stmt.query_map([project_id], map_project_revision)?;

        let mut revisions = Vec::new();
        for row in rows {
            revisions.push(row?);
        }
        Ok(revisions)
    }

    /// Soft-delete a project revision; its number is never reassigned
    pub fn soft_delete_project_revision(&self, project_revision_id: i64) -> Result<(), DbError> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE project_revisions SET deleted = 1 WHERE id = ?1",
            [project_revision_id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(format!(
                "project revision {}",
                project_revision_id
            )));
        }
        Ok(())
    }
}

fn map_comparison(row: &Row<'_>) -> rusqlite::Result<Comparison> {
    let payload: String = row.get(5)?;
    Ok(Comparison {
        id: row.get(0)?,
        file_id: row.get(1)?,
        revision_a_id: row.get(2)?,
        revision_b_id: row.get(3)?,
        changes_count: row.get(4)?,
        diff_payload: serde_json::from_str(&payload).unwrap_or(serde_json::json!({})),
        created_at: row.get(6)?,
        synced: row.get::<_, i64>(7)? != 0,
        external_id: row.get(8)?,
    })
}

fn map_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        owner: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
        updated_at: row.get(5)?,
    })
}

fn map_project_revision(row: &Row<'_>) -> rusqlite::Result<ProjectRevision> {
    Ok(ProjectRevision {
        id: row.get(0)?,
        project_id: row.get(1)?,
        comparison_id: row.get(2)?,
        revision_number: row.get(3)?,
        display_name: row.get(4)?,
        created_at: row.get(5)?,
        deleted: row.get::<_, i64>(6)? != 0,
    })
}
