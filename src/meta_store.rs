//! SQLite-backed relational index of projects, versions, and files.
//!
//! Every file row points at a blob by its SHA-256 hash; the blob bytes
//! themselves live in [`crate::blob_store`]. This module never touches the
//! filesystem outside of its own `packages.db`.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::error::{try_sql, EngineError, Result};
use crate::validate::{validate_name, validate_sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRow {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRow {
    pub name: String,
    pub timestamp: i64,
    pub star: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    pub name: String,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct MetaStore {
    database_dir: PathBuf,
    pool: SqlitePool,
}

impl MetaStore {
    fn database_file(database_dir: &PathBuf) -> PathBuf {
        database_dir.join("packages.db")
    }

    #[tracing::instrument(level = "debug")]
    pub async fn connect(database_dir: impl Into<PathBuf> + std::fmt::Debug) -> Result<Self> {
        let database_dir = database_dir.into();
        let options = SqliteConnectOptions::new()
            .filename(Self::database_file(&database_dir))
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = try_sql!(SqlitePoolOptions::new().connect_with(options).await);
        Ok(Self { database_dir, pool })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn create(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.database_dir).await?;
        try_sql!(
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS projects(
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    CONSTRAINT unique_project UNIQUE (name)
                )"
            )
            .execute(&self.pool)
            .await
        );
        try_sql!(
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS versions(
                    id INTEGER PRIMARY KEY,
                    project_id INTEGER,
                    name TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    star BOOLEAN NOT NULL DEFAULT 0,
                    FOREIGN KEY(project_id) REFERENCES projects(id),
                    CONSTRAINT unique_version UNIQUE (project_id, name)
                )"
            )
            .execute(&self.pool)
            .await
        );
        try_sql!(
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS files(
                    id INTEGER PRIMARY KEY,
                    version_id INTEGER,
                    name TEXT NOT NULL,
                    sha256 TEXT NOT NULL,
                    FOREIGN KEY(version_id) REFERENCES versions(id)
                        ON DELETE CASCADE,
                    CONSTRAINT unique_file UNIQUE (version_id, name)
                )"
            )
            .execute(&self.pool)
            .await
        );
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete(&self) -> Result<()> {
        self.pool.close().await;
        match tokio::fs::remove_dir_all(&self.database_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // upsert project, upsert version, insert file, all in one transaction.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn create_file(
        &self,
        project_name: &str,
        version_name: &str,
        file_name: &str,
        sha256: &str,
        age: i64,
    ) -> Result<()> {
        validate_name(project_name)?;
        validate_name(version_name)?;
        validate_name(file_name)?;
        validate_sha256(sha256)?;
        let timestamp = now_secs() - age;

        let mut tx = try_sql!(self.pool.begin().await);

        try_sql!(
            sqlx::query("INSERT OR IGNORE INTO projects(name) VALUES(?)")
                .bind(project_name)
                .execute(&mut *tx)
                .await
        );
        let project_id: i64 = try_sql!(
            sqlx::query("SELECT id FROM projects WHERE name=?")
                .bind(project_name)
                .fetch_one(&mut *tx)
                .await
        )
        .get(0);

        try_sql!(
            sqlx::query("INSERT OR IGNORE INTO versions(project_id, name, timestamp) VALUES(?, ?, ?)")
                .bind(project_id)
                .bind(version_name)
                .bind(timestamp)
                .execute(&mut *tx)
                .await
        );
        let version_id: i64 = try_sql!(
            sqlx::query("SELECT id FROM versions WHERE project_id=? AND name=?")
                .bind(project_id)
                .bind(version_name)
                .fetch_one(&mut *tx)
                .await
        )
        .get(0);

        let inserted = sqlx::query("INSERT INTO files(version_id, name, sha256) VALUES(?, ?, ?)")
            .bind(version_id)
            .bind(file_name)
            .bind(sha256)
            .execute(&mut *tx)
            .await;

        match inserted {
            Ok(_) => {
                try_sql!(tx.commit().await);
                Ok(())
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                let _ = tx.rollback().await;
                Err(EngineError::DuplicateFile)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                crate::error::log(&err);
                Err(EngineError::Internal(err.to_string()))
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn retrieve_file_sha256(&self, project_name: &str, version_name: &str, file_name: &str) -> Result<String> {
        validate_name(project_name)?;
        validate_name(version_name)?;
        validate_name(file_name)?;

        let row = try_sql!(
            sqlx::query(
                "SELECT files.sha256 FROM projects
                 INNER JOIN versions ON projects.id=versions.project_id
                 INNER JOIN files ON versions.id=files.version_id
                 WHERE projects.name=? AND versions.name=? AND files.name=?"
            )
            .bind(project_name)
            .bind(version_name)
            .bind(file_name)
            .fetch_optional(&self.pool)
            .await
        );
        let row = row.ok_or(EngineError::NotFound)?;
        Ok(row.get(0))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn retrieve_projects(&self) -> Result<Vec<ProjectRow>> {
        let rows = try_sql!(
            sqlx::query("SELECT name FROM projects ORDER BY name ASC")
                .fetch_all(&self.pool)
                .await
        );
        Ok(rows.into_iter().map(|row| ProjectRow { name: row.get(0) }).collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn retrieve_versions(&self, project_name: &str) -> Result<Vec<VersionRow>> {
        validate_name(project_name)?;

        let mut tx = try_sql!(self.pool.begin().await);
        let project = try_sql!(
            sqlx::query("SELECT id FROM projects WHERE name=?")
                .bind(project_name)
                .fetch_optional(&mut *tx)
                .await
        );
        let Some(project) = project else {
            let _ = tx.rollback().await;
            return Err(EngineError::NotFound);
        };
        let project_id: i64 = project.get(0);

        let rows = try_sql!(
            sqlx::query("SELECT name, timestamp, star FROM versions WHERE project_id=? ORDER BY timestamp DESC")
                .bind(project_id)
                .fetch_all(&mut *tx)
                .await
        );
        try_sql!(tx.commit().await);

        Ok(rows
            .into_iter()
            .map(|row| VersionRow {
                name: row.get(0),
                timestamp: row.get(1),
                star: row.get(2),
            })
            .collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn retrieve_files(&self, project_name: &str, version_name: &str) -> Result<Vec<FileRow>> {
        validate_name(project_name)?;
        validate_name(version_name)?;

        let mut tx = try_sql!(self.pool.begin().await);
        let version = try_sql!(
            sqlx::query(
                "SELECT versions.id FROM versions
                 INNER JOIN projects ON projects.id=versions.project_id
                 WHERE projects.name=? AND versions.name=?"
            )
            .bind(project_name)
            .bind(version_name)
            .fetch_optional(&mut *tx)
            .await
        );
        let Some(version) = version else {
            let _ = tx.rollback().await;
            return Err(EngineError::NotFound);
        };
        let version_id: i64 = version.get(0);

        let rows = try_sql!(
            sqlx::query("SELECT name, sha256 FROM files WHERE version_id=? ORDER BY name ASC")
                .bind(version_id)
                .fetch_all(&mut *tx)
                .await
        );
        try_sql!(tx.commit().await);

        Ok(rows
            .into_iter()
            .map(|row| FileRow {
                name: row.get(0),
                sha256: row.get(1),
            })
            .collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn retrieve_sha256s(&self) -> Result<Vec<String>> {
        let rows = try_sql!(
            sqlx::query("SELECT DISTINCT sha256 FROM files")
                .fetch_all(&self.pool)
                .await
        );
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    // BEGIN IMMEDIATE, not plain BEGIN: two writers that both grab a read
    // lock first can deadlock each other on upgrade.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn update_star(&self, project_name: &str, version_name: &str, star: bool) -> Result<()> {
        validate_name(project_name)?;
        validate_name(version_name)?;

        let mut conn = try_sql!(self.pool.acquire().await);
        try_sql!(sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await);

        let version = sqlx::query(
            "SELECT versions.id FROM versions
             INNER JOIN projects ON projects.id=versions.project_id
             WHERE projects.name=? AND versions.name=?",
        )
        .bind(project_name)
        .bind(version_name)
        .fetch_optional(&mut *conn)
        .await;
        let version = try_sql!(version);
        let Some(version) = version else {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            return Err(EngineError::NotFound);
        };
        let version_id: i64 = version.get(0);

        try_sql!(
            sqlx::query("UPDATE versions SET star=? WHERE id=?")
                .bind(star)
                .bind(version_id)
                .execute(&mut *conn)
                .await
        );
        try_sql!(sqlx::query("COMMIT").execute(&mut *conn).await);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_obsolete_versions(&self, age: i64) -> Result<()> {
        let timestamp = now_secs() - age;
        try_sql!(
            sqlx::query("DELETE FROM versions WHERE star=0 AND timestamp<=?")
                .bind(timestamp)
                .execute(&self.pool)
                .await
        );
        Ok(())
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64
}
