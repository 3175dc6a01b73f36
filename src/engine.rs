//! Composes the blob store and the metadata index into the public
//! project/version/file API, adding the presentation fields (`date`) that
//! only the engine layer knows how to compute.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{Local, TimeZone};
use tokio::io::{AsyncRead, AsyncSeek};

use crate::blob_store::BlobStore;
use crate::error::Result;
use crate::expiry::format_expiry;
use crate::meta_store::{FileRow, MetaStore, ProjectRow};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionListing {
    pub name: String,
    pub timestamp: i64,
    pub star: bool,
    /// `YYYY-MM-DD`, with `", expires in ..."` appended when unstarred.
    pub date: String,
}

#[derive(Debug, Clone)]
pub struct Engine {
    datastore: BlobStore,
    database: MetaStore,
    obsolete_age: i64,
    grace_window: i64,
}

impl Engine {
    pub async fn connect(datastore_dir: impl Into<PathBuf>, database_dir: impl Into<PathBuf>, obsolete_age: i64) -> Result<Self> {
        Self::connect_with_grace_window(datastore_dir, database_dir, obsolete_age, GRACE_WINDOW).await
    }

    pub async fn connect_with_grace_window(
        datastore_dir: impl Into<PathBuf>,
        database_dir: impl Into<PathBuf>,
        obsolete_age: i64,
        grace_window: i64,
    ) -> Result<Self> {
        Ok(Self {
            datastore: BlobStore::new(datastore_dir),
            database: MetaStore::connect(database_dir).await?,
            obsolete_age,
            grace_window,
        })
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn create(&self) -> Result<()> {
        self.datastore.create().await?;
        self.database.create().await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn delete(&self) -> Result<()> {
        self.datastore.delete().await?;
        self.database.delete().await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_projects(&self) -> Result<Vec<ProjectRow>> {
        self.database.retrieve_projects().await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_versions(&self, project_name: &str) -> Result<Vec<VersionListing>> {
        let versions = self.database.retrieve_versions(project_name).await?;
        let now = now_secs();

        Ok(versions
            .into_iter()
            .map(|version| {
                let mut date = Local
                    .timestamp_opt(version.timestamp, 0)
                    .single()
                    .map(|dt| dt.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                if !version.star {
                    let expiry = version.timestamp + self.obsolete_age - now;
                    date.push_str(", ");
                    date.push_str(&format_expiry(expiry));
                }
                VersionListing {
                    name: version.name,
                    timestamp: version.timestamp,
                    star: version.star,
                    date,
                }
            })
            .collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_files(&self, project_name: &str, version_name: &str) -> Result<Vec<FileRow>> {
        self.database.retrieve_files(project_name, version_name).await
    }

    // blob lands before the metadata row; a failure here just leaves an
    // orphaned blob for the next cleanup to reclaim.
    #[tracing::instrument(level = "info", skip(self, stream))]
    pub async fn upload<S>(&self, project_name: &str, version_name: &str, file_name: &str, stream: S, age: i64) -> Result<()>
    where
        S: AsyncRead + AsyncSeek + Unpin,
    {
        let sha256 = self.datastore.create_blob(stream, age).await?;
        self.database.create_file(project_name, version_name, file_name, &sha256, age).await
    }

    // a blob missing for an already-resolved row means the two substrates
    // fell out of sync; report that as internal, not as a plain not-found.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn download(&self, project_name: &str, version_name: &str, file_name: &str) -> Result<tokio::fs::File> {
        let sha256 = self.database.retrieve_file_sha256(project_name, version_name, file_name).await?;
        match self.datastore.retrieve_blob(&sha256).await {
            Err(crate::error::EngineError::NotFound) => Err(crate::error::EngineError::Internal(format!(
                "file {project_name}/{version_name}/{file_name} has no corresponding blob {sha256}"
            ))),
            other => other,
        }
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn star_version(&self, project_name: &str, version_name: &str) -> Result<()> {
        self.database.update_star(project_name, version_name, true).await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn unstar_version(&self, project_name: &str, version_name: &str) -> Result<()> {
        self.database.update_star(project_name, version_name, false).await
    }

    // metadata deletion runs before the live-hash snapshot so a newly
    // orphaned hash is already absent from it.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn cleanup(&self) -> Result<()> {
        self.database.delete_obsolete_versions(self.obsolete_age).await?;
        let live: HashSet<String> = self.database.retrieve_sha256s().await?.into_iter().collect();
        self.datastore.delete_unreferenced_blobs(&live, self.grace_window).await
    }
}

const GRACE_WINDOW: i64 = 60;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    async fn engine(tmp: &TempDir) -> Engine {
        let engine = Engine::connect(tmp.path().join("datastore"), tmp.path().join("database"), 30 * 24 * 60 * 60)
            .await
            .unwrap();
        engine.create().await.unwrap();
        engine
    }

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp).await;

        engine
            .upload("proj", "1.0", "a.txt", Cursor::new(b"payload".to_vec()), 0)
            .await
            .unwrap();

        let mut file = engine.download("proj", "1.0", "a.txt").await.unwrap();
        let mut content = Vec::new();
        use tokio::io::AsyncReadExt;
        file.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"payload");
    }

    #[tokio::test]
    async fn list_versions_appends_expiry_unless_starred() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp).await;

        engine
            .upload("proj", "fresh", "a.txt", Cursor::new(b"x".to_vec()), 0)
            .await
            .unwrap();
        engine
            .upload("proj", "starred", "b.txt", Cursor::new(b"y".to_vec()), 0)
            .await
            .unwrap();
        engine.star_version("proj", "starred").await.unwrap();

        let versions = engine.list_versions("proj").await.unwrap();
        let fresh = versions.iter().find(|v| v.name == "fresh").unwrap();
        let starred = versions.iter().find(|v| v.name == "starred").unwrap();

        assert!(fresh.date.contains("expires in"));
        assert!(!starred.date.contains("expires in"));
    }

    #[tokio::test]
    async fn cleanup_reclaims_only_unreferenced_aged_blobs() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp).await;

        engine
            .upload("proj", "old", "a.txt", Cursor::new(b"old content".to_vec()), 30 * 24 * 60 * 60 + 120)
            .await
            .unwrap();
        engine
            .upload("proj", "fresh", "b.txt", Cursor::new(b"fresh content".to_vec()), 0)
            .await
            .unwrap();

        engine.cleanup().await.unwrap();

        assert!(engine.download("proj", "old", "a.txt").await.is_err());
        assert!(engine.download("proj", "fresh", "b.txt").await.is_ok());
    }
}
