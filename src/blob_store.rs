//! Content-addressed byte storage on a flat filesystem directory.
//!
//! A blob lives at `<dir>/<sha256>`. Writers never create that path
//! directly: they write to a uniquely named sibling temp file and publish
//! it with an atomic rename, so a reader opening `<sha256>` only ever sees
//! either nothing or a complete, hash-correct file.

use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWriteExt};

use crate::error::{EngineError, Result};
use crate::validate::validate_sha256;

const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct BlobStore {
    data_dir: PathBuf,
}

impl BlobStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub async fn create(&self) -> Result<()> {
        self.delete().await?;
        fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        match fs::remove_dir_all(&self.data_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn blob_path(&self, sha256: &str) -> PathBuf {
        self.data_dir.join(sha256)
    }

    // hash, rewind, write to a temp sibling, fsync, stamp mtime (now - age,
    // a testing hook), rename into place.
    #[tracing::instrument(level = "debug", skip(self, stream))]
    pub async fn create_blob<S>(&self, mut stream: S, age: i64) -> Result<String>
    where
        S: AsyncRead + AsyncSeek + Unpin,
    {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; BUFFER_SIZE];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let sha256 = hex::encode(hasher.finalize());

        stream.seek(SeekFrom::Start(0)).await?;

        let temp_path = self.data_dir.join(format!("{sha256}-{}", uuid::Uuid::new_v4().simple()));
        {
            let mut temp_file = File::options()
                .write(true)
                .create_new(true)
                .open(&temp_path)
                .await?;
            loop {
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                temp_file.write_all(&buf[..n]).await?;
            }
            temp_file.flush().await?;
            temp_file.sync_all().await?;
        }

        let timestamp = now_secs() - age;
        let mtime = FileTime::from_unix_time(timestamp, 0);
        filetime::set_file_times(&temp_path, mtime, mtime)?;

        fs::rename(&temp_path, self.blob_path(&sha256)).await?;
        Ok(sha256)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn retrieve_blob(&self, sha256: &str) -> Result<File> {
        validate_sha256(sha256)?;
        match File::open(self.blob_path(sha256)).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EngineError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    // per-entry stat/unlink failures are logged and skipped, not fatal.
    #[tracing::instrument(level = "debug", skip(self, live_hashes))]
    pub async fn delete_unreferenced_blobs(&self, live_hashes: &HashSet<String>, grace_window: i64) -> Result<()> {
        let now = now_secs();
        let mut entries = match fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        loop {
            let next = match entries.next_entry().await {
                Ok(next) => next,
                Err(e) => {
                    crate::error::log(&e);
                    break;
                }
            };
            let Some(entry) = next else {
                break;
            };

            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().into_owned();

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    crate::error::log(&e);
                    continue;
                }
            };
            let mtime = match metadata.modified() {
                Ok(mtime) => mtime,
                Err(e) => {
                    crate::error::log(&e);
                    continue;
                }
            };
            let age = now - to_unix_secs(mtime);
            if age < grace_window {
                continue;
            }
            if live_hashes.contains(&file_name) {
                continue;
            }
            if let Err(e) = fs::remove_file(&path).await {
                crate::error::log(&e);
            }
        }
        Ok(())
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64
}

fn to_unix_secs(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

pub async fn sha256_sum<R: AsyncRead + Unpin>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> BlobStore {
        BlobStore::new(tmp.path().join("datastore"))
    }

    #[tokio::test]
    async fn create_blob_is_content_addressed_and_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.create().await.unwrap();

        let content = b"hello world".to_vec();
        let sha_a = store.create_blob(Cursor::new(content.clone()), 0).await.unwrap();
        let sha_b = store.create_blob(Cursor::new(content.clone()), 0).await.unwrap();
        assert_eq!(sha_a, sha_b);
        assert_eq!(sha_a, sha256_sum(Cursor::new(content)).await.unwrap());
    }

    #[tokio::test]
    async fn retrieve_blob_roundtrips_bytes() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.create().await.unwrap();

        let content = b"round trip me".to_vec();
        let sha = store.create_blob(Cursor::new(content.clone()), 0).await.unwrap();

        let mut file = store.retrieve_blob(&sha).await.unwrap();
        let mut read_back = Vec::new();
        file.read_to_end(&mut read_back).await.unwrap();
        assert_eq!(read_back, content);
    }

    #[tokio::test]
    async fn retrieve_blob_validates_and_reports_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.create().await.unwrap();

        assert!(matches!(store.retrieve_blob("..").await, Err(EngineError::InvalidSha256)));

        let empty_sha = sha256_sum(Cursor::new(Vec::new())).await.unwrap();
        assert!(matches!(store.retrieve_blob(&empty_sha).await, Err(EngineError::NotFound)));
    }

    #[tokio::test]
    async fn delete_unreferenced_blobs_respects_grace_window_and_liveness() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.create().await.unwrap();

        let sha_old_unreferenced = store.create_blob(Cursor::new(b"gone".to_vec()), 120).await.unwrap();
        let sha_old_referenced = store.create_blob(Cursor::new(b"kept".to_vec()), 120).await.unwrap();
        let sha_fresh = store.create_blob(Cursor::new(b"fresh".to_vec()), 0).await.unwrap();

        let mut live = HashSet::new();
        live.insert(sha_old_referenced.clone());

        store.delete_unreferenced_blobs(&live, 60).await.unwrap();

        assert!(matches!(store.retrieve_blob(&sha_old_unreferenced).await, Err(EngineError::NotFound)));
        assert!(store.retrieve_blob(&sha_old_referenced).await.is_ok());
        // Freshly written blob survives even though it is unreferenced,
        // because it is within the grace window.
        assert!(store.retrieve_blob(&sha_fresh).await.is_ok());
    }
}
