//! Concurrency regression tests mirroring the reference implementation's
//! parallel stress scenarios: creating files must never be disrupted by a
//! concurrent cleanup pass, and concurrent writers of the same blob must
//! never observe a partial or corrupted file.

use std::io::Cursor;
use std::sync::Arc;

use tempstore::meta_store::MetaStore;
use tempstore::{blob_store::BlobStore, Engine};
use tempfile::TempDir;

const SHA256_TEST: &str = "e6f96beba7edddcbe06e2b526419ab151300fc271ee13f42eb11ee45f74dd152";

#[tokio::test]
async fn parallel_create_file_survives_concurrent_obsolete_cleanup() {
    let tmp = TempDir::new().unwrap();
    let database = Arc::new(MetaStore::connect(tmp.path().join("database")).await.unwrap());
    database.create().await.unwrap();

    for round in 0..5 {
        let mut handles = Vec::new();
        for j in 0..20 {
            let database = Arc::clone(&database);
            let version_name = format!("v{j}");
            let file_name = format!("file{round}");
            handles.push(tokio::spawn(async move {
                database.create_file("Project", &version_name, &file_name, SHA256_TEST, 0).await
            }));

            let database = Arc::clone(&database);
            handles.push(tokio::spawn(async move {
                database.delete_obsolete_versions(0).await.map(|_| ())
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert!(result.is_ok(), "concurrent operation failed: {result:?}");
        }
    }
}

#[tokio::test]
async fn parallel_create_blob_is_consistent_across_writers() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(BlobStore::new(tmp.path().join("datastore")));
    store.create().await.unwrap();

    let content: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();

    for _ in 0..10 {
        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = Arc::clone(&store);
            let content = content.clone();
            handles.push(tokio::spawn(async move {
                let sha256 = store.create_blob(Cursor::new(content.clone()), 0).await?;
                let mut file = store.retrieve_blob(&sha256).await?;
                use tokio::io::AsyncReadExt;
                let mut read_back = Vec::new();
                file.read_to_end(&mut read_back).await?;
                Ok::<bool, tempstore::EngineError>(read_back == content)
            }));
        }

        for handle in handles {
            let matched = handle.await.unwrap().unwrap();
            assert!(matched, "a concurrent writer observed a corrupted blob");
        }
    }
}

#[tokio::test]
async fn upload_is_immediately_visible_to_download_and_listing() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::connect(tmp.path().join("datastore"), tmp.path().join("database"), 30 * 24 * 60 * 60)
        .await
        .unwrap();
    engine.create().await.unwrap();

    engine
        .upload("proj", "1.0", "a.txt", Cursor::new(b"content".to_vec()), 0)
        .await
        .unwrap();

    let files = engine.list_files("proj", "1.0").await.unwrap();
    assert_eq!(files.len(), 1);

    let mut downloaded = engine.download("proj", "1.0", "a.txt").await.unwrap();
    use tokio::io::AsyncReadExt;
    let mut content = Vec::new();
    downloaded.read_to_end(&mut content).await.unwrap();
    assert_eq!(content, b"content");
}
