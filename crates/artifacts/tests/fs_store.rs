//! Integration tests for the filesystem artifact store.

use std::sync::Arc;

use assert_matches::assert_matches;
use melodia_artifacts::FsArtifactStore;
use melodia_core::artifact::ArtifactStore;
use melodia_core::error::CoreError;
use melodia_core::hashing::sha256_hex;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn open_store() -> (tempfile::TempDir, FsArtifactStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::open(dir.path()).await.unwrap();
    (dir, store)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn put_then_get_returns_same_bytes() {
    let (_dir, store) = open_store().await;
    let bytes = b"ace-step checkpoint".to_vec();

    let artifact = store.put("models/ace-step/v1", &bytes).await.unwrap();
    assert_eq!(artifact.name, "models/ace-step/v1");
    assert_eq!(artifact.content_hash, sha256_hex(&bytes));
    assert_eq!(artifact.size_bytes, bytes.len() as u64);

    assert_eq!(store.get("models/ace-step/v1").await.unwrap(), bytes);
    assert_eq!(store.stat("models/ace-step/v1").await.unwrap(), artifact);
}

#[tokio::test]
async fn same_content_twice_is_a_no_op() {
    let (_dir, store) = open_store().await;
    let first = store.put("outputs/song.wav", b"riff").await.unwrap();
    let second = store.put("outputs/song.wav", b"riff").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn different_content_under_same_name_conflicts() {
    let (_dir, store) = open_store().await;
    store.put("outputs/song.wav", b"first").await.unwrap();

    assert_matches!(
        store.put("outputs/song.wav", b"second").await,
        Err(CoreError::ArtifactConflict { name }) if name == "outputs/song.wav"
    );
    assert_eq!(store.get("outputs/song.wav").await.unwrap(), b"first");
}

#[tokio::test]
async fn missing_artifacts_are_not_found() {
    let (_dir, store) = open_store().await;
    store.put("models/a/weights", b"w").await.unwrap();

    assert_matches!(store.get("nope").await, Err(CoreError::NotFound { .. }));
    assert_matches!(store.stat("nope").await, Err(CoreError::NotFound { .. }));
    // A path prefix of an existing name is not itself an artifact.
    assert_matches!(store.get("models/a").await, Err(CoreError::NotFound { .. }));

    assert!(store.exists("models/a/weights").await.unwrap());
    assert!(!store.exists("models/a").await.unwrap());
}

#[tokio::test]
async fn names_nested_under_each_other_are_independent() {
    let (_dir, store) = open_store().await;

    // Longer name first, then its prefix.
    store.put("models/a/weights", b"weights").await.unwrap();
    let prefix = store.put("models/a", b"manifest").await.unwrap();
    assert_eq!(prefix.content_hash, sha256_hex(b"manifest"));

    // Shorter name first, then a name nested below it.
    store.put("loras/jazz", b"jazz").await.unwrap();
    store.put("loras/jazz/v2", b"jazz v2").await.unwrap();

    assert_eq!(store.get("models/a/weights").await.unwrap(), b"weights");
    assert_eq!(store.get("models/a").await.unwrap(), b"manifest");
    assert_eq!(store.get("loras/jazz").await.unwrap(), b"jazz");
    assert_eq!(store.get("loras/jazz/v2").await.unwrap(), b"jazz v2");

    // Write-once still holds for each of them.
    assert_matches!(
        store.put("models/a", b"other").await,
        Err(CoreError::ArtifactConflict { .. })
    );
    assert_matches!(
        store.put("loras/jazz/v2", b"other").await,
        Err(CoreError::ArtifactConflict { .. })
    );
}

#[tokio::test]
async fn invalid_names_are_rejected() {
    let (_dir, store) = open_store().await;
    for name in ["", "/abs", "a//b", "../escape", "a/./b", "spaces here"] {
        assert_matches!(
            store.put(name, b"x").await,
            Err(CoreError::Validation(_)),
            "name {name:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        store.put("models/v2", b"persisted").await.unwrap();
    }
    let reopened = FsArtifactStore::open(dir.path()).await.unwrap();
    assert_eq!(reopened.get("models/v2").await.unwrap(), b"persisted");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_of_one_name_agree_on_a_single_winner() {
    let (_dir, store) = open_store().await;
    let store = Arc::new(store);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let bytes = format!("take-{}", i % 4).into_bytes();
                (bytes.clone(), store.put("outputs/race.wav", &bytes).await)
            })
        })
        .collect();

    let stored = {
        let results = futures::future::join_all(handles).await;
        let stored = store.get("outputs/race.wav").await.unwrap();
        for result in results {
            let (bytes, outcome) = result.unwrap();
            if bytes == stored {
                assert!(outcome.is_ok(), "writer of the stored content must succeed");
            } else {
                assert_matches!(outcome, Err(CoreError::ArtifactConflict { .. }));
            }
        }
        stored
    };

    let artifact = store.stat("outputs/race.wav").await.unwrap();
    assert_eq!(artifact.content_hash, sha256_hex(&stored));
}
