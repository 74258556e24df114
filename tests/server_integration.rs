//! Integration tests for the local streaming server.
//!
//! Starts the server on a loopback ephemeral port and exercises the range
//! protocol over real HTTP: 200 full reads, 206 windows with exact bodies,
//! 416 for unsatisfiable ranges, 404 for unknown content, independent
//! concurrent sessions, and window-only decryption of encrypted content.

use streamvault_core::{
    ContentCipher, Database, DownloadState, EncryptionKeyHandle, StreamServerHandle, TaskKey,
    TaskStore, Vault,
};
use streamvault_core::server::StreamServer;
use tempfile::TempDir;

const SIZE: usize = 1000;

fn test_content() -> Vec<u8> {
    (0..SIZE as u32).map(|i| (i % 251) as u8).collect()
}

struct Fixture {
    handle: StreamServerHandle,
    store: TaskStore,
    vault: Vault,
    _dir: TempDir,
}

/// Publishes `bytes` as completed content and returns a running server.
async fn serve_bytes(
    content_id: &str,
    quality: &str,
    bytes: &[u8],
    encryption: Option<EncryptionKeyHandle>,
) -> Fixture {
    let dir = TempDir::new().expect("failed to create temp dir");
    let vault = Vault::open(dir.path().join("vault")).expect("failed to open vault");
    let db = Database::new_in_memory().await.expect("in-memory db");
    let store = TaskStore::new(db);

    let key = TaskKey::new(content_id, quality);
    let final_path = vault.final_path(content_id, quality);
    let temp_path = vault.temp_path(content_id, quality);
    std::fs::write(&final_path, bytes).expect("failed to write content");

    store
        .upsert_pending(
            &key,
            "https://cdn.example.com/src",
            &final_path,
            &temp_path,
            encryption.is_some(),
        )
        .await
        .unwrap();
    store
        .mark_completed(&key, bytes.len() as u64, "checksum-not-checked-here")
        .await
        .unwrap();

    let handle = StreamServer::new(store.clone(), encryption)
        .start()
        .await
        .expect("server should bind a loopback port");

    Fixture {
        handle,
        store,
        vault,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_full_read_returns_200_with_accept_ranges() {
    let content = test_content();
    let fx = serve_bytes("episode-42", "hd", &content, None).await;

    let response = reqwest::get(fx.handle.url_for("episode-42", "hd"))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok()),
        Some("bytes")
    );
    assert_eq!(
        response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok()),
        Some("1000")
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), content.as_slice());
}

#[tokio::test]
async fn test_valid_range_returns_exact_window() {
    let content = test_content();
    let fx = serve_bytes("episode-42", "hd", &content, None).await;
    let client = reqwest::Client::new();

    // Scenario from the range protocol: bytes=100-199 of a 1000-byte file
    let response = client
        .get(fx.handle.url_for("episode-42", "hd"))
        .header("Range", "bytes=100-199")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 206);
    assert_eq!(
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok()),
        Some("bytes 100-199/1000")
    );
    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), 100);
    assert_eq!(body.as_ref(), &content[100..200]);
}

#[tokio::test]
async fn test_range_windows_across_the_file() {
    let content = test_content();
    let fx = serve_bytes("episode-42", "hd", &content, None).await;
    let client = reqwest::Client::new();

    for (start, end) in [(0_usize, 0_usize), (0, 999), (999, 999), (250, 750)] {
        let response = client
            .get(fx.handle.url_for("episode-42", "hd"))
            .header("Range", format!("bytes={start}-{end}"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 206, "window {start}-{end}");
        assert_eq!(
            response
                .headers()
                .get("content-range")
                .and_then(|v| v.to_str().ok()),
            Some(format!("bytes {start}-{end}/1000").as_str())
        );
        let body = response.bytes().await.unwrap();
        assert_eq!(body.as_ref(), &content[start..=end], "window {start}-{end}");
    }
}

#[tokio::test]
async fn test_open_ended_range_serves_through_eof() {
    let content = test_content();
    let fx = serve_bytes("episode-42", "hd", &content, None).await;
    let client = reqwest::Client::new();

    let response = client
        .get(fx.handle.url_for("episode-42", "hd"))
        .header("Range", "bytes=900-")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 206);
    assert_eq!(
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok()),
        Some("bytes 900-999/1000")
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), &content[900..]);
}

#[tokio::test]
async fn test_out_of_bounds_range_returns_416() {
    let content = test_content();
    let fx = serve_bytes("episode-42", "hd", &content, None).await;
    let client = reqwest::Client::new();

    // Scenario: bytes=2000-2100 of a 1000-byte file
    for range in ["bytes=2000-2100", "bytes=1000-1000", "bytes=200-100"] {
        let response = client
            .get(fx.handle.url_for("episode-42", "hd"))
            .header("Range", range)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 416, "range {range}");
        assert_eq!(
            response
                .headers()
                .get("content-range")
                .and_then(|v| v.to_str().ok()),
            Some("bytes */1000"),
            "range {range}"
        );
    }
}

#[tokio::test]
async fn test_unknown_content_returns_404() {
    let content = test_content();
    let fx = serve_bytes("episode-42", "hd", &content, None).await;

    let response = reqwest::get(fx.handle.url_for("no-such-content", "hd"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    // Same content id at a different quality is also unknown
    let response = reqwest::get(fx.handle.url_for("episode-42", "4k"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_in_flight_download_is_never_served() {
    let content = test_content();
    let fx = serve_bytes("episode-42", "hd", &content, None).await;

    // Publish a second task that is still mid-download: its .part exists
    // but the task is not Completed, so the server must not expose it.
    let key = TaskKey::new("episode-43", "hd");
    let final_path = fx.vault.final_path("episode-43", "hd");
    let temp_path = fx.vault.temp_path("episode-43", "hd");
    std::fs::write(&temp_path, b"partial bytes").unwrap();
    fx.store
        .upsert_pending(
            &key,
            "https://cdn.example.com/src",
            &final_path,
            &temp_path,
            false,
        )
        .await
        .unwrap();
    fx.store.mark_in_progress(&key).await.unwrap();
    assert_eq!(
        fx.store.get(&key).await.unwrap().unwrap().state(),
        DownloadState::InProgress
    );

    let response = reqwest::get(fx.handle.url_for("episode-43", "hd"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let content = test_content();
    let fx = serve_bytes("episode-42", "hd", &content, None).await;
    let client = reqwest::Client::new();

    let windows = [(0_usize, 99_usize), (100, 499), (500, 999), (0, 999)];
    let mut handles = Vec::new();
    for (start, end) in windows {
        let client = client.clone();
        let url = fx.handle.url_for("episode-42", "hd");
        handles.push(tokio::spawn(async move {
            let response = client
                .get(url)
                .header("Range", format!("bytes={start}-{end}"))
                .send()
                .await
                .unwrap();
            (start, end, response.bytes().await.unwrap())
        }));
    }

    for handle in handles {
        let (start, end, body) = handle.await.unwrap();
        assert_eq!(body.as_ref(), &content[start..=end], "window {start}-{end}");
    }
}

#[tokio::test]
async fn test_encrypted_content_decrypts_requested_window_only() {
    let plaintext = test_content();
    let handle = EncryptionKeyHandle::from_material("server-test-key");

    // Store ciphertext on disk, exactly as the download manager writes it
    let cipher = ContentCipher::new(&handle, "episode-42", "hd");
    let mut ciphertext = plaintext.clone();
    cipher.encrypt_at(0, &mut ciphertext);

    let fx = serve_bytes("episode-42", "hd", &ciphertext, Some(handle)).await;
    let client = reqwest::Client::new();

    // Full read round-trips
    let response = client
        .get(fx.handle.url_for("episode-42", "hd"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.bytes().await.unwrap().as_ref(),
        plaintext.as_slice()
    );

    // Any sub-window decrypts to the matching plaintext slice without
    // touching offset zero
    for (start, end) in [(100_usize, 199_usize), (0, 0), (900, 999), (501, 502)] {
        let response = client
            .get(fx.handle.url_for("episode-42", "hd"))
            .header("Range", format!("bytes={start}-{end}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 206);
        let body = response.bytes().await.unwrap();
        assert_eq!(
            body.as_ref(),
            &plaintext[start..=end],
            "window {start}-{end}"
        );
    }
}

#[tokio::test]
async fn test_completed_task_with_missing_file_is_404() {
    let content = test_content();
    let fx = serve_bytes("episode-42", "hd", &content, None).await;

    // Delete the published file out from under the bookkeeping
    std::fs::remove_file(fx.vault.final_path("episode-42", "hd")).unwrap();

    let response = reqwest::get(fx.handle.url_for("episode-42", "hd"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_server_binds_loopback_ephemeral_port() {
    let content = test_content();
    let fx = serve_bytes("episode-42", "hd", &content, None).await;

    assert_ne!(fx.handle.port(), 0);
    assert!(
        fx.handle
            .url_for("episode-42", "hd")
            .starts_with("http://127.0.0.1:")
    );
}

#[tokio::test]
async fn test_missing_final_path_never_resolves_part_artifact() {
    // A .part file with the same stem must not satisfy a request: the
    // final_path simply does not exist yet.
    let dir = TempDir::new().unwrap();
    let vault = Vault::open(dir.path().join("vault")).unwrap();
    let db = Database::new_in_memory().await.unwrap();
    let store = TaskStore::new(db);

    let key = TaskKey::new("episode-42", "hd");
    let final_path = vault.final_path("episode-42", "hd");
    let temp_path = vault.temp_path("episode-42", "hd");
    std::fs::write(&temp_path, b"in-flight bytes").unwrap();
    store
        .upsert_pending(
            &key,
            "https://cdn.example.com/src",
            &final_path,
            &temp_path,
            false,
        )
        .await
        .unwrap();

    let handle = StreamServer::new(store, None).start().await.unwrap();
    let response = reqwest::get(handle.url_for("episode-42", "hd"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert!(temp_path.exists(), "artifact untouched");
}
