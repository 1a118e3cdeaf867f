use serde_json::json;
use tokio::net::TcpStream;

use rdv_core::wire::Envelope;
use rdv_services::framing::{read_envelope, write_envelope};
use rdv_services::{TransferClient, TransferError};

use crate::*;

async fn raw_download(addr: SocketAddr, file_name: &str) -> Vec<Envelope> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_envelope(&mut stream, "DOWNLOAD", &json!({"RQ#": 7, "FILE_NAME": file_name}))
        .await
        .unwrap();
    let mut frames = Vec::new();
    while let Some(env) = read_envelope(&mut stream).await.unwrap() {
        frames.push(env);
    }
    frames
}

#[tokio::test]
async fn test_450_chars_stream_as_three_chunks() {
    let dir = tmp_dir("t450");
    let text: String = ('a'..='z').cycle().take(450).collect();
    std::fs::write(dir.join("f.txt"), &text).unwrap();
    let sharer = Sharer::start(dir.clone(), 200).await.unwrap();

    let frames = raw_download(sharer.addr, "f.txt").await;
    let shape: Vec<(&str, usize)> = frames
        .iter()
        .map(|f| (f.start_line.as_str(), f.body["TEXT"].as_str().unwrap().len()))
        .collect();
    assert_eq!(shape, vec![("FILE", 200), ("FILE", 200), ("FILE-END", 50)]);
    for (n, frame) in frames.iter().enumerate() {
        assert_eq!(frame.body["CHUNK#"], n as u64);
        assert_eq!(frame.body["RQ#"], 7);
        assert_eq!(frame.body["FILE_NAME"], "f.txt");
    }

    sharer.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_download_reassembles_exactly() {
    let share = tmp_dir("exact-share");
    let downloads = tmp_dir("exact-dl").join("nested");
    let text: String = "héllo wörld, ✓ ".repeat(97);
    std::fs::write(share.join("doc.txt"), &text).unwrap();
    let sharer = Sharer::start(share.clone(), 200).await.unwrap();

    let client = TransferClient::new(RequestCounter::new());
    let path = client.download_to(sharer.addr, "doc.txt", &downloads).await.unwrap();

    assert_eq!(path, downloads.join("doc.txt"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), text);

    sharer.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&share);
    let _ = std::fs::remove_dir_all(downloads.parent().unwrap());
}

#[tokio::test]
async fn test_exact_multiple_ends_with_empty_terminal_chunk() {
    let dir = tmp_dir("t400");
    std::fs::write(dir.join("even.txt"), "q".repeat(400)).unwrap();
    let sharer = Sharer::start(dir.clone(), 200).await.unwrap();

    let frames = raw_download(sharer.addr, "even.txt").await;
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[2].start_line, "FILE-END");
    assert_eq!(frames[2].body["TEXT"], "");

    let text = TransferClient::new(RequestCounter::new())
        .download(sharer.addr, "even.txt")
        .await
        .unwrap();
    assert_eq!(text.len(), 400);

    sharer.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_missing_file_reports_download_error() {
    let share = tmp_dir("missing-share");
    let downloads = tmp_dir("missing-dl");
    let sharer = Sharer::start(share.clone(), 200).await.unwrap();

    let frames = raw_download(sharer.addr, "nope.txt").await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].start_line, "DOWNLOAD-ERROR");
    assert_eq!(frames[0].body["STATUS"], "DOWNLOAD-ERROR");

    let client = TransferClient::new(RequestCounter::new());
    let err = client
        .download_to(sharer.addr, "nope.txt", &downloads)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Remote { .. }), "got {err}");
    assert!(!downloads.join("nope.txt").exists(), "no file may be written");

    sharer.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&share);
    let _ = std::fs::remove_dir_all(&downloads);
}

#[tokio::test]
async fn test_server_closing_early_is_incomplete() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_envelope(&mut stream).await.unwrap().unwrap();
        let id = request.body["RQ#"].as_u64().unwrap();
        let chunk = json!({"RQ#": id, "FILE_NAME": "f.txt", "CHUNK#": 0, "TEXT": "x".repeat(200)});
        write_envelope(&mut stream, "FILE", &chunk).await.unwrap();
        // Connection dropped before FILE-END.
    });

    let downloads = tmp_dir("early-dl");
    let err = TransferClient::new(RequestCounter::new())
        .download_to(addr, "f.txt", &downloads)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Incomplete { received: 1, .. }), "got {err}");
    assert!(!downloads.join("f.txt").exists());

    server.await.unwrap();
    let _ = std::fs::remove_dir_all(&downloads);
}

#[tokio::test]
async fn test_concurrent_downloads_are_independent() {
    let dir = tmp_dir("concurrent");
    std::fs::write(dir.join("a.txt"), "A".repeat(1234)).unwrap();
    std::fs::write(dir.join("b.txt"), "B".repeat(567)).unwrap();
    let sharer = Sharer::start(dir.clone(), 200).await.unwrap();

    let counter = RequestCounter::new();
    let client = Arc::new(TransferClient::new(counter.clone()));
    let mut tasks = Vec::new();
    for i in 0..6 {
        let client = client.clone();
        let addr = sharer.addr;
        let file = if i % 2 == 0 { "a.txt" } else { "b.txt" };
        tasks.push(tokio::spawn(async move { (file, client.download(addr, file).await) }));
    }
    for task in tasks {
        let (file, result) = task.await.unwrap();
        let text = result.unwrap();
        let expected = if file == "a.txt" { 1234 } else { 567 };
        assert_eq!(text.len(), expected);
    }
    assert_eq!(counter.peek(), 6);

    sharer.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_absurd_terminal_chunk_fails_fast() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_envelope(&mut stream).await.unwrap().unwrap();
        let id = request.body["RQ#"].as_u64().unwrap();
        let end = json!({"RQ#": id, "FILE_NAME": "f.txt", "CHUNK#": 1u64 << 40, "TEXT": ""});
        write_envelope(&mut stream, "FILE-END", &end).await.unwrap();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        TransferClient::new(RequestCounter::new()).download(addr, "f.txt"),
    )
    .await
    .expect("download must not stall");
    let err = result.unwrap_err();
    assert!(matches!(err, TransferError::ChunkOutOfRange { received: 0, .. }), "got {err}");

    server.await.unwrap();
}
