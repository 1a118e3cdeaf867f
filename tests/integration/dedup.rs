use std::net::IpAddr;

use serde_json::json;
use tokio::net::UdpSocket;

use rdv_core::wire;
use rdv_core::{Action, RequestIdStore, Response};
use rdv_services::ControlError;

use crate::*;

fn register_bytes(request_id: u64, name: &str) -> Vec<u8> {
    wire::encode(
        "REGISTER",
        &json!({
            "RQ#": request_id, "ACTION": "REGISTER", "NAME": name,
            "IP_ADDRESS": "127.0.0.1", "UDP_SOCKET": 5000, "TCP_SOCKET": 6000
        }),
    )
    .unwrap()
}

async fn recv_response(socket: &UdpSocket, wait: Duration) -> Option<Response> {
    let mut buf = vec![0u8; 4096];
    let (len, _) = tokio::time::timeout(wait, socket.recv_from(&mut buf)).await.ok()?.ok()?;
    Response::from_envelope(&wire::decode(&buf[..len]).ok()?).ok()
}

/// A retransmission is answered with the original response, not re-run.
#[tokio::test]
async fn test_retransmission_replays_original_response() {
    let rdv = Rendezvous::in_memory().await.unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let msg = register_bytes(0, "A");

    socket.send_to(&msg, rdv.addr).await.unwrap();
    let first = recv_response(&socket, Duration::from_secs(2)).await.unwrap();
    socket.send_to(&msg, rdv.addr).await.unwrap();
    let second = recv_response(&socket, Duration::from_secs(2)).await.unwrap();

    // Had the request been dispatched twice, the second answer would be a denial.
    assert_eq!(first.status, "REGISTERED");
    assert_eq!(second, first);

    rdv.stop().await.unwrap();
}

/// With replay disabled a duplicate is silently dropped.
#[tokio::test]
async fn test_duplicate_dropped_when_replay_disabled() {
    let rdv = Rendezvous::start(Arc::new(MemoryDirectory::new()), false)
        .await
        .unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let msg = register_bytes(0, "A");

    socket.send_to(&msg, rdv.addr).await.unwrap();
    assert!(recv_response(&socket, Duration::from_secs(2)).await.is_some());

    socket.send_to(&msg, rdv.addr).await.unwrap();
    assert!(recv_response(&socket, Duration::from_millis(300)).await.is_none());

    // A new request id from the same endpoint is still served.
    socket.send_to(&register_bytes(1, "A"), rdv.addr).await.unwrap();
    let resp = recv_response(&socket, Duration::from_secs(2)).await.unwrap();
    assert_eq!(resp.status, "REGISTER-DENIED");

    rdv.stop().await.unwrap();
}

/// A burst of identical datagrams mutates the directory once.
#[tokio::test]
async fn test_concurrent_duplicates_dispatch_once() {
    let directory = Arc::new(MemoryDirectory::new());
    let rdv = Rendezvous::start(directory.clone(), true).await.unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let msg = register_bytes(42, "A");

    for _ in 0..20 {
        socket.send_to(&msg, rdv.addr).await.unwrap();
    }
    let mut statuses = Vec::new();
    while let Some(resp) = recv_response(&socket, Duration::from_millis(300)).await {
        statuses.push(resp.status);
    }

    assert!(!statuses.is_empty());
    assert!(statuses.iter().all(|s| s == "REGISTERED"), "got {statuses:?}");
    assert_eq!(directory.len(), 1);

    rdv.stop().await.unwrap();
}

/// Different endpoints may reuse the same request id.
#[tokio::test]
async fn test_request_ids_are_per_endpoint() {
    let rdv = Rendezvous::in_memory().await.unwrap();
    let a = rdv.client().await.unwrap();
    let b = rdv.client().await.unwrap();

    let ip: IpAddr = "127.0.0.1".parse().unwrap();
    let ra = a.register("A", ip, None, 6000).await.unwrap();
    let rb = b.register("B", ip, None, 6001).await.unwrap();
    assert_eq!(ra.request_id, 0);
    assert_eq!(rb.request_id, 0);
    assert_eq!(rb.status, "REGISTERED");

    rdv.stop().await.unwrap();
}

/// Retries are bounded: a silent server yields NoResponse after 3 × T.
#[tokio::test]
async fn test_silent_server_gives_no_response() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client = ControlClient::bind(
        "127.0.0.1:0".parse().unwrap(),
        silent.local_addr().unwrap(),
        RequestCounter::new(),
    )
    .await
    .unwrap()
    .with_timing(TEST_TIMEOUT, 3);

    let started = std::time::Instant::now();
    let err = client.retrieve_all("A").await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ControlError::NoResponse { attempts: 3, .. }));
    assert!(elapsed >= TEST_TIMEOUT * 3, "gave up after {elapsed:?}");
    assert!(elapsed < TEST_TIMEOUT * 3 + Duration::from_secs(1));
}

/// A reply carrying another request id does not satisfy the call.
#[tokio::test]
async fn test_mismatched_request_id_is_ignored() {
    let fake = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client = ControlClient::bind(
        "127.0.0.1:0".parse().unwrap(),
        fake.local_addr().unwrap(),
        RequestCounter::new(),
    )
    .await
    .unwrap()
    .with_timing(TEST_TIMEOUT, 3);

    let server = tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        // Answer every attempt with the wrong id.
        for _ in 0..3 {
            let (len, from) = fake.recv_from(&mut buf).await.unwrap();
            let id = wire::decode(&buf[..len]).unwrap().body["RQ#"].as_u64().unwrap();
            let wrong = Response::confirmed(id + 1, Action::DeRegister);
            fake.send_to(&wrong.encode().unwrap(), from).await.unwrap();
        }
    });

    let err = client.deregister("A").await.unwrap_err();
    assert!(matches!(err, ControlError::NoResponse { .. }));
    server.await.unwrap();
}

async fn client_on(local: SocketAddr, server: SocketAddr, counter: RequestCounter) -> ControlClient {
    ControlClient::bind(local, server, counter)
        .await
        .unwrap()
        .with_timing(TEST_TIMEOUT, 3)
}

/// Separate short-lived clients reusing one local port, the way `rdv-ctl`
/// runs with a fixed control port, each get their request dispatched.
#[tokio::test]
async fn test_successive_clients_on_fixed_port() {
    let rdv = Rendezvous::in_memory().await.unwrap();
    let dir = tmp_dir("fixed-port");
    let store = RequestIdStore::new(dir.join("next-request-id"));
    let ip: IpAddr = "127.0.0.1".parse().unwrap();

    let local = {
        let counter = store.reserve().unwrap();
        let first = client_on("127.0.0.1:0".parse().unwrap(), rdv.addr, counter.clone()).await;
        let resp = first.register("A", ip, None, 6000).await.unwrap();
        assert_eq!(resp.status, "REGISTERED");
        store.commit(&counter).unwrap();
        first.local_addr().await.unwrap()
    };

    let counter = store.reserve().unwrap();
    let second = client_on(local, rdv.addr, counter.clone()).await;
    let resp = second.publish("A", &names(&["a.txt"])).await.unwrap();
    assert_eq!(resp.status, "PUBLISHED");
    let record = second.retrieve_info("A", "A").await.unwrap().peer().unwrap();
    assert!(record.files.contains("a.txt"), "publish was not dispatched");
    store.commit(&counter).unwrap();
    drop(second);

    // A client that restarts its ids on the same port hits the cached
    // REGISTER answer and must not take it for its own.
    let stale = client_on(local, rdv.addr, RequestCounter::new()).await;
    let err = stale.remove("A", &names(&["a.txt"])).await.unwrap_err();
    assert!(
        matches!(&err, ControlError::UnexpectedStatus { action: Action::Remove, .. }),
        "got {err}"
    );

    rdv.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}
