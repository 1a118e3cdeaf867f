use std::net::IpAddr;

use crate::*;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_register_then_duplicate_name() {
    let rdv = Rendezvous::in_memory().await.unwrap();
    let client = rdv.client().await.unwrap();

    let first = client.register("A", ip("10.0.0.1"), Some(5000), 6000).await.unwrap();
    assert_eq!(first.status, "REGISTERED");
    assert_eq!(first.code.start_line(), "200 OK");

    let second = client.register("A", ip("10.0.0.1"), Some(5000), 6000).await.unwrap();
    assert_eq!(second.status, "REGISTER-DENIED");
    assert!(second.reason.unwrap().contains("duplicate name"));
    assert_eq!(second.request_id, first.request_id + 1);

    rdv.stop().await.unwrap();
}

#[tokio::test]
async fn test_publish_for_unregistered_peer() {
    let rdv = Rendezvous::in_memory().await.unwrap();
    let client = rdv.client().await.unwrap();

    let resp = client.publish("Z", &names(&["a.txt", "b.txt"])).await.unwrap();
    assert_eq!(resp.status, "PUBLISH-DENIED");
    assert_eq!(resp.code.start_line(), "500 Internal Server Error");

    rdv.stop().await.unwrap();
}

#[tokio::test]
async fn test_register_without_udp_port_records_source_port() {
    let rdv = Rendezvous::in_memory().await.unwrap();
    let client = rdv.client().await.unwrap();
    let local = client.local_addr().await.unwrap();

    client.register("A", ip("127.0.0.1"), None, 6000).await.unwrap();
    let info = client.retrieve_info("A", "A").await.unwrap();
    assert_eq!(info.peer().unwrap().udp_port, local.port());

    rdv.stop().await.unwrap();
}

#[tokio::test]
async fn test_peer_lifecycle() {
    let rdv = Rendezvous::in_memory().await.unwrap();
    let alice = rdv.client().await.unwrap();
    let bob = rdv.client().await.unwrap();

    alice.register("alice", ip("10.0.0.1"), Some(5000), 6000).await.unwrap();
    bob.register("bob", ip("10.0.0.2"), Some(5001), 6001).await.unwrap();

    let resp = alice.publish("alice", &names(&["song.txt", "notes.txt"])).await.unwrap();
    assert_eq!(resp.status, "PUBLISHED");

    // Bob finds alice by file.
    let found = bob.search_file("bob", "song.txt").await.unwrap();
    assert_eq!(found.status, "SEARCH-FILE");
    let holders = found.peers().unwrap();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].name, "alice");
    assert_eq!(holders[0].tcp_port, 6000);

    let all = bob.retrieve_all("bob").await.unwrap();
    assert_eq!(all.status, "RETRIEVE");
    assert_eq!(all.peers().unwrap().len(), 2);

    // Alice moves.
    let moved = alice
        .update_contact("alice", ip("10.0.0.9"), 5009, 6009)
        .await
        .unwrap();
    assert_eq!(moved.status, "UPDATE-CONFIRMED");
    let info = bob.retrieve_info("bob", "alice").await.unwrap();
    let record = info.peer().unwrap();
    assert_eq!(record.ip, ip("10.0.0.9"));
    assert_eq!(record.tcp_port, 6009);
    assert!(record.files.contains("song.txt"));

    // Removing a file that was never published removes nothing.
    let denied = alice.remove("alice", &names(&["song.txt", "ghost.txt"])).await.unwrap();
    assert_eq!(denied.status, "REMOVE-DENIED");
    assert!(denied.reason.unwrap().contains("ghost.txt"));
    assert_eq!(bob.search_file("bob", "song.txt").await.unwrap().status, "SEARCH-FILE");

    let removed = alice.remove("alice", &names(&["song.txt"])).await.unwrap();
    assert_eq!(removed.status, "REMOVED");
    assert_eq!(bob.search_file("bob", "song.txt").await.unwrap().status, "SEARCH-ERROR");

    // De-registering drops alice's remaining files too.
    assert_eq!(alice.deregister("alice").await.unwrap().status, "DE-REGISTERED");
    assert_eq!(bob.search_file("bob", "notes.txt").await.unwrap().status, "SEARCH-ERROR");
    assert_eq!(alice.deregister("alice").await.unwrap().status, "DE-REGISTER-DENIED");

    rdv.stop().await.unwrap();
}

#[tokio::test]
async fn test_reads_require_registration() {
    let rdv = Rendezvous::in_memory().await.unwrap();
    let client = rdv.client().await.unwrap();

    assert_eq!(client.retrieve_all("ghost").await.unwrap().status, "RETRIEVE-ERROR");
    assert_eq!(
        client.retrieve_info("ghost", "ghost").await.unwrap().status,
        "RETRIEVE-ERROR"
    );
    assert_eq!(client.search_file("ghost", "a.txt").await.unwrap().status, "SEARCH-ERROR");
    assert_eq!(
        client
            .update_contact("ghost", ip("10.0.0.1"), 1, 2)
            .await
            .unwrap()
            .status,
        "UPDATE-DENIED"
    );

    rdv.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_action_gets_invalid_request() {
    let rdv = Rendezvous::in_memory().await.unwrap();
    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let msg = rdv_core::wire::encode("TELEPORT", &serde_json::json!({"RQ#": 0})).unwrap();
    socket.send_to(&msg, rdv.addr).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let env = rdv_core::wire::decode(&buf[..len]).unwrap();
    let resp = rdv_core::Response::from_envelope(&env).unwrap();
    assert_eq!(resp.status, "ERROR");
    assert_eq!(resp.reason.as_deref(), Some("invalid request"));
    assert!(!resp.is_success());

    rdv.stop().await.unwrap();
}
