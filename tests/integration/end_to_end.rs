use std::net::{IpAddr, SocketAddr};

use rdv_services::{FileRoot, TransferClient};

use crate::*;

/// Two peers meet through the rendezvous server and one fetches a file
/// from the other's transfer server.
#[tokio::test]
async fn test_publish_search_download() {
    let rdv = Rendezvous::in_memory().await.unwrap();
    let share = tmp_dir("e2e-share");
    let downloads = tmp_dir("e2e-dl");
    std::fs::write(share.join("poem.txt"), "roses are red\n".repeat(40)).unwrap();
    std::fs::write(share.join("list.txt"), "eggs\nmilk\n").unwrap();

    // Alice shares her directory and tells the server about it.
    let sharer = Sharer::start(share.clone(), 200).await.unwrap();
    let alice = rdv.client().await.unwrap();
    let loopback: IpAddr = "127.0.0.1".parse().unwrap();
    let resp = alice
        .register("alice", loopback, None, sharer.addr.port())
        .await
        .unwrap();
    assert_eq!(resp.status, "REGISTERED");

    let files = FileRoot::new(&share).list().await.unwrap();
    assert_eq!(files, vec!["list.txt", "poem.txt"]);
    assert_eq!(alice.publish("alice", &files).await.unwrap().status, "PUBLISHED");

    // Bob looks for the poem and downloads it from whoever has it.
    let bob = rdv.client().await.unwrap();
    bob.register("bob", loopback, None, 1).await.unwrap();
    let found = bob.search_file("bob", "poem.txt").await.unwrap();
    let holder = found.peers().unwrap().remove(0);
    assert_eq!(holder.name, "alice");

    let source = SocketAddr::new(holder.ip, holder.tcp_port);
    let transfer = TransferClient::new(bob.counter().clone());
    let path = transfer.download_to(source, "poem.txt", &downloads).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(path).unwrap(),
        std::fs::read_to_string(share.join("poem.txt")).unwrap()
    );

    // Control and transfer share one request-id sequence.
    let before = bob.counter().peek();
    bob.retrieve_all("bob").await.unwrap();
    assert_eq!(bob.counter().peek(), before + 1);

    sharer.stop().await.unwrap();
    rdv.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&share);
    let _ = std::fs::remove_dir_all(&downloads);
}
