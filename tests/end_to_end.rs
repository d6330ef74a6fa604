//! Drives the real server over TCP with an in-process store behind it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use readthrough::cache::{CacheClient, MemoryConnector, MemoryStore};
use readthrough::{HOME_MESSAGE, ReadThrough, Server, WriteFailurePolicy};

async fn start(store: &Arc<MemoryStore>, policy: WriteFailurePolicy) -> SocketAddr {
    start_with(MemoryConnector::new(Arc::clone(store)), policy).await
}

async fn start_with(connector: MemoryConnector, policy: WriteFailurePolicy) -> SocketAddr {
    let cache = CacheClient::new(connector, Duration::from_secs(1));
    let app = Arc::new(ReadThrough::home(Arc::new(cache)).on_write_failure(policy));

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run(move |req| {
        let app = Arc::clone(&app);
        async move { app.handle(req).await }
    }));
    addr
}

struct Reply {
    status: u16,
    body: String,
}

async fn send(addr: SocketAddr, method: &str, target: &str) -> Reply {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let raw = format!("{method} {target} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n");
    stream.write_all(raw.as_bytes()).await.unwrap();

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    let text = String::from_utf8(out).unwrap();

    let (head, body) = text.split_once("\r\n\r\n").unwrap();
    let status: u16 = head
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();
    Reply {
        status,
        body: body.to_owned(),
    }
}

#[tokio::test]
async fn empty_store_computes_and_populates() {
    let store = Arc::new(MemoryStore::new());
    let addr = start(&store, WriteFailurePolicy::Fail).await;

    let reply = send(addr, "GET", "/").await;

    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, HOME_MESSAGE);
    assert_eq!(store.peek("/").as_deref(), Some(HOME_MESSAGE));
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn populated_store_is_served_without_writing() {
    let store = Arc::new(MemoryStore::new());
    store.insert("/", HOME_MESSAGE);
    let addr = start(&store, WriteFailurePolicy::Fail).await;

    let reply = send(addr, "GET", "/").await;

    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, HOME_MESSAGE);
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn unreachable_store_gives_generic_500() {
    let store = Arc::new(MemoryStore::new());
    store.set_offline(true);
    let addr = start(&store, WriteFailurePolicy::Fail).await;

    let reply = send(addr, "GET", "/").await;

    assert_eq!(reply.status, 500);
    assert_eq!(reply.body, "Internal Server Error");
    assert!(store.is_empty());
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn failed_write_follows_policy() {
    let store = Arc::new(MemoryStore::new());
    store.set_reject_writes(true);

    let strict = start(&store, WriteFailurePolicy::Fail).await;
    let reply = send(strict, "GET", "/").await;
    assert_eq!(reply.status, 500);
    assert_eq!(reply.body, "Internal Server Error");

    let lenient = start(&store, WriteFailurePolicy::Serve).await;
    let reply = send(lenient, "GET", "/").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, HOME_MESSAGE);

    assert!(store.is_empty());
}

#[tokio::test]
async fn second_request_is_a_hit() {
    let store = Arc::new(MemoryStore::new());
    let addr = start(&store, WriteFailurePolicy::Fail).await;

    for _ in 0..3 {
        let reply = send(addr, "GET", "/").await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, HOME_MESSAGE);
    }

    assert_eq!(store.writes(), 1);
    assert_eq!(store.connections(), 1);
}

#[tokio::test]
async fn every_target_gets_its_own_entry() {
    let store = Arc::new(MemoryStore::new());
    let addr = start(&store, WriteFailurePolicy::Fail).await;

    for target in ["/", "/about", "/about?lang=fr", "/about?lang=de"] {
        assert_eq!(send(addr, "GET", target).await.status, 200);
    }

    assert_eq!(store.len(), 4);
    assert_eq!(store.peek("/about?lang=fr").as_deref(), Some(HOME_MESSAGE));
    assert_eq!(store.peek("/missing"), None);
}

#[tokio::test]
async fn store_recovers_after_outage() {
    let store = Arc::new(MemoryStore::new());
    store.set_offline(true);
    let addr = start(&store, WriteFailurePolicy::Fail).await;

    assert_eq!(send(addr, "GET", "/").await.status, 500);

    store.set_offline(false);
    let reply = send(addr, "GET", "/").await;
    assert_eq!(reply.status, 200);
    assert_eq!(store.peek("/").as_deref(), Some(HOME_MESSAGE));
}

#[tokio::test]
async fn concurrent_cold_requests_share_one_connection() {
    let store = Arc::new(MemoryStore::new());
    // Slow connect, so every request arrives while the first attempt is in flight.
    let connector = MemoryConnector::new(Arc::clone(&store)).with_delay(Duration::from_millis(50));
    let addr = start_with(connector, WriteFailurePolicy::Fail).await;

    let requests: Vec<_> = (0..16)
        .map(|i| tokio::spawn(async move { send(addr, "GET", &format!("/page/{i}")).await }))
        .collect();
    for request in requests {
        assert_eq!(request.await.unwrap().status, 200);
    }

    assert_eq!(store.connections(), 1);
    assert_eq!(store.len(), 16);
}

#[tokio::test]
async fn other_methods_are_rejected() {
    let store = Arc::new(MemoryStore::new());
    let addr = start(&store, WriteFailurePolicy::Fail).await;

    let reply = send(addr, "DELETE", "/").await;

    assert_eq!(reply.status, 405);
    assert_eq!(store.connections(), 0);
}
