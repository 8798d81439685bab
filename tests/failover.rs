//! End-to-end forwarder behavior against real loopback sockets standing in
//! for upstream resolvers, exercising fail-over and transaction-ID
//! translation without mocking the network layer.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use driftwood::cache::CacheClient;
use driftwood::config::{ResolverConfig, Upstream};
use driftwood::forwarder::Forwarder;
use driftwood::table::RequestTable;
use tokio::net::UdpSocket;
use tokio::time::timeout;

fn build_query(id: u16, domain: &str) -> Vec<u8> {
    let mut buf = vec![0u8; 12];
    buf[0..2].copy_from_slice(&id.to_be_bytes());
    buf[4..6].copy_from_slice(&1u16.to_be_bytes());
    for label in domain.split('.') {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf
}

async fn loopback_socket() -> UdpSocket {
    UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap()
}

/// No Redis is running in CI; `CacheClient::connect` degrades to an inert
/// client, matching the "cache backend unavailable at startup" contract.
async fn inert_cache() -> Arc<CacheClient> {
    Arc::new(CacheClient::connect("redis://127.0.0.1:1").await)
}

async fn make_forwarder(
    upstreams: Vec<Upstream>,
    attempt_timeout: Duration,
) -> (Arc<Forwarder>, SocketAddr) {
    let listen_sock = Arc::new(loopback_socket().await);
    let listen_addr = listen_sock.local_addr().unwrap();

    let mut config = ResolverConfig::default();
    config.upstream_servers = upstreams;
    config.attempt_timeout = attempt_timeout;

    let table = Arc::new(RequestTable::new());
    let cache = inert_cache().await;
    let forwarder = Arc::new(Forwarder::new(Arc::new(config), table, cache, listen_sock));
    (forwarder, listen_addr)
}

#[tokio::test]
async fn first_upstream_success_rewrites_client_id() {
    let upstream_sock = loopback_socket().await;
    let upstream_addr = upstream_sock.local_addr().unwrap();
    let upstream = Upstream {
        addr: upstream_addr,
        display_name: "fake-0".to_string(),
    };

    let (forwarder, _listen_addr) = make_forwarder(vec![upstream], Duration::from_secs(5)).await;

    let client_sock = loopback_socket().await;
    let client_addr = client_sock.local_addr().unwrap();
    let query = build_query(0x1234, "example.com");

    tokio::spawn({
        let forwarder = Arc::clone(&forwarder);
        let query = query.clone();
        async move {
            forwarder
                .forward(query, client_addr, 0x1234, "example.com".to_string())
                .await;
        }
    });

    let mut upstream_buf = vec![0u8; 512];
    let (n, from) = timeout(Duration::from_secs(1), upstream_sock.recv_from(&mut upstream_buf))
        .await
        .expect("upstream never received the forwarded query")
        .unwrap();
    upstream_buf.truncate(n);

    // The rest of the query must be forwarded verbatim aside from the id.
    assert_eq!(&upstream_buf[2..], &query[2..]);

    let mut reply = vec![0u8; 40];
    reply[0..2].copy_from_slice(&upstream_buf[0..2]);
    for (i, byte) in reply.iter_mut().enumerate().skip(2) {
        *byte = i as u8;
    }
    upstream_sock.send_to(&reply, from).await.unwrap();

    let mut client_buf = vec![0u8; 512];
    let (n, _) = timeout(Duration::from_secs(1), client_sock.recv_from(&mut client_buf))
        .await
        .expect("client never received a reply")
        .unwrap();
    client_buf.truncate(n);

    assert_eq!(&client_buf[0..2], &0x1234u16.to_be_bytes());
    assert_eq!(&client_buf[2..], &reply[2..]);
}

#[tokio::test]
async fn timed_out_upstream_fails_over_to_the_next() {
    let silent_upstream = loopback_socket().await; // never replies
    let responsive_upstream = loopback_socket().await;
    let responsive_addr = responsive_upstream.local_addr().unwrap();

    let upstreams = vec![
        Upstream {
            addr: silent_upstream.local_addr().unwrap(),
            display_name: "silent".to_string(),
        },
        Upstream {
            addr: responsive_addr,
            display_name: "responsive".to_string(),
        },
    ];

    let (forwarder, _listen_addr) = make_forwarder(upstreams, Duration::from_millis(150)).await;

    let client_sock = loopback_socket().await;
    let client_addr = client_sock.local_addr().unwrap();
    let query = build_query(0x5678, "example.com");

    tokio::spawn({
        let forwarder = Arc::clone(&forwarder);
        let query = query.clone();
        async move {
            forwarder
                .forward(query, client_addr, 0x5678, "example.com".to_string())
                .await;
        }
    });

    let mut upstream_buf = vec![0u8; 512];
    let (n, from) = timeout(
        Duration::from_secs(2),
        responsive_upstream.recv_from(&mut upstream_buf),
    )
    .await
    .expect("second upstream never received the retried query")
    .unwrap();
    upstream_buf.truncate(n);

    let mut reply = vec![0u8; 20];
    reply[0..2].copy_from_slice(&upstream_buf[0..2]);
    responsive_upstream.send_to(&reply, from).await.unwrap();

    let mut client_buf = vec![0u8; 512];
    let (n, _) = timeout(Duration::from_secs(1), client_sock.recv_from(&mut client_buf))
        .await
        .expect("client never received a reply after fail-over")
        .unwrap();
    client_buf.truncate(n);

    assert_eq!(&client_buf[0..2], &0x5678u16.to_be_bytes());
}

#[tokio::test]
async fn all_upstreams_exhausted_leaves_client_without_a_reply() {
    let silent_a = loopback_socket().await;
    let silent_b = loopback_socket().await;

    let upstreams = vec![
        Upstream {
            addr: silent_a.local_addr().unwrap(),
            display_name: "silent-a".to_string(),
        },
        Upstream {
            addr: silent_b.local_addr().unwrap(),
            display_name: "silent-b".to_string(),
        },
    ];

    let (forwarder, _listen_addr) = make_forwarder(upstreams, Duration::from_millis(100)).await;

    let client_sock = loopback_socket().await;
    let client_addr = client_sock.local_addr().unwrap();
    let query = build_query(0x9999, "example.com");

    forwarder
        .forward(query, client_addr, 0x9999, "example.com".to_string())
        .await;

    let mut client_buf = vec![0u8; 512];
    let result = timeout(Duration::from_millis(300), client_sock.recv_from(&mut client_buf)).await;
    assert!(result.is_err(), "client should not receive any reply");
}
