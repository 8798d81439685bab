//! The forwarder: owns transaction-ID translation, per-attempt timeouts,
//! fail-over across the upstream pool, and cache population on success.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::cache::CacheClient;
use crate::config::ResolverConfig;
use crate::dns::wire::{fingerprint, read_transaction_id, write_transaction_id};
use crate::table::{IdSource, PendingRequest, RandomIdSource, RequestTable};

/// Result of a single attempt against one upstream.
enum AttemptOutcome {
    /// Client was answered; the sequence is done.
    Success,
    /// This attempt failed (timeout, send error, or an orphan on its own
    /// socket); the caller should retry the next upstream.
    Failover,
}

pub struct Forwarder {
    config: Arc<ResolverConfig>,
    table: Arc<RequestTable>,
    cache: Arc<CacheClient>,
    listen_sock: Arc<UdpSocket>,
    id_source: RandomIdSource,
    /// Process-wide index of the last upstream known to have answered
    /// successfully. Biases new queries without per-upstream health scores.
    sticky: AtomicUsize,
    fingerprint_counter: AtomicU64,
}

impl Forwarder {
    pub fn new(
        config: Arc<ResolverConfig>,
        table: Arc<RequestTable>,
        cache: Arc<CacheClient>,
        listen_sock: Arc<UdpSocket>,
    ) -> Self {
        Self {
            config,
            table,
            cache,
            listen_sock,
            id_source: RandomIdSource,
            sticky: AtomicUsize::new(0),
            fingerprint_counter: AtomicU64::new(0),
        }
    }

    pub fn sticky_index(&self) -> usize {
        self.sticky.load(Ordering::Relaxed)
    }

    /// Runs the attempt sequence for one client miss, starting at the sticky
    /// upstream and walking forward without wrap-around (see DESIGN.md).
    pub async fn forward(
        self: &Arc<Self>,
        query: Vec<u8>,
        client_addr: SocketAddr,
        client_query_id: u16,
        domain: String,
    ) {
        let start = self.sticky_index();
        let pool_len = self.config.upstream_servers.len();

        for i in start..pool_len {
            match self.attempt(i, &query, client_addr, client_query_id, &domain).await {
                AttemptOutcome::Success => return,
                AttemptOutcome::Failover => continue,
            }
        }

        warn!(
            "all upstreams exhausted for {} from {}, abandoning (client will retry)",
            domain, client_addr
        );
    }

    async fn attempt(
        self: &Arc<Self>,
        i: usize,
        query: &[u8],
        client_addr: SocketAddr,
        client_query_id: u16,
        domain: &str,
    ) -> AttemptOutcome {
        let upstream = &self.config.upstream_servers[i];

        let fp = self.new_fingerprint(client_addr, client_query_id, domain);

        let upstream_id = self.table.insert_with_fresh_id(&self.id_source, |id| PendingRequest {
            client_ip: client_addr.ip(),
            client_port: client_addr.port(),
            client_query_id,
            upstream_query_id: id,
            domain: domain.to_string(),
            fingerprint: fp.clone(),
            created_at: Instant::now(),
            attempt: i,
        });

        let mut forwarded = query.to_vec();
        write_transaction_id(&mut forwarded, upstream_id);

        let sock = match UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0)).await {
            Ok(sock) => sock,
            Err(e) => {
                warn!("failed to open upstream socket for attempt {}: {}", i, e);
                self.table.remove(&fp);
                return AttemptOutcome::Failover;
            }
        };

        if let Err(e) = sock.send_to(&forwarded, upstream.addr).await {
            warn!(
                "send to upstream {} ({}) failed: {}",
                upstream.display_name, upstream.addr, e
            );
            self.table.remove(&fp);
            return AttemptOutcome::Failover;
        }

        let mut buf = vec![0u8; 4096];
        let recv = tokio::time::timeout(self.config.attempt_timeout, sock.recv_from(&mut buf)).await;

        match recv {
            Err(_elapsed) => {
                debug!(
                    "upstream {} timed out for {} (attempt {})",
                    upstream.display_name, domain, i
                );
                self.table.remove(&fp);
                AttemptOutcome::Failover
            }
            Ok(Err(e)) => {
                warn!("socket error receiving from {}: {}", upstream.display_name, e);
                self.table.remove(&fp);
                AttemptOutcome::Failover
            }
            Ok(Ok((n, _from))) => {
                buf.truncate(n);
                match handle_upstream_reply(&self.table, &buf) {
                    Some(dispatch) => {
                        self.dispatch_reply(dispatch).await;
                        self.sticky.store(i, Ordering::Relaxed);
                        AttemptOutcome::Success
                    }
                    None => {
                        warn!(
                            "orphan reply on attempt {} for {} (no matching pending request)",
                            i, domain
                        );
                        AttemptOutcome::Failover
                    }
                }
            }
        }
    }

    async fn dispatch_reply(&self, dispatch: ReplyDispatch) {
        // Cache write is fire-and-forget: client reply must not wait on it.
        let cache = Arc::clone(&self.cache);
        let domain = dispatch.domain.clone();
        let bytes = dispatch.reply.clone();
        let ttl = self.config.cache_ttl_secs;
        tokio::spawn(async move {
            cache.put(&domain, &bytes, ttl).await;
        });

        if let Err(e) = self
            .listen_sock
            .send_to(&dispatch.reply, dispatch.client_addr)
            .await
        {
            warn!("failed to send reply to client {}: {}", dispatch.client_addr, e);
        }
    }

    fn new_fingerprint(&self, client_addr: SocketAddr, client_query_id: u16, domain: &str) -> String {
        let counter = self.fingerprint_counter.fetch_add(1, Ordering::Relaxed);
        let mut random_bytes = [0u8; 8];
        rand::rng().fill_bytes(&mut random_bytes);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        fingerprint(
            client_addr.ip(),
            client_addr.port(),
            client_query_id,
            domain,
            now,
            counter,
            &random_bytes,
        )
    }
}

struct ReplyDispatch {
    client_addr: SocketAddr,
    domain: String,
    reply: Vec<u8>,
}

/// Pure correlation step, factored out of the attempt loop so it can be
/// tested without real sockets. Looks up the reply's transaction ID; on a
/// match, rewrites the ID back to the client's and removes the pending
/// entry; on a miss, returns `None` without touching the table (an orphan).
fn handle_upstream_reply(table: &RequestTable, reply: &[u8]) -> Option<ReplyDispatch> {
    let upstream_id = read_transaction_id(reply)?;
    let pending = table.lookup_by_upstream_id(upstream_id)?;

    let mut rewritten = reply.to_vec();
    write_transaction_id(&mut rewritten, pending.client_query_id);

    table.remove(&pending.fingerprint);

    info!(
        "resolved {} for {} (attempt {})",
        pending.domain, pending.client_ip, pending.attempt
    );

    Some(ReplyDispatch {
        client_addr: SocketAddr::new(pending.client_ip, pending.client_port),
        domain: pending.domain,
        reply: rewritten,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn reply_buf(id: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 40];
        buf[0..2].copy_from_slice(&id.to_be_bytes());
        buf
    }

    #[test]
    fn matching_reply_rewrites_id_and_removes_entry() {
        let table = RequestTable::new();
        table.insert(PendingRequest {
            client_ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            client_port: 44444,
            client_query_id: 0x1234,
            upstream_query_id: 0xAAAA,
            domain: "example.com".to_string(),
            fingerprint: "fp1".to_string(),
            created_at: Instant::now(),
            attempt: 0,
        });

        let dispatch = handle_upstream_reply(&table, &reply_buf(0xAAAA)).unwrap();
        assert_eq!(&dispatch.reply[0..2], &0x1234u16.to_be_bytes());
        assert_eq!(dispatch.reply.len(), 40);
        assert_eq!(table.stats(), (0, 0));
    }

    #[test]
    fn orphan_reply_is_dropped_and_leaves_table_untouched() {
        let table = RequestTable::new();
        table.insert(PendingRequest {
            client_ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            client_port: 44444,
            client_query_id: 0x1234,
            upstream_query_id: 0xAAAA,
            domain: "example.com".to_string(),
            fingerprint: "fp1".to_string(),
            created_at: Instant::now(),
            attempt: 0,
        });

        // A reply carrying an id that was already removed (e.g. by a prior
        // fail-over) must not be dispatched, and must not disturb the
        // unrelated entry still in the table.
        assert!(handle_upstream_reply(&table, &reply_buf(0xBEEF)).is_none());
        assert_eq!(table.stats(), (1, 1));
    }
}
