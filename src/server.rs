//! Binds the listening socket, dispatches each inbound datagram through the
//! local zone, the cache, and finally the forwarder; runs the periodic
//! sweeper and stats log; handles graceful shutdown.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::CacheClient;
use crate::config::ResolverConfig;
use crate::dns::wire::{extract_qname, read_transaction_id, write_transaction_id};
use crate::forwarder::Forwarder;
use crate::local_zone::{LocalZone, synthesize_reply};
use crate::table::RequestTable;

const MAX_DATAGRAM_SIZE: usize = 4096;

pub struct Server {
    config: Arc<ResolverConfig>,
    sock: Arc<UdpSocket>,
    cache: Arc<CacheClient>,
    table: Arc<RequestTable>,
    forwarder: Arc<Forwarder>,
    local_zone: Arc<LocalZone>,
}

impl Server {
    pub async fn bind(
        config: Arc<ResolverConfig>,
        cache: Arc<CacheClient>,
        local_zone: Arc<LocalZone>,
    ) -> std::io::Result<Self> {
        let sock = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        info!("UDP DNS server listening on {}", config.bind_addr);

        let table = Arc::new(RequestTable::new());
        let forwarder = Arc::new(Forwarder::new(
            Arc::clone(&config),
            Arc::clone(&table),
            Arc::clone(&cache),
            Arc::clone(&sock),
        ));

        Ok(Self {
            config,
            sock,
            cache,
            table,
            forwarder,
            local_zone,
        })
    }

    /// Runs the accept loop plus the sweeper and stats tickers until a
    /// shutdown signal is received on `shutdown_rx`.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut sweep_interval = tokio::time::interval(self.config.sweep_interval);
        let mut stats_interval = tokio::time::interval(self.config.stats_interval);
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    let (pending, _) = self.table.stats();
                    info!("shutdown requested, {} pending requests dropped", pending);
                    break;
                }

                _ = sweep_interval.tick() => {
                    let swept = self.table.sweep(self.config.stale_threshold);
                    if swept > 0 {
                        debug!("swept {} stale pending requests", swept);
                    }
                }

                _ = stats_interval.tick() => {
                    let (pending, _) = self.table.stats();
                    let (queries, hits) = self.cache.stats();
                    info!(
                        "stats: pending={} cache_queries={} cache_hits={} sticky_upstream={}",
                        pending,
                        queries,
                        hits,
                        self.forwarder.sticky_index(),
                    );
                }

                result = self.sock.recv_from(&mut buf) => {
                    match result {
                        Ok((n, client_addr)) => {
                            self.handle_datagram(&buf[..n], client_addr).await;
                        }
                        Err(e) => {
                            warn!("error reading from listening socket: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_datagram(&self, datagram: &[u8], client_addr: std::net::SocketAddr) {
        let Some(client_query_id) = read_transaction_id(datagram) else {
            debug!("dropping malformed query from {} (no id)", client_addr);
            return;
        };

        let Some(domain) = extract_qname(datagram) else {
            debug!("dropping malformed query from {} (bad qname)", client_addr);
            return;
        };

        self.cache.incr_queries().await;

        if let Some(mode) = self.local_zone.lookup(&domain) {
            if let Some(reply) = synthesize_reply(datagram, mode) {
                if let Err(e) = self.sock.send_to(&reply, client_addr).await {
                    warn!("failed to send local-zone reply to {}: {}", client_addr, e);
                }
            }
            return;
        }

        if let Some(mut cached) = self.cache.get(&domain).await {
            if write_transaction_id(&mut cached, client_query_id) {
                if let Err(e) = self.sock.send_to(&cached, client_addr).await {
                    warn!("failed to send cached reply to {}: {}", client_addr, e);
                } else {
                    self.cache.incr_hits().await;
                }
            }
            return;
        }

        let forwarder = Arc::clone(&self.forwarder);
        let query = datagram.to_vec();
        tokio::spawn(async move {
            forwarder.forward(query, client_addr, client_query_id, domain).await;
        });
    }
}

/// Installs `SIGINT`/`SIGTERM` handlers that broadcast a single shutdown
/// signal to every subscriber.
pub fn shutdown_signal() -> broadcast::Receiver<()> {
    let (tx, rx) = broadcast::channel(1);

    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            sigterm.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }

        info!("received shutdown signal");
        let _ = tx.send(());
    });

    rx
}
