use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;

use crate::error::{ResolverError, Result};
use crate::local_zone::{LocalZoneEntry, LocalZoneMode};

/// A single upstream resolver in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub addr: SocketAddr,
    pub display_name: String,
}

impl Upstream {
    fn new(addr: SocketAddr, display_name: impl Into<String>) -> Self {
        Self {
            addr,
            display_name: display_name.into(),
        }
    }
}

/// Process-wide configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub bind_addr: SocketAddr,
    pub upstream_servers: Vec<Upstream>,
    pub redis_host: String,
    pub redis_port: u16,
    pub production: bool,
    pub local_zone: Vec<LocalZoneEntry>,

    pub attempt_timeout: Duration,
    pub cache_ttl_secs: u64,
    pub stale_threshold: Duration,
    pub sweep_interval: Duration,
    pub stats_interval: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8053),
            upstream_servers: vec![
                Upstream::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53), "Google"),
                Upstream::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), 53), "Cloudflare"),
                Upstream::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)), 53), "Quad9"),
            ],
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            production: false,
            local_zone: Vec::new(),
            attempt_timeout: Duration::from_secs(5),
            cache_ttl_secs: 300,
            stale_threshold: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            stats_interval: Duration::from_secs(300),
        }
    }
}

impl ResolverConfig {
    /// Build configuration from environment variables, falling back to defaults.
    ///
    /// Returns an error only when a *present* variable fails to parse; an
    /// absent variable always falls back silently.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("DNS_PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| ResolverError::InvalidPort(port.clone()))?;
            config.bind_addr.set_port(port);
        }

        if let Ok(bind) = std::env::var("BIND_ADDRESS") {
            let ip: IpAddr = bind
                .parse()
                .map_err(|_| ResolverError::InvalidBindAddress(bind.clone()))?;
            config.bind_addr.set_ip(ip);
        }

        if let Ok(upstreams) = std::env::var("UPSTREAM_SERVERS") {
            config.upstream_servers = parse_upstreams(&upstreams)?;
        }

        if config.upstream_servers.is_empty() {
            return Err(ResolverError::EmptyUpstreamPool);
        }

        if let Ok(host) = std::env::var("REDIS_HOST") {
            config.redis_host = host;
        }

        if let Ok(port) = std::env::var("REDIS_PORT") {
            config.redis_port = port
                .parse()
                .map_err(|_| ResolverError::InvalidPort(port.clone()))?;
        }

        if let Ok(node_env) = std::env::var("NODE_ENV") {
            config.production = node_env == "production";
        }

        if let Ok(zone) = std::env::var("LOCAL_ZONE") {
            config.local_zone = parse_local_zone(&zone)?;
        }

        Ok(config)
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }

    /// Apply CLI overrides on top of an env-derived config.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.bind_addr.set_port(port);
        }
        if let Some(bind) = &cli.bind {
            if let Ok(ip) = bind.parse::<IpAddr>() {
                self.bind_addr.set_ip(ip);
            }
        }
        if let Some(host) = &cli.redis_host {
            self.redis_host = host.clone();
        }
        if let Some(port) = cli.redis_port {
            self.redis_port = port;
        }
    }
}

fn parse_upstreams(raw: &str) -> Result<Vec<Upstream>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let mut parts = entry.splitn(3, ':');
            let ip = parts
                .next()
                .ok_or_else(|| ResolverError::InvalidUpstream(entry.to_string()))?;
            let port = parts
                .next()
                .ok_or_else(|| ResolverError::InvalidUpstream(entry.to_string()))?;
            let name = parts.next().unwrap_or(ip);

            let ip: IpAddr = ip
                .parse()
                .map_err(|_| ResolverError::InvalidUpstream(entry.to_string()))?;
            let port: u16 = port
                .parse()
                .map_err(|_| ResolverError::InvalidUpstream(entry.to_string()))?;

            Ok(Upstream::new(SocketAddr::new(ip, port), name))
        })
        .collect()
}

fn parse_local_zone(raw: &str) -> Result<Vec<LocalZoneEntry>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (domain, rule) = entry
                .split_once('=')
                .ok_or_else(|| ResolverError::InvalidUpstream(entry.to_string()))?;
            let domain = domain.trim().to_ascii_lowercase();

            if rule.eq_ignore_ascii_case("NXDOMAIN") {
                return Ok(LocalZoneEntry {
                    domain,
                    mode: LocalZoneMode::Nxdomain,
                });
            }

            let (addr, ttl) = rule.split_once('@').unwrap_or((rule, "60"));
            let addr: Ipv4Addr = addr
                .parse()
                .map_err(|_| ResolverError::InvalidUpstream(entry.to_string()))?;
            let ttl: u32 = ttl
                .parse()
                .map_err(|_| ResolverError::InvalidUpstream(entry.to_string()))?;

            Ok(LocalZoneEntry {
                domain,
                mode: LocalZoneMode::Address(addr, ttl),
            })
        })
        .collect()
}

/// Local-development CLI overlay. Environment variables remain authoritative
/// for deployed configuration; these flags only override what was already
/// resolved from the environment.
#[derive(Debug, Parser)]
#[command(name = "driftwood", about = "Recursive/forwarding DNS resolver")]
pub struct Cli {
    /// Override DNS_PORT
    #[arg(long)]
    pub port: Option<u16>,

    /// Override BIND_ADDRESS
    #[arg(long)]
    pub bind: Option<String>,

    /// Override REDIS_HOST
    #[arg(long = "redis-host")]
    pub redis_host: Option<String>,

    /// Override REDIS_PORT
    #[arg(long = "redis-port")]
    pub redis_port: Option<u16>,
}
