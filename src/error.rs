use thiserror::Error;

/// Unified error type for the resolver.
///
/// The `Invalid*`/`EmptyUpstreamPool` variants are fatal configuration
/// errors: they surface only from `ResolverConfig::from_env` and cause the
/// process to exit before any socket is bound. `Redis` is a recoverable
/// runtime error: every call site that can produce one treats it as a
/// logged no-op rather than propagating it further.
#[derive(Debug, Clone, Error)]
pub enum ResolverError {
    #[error("invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("invalid upstream server spec: {0}")]
    InvalidUpstream(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("upstream pool is empty")]
    EmptyUpstreamPool,

    #[error("redis error: {0}")]
    Redis(String),
}

pub type Result<T> = std::result::Result<T, ResolverError>;
