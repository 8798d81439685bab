//! The request table: a concurrent bimap correlating upstream transaction
//! IDs with the client metadata needed to answer the original query.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// A single in-flight upstream exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub client_ip: IpAddr,
    pub client_port: u16,
    pub client_query_id: u16,
    pub upstream_query_id: u16,
    pub domain: String,
    pub fingerprint: String,
    pub created_at: Instant,
    pub attempt: usize,
}

/// Source of fresh 16-bit candidates for upstream-ID allocation. Injectable
/// so allocation collision behavior can be tested deterministically.
pub trait IdSource: Send + Sync {
    fn next_id(&self) -> u16;
}

/// The production source: uniformly random 16-bit values.
#[derive(Debug, Default)]
pub struct RandomIdSource;

impl IdSource for RandomIdSource {
    fn next_id(&self) -> u16 {
        rand::random()
    }
}

#[derive(Default)]
struct Inner {
    by_fingerprint: HashMap<String, PendingRequest>,
    by_upstream_id: HashMap<u16, String>,
}

impl Inner {
    fn insert(&mut self, req: PendingRequest) -> bool {
        if self.by_fingerprint.contains_key(&req.fingerprint) {
            return false;
        }
        self.by_upstream_id
            .insert(req.upstream_query_id, req.fingerprint.clone());
        self.by_fingerprint.insert(req.fingerprint.clone(), req);
        true
    }

    fn remove(&mut self, fingerprint: &str) -> Option<PendingRequest> {
        let req = self.by_fingerprint.remove(fingerprint)?;
        self.by_upstream_id.remove(&req.upstream_query_id);
        Some(req)
    }
}

/// Concurrent pending-request table. All mutations are serialized under a
/// single lock; lookups may proceed concurrently with each other.
#[derive(Default)]
pub struct RequestTable {
    inner: RwLock<Inner>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh upstream id and inserts the request `build`s from
    /// it, holding a single write lock across both steps. Generating the
    /// candidate under a read lock and inserting under a later, separate
    /// write lock would let two concurrent callers both see the same id as
    /// free and both insert it; holding one write lock for the whole
    /// "retry until free, then insert" sequence is what makes the id
    /// actually reserved the moment it's handed out. Under load, expected
    /// retries are `pending_count / 65536`.
    pub fn insert_with_fresh_id(
        &self,
        source: &dyn IdSource,
        build: impl FnOnce(u16) -> PendingRequest,
    ) -> u16 {
        let mut inner = self.inner.write();
        let id = loop {
            let candidate = source.next_id();
            if !inner.by_upstream_id.contains_key(&candidate) {
                break candidate;
            }
        };
        inner.insert(build(id));
        id
    }

    /// Inserts atomically into both maps. Fails only if the fingerprint
    /// already exists, which should not happen by construction.
    pub fn insert(&self, req: PendingRequest) -> bool {
        self.inner.write().insert(req)
    }

    pub fn lookup_by_upstream_id(&self, id: u16) -> Option<PendingRequest> {
        let inner = self.inner.read();
        let fingerprint = inner.by_upstream_id.get(&id)?;
        inner.by_fingerprint.get(fingerprint).cloned()
    }

    pub fn lookup_by_fingerprint(&self, fingerprint: &str) -> Option<PendingRequest> {
        self.inner.read().by_fingerprint.get(fingerprint).cloned()
    }

    /// Atomically removes from both maps. Idempotent: removing an absent
    /// fingerprint is a no-op that returns `None`.
    pub fn remove(&self, fingerprint: &str) -> Option<PendingRequest> {
        self.inner.write().remove(fingerprint)
    }

    /// Removes every entry older than `max_age`, returning the count swept.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let stale: Vec<String> = inner
            .by_fingerprint
            .iter()
            .filter(|(_, req)| now.duration_since(req.created_at) > max_age)
            .map(|(fp, _)| fp.clone())
            .collect();

        for fingerprint in &stale {
            inner.remove(fingerprint);
        }
        stale.len()
    }

    /// `(pending_count, upstream_count)`; these are always equal.
    pub fn stats(&self) -> (usize, usize) {
        let inner = self.inner.read();
        (inner.by_fingerprint.len(), inner.by_upstream_id.len())
    }
}
