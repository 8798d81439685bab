//! Minimal DNS wire-format helpers.
//!
//! The resolver never decodes a full DNS message: it only needs the queried
//! name (for cache keys and the local zone) and the 16-bit transaction ID at
//! the start of every message. Everything else is forwarded byte-for-byte.

pub mod wire;

pub use wire::{extract_qname, fingerprint, read_transaction_id, write_transaction_id};
