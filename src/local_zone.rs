//! A small, curated set of locally-synthesized answers.
//!
//! Local-zone entries are immutable configuration loaded once at startup.
//! A match is terminal for the query: no cache lookup, no upstream contact.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalZoneMode {
    Nxdomain,
    Address(Ipv4Addr, u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalZoneEntry {
    pub domain: String,
    pub mode: LocalZoneMode,
}

/// Read-only lookup table, built once at startup from configuration.
#[derive(Debug, Clone, Default)]
pub struct LocalZone {
    entries: HashMap<String, LocalZoneMode>,
}

impl LocalZone {
    pub fn new(entries: Vec<LocalZoneEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.domain, entry.mode))
                .collect(),
        }
    }

    /// Exact lower-cased match only, no wildcard or suffix matching.
    pub fn lookup(&self, domain: &str) -> Option<&LocalZoneMode> {
        self.entries.get(domain)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds a synthesized reply: header and question section copied from the
/// client's query unchanged, then either an NXDOMAIN rcode with no answers,
/// or a single synthesized A-record answer.
pub fn synthesize_reply(query: &[u8], mode: &LocalZoneMode) -> Option<Vec<u8>> {
    let question_end = question_section_end(query)?;

    let mut reply = query[..question_end].to_vec();
    // QR bit.
    reply[2] |= 0x80;

    match mode {
        LocalZoneMode::Nxdomain => {
            // RCODE = 3 (NXDOMAIN), low nibble of byte 3. ANCOUNT stays 0.
            reply[3] = (reply[3] & 0xF0) | 0x03;
            debug!("local zone: synthesized NXDOMAIN");
        }
        LocalZoneMode::Address(addr, ttl) => {
            reply[3] &= 0xF0; // RCODE = 0 (NOERROR)
            reply[7] = 1; // ANCOUNT = 1 (bytes 6-7, big-endian)

            // Name: a compression pointer back to the question at offset 12.
            reply.extend_from_slice(&[0xC0, 0x0C]);
            reply.extend_from_slice(&1u16.to_be_bytes()); // TYPE A
            reply.extend_from_slice(&1u16.to_be_bytes()); // CLASS IN
            reply.extend_from_slice(&ttl.to_be_bytes());
            reply.extend_from_slice(&4u16.to_be_bytes()); // RDLENGTH
            reply.extend_from_slice(&addr.octets());
            debug!("local zone: synthesized A record {}", addr);
        }
    }

    Some(reply)
}

fn question_section_end(buf: &[u8]) -> Option<usize> {
    if buf.len() < 12 {
        return None;
    }
    let mut pos = 12;
    loop {
        let len = *buf.get(pos)? as usize;
        pos += 1;
        if len == 0 {
            break;
        }
        pos = pos.checked_add(len)?;
    }
    pos.checked_add(4) // QTYPE + QCLASS
        .filter(|end| *end <= buf.len())
}
