use std::net::IpAddr;
use std::time::Duration;

use ring::digest;

/// Offset of the question section in a well-formed DNS message.
const QUESTION_OFFSET: usize = 12;

/// Extracts and lower-cases the QNAME from a DNS query buffer.
///
/// Labels start at octet 12: a length octet followed by that many name
/// octets, terminated by a zero-length label. Returns `None` rather than
/// panicking on any buffer that runs out of bytes before the root label.
pub fn extract_qname(buf: &[u8]) -> Option<String> {
    if buf.len() <= QUESTION_OFFSET {
        return None;
    }

    let mut labels = Vec::new();
    let mut pos = QUESTION_OFFSET;

    loop {
        let len = *buf.get(pos)? as usize;
        pos += 1;
        if len == 0 {
            break;
        }
        let end = pos.checked_add(len)?;
        let label = buf.get(pos..end)?;
        labels.push(String::from_utf8_lossy(label).to_ascii_lowercase());
        pos = end;
    }

    Some(labels.join("."))
}

/// Reads the big-endian 16-bit transaction ID at octet offset 0.
pub fn read_transaction_id(buf: &[u8]) -> Option<u16> {
    let bytes: [u8; 2] = buf.get(0..2)?.try_into().ok()?;
    Some(u16::from_be_bytes(bytes))
}

/// Overwrites the transaction ID at octet offset 0 in place.
pub fn write_transaction_id(buf: &mut [u8], id: u16) -> bool {
    match buf.get_mut(0..2) {
        Some(slice) => {
            slice.copy_from_slice(&id.to_be_bytes());
            true
        }
        None => false,
    }
}

/// Derives a 16-character lowercase hex fingerprint for a pending request.
///
/// The hash is a truncation of SHA-256 to its first 8 bytes (64 bits).
/// Fingerprints are only a stable logging/debugging handle; correctness of
/// request correlation is carried entirely by the upstream transaction ID
/// bimap, so a birthday-bound collision here is cosmetic, not a safety issue.
#[allow(clippy::too_many_arguments)]
pub fn fingerprint(
    client_ip: IpAddr,
    client_port: u16,
    client_query_id: u16,
    domain: &str,
    now: Duration,
    counter: u64,
    random_bytes: &[u8],
) -> String {
    let mut input = Vec::with_capacity(64 + domain.len() + random_bytes.len());
    input.extend_from_slice(client_ip.to_string().as_bytes());
    input.push(b':');
    input.extend_from_slice(&client_port.to_be_bytes());
    input.extend_from_slice(&client_query_id.to_be_bytes());
    input.extend_from_slice(domain.as_bytes());
    input.extend_from_slice(&now.as_nanos().to_be_bytes());
    input.extend_from_slice(&counter.to_be_bytes());
    input.extend_from_slice(random_bytes);

    let digest = digest::digest(&digest::SHA256, &input);
    hex::encode(&digest.as_ref()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn query(name_labels: &[&str]) -> Vec<u8> {
        let mut buf = vec![0u8; 12];
        for label in name_labels {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
        buf
    }

    #[test]
    fn extracts_and_lowercases_qname() {
        let buf = query(&["ExAmple", "COM"]);
        assert_eq!(extract_qname(&buf).as_deref(), Some("example.com"));
    }

    #[test]
    fn truncated_before_root_label_does_not_panic() {
        let mut buf = query(&["example", "com"]);
        buf.truncate(buf.len() - 2); // cut off before the terminating zero octet
        assert_eq!(extract_qname(&buf), None);
    }

    #[test]
    fn buffer_shorter_than_header_returns_none() {
        let buf = vec![0u8; 5];
        assert_eq!(extract_qname(&buf), None);
    }

    #[test]
    fn label_length_exceeding_buffer_returns_none() {
        let mut buf = vec![0u8; 12];
        buf.push(200); // claims 200 octets of label that don't exist
        buf.extend_from_slice(b"short");
        assert_eq!(extract_qname(&buf), None);
    }

    #[test]
    fn transaction_id_round_trips() {
        let mut buf = query(&["example", "com"]);
        write_transaction_id(&mut buf, 0x1234);
        assert_eq!(read_transaction_id(&buf), Some(0x1234));

        let original_id = read_transaction_id(&buf).unwrap();
        write_transaction_id(&mut buf, 0xAAAA);
        write_transaction_id(&mut buf, original_id);
        assert_eq!(read_transaction_id(&buf), Some(0x1234));
    }

    #[test]
    fn write_transaction_id_rejects_short_buffer() {
        let mut buf = [0u8];
        assert!(!write_transaction_id(&mut buf, 1));
    }

    #[test]
    fn fingerprint_is_sixteen_lowercase_hex_chars() {
        let fp = fingerprint(
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            44444,
            0x1234,
            "example.com",
            Duration::from_secs(1),
            0,
            &[1, 2, 3, 4],
        );
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn fingerprint_differs_on_counter() {
        let base = (
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            44444u16,
            0x1234u16,
            "example.com",
            Duration::from_secs(1),
        );
        let a = fingerprint(base.0, base.1, base.2, base.3, base.4, 0, &[]);
        let b = fingerprint(base.0, base.1, base.2, base.3, base.4, 1, &[]);
        assert_ne!(a, b);
    }
}
