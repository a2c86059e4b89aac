//! Bencoded announce responses.

use std::collections::BTreeMap;
use std::net::IpAddr;

use omni_torrent::bencode::Bencode;

use crate::swarm::SwarmPeer;

/// Bencoded `failure reason` document for refused announces.
#[must_use]
pub fn error_body(reason: &str) -> Vec<u8> {
    let mut dict = BTreeMap::new();
    dict.insert(b"failure reason".to_vec(), Bencode::str(reason));
    Bencode::Dict(dict).encode()
}

/// Bencoded success document. Compact form packs IPv4 peers into 6-byte
/// records; the dictionary form carries `peer id`/`ip`/`port` entries.
#[must_use]
pub fn success_body(
    interval_secs: u64,
    min_interval_secs: u64,
    complete: u32,
    incomplete: u32,
    peers: &[SwarmPeer],
    compact: bool,
) -> Vec<u8> {
    let mut dict = BTreeMap::new();
    dict.insert(
        b"interval".to_vec(),
        Bencode::Int(interval_secs.min(i64::MAX as u64) as i64),
    );
    dict.insert(
        b"min interval".to_vec(),
        Bencode::Int(min_interval_secs.min(i64::MAX as u64) as i64),
    );
    dict.insert(b"complete".to_vec(), Bencode::Int(i64::from(complete)));
    dict.insert(b"incomplete".to_vec(), Bencode::Int(i64::from(incomplete)));

    if compact {
        let mut packed = Vec::with_capacity(peers.len() * 6);
        for peer in peers {
            if let IpAddr::V4(v4) = peer.ip {
                packed.extend_from_slice(&v4.octets());
                packed.extend_from_slice(&peer.port.to_be_bytes());
            }
        }
        dict.insert(b"peers".to_vec(), Bencode::Bytes(packed));
    } else {
        let list = peers
            .iter()
            .map(|peer| {
                let mut entry = BTreeMap::new();
                entry.insert(b"peer id".to_vec(), Bencode::Bytes(peer.peer_id.to_vec()));
                entry.insert(b"ip".to_vec(), Bencode::str(&peer.ip.to_string()));
                entry.insert(b"port".to_vec(), Bencode::Int(i64::from(peer.port)));
                Bencode::Dict(entry)
            })
            .collect();
        dict.insert(b"peers".to_vec(), Bencode::List(list));
    }

    Bencode::Dict(dict).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::net::Ipv4Addr;

    fn peer(last_octet: u8, port: u16) -> SwarmPeer {
        SwarmPeer {
            peer_id: [last_octet; 20],
            ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, last_octet)),
            port,
            uploaded: 0,
            downloaded: 0,
            left: 0,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn compact_form_packs_six_byte_records() {
        let body = success_body(30, 15, 1, 0, &[peer(7, 6881)], true);
        let decoded = Bencode::decode(&body).expect("decode");
        let dict = decoded.as_dict().expect("dict");
        let peers = dict
            .get(b"peers".as_slice())
            .and_then(Bencode::as_bytes)
            .expect("peers");
        assert_eq!(peers, &[192, 168, 1, 7, 0x1A, 0xE1]);
    }

    #[test]
    fn dict_form_lists_peer_entries() {
        let body = success_body(30, 15, 0, 1, &[peer(9, 6889)], false);
        let decoded = Bencode::decode(&body).expect("decode");
        let dict = decoded.as_dict().expect("dict");
        match dict.get(b"peers".as_slice()) {
            Some(Bencode::List(entries)) => assert_eq!(entries.len(), 1),
            _ => panic!("expected list peers"),
        }
    }

    #[test]
    fn failure_body_carries_reason() {
        let body = error_body("unknown torrent");
        assert_eq!(body, b"d14:failure reason15:unknown torrente");
    }
}
