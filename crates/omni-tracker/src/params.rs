//! Announce query parsing.
//!
//! `info_hash` and `peer_id` are raw 20-byte values percent-encoded into
//! the query string, so the standard form decoder cannot be used: the raw
//! query is split and decoded bytewise here.

use std::net::IpAddr;

use thiserror::Error;

use omni_torrent::InfoHash;

use crate::AnnounceAudit;

/// Announce events defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    /// First announce of a session.
    Started,
    /// Clean shutdown; the peer leaves the swarm.
    Stopped,
    /// Download finished; the peer became a seeder.
    Completed,
}

impl AnnounceEvent {
    /// Stable label for audit rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        }
    }
}

/// Parse failures for announce requests.
#[derive(Debug, Error)]
pub enum AnnounceError {
    /// A required parameter was absent.
    #[error("missing parameter: {name}")]
    MissingParam {
        /// Parameter name.
        name: &'static str,
    },
    /// A parameter failed to decode or parse.
    #[error("invalid parameter: {name}")]
    InvalidParam {
        /// Parameter name.
        name: &'static str,
    },
}

impl AnnounceError {
    /// Best-effort audit figures for a refused announce, so the audit log
    /// still records who knocked.
    #[must_use]
    pub fn partial_audit(&self, source_ip: IpAddr) -> Option<AnnounceAudit> {
        Some(AnnounceAudit {
            info_hash: String::new(),
            peer_id: String::new(),
            ip: source_ip.to_string(),
            port: 0,
            event: None,
        })
    }
}

/// One parsed announce request.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// Torrent identity.
    pub info_hash: InfoHash,
    /// Client-selected peer identifier.
    pub peer_id: [u8; 20],
    /// Address the client advertises, when routable.
    pub ip: Option<IpAddr>,
    /// Listening port.
    pub port: u16,
    /// Lifetime uploaded bytes.
    pub uploaded: u64,
    /// Lifetime downloaded bytes.
    pub downloaded: u64,
    /// Bytes still missing; `0` marks a seeder.
    pub left: u64,
    /// Optional session event.
    pub event: Option<AnnounceEvent>,
    /// Whether the client asked for (or accepts) compact peer lists.
    pub compact: bool,
    /// Requested peer count.
    pub numwant: Option<u32>,
}

impl AnnounceRequest {
    /// Parse the raw (still percent-encoded) query string.
    ///
    /// # Errors
    ///
    /// Returns an error when a required parameter is missing or any
    /// parameter fails to decode.
    pub fn from_query(raw_query: &str) -> Result<Self, AnnounceError> {
        let mut info_hash = None;
        let mut peer_id = None;
        let mut ip = None;
        let mut port = None;
        let mut uploaded = 0_u64;
        let mut downloaded = 0_u64;
        let mut left = None;
        let mut event = None;
        let mut compact = true;
        let mut numwant = None;

        for pair in raw_query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "info_hash" => {
                    let bytes = percent_decode(value)
                        .ok_or(AnnounceError::InvalidParam { name: "info_hash" })?;
                    let bytes: [u8; 20] = bytes
                        .try_into()
                        .map_err(|_| AnnounceError::InvalidParam { name: "info_hash" })?;
                    info_hash = Some(InfoHash(bytes));
                }
                "peer_id" => {
                    let bytes = percent_decode(value)
                        .ok_or(AnnounceError::InvalidParam { name: "peer_id" })?;
                    let bytes: [u8; 20] = bytes
                        .try_into()
                        .map_err(|_| AnnounceError::InvalidParam { name: "peer_id" })?;
                    peer_id = Some(bytes);
                }
                "ip" => {
                    ip = Some(
                        value
                            .parse::<IpAddr>()
                            .map_err(|_| AnnounceError::InvalidParam { name: "ip" })?,
                    );
                }
                "port" => {
                    port = Some(
                        value
                            .parse::<u16>()
                            .map_err(|_| AnnounceError::InvalidParam { name: "port" })?,
                    );
                }
                "uploaded" => {
                    uploaded = value
                        .parse()
                        .map_err(|_| AnnounceError::InvalidParam { name: "uploaded" })?;
                }
                "downloaded" => {
                    downloaded = value
                        .parse()
                        .map_err(|_| AnnounceError::InvalidParam { name: "downloaded" })?;
                }
                "left" => {
                    left = Some(
                        value
                            .parse::<u64>()
                            .map_err(|_| AnnounceError::InvalidParam { name: "left" })?,
                    );
                }
                "event" => {
                    event = match value {
                        "started" => Some(AnnounceEvent::Started),
                        "stopped" => Some(AnnounceEvent::Stopped),
                        "completed" => Some(AnnounceEvent::Completed),
                        "" => None,
                        _ => return Err(AnnounceError::InvalidParam { name: "event" }),
                    };
                }
                "compact" => compact = value != "0",
                "numwant" => {
                    numwant = Some(
                        value
                            .parse::<u32>()
                            .map_err(|_| AnnounceError::InvalidParam { name: "numwant" })?,
                    );
                }
                // Unknown parameters are ignored per the protocol.
                _ => {}
            }
        }

        Ok(Self {
            info_hash: info_hash.ok_or(AnnounceError::MissingParam { name: "info_hash" })?,
            peer_id: peer_id.ok_or(AnnounceError::MissingParam { name: "peer_id" })?,
            ip,
            port: port.ok_or(AnnounceError::MissingParam { name: "port" })?,
            uploaded,
            downloaded,
            left: left.ok_or(AnnounceError::MissingParam { name: "left" })?,
            event,
            compact,
            numwant,
        })
    }
}

/// Bytewise percent decoding; `+` stays literal because payloads are
/// binary, not form data.
fn percent_decode(value: &str) -> Option<Vec<u8>> {
    let raw = value.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut index = 0;
    while index < raw.len() {
        match raw[index] {
            b'%' => {
                let high = hex_digit(*raw.get(index + 1)?)?;
                let low = hex_digit(*raw.get(index + 2)?)?;
                out.push(high << 4 | low);
                index += 3;
            }
            byte => {
                out.push(byte);
                index += 1;
            }
        }
    }
    Some(out)
}

const fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_binary_info_hash() {
        let encoded = "info_hash=%01%02%03%04%05%06%07%08%09%0a%0b%0c%0d%0e%0f%10%11%12%13%14\
                       &peer_id=AAAAAAAAAAAAAAAAAAAA&port=6881&uploaded=1&downloaded=2&left=3";
        let request = AnnounceRequest::from_query(encoded).expect("parse");
        assert_eq!(request.info_hash.as_bytes()[0], 1);
        assert_eq!(request.info_hash.as_bytes()[19], 20);
        assert_eq!(request.peer_id, [b'A'; 20]);
        assert_eq!(request.port, 6881);
        assert_eq!(request.left, 3);
        assert!(request.event.is_none());
    }

    #[test]
    fn missing_port_is_rejected() {
        let encoded = "info_hash=AAAAAAAAAAAAAAAAAAAA&peer_id=BBBBBBBBBBBBBBBBBBBB&left=0";
        let err = AnnounceRequest::from_query(encoded).expect_err("must fail");
        assert!(matches!(err, AnnounceError::MissingParam { name: "port" }));
    }

    #[test]
    fn wrong_length_hash_is_rejected() {
        let encoded = "info_hash=short&peer_id=BBBBBBBBBBBBBBBBBBBB&port=1&left=0";
        let err = AnnounceRequest::from_query(encoded).expect_err("must fail");
        assert!(matches!(
            err,
            AnnounceError::InvalidParam { name: "info_hash" }
        ));
    }

    #[test]
    fn plus_is_not_treated_as_space() {
        let decoded = percent_decode("a+b").expect("decode");
        assert_eq!(decoded, b"a+b");
    }
}
