//! Signaling channel types
//!
//! The signaling collaborator owns the wire (typically a websocket carrying
//! JSON); this module defines the envelope it exchanges and the text payload
//! grammar routed to and from peer sessions. Outbound traffic is one
//! `CONNECTRESPONSE` per accepted offer followed by one `CANDIDATEADD` per
//! harvested local candidate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Envelope type tag for RTC payloads
pub const ENVELOPE_RTC: u32 = 1;

/// Generic signaling envelope: a numeric type tag, the recipient peer, and
/// an opaque text payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag
    #[serde(rename = "Type")]
    pub kind: u32,

    /// Recipient peer identity
    #[serde(rename = "To")]
    pub to: u64,

    /// Payload in the [`SignalingPayload`] grammar
    #[serde(rename = "Message")]
    pub payload: String,
}

impl Envelope {
    /// Wrap an RTC payload for `to`
    pub fn rtc(to: u64, payload: String) -> Self {
        Self {
            kind: ENVELOPE_RTC,
            to,
            payload,
        }
    }
}

/// Sink for outbound signaling envelopes.
///
/// Implementations must be safe for concurrent use: every active peer
/// session sends through the same channel.
#[async_trait]
pub trait SignalingSender: Send + Sync {
    /// Deliver one envelope to the remote signaling service
    async fn send(&self, envelope: Envelope) -> Result<()>;
}

/// Text payloads routed through signaling envelopes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingPayload {
    /// Inbound offer from a connecting peer
    ConnectRequest {
        /// Caller-assigned session identifier
        session_id: String,
        /// Offer session description text
        sdp: String,
    },
    /// Outbound answer for an accepted offer
    ConnectResponse {
        /// Session identifier the answer belongs to
        session_id: String,
        /// Answer session description text
        sdp: String,
    },
    /// A trickled candidate, either direction
    CandidateAdd {
        /// Session identifier the candidate belongs to
        session_id: String,
        /// Candidate attribute line, possibly with trickle extensions
        candidate: String,
    },
}

impl SignalingPayload {
    /// Parse a payload of the form `<VERB> <session-id> <rest>`
    pub fn parse(payload: &str) -> Result<Self> {
        let mut parts = payload.splitn(3, ' ');
        let verb = parts
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Signaling("empty signaling payload".to_string()))?;
        let session_id = parts
            .next()
            .ok_or_else(|| Error::Signaling(format!("{} payload without session id", verb)))?
            .to_string();
        let rest = parts
            .next()
            .ok_or_else(|| Error::Signaling(format!("{} payload without body", verb)))?
            .to_string();

        match verb {
            "CONNECTREQUEST" => Ok(Self::ConnectRequest {
                session_id,
                sdp: rest,
            }),
            "CONNECTRESPONSE" => Ok(Self::ConnectResponse {
                session_id,
                sdp: rest,
            }),
            "CANDIDATEADD" => Ok(Self::CandidateAdd {
                session_id,
                candidate: rest,
            }),
            other => Err(Error::Signaling(format!(
                "unknown signaling verb {:?}",
                other
            ))),
        }
    }

    /// Serialize to the wire payload text
    pub fn render(&self) -> String {
        match self {
            Self::ConnectRequest { session_id, sdp } => {
                format!("CONNECTREQUEST {} {}", session_id, sdp)
            }
            Self::ConnectResponse { session_id, sdp } => {
                format!("CONNECTRESPONSE {} {}", session_id, sdp)
            }
            Self::CandidateAdd {
                session_id,
                candidate,
            } => format!("CANDIDATEADD {} {}", session_id, candidate),
        }
    }
}

/// Decorate a local candidate line with the trickle extensions the remote
/// side expects: a generation counter (always 0), the local username
/// fragment, a monotonically increasing network id, and network cost 0.
pub fn trickled_candidate(line: &str, local_ufrag: &str, network_id: u64) -> String {
    format!(
        "{} generation 0 ufrag {} network-id {} network-cost 0",
        line, local_ufrag, network_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialization() {
        let envelope = Envelope::rtc(42, "CANDIDATEADD abc 1 1 udp ...".to_string());
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["Type"], 1);
        assert_eq!(json["To"], 42);
        assert_eq!(json["Message"], "CANDIDATEADD abc 1 1 udp ...");

        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_payload_round_trip() {
        let payloads = vec![
            SignalingPayload::ConnectRequest {
                session_id: "sess-1".to_string(),
                sdp: "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n".to_string(),
            },
            SignalingPayload::ConnectResponse {
                session_id: "sess-1".to_string(),
                sdp: "v=0\r\n".to_string(),
            },
            SignalingPayload::CandidateAdd {
                session_id: "sess-1".to_string(),
                candidate: "1 1 udp 2130706431 10.0.0.5 54321 typ host".to_string(),
            },
        ];
        for payload in payloads {
            assert_eq!(SignalingPayload::parse(&payload.render()).unwrap(), payload);
        }
    }

    #[test]
    fn test_payload_parse_errors() {
        assert!(SignalingPayload::parse("").is_err());
        assert!(SignalingPayload::parse("CONNECTREQUEST").is_err());
        assert!(SignalingPayload::parse("CONNECTREQUEST sess-1").is_err());
        assert!(SignalingPayload::parse("BOGUS sess-1 body").is_err());
    }

    #[test]
    fn test_trickled_candidate_format() {
        let decorated = trickled_candidate("1 1 udp 2130706431 10.0.0.5 54321 typ host", "frag", 3);
        assert_eq!(
            decorated,
            "1 1 udp 2130706431 10.0.0.5 54321 typ host generation 0 ufrag frag network-id 3 network-cost 0"
        );
    }

    #[test]
    fn test_trickled_candidate_still_parses() {
        // the trickle extensions ride through the candidate codec as
        // skipped pairs until the ufrag key
        let decorated = trickled_candidate("1 1 udp 2130706431 10.0.0.5 54321 typ host", "frag", 0);
        let record = crate::candidate::parse_candidate(&decorated, &[]).unwrap();
        assert_eq!(record.ufrag.as_deref(), Some("frag"));
        assert_eq!(record.port, 54321);
    }
}
