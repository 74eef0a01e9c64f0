//! ICE candidate attribute-line codec
//!
//! Parses and serializes the candidate grammar exchanged over signaling:
//!
//! ```text
//! <foundation> <component-id> <transport> <priority> <address> <port>
//!     typ <type> [raddr <addr> rport <port>] [ufrag <frag>]
//! ```
//!
//! Records are immutable once constructed. Parsing is total over the
//! grammar: a malformed line yields a [`ParseError`] and is dropped by the
//! caller without affecting the session.

use std::fmt;

use webrtc::ice::candidate::{Candidate, CandidateType};
use webrtc::ice::network_type::NetworkType;

/// The single component id used by a data-channel session (RTP component
/// slot 1; there is no RTCP component for `UDP/DTLS/SCTP`).
pub const DEFAULT_COMPONENT_ID: u16 = 1;

/// Candidate grammar parse failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A required token was absent
    #[error("candidate line is missing the {0} token")]
    MissingToken(&'static str),

    /// A numeric token failed to parse
    #[error("candidate {field} is not a valid number: {value:?}")]
    InvalidNumber {
        /// Which field was malformed
        field: &'static str,
        /// The offending token
        value: String,
    },

    /// The transport token was not a recognized transport
    #[error("unknown candidate transport {0:?}")]
    UnknownTransport(String),

    /// The type token was not a recognized candidate type
    #[error("unknown candidate type {0:?}")]
    UnknownType(String),

    /// The literal `typ` separator was missing
    #[error("expected literal \"typ\", found {0:?}")]
    ExpectedTyp(String),
}

/// Transport family of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// UDP (the only transport this stack negotiates)
    Udp,
    /// TCP (parsed for completeness; never harvested locally)
    Tcp,
}

impl TransportKind {
    fn parse(token: &str) -> Result<Self, ParseError> {
        if token.eq_ignore_ascii_case("udp") {
            Ok(TransportKind::Udp)
        } else if token.eq_ignore_ascii_case("tcp") {
            Ok(TransportKind::Tcp)
        } else {
            Err(ParseError::UnknownTransport(token.to_string()))
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Udp => write!(f, "udp"),
            TransportKind::Tcp => write!(f, "tcp"),
        }
    }
}

/// Candidate type per ICE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// Directly attached interface address
    Host,
    /// Address observed by a STUN server
    ServerReflexive,
    /// Address learned from an inbound connectivity check
    PeerReflexive,
    /// Address allocated on a relay
    Relayed,
}

impl CandidateKind {
    fn parse(token: &str) -> Result<Self, ParseError> {
        match token {
            "host" => Ok(CandidateKind::Host),
            "srflx" => Ok(CandidateKind::ServerReflexive),
            "prflx" => Ok(CandidateKind::PeerReflexive),
            "relay" => Ok(CandidateKind::Relayed),
            other => Err(ParseError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateKind::Host => write!(f, "host"),
            CandidateKind::ServerReflexive => write!(f, "srflx"),
            CandidateKind::PeerReflexive => write!(f, "prflx"),
            CandidateKind::Relayed => write!(f, "relay"),
        }
    }
}

/// Base address a reflexive/relayed candidate is derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedAddress {
    /// Related host
    pub address: String,
    /// Related port
    pub port: u16,
}

/// One parsed (or harvested) candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    /// Foundation id grouping candidates from the same base
    pub foundation: String,
    /// Component id the candidate belongs to
    pub component: u16,
    /// Transport family
    pub transport: TransportKind,
    /// ICE priority (higher preferred)
    pub priority: u32,
    /// Transport address host part
    pub address: String,
    /// Transport address port part
    pub port: u16,
    /// Candidate type
    pub kind: CandidateKind,
    /// Related address, present only when the line carried `raddr`/`rport`
    /// matching an already-known candidate on the same component
    pub related: Option<RelatedAddress>,
    /// Username fragment carried on the line, if any
    pub ufrag: Option<String>,
}

impl CandidateRecord {
    /// Serialize back to the attribute-line grammar
    pub fn marshal(&self) -> String {
        let mut out = format!(
            "{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.transport,
            self.priority,
            self.address,
            self.port,
            self.kind
        );
        if let Some(related) = &self.related {
            out.push_str(&format!(" raddr {} rport {}", related.address, related.port));
        }
        if let Some(ufrag) = &self.ufrag {
            out.push_str(&format!(" ufrag {}", ufrag));
        }
        out
    }

    /// Build a record from a harvested engine candidate.
    ///
    /// Returns `None` for candidates of unspecified type, which the engine
    /// only produces transiently.
    pub(crate) fn from_engine(candidate: &(dyn Candidate + Send + Sync)) -> Option<Self> {
        let kind = match candidate.candidate_type() {
            CandidateType::Host => CandidateKind::Host,
            CandidateType::ServerReflexive => CandidateKind::ServerReflexive,
            CandidateType::PeerReflexive => CandidateKind::PeerReflexive,
            CandidateType::Relay => CandidateKind::Relayed,
            CandidateType::Unspecified => return None,
        };
        let transport = match candidate.network_type() {
            NetworkType::Tcp4 | NetworkType::Tcp6 => TransportKind::Tcp,
            _ => TransportKind::Udp,
        };
        Some(Self {
            foundation: candidate.foundation(),
            component: candidate.component(),
            transport,
            priority: candidate.priority(),
            address: candidate.address(),
            port: candidate.port(),
            kind,
            related: candidate.related_address().map(|rel| RelatedAddress {
                address: rel.address,
                port: rel.port,
            }),
            ufrag: None,
        })
    }
}

/// Port of the first host-type candidate in `records`, if any has been
/// harvested yet.
pub(crate) fn first_host_port(records: &[CandidateRecord]) -> Option<u16> {
    records
        .iter()
        .find(|record| record.kind == CandidateKind::Host)
        .map(|record| record.port)
}

/// Parse one candidate attribute line.
///
/// `known` holds the candidates already registered on the same session; it
/// is consulted to resolve a `raddr`/`rport` pair into a related address.
/// An unmatched related address is not an error — the candidate parses with
/// `related` absent.
pub fn parse_candidate(
    line: &str,
    known: &[CandidateRecord],
) -> Result<CandidateRecord, ParseError> {
    let mut tokens = line.split_whitespace();

    let foundation = tokens
        .next()
        .ok_or(ParseError::MissingToken("foundation"))?
        .to_string();
    let component = parse_number::<u16>(
        "component-id",
        tokens.next().ok_or(ParseError::MissingToken("component-id"))?,
    )?;
    let transport =
        TransportKind::parse(tokens.next().ok_or(ParseError::MissingToken("transport"))?)?;
    let priority = parse_number::<u32>(
        "priority",
        tokens.next().ok_or(ParseError::MissingToken("priority"))?,
    )?;
    let address = tokens
        .next()
        .ok_or(ParseError::MissingToken("address"))?
        .to_string();
    let port = parse_number::<u16>("port", tokens.next().ok_or(ParseError::MissingToken("port"))?)?;

    let typ = tokens.next().ok_or(ParseError::MissingToken("typ"))?;
    if !typ.eq_ignore_ascii_case("typ") {
        return Err(ParseError::ExpectedTyp(typ.to_string()));
    }
    let kind = CandidateKind::parse(tokens.next().ok_or(ParseError::MissingToken("type"))?)?;

    // Extension pairs: one pass, `ufrag` ends the scan, unknown keys are
    // skipped with their value, a dangling key without a value is ignored.
    let mut related = None;
    let mut ufrag = None;
    while let (Some(key), Some(value)) = (tokens.next(), tokens.next()) {
        match key {
            "ufrag" => {
                ufrag = Some(value.to_string());
                break;
            }
            "raddr" => {
                // `rport <port>` is required to follow its `raddr`
                tokens.next().ok_or(ParseError::MissingToken("rport"))?;
                let rport = parse_number::<u16>(
                    "rport",
                    tokens.next().ok_or(ParseError::MissingToken("rport"))?,
                )?;
                related = known
                    .iter()
                    .find(|c| c.component == component && c.address == value && c.port == rport)
                    .map(|c| RelatedAddress {
                        address: c.address.clone(),
                        port: c.port,
                    });
            }
            _ => {}
        }
    }

    Ok(CandidateRecord {
        foundation,
        component,
        transport,
        priority,
        address,
        port,
        kind,
        related,
        ufrag,
    })
}

fn parse_number<T: std::str::FromStr>(field: &'static str, token: &str) -> Result<T, ParseError> {
    token.parse::<T>().map_err(|_| ParseError::InvalidNumber {
        field,
        value: token.to_string(),
    })
}
