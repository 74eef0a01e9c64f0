//! Offer/answer session-description handling
//!
//! The offer side of the exchange is parsed only for the three attributes
//! this transport consumes: the remote ICE credentials and the remote DTLS
//! certificate fingerprint. The answer is built from scratch and always
//! advertises a single `application` media section carrying a
//! `webrtc-datachannel` over `UDP/DTLS/SCTP`, with this side as DTLS client
//! (`setup:active`) and trickle ICE enabled.

use std::io::Cursor;

use webrtc::sdp::description::common::{Address, Attribute, ConnectionInformation};
use webrtc::sdp::description::media::{MediaDescription, MediaName, RangedPort};
use webrtc::sdp::description::session::{Origin, SessionDescription, TimeDescription, Timing};

use crate::error::{Error, Result};

const ATTR_ICE_UFRAG: &str = "ice-ufrag";
const ATTR_ICE_PWD: &str = "ice-pwd";
const ATTR_FINGERPRINT: &str = "fingerprint";

/// The only fingerprint hash algorithm this transport negotiates
const FINGERPRINT_ALGORITHM: &str = "sha-256";

/// Fixed media identifier used in the answer
const MEDIA_ID: &str = "0";

/// What the remote offer negotiated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDescription {
    /// Remote ICE username fragment
    pub ice_ufrag: String,
    /// Remote ICE password
    pub ice_pwd: String,
    /// Remote certificate SHA-256 fingerprint (digest part only)
    pub fingerprint: String,
}

/// Inputs for answer construction
#[derive(Debug, Clone)]
pub struct AnswerParams<'a> {
    /// Random origin session id
    pub origin_id: u64,
    /// Local ICE username fragment
    pub ice_ufrag: &'a str,
    /// Local ICE password
    pub ice_pwd: &'a str,
    /// Local certificate SHA-256 fingerprint
    pub fingerprint: &'a str,
    /// Advertised SCTP port
    pub sctp_port: u16,
    /// Advertised maximum message size in bytes
    pub max_message_size: u32,
}

/// Parse a remote offer, extracting ICE credentials and the DTLS
/// fingerprint from its media sections.
///
/// # Errors
///
/// Returns [`Error::Sdp`] when the text is not a session description,
/// [`Error::OfferRejected`] when a required attribute is missing or the
/// fingerprint uses an unsupported algorithm.
pub fn parse_offer(offer: &str) -> Result<RemoteDescription> {
    let mut cursor = Cursor::new(offer.as_bytes());
    let description =
        SessionDescription::unmarshal(&mut cursor).map_err(|e| Error::Sdp(e.to_string()))?;

    let mut ice_ufrag = None;
    let mut ice_pwd = None;
    let mut fingerprint = None;

    for media in &description.media_descriptions {
        for attribute in &media.attributes {
            let Some(value) = attribute.value.as_deref() else {
                continue;
            };
            match attribute.key.as_str() {
                ATTR_ICE_UFRAG => ice_ufrag = Some(value.to_string()),
                ATTR_ICE_PWD => ice_pwd = Some(value.to_string()),
                ATTR_FINGERPRINT => {
                    let (algorithm, digest) = value.split_once(' ').ok_or_else(|| {
                        Error::OfferRejected(format!("malformed fingerprint attribute {:?}", value))
                    })?;
                    if !algorithm.eq_ignore_ascii_case(FINGERPRINT_ALGORITHM) {
                        return Err(Error::OfferRejected(format!(
                            "unsupported fingerprint algorithm {:?}",
                            algorithm
                        )));
                    }
                    fingerprint = Some(digest.to_string());
                }
                _ => {}
            }
        }
    }

    Ok(RemoteDescription {
        ice_ufrag: ice_ufrag
            .ok_or_else(|| Error::OfferRejected("offer carries no ice-ufrag".to_string()))?,
        ice_pwd: ice_pwd
            .ok_or_else(|| Error::OfferRejected("offer carries no ice-pwd".to_string()))?,
        fingerprint: fingerprint
            .ok_or_else(|| Error::OfferRejected("offer carries no fingerprint".to_string()))?,
    })
}

/// Build the answer session description
pub fn build_answer(params: &AnswerParams<'_>) -> String {
    let media = MediaDescription {
        media_name: MediaName {
            media: "application".to_string(),
            port: RangedPort {
                value: 9,
                range: None,
            },
            protos: vec!["UDP".to_string(), "DTLS".to_string(), "SCTP".to_string()],
            formats: vec!["webrtc-datachannel".to_string()],
        },
        connection_information: Some(ConnectionInformation {
            network_type: "IN".to_string(),
            address_type: "IP4".to_string(),
            address: Some(Address {
                address: "0.0.0.0".to_string(),
                ttl: None,
                range: None,
            }),
        }),
        attributes: vec![
            value_attr(ATTR_ICE_UFRAG, params.ice_ufrag),
            value_attr(ATTR_ICE_PWD, params.ice_pwd),
            value_attr("ice-options", "trickle"),
            value_attr(
                ATTR_FINGERPRINT,
                &format!("{} {}", FINGERPRINT_ALGORITHM, params.fingerprint),
            ),
            value_attr("setup", "active"),
            value_attr("mid", MEDIA_ID),
            value_attr("sctp-port", &params.sctp_port.to_string()),
            value_attr("max-message-size", &params.max_message_size.to_string()),
        ],
        ..Default::default()
    };

    let answer = SessionDescription {
        version: 0,
        origin: Origin {
            username: "-".to_string(),
            session_id: params.origin_id,
            session_version: 2,
            network_type: "IN".to_string(),
            address_type: "IP4".to_string(),
            unicast_address: "127.0.0.1".to_string(),
        },
        session_name: "-".to_string(),
        time_descriptions: vec![TimeDescription {
            timing: Timing {
                start_time: 0,
                stop_time: 0,
            },
            repeat_times: vec![],
        }],
        attributes: vec![
            value_attr("group", "BUNDLE 0"),
            flag_attr("extmap-allow-mixed"),
            value_attr("msid-semantic", " WMS"),
        ],
        media_descriptions: vec![media],
        ..Default::default()
    };

    answer.marshal()
}

fn value_attr(key: &str, value: &str) -> Attribute {
    Attribute {
        key: key.to_string(),
        value: Some(value.to_string()),
    }
}

fn flag_attr(key: &str) -> Attribute {
    Attribute {
        key: key.to_string(),
        value: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer_fixture() -> String {
        [
            "v=0",
            "o=- 4611731400430051336 2 IN IP4 127.0.0.1",
            "s=-",
            "t=0 0",
            "a=group:BUNDLE 0",
            "m=application 9 UDP/DTLS/SCTP webrtc-datachannel",
            "c=IN IP4 0.0.0.0",
            "a=ice-ufrag:abc",
            "a=ice-pwd:xyz",
            "a=fingerprint:sha-256 AA:BB:CC",
            "a=setup:actpass",
            "a=mid:0",
            "a=sctp-port:5000",
        ]
        .join("\r\n")
            + "\r\n"
    }

    #[test]
    fn test_parse_offer() {
        let remote = parse_offer(&offer_fixture()).unwrap();
        assert_eq!(remote.ice_ufrag, "abc");
        assert_eq!(remote.ice_pwd, "xyz");
        assert_eq!(remote.fingerprint, "AA:BB:CC");
    }

    #[test]
    fn test_parse_offer_missing_credentials() {
        let offer = offer_fixture().replace("a=ice-pwd:xyz\r\n", "");
        let err = parse_offer(&offer).unwrap_err();
        assert!(matches!(err, Error::OfferRejected(_)), "got {err}");
    }

    #[test]
    fn test_parse_offer_missing_fingerprint() {
        let offer = offer_fixture().replace("a=fingerprint:sha-256 AA:BB:CC\r\n", "");
        assert!(matches!(
            parse_offer(&offer),
            Err(Error::OfferRejected(_))
        ));
    }

    #[test]
    fn test_parse_offer_rejects_unknown_fingerprint_algorithm() {
        let offer = offer_fixture().replace("sha-256 AA:BB:CC", "sha-1 AA:BB:CC");
        assert!(matches!(
            parse_offer(&offer),
            Err(Error::OfferRejected(_))
        ));
    }

    #[test]
    fn test_parse_offer_rejects_garbage() {
        assert!(matches!(parse_offer("not an sdp"), Err(Error::Sdp(_))));
    }

    fn answer_fixture() -> String {
        build_answer(&AnswerParams {
            origin_id: 12345,
            ice_ufrag: "localfrag",
            ice_pwd: "localpwd",
            fingerprint: "AA:BB:CC",
            sctp_port: 54321,
            max_message_size: 262_144,
        })
    }

    #[test]
    fn test_answer_media_line() {
        let answer = answer_fixture();
        assert!(answer.contains("m=application 9 UDP/DTLS/SCTP webrtc-datachannel"));
        assert!(answer.contains("c=IN IP4 0.0.0.0"));
        assert!(answer.contains("o=- 12345 2 IN IP4 127.0.0.1"));
    }

    #[test]
    fn test_answer_attributes() {
        let answer = answer_fixture();
        let mut cursor = Cursor::new(answer.as_bytes());
        let parsed = SessionDescription::unmarshal(&mut cursor).unwrap();

        let session_keys: Vec<&str> = parsed
            .attributes
            .iter()
            .map(|a| a.key.as_str())
            .collect();
        assert!(session_keys.contains(&"group"));
        assert!(session_keys.contains(&"extmap-allow-mixed"));
        assert!(session_keys.contains(&"msid-semantic"));

        assert_eq!(parsed.media_descriptions.len(), 1);
        let media = &parsed.media_descriptions[0];
        let attr = |key: &str| -> Option<String> {
            media
                .attributes
                .iter()
                .find(|a| a.key == key)
                .and_then(|a| a.value.clone())
        };
        assert_eq!(attr("ice-ufrag").as_deref(), Some("localfrag"));
        assert_eq!(attr("ice-pwd").as_deref(), Some("localpwd"));
        assert_eq!(attr("ice-options").as_deref(), Some("trickle"));
        assert_eq!(attr("fingerprint").as_deref(), Some("sha-256 AA:BB:CC"));
        assert_eq!(attr("setup").as_deref(), Some("active"));
        assert_eq!(attr("mid").as_deref(), Some("0"));
        assert_eq!(attr("sctp-port").as_deref(), Some("54321"));
        assert_eq!(attr("max-message-size").as_deref(), Some("262144"));
    }

    #[test]
    fn test_answer_round_trips_through_parse_offer() {
        // the answer itself satisfies the attribute subset parse_offer reads
        let remote = parse_offer(&answer_fixture()).unwrap();
        assert_eq!(remote.ice_ufrag, "localfrag");
        assert_eq!(remote.fingerprint, "AA:BB:CC");
    }
}
