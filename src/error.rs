//! Error types for the peer transport

use crate::candidate::ParseError;

/// Result type alias using the transport Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or running a peer session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The remote offer could not be accepted (malformed, or missing a
    /// required attribute)
    #[error("Offer rejected: {0}")]
    OfferRejected(String),

    /// Session description parse/marshal error
    #[error("SDP error: {0}")]
    Sdp(String),

    /// DTLS identity generation error
    #[error("Identity error: {0}")]
    Identity(String),

    /// A trickled candidate line did not match the candidate grammar
    #[error(transparent)]
    CandidateParse(#[from] ParseError),

    /// Session not found in the registry
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Registry session limit reached
    #[error("Session limit reached ({0})")]
    SessionLimit(u32),

    /// ICE agent or connectivity error
    #[error("ICE error: {0}")]
    Ice(String),

    /// DTLS handshake error
    #[error("DTLS handshake error: {0}")]
    Handshake(String),

    /// The peer presented a certificate that does not match the fingerprint
    /// negotiated during offer/answer
    #[error("Certificate fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch {
        /// Fingerprint taken from the remote offer
        expected: String,
        /// Fingerprint of the certificate actually presented
        actual: String,
    },

    /// SCTP association error
    #[error("Association error: {0}")]
    Association(String),

    /// Signaling channel error
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is fatal to the session it occurred on.
    ///
    /// Candidate parse failures drop the offending line and leave the
    /// session running; everything else tears the session down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::CandidateParse(_) | Error::SessionNotFound(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error occurred during offer/answer negotiation
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::OfferRejected(_) | Error::Sdp(_) | Error::Identity(_)
        )
    }
}
