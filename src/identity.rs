//! Local DTLS identity and certificate fingerprints
//!
//! Each peer session generates a fresh self-signed certificate; its SHA-256
//! fingerprint is advertised in the answer, and the fingerprint taken from
//! the remote offer is checked against the certificate the peer actually
//! presents during the handshake.

use std::fmt;

use sha2::{Digest, Sha256};
use webrtc::dtls::crypto::Certificate;

use crate::error::{Error, Result};

/// Subject alternative name placed on generated certificates
const CERTIFICATE_SAN: &str = "peerlink-webrtc";

/// A locally generated DTLS certificate plus its fingerprint
pub struct DtlsIdentity {
    certificate: Certificate,
    fingerprint: String,
}

impl DtlsIdentity {
    /// Generate a fresh self-signed identity
    pub fn generate() -> Result<Self> {
        let certificate = Certificate::generate_self_signed(vec![CERTIFICATE_SAN.to_string()])
            .map_err(|e| Error::Identity(e.to_string()))?;
        let der = certificate
            .certificate
            .first()
            .ok_or_else(|| Error::Identity("generated certificate chain is empty".to_string()))?;
        let fingerprint = sha256_fingerprint(der.as_ref());
        Ok(Self {
            certificate,
            fingerprint,
        })
    }

    /// SHA-256 fingerprint of the local certificate, colon-separated hex
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Certificate handed to the DTLS engine for the handshake
    pub(crate) fn certificate(&self) -> Certificate {
        self.certificate.clone()
    }
}

impl fmt::Debug for DtlsIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtlsIdentity")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// SHA-256 fingerprint of a DER-encoded certificate: uppercase hex octets
/// joined by colons (`AA:BB:...`)
pub fn sha256_fingerprint(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    digest
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(":")
}

/// Compare two fingerprints, ignoring hex case
pub fn fingerprints_match(expected: &str, actual: &str) -> bool {
    expected.eq_ignore_ascii_case(actual)
}
