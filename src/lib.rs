//! WebRTC data-channel peer transport
//!
//! This crate negotiates secure, message-oriented transport sessions with
//! remote peers. It consumes session-description offers delivered by an
//! external signaling channel, trickles ICE candidates both ways, secures
//! the selected path with a client-role DTLS handshake, and runs an SCTP
//! association over it for application messages. The ICE, DTLS, SCTP and
//! SDP protocol engines come from the `webrtc` crate family; this crate is
//! the orchestration layer that sequences them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Signaling collaborator (websocket, queue, ...)          │
//! │  ↓ offers / candidates        ↑ answers / candidates     │
//! │  SessionRegistry                                         │
//! │  └─ PeerSession (one per remote peer)                    │
//! │     ├─ offer/answer negotiation (SDP)                    │
//! │     ├─ ICE agent + trickle debounce                      │
//! │     ├─ DTLS client handshake (fingerprint-pinned)        │
//! │     └─ SCTP association → MessageListener                │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use peerlink_webrtc::{
//!     Envelope, MessageListener, SessionEvents, SessionRegistry, SignalingSender,
//!     TransportConfig,
//! };
//!
//! # struct MySender;
//! # #[async_trait::async_trait]
//! # impl SignalingSender for MySender {
//! #     async fn send(&self, _envelope: Envelope) -> peerlink_webrtc::Result<()> { Ok(()) }
//! # }
//! # struct MyListener;
//! # #[async_trait::async_trait]
//! # impl MessageListener for MyListener {
//! #     async fn on_established(&self, _session_id: &str) {}
//! #     async fn on_message(&self, _s: &str, _id: u16, _payload: bytes::Bytes) {}
//! # }
//! # struct MyEvents;
//! # #[async_trait::async_trait]
//! # impl SessionEvents for MyEvents {
//! #     async fn on_disconnect(&self, _session_id: &str) {}
//! # }
//! # async fn example() -> peerlink_webrtc::Result<()> {
//! let registry = SessionRegistry::new(
//!     TransportConfig::default(),
//!     Arc::new(MySender),
//!     Arc::new(MyListener),
//!     Arc::new(MyEvents),
//! )?;
//!
//! // signaling delivers an offer...
//! registry.receive_offer(42, "sess-1", "v=0\r\n...").await?;
//! // ...and later trickles candidates
//! registry
//!     .add_candidate("sess-1", "1 1 udp 2130706431 10.0.0.5 54321 typ host")
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod candidate;
pub mod config;
pub mod error;
pub mod identity;
pub mod negotiation;
pub mod signaling;

mod peer;
mod transport;

// Re-exports for the public API
pub use candidate::{
    parse_candidate, CandidateKind, CandidateRecord, ParseError, RelatedAddress, TransportKind,
};
pub use config::{PortRange, TransportConfig};
pub use error::{Error, Result};
pub use negotiation::RemoteDescription;
pub use peer::{PeerSession, SessionEvents, SessionRegistry, SessionState};
pub use signaling::{Envelope, SignalingPayload, SignalingSender};
pub use transport::association::MessageListener;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
