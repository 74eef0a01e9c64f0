//! Session registry
//!
//! Owns every active peer session, keyed by the caller-supplied session id.
//! Inbound signaling routes through here; session teardown removes the
//! entry and then notifies the application, so observers always see a
//! fully-released session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::peer::session::PeerSession;
use crate::signaling::{SignalingPayload, SignalingSender};
use crate::transport::association::MessageListener;

/// Observer for session lifecycle events
#[async_trait]
pub trait SessionEvents: Send + Sync {
    /// The session released all its resources and left the registry
    async fn on_disconnect(&self, session_id: &str);
}

type SessionMap = Arc<RwLock<HashMap<String, Arc<PeerSession>>>>;

/// Registry of active peer sessions
pub struct SessionRegistry {
    config: Arc<TransportConfig>,
    signaling: Arc<dyn SignalingSender>,
    listener: Arc<dyn MessageListener>,
    events: Arc<dyn SessionEvents>,
    sessions: SessionMap,
    /// Randomness for SDP origin ids, injected so tests can seed it
    origin_rng: StdMutex<StdRng>,
}

impl SessionRegistry {
    /// Create a registry with entropy-seeded origin ids
    pub fn new(
        config: TransportConfig,
        signaling: Arc<dyn SignalingSender>,
        listener: Arc<dyn MessageListener>,
        events: Arc<dyn SessionEvents>,
    ) -> Result<Self> {
        Self::with_rng(config, signaling, listener, events, StdRng::from_entropy())
    }

    /// Create a registry with a deterministic origin-id seed
    pub fn with_seed(
        config: TransportConfig,
        signaling: Arc<dyn SignalingSender>,
        listener: Arc<dyn MessageListener>,
        events: Arc<dyn SessionEvents>,
        seed: u64,
    ) -> Result<Self> {
        Self::with_rng(
            config,
            signaling,
            listener,
            events,
            StdRng::seed_from_u64(seed),
        )
    }

    fn with_rng(
        config: TransportConfig,
        signaling: Arc<dyn SignalingSender>,
        listener: Arc<dyn MessageListener>,
        events: Arc<dyn SessionEvents>,
        rng: StdRng,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            signaling,
            listener,
            events,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            origin_rng: StdMutex::new(rng),
        })
    }

    /// Route one inbound signaling payload to the right operation
    pub async fn dispatch(&self, from_peer: u64, payload: &str) -> Result<()> {
        match SignalingPayload::parse(payload)? {
            SignalingPayload::ConnectRequest { session_id, sdp } => {
                self.receive_offer(from_peer, &session_id, &sdp).await
            }
            SignalingPayload::CandidateAdd {
                session_id,
                candidate,
            } => self.add_candidate(&session_id, &candidate).await,
            SignalingPayload::ConnectResponse { session_id, .. } => Err(Error::Signaling(format!(
                "unexpected CONNECTRESPONSE for session {}",
                session_id
            ))),
        }
    }

    /// Accept an offer and start a session for it.
    ///
    /// A fresh offer for a session id that is still live supersedes the old
    /// session: it is torn down before the replacement is negotiated.
    pub async fn receive_offer(
        &self,
        from_peer: u64,
        session_id: &str,
        offer_sdp: &str,
    ) -> Result<()> {
        {
            let sessions = self.sessions.read().await;
            if !sessions.contains_key(session_id)
                && sessions.len() >= self.config.max_sessions as usize
            {
                return Err(Error::SessionLimit(self.config.max_sessions));
            }
        }

        let prior = self.sessions.write().await.remove(session_id);
        if let Some(prior) = prior {
            warn!(session_id, "live session superseded by new offer");
            prior.teardown("superseded by new offer").await;
        }

        let origin_id = {
            let mut rng = self
                .origin_rng
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            rng.gen::<u64>() >> 1
        };

        let hook = Arc::new(RegistryHook {
            sessions: Arc::downgrade(&self.sessions),
            events: Arc::clone(&self.events),
        });
        let session = PeerSession::negotiate(
            from_peer,
            session_id.to_string(),
            offer_sdp,
            origin_id,
            Arc::clone(&self.config),
            Arc::clone(&self.signaling),
            Arc::clone(&self.listener),
            hook,
        )
        .await?;

        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), session);
        Ok(())
    }

    /// Route one trickled candidate line to its session
    pub async fn add_candidate(&self, session_id: &str, line: &str) -> Result<()> {
        let session = self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        session.add_candidate(line);
        Ok(())
    }

    /// Look up a live session
    pub async fn get(&self, session_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Tear one session down and remove it
    pub async fn remove(&self, session_id: &str) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        session.teardown("removed by owner").await;
        Ok(())
    }

    /// Tear every session down (shutdown path)
    pub async fn close(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        info!(count = sessions.len(), "closing session registry");
        for (_, session) in sessions {
            session.teardown("registry closed").await;
        }
    }
}

/// Removes the session from the registry before forwarding the disconnect,
/// so the application observes a released session
struct RegistryHook {
    sessions: Weak<RwLock<HashMap<String, Arc<PeerSession>>>>,
    events: Arc<dyn SessionEvents>,
}

#[async_trait]
impl SessionEvents for RegistryHook {
    async fn on_disconnect(&self, session_id: &str) {
        if let Some(sessions) = self.sessions.upgrade() {
            sessions.write().await.remove(session_id);
        }
        self.events.on_disconnect(session_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::Envelope;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CapturingSender {
        sent: StdMutex<Vec<Envelope>>,
    }

    impl CapturingSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
            })
        }

        fn envelopes(&self) -> Vec<Envelope> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SignalingSender for CapturingSender {
        async fn send(&self, envelope: Envelope) -> Result<()> {
            self.sent.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    struct NullListener;

    #[async_trait]
    impl MessageListener for NullListener {
        async fn on_established(&self, _session_id: &str) {}
        async fn on_message(&self, _session_id: &str, _stream_id: u16, _payload: Bytes) {}
    }

    struct CountingEvents {
        disconnects: AtomicUsize,
    }

    impl CountingEvents {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                disconnects: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SessionEvents for CountingEvents {
        async fn on_disconnect(&self, _session_id: &str) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

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
            "a=ice-pwd:remotepassword1234567890",
            "a=fingerprint:sha-256 AA:BB:CC:DD:EE:FF:00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD:EE:FF:00:11:22:33:44:55:66:77:88:99",
            "a=setup:actpass",
            "a=mid:0",
            "a=sctp-port:5000",
        ]
        .join("\r\n")
            + "\r\n"
    }

    fn registry(
        sender: Arc<CapturingSender>,
        events: Arc<CountingEvents>,
        max_sessions: u32,
    ) -> SessionRegistry {
        let config = TransportConfig {
            max_sessions,
            include_loopback: true,
            ..Default::default()
        };
        SessionRegistry::with_seed(config, sender, Arc::new(NullListener), events, 7).unwrap()
    }

    #[tokio::test]
    async fn test_offer_produces_answer_then_candidates() {
        let sender = CapturingSender::new();
        let events = CountingEvents::new();
        let registry = registry(Arc::clone(&sender), Arc::clone(&events), 4);

        registry
            .receive_offer(42, "sess-1", &offer_fixture())
            .await
            .unwrap();
        assert_eq!(registry.session_count().await, 1);

        let session = registry.get("sess-1").await.unwrap();
        let envelopes = sender.envelopes();
        assert_eq!(envelopes.len(), 1 + session.local_candidates().len());

        // answer first, candidates after, all addressed to the offerer
        assert!(envelopes[0].payload.starts_with("CONNECTRESPONSE sess-1 "));
        assert!(envelopes[0].payload.contains("m=application 9 UDP/DTLS/SCTP webrtc-datachannel"));
        for envelope in &envelopes[1..] {
            assert!(envelope.payload.starts_with("CANDIDATEADD sess-1 "));
            assert!(envelope.payload.ends_with("network-cost 0"));
        }
        assert!(envelopes.iter().all(|e| e.to == 42 && e.kind == 1));

        registry.close().await;
    }

    #[tokio::test]
    async fn test_malformed_offer_sends_nothing() {
        let sender = CapturingSender::new();
        let events = CountingEvents::new();
        let registry = registry(Arc::clone(&sender), events, 4);

        let offer = offer_fixture().replace("a=ice-pwd:remotepassword1234567890\r\n", "");
        let err = registry.receive_offer(42, "sess-1", &offer).await.unwrap_err();
        assert!(err.is_negotiation_error());
        assert_eq!(registry.session_count().await, 0);
        assert!(sender.envelopes().is_empty());
    }

    #[tokio::test]
    async fn test_candidate_routing_and_isolation() {
        let sender = CapturingSender::new();
        let events = CountingEvents::new();
        let registry = registry(sender, events, 4);

        registry
            .receive_offer(1, "sess-1", &offer_fixture())
            .await
            .unwrap();
        registry
            .receive_offer(2, "sess-2", &offer_fixture())
            .await
            .unwrap();

        registry
            .add_candidate("sess-1", "1 1 udp 2130706431 10.0.0.5 54321 typ host")
            .await
            .unwrap();
        // malformed line is dropped without failing the call
        registry
            .add_candidate("sess-1", "1 1 udp nope 10.0.0.5 54321 typ host")
            .await
            .unwrap();

        let one = registry.get("sess-1").await.unwrap();
        let two = registry.get("sess-2").await.unwrap();
        assert_eq!(one.remote_candidates().len(), 1);
        assert!(two.remote_candidates().is_empty());

        assert!(matches!(
            registry.add_candidate("sess-3", "x").await,
            Err(Error::SessionNotFound(_))
        ));

        registry.close().await;
    }

    #[tokio::test]
    async fn test_session_limit() {
        let sender = CapturingSender::new();
        let events = CountingEvents::new();
        let registry = registry(sender, events, 1);

        registry
            .receive_offer(1, "sess-1", &offer_fixture())
            .await
            .unwrap();
        assert!(matches!(
            registry.receive_offer(2, "sess-2", &offer_fixture()).await,
            Err(Error::SessionLimit(1))
        ));

        registry.close().await;
    }

    #[tokio::test]
    async fn test_teardown_notifies_owner_exactly_once() {
        let sender = CapturingSender::new();
        let events = CountingEvents::new();
        let registry = registry(sender, Arc::clone(&events), 4);

        registry
            .receive_offer(1, "sess-1", &offer_fixture())
            .await
            .unwrap();
        let session = registry.get("sess-1").await.unwrap();

        registry.remove("sess-1").await.unwrap();
        assert_eq!(registry.session_count().await, 0);
        assert_eq!(events.disconnects.load(Ordering::SeqCst), 1);

        // duplicate close events are tolerated as no-ops
        session.teardown("duplicate close").await;
        session.teardown("duplicate close").await;
        assert_eq!(events.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_offer_supersedes_live_session() {
        let sender = CapturingSender::new();
        let events = CountingEvents::new();
        let registry = registry(sender, Arc::clone(&events), 4);

        registry
            .receive_offer(1, "sess-1", &offer_fixture())
            .await
            .unwrap();
        let first = registry.get("sess-1").await.unwrap();

        registry
            .receive_offer(1, "sess-1", &offer_fixture())
            .await
            .unwrap();
        assert_eq!(registry.session_count().await, 1);
        assert_eq!(events.disconnects.load(Ordering::SeqCst), 1);

        let second = registry.get("sess-1").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        registry.close().await;
    }

    #[tokio::test]
    async fn test_dispatch_routes_payloads() {
        let sender = CapturingSender::new();
        let events = CountingEvents::new();
        let registry = registry(sender, events, 4);

        let offer_payload = format!("CONNECTREQUEST sess-1 {}", offer_fixture());
        registry.dispatch(9, &offer_payload).await.unwrap();
        assert_eq!(registry.session_count().await, 1);

        registry
            .dispatch(9, "CANDIDATEADD sess-1 1 1 udp 2130706431 10.0.0.5 54321 typ host")
            .await
            .unwrap();
        assert_eq!(
            registry.get("sess-1").await.unwrap().remote_candidates().len(),
            1
        );

        assert!(registry
            .dispatch(9, "CONNECTRESPONSE sess-1 v=0")
            .await
            .is_err());

        registry.close().await;
    }
}
