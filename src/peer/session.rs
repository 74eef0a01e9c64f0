//! Peer session orchestration
//!
//! One `PeerSession` per remote peer negotiation. The session owns exactly
//! one ICE agent, at most one secured transport, and at most one
//! association. Lifecycle: created on offer receipt, mutated by trickled
//! candidates, torn down exactly once — on association close, handshake
//! failure, or fatal ICE state.
//!
//! Ordering is enforced by construction: the DTLS handshake runs only after
//! the agent's dial resolves (ICE completed), the association starts only
//! after handshake success, and both happen on the session's own connect
//! task rather than on an engine callback thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use webrtc::dtls::conn::DTLSConn;
use webrtc::ice::agent::agent_config::AgentConfig;
use webrtc::ice::agent::Agent;
use webrtc::ice::candidate::candidate_base::unmarshal_candidate;
use webrtc::ice::candidate::{Candidate, CandidateType};
use webrtc::ice::network_type::NetworkType;
use webrtc::ice::state::ConnectionState;
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice::url::Url;
use webrtc::sctp::association::Association;
use webrtc::sctp::chunk::chunk_payload_data::PayloadProtocolIdentifier;
use webrtc::sctp::stream::Stream;
use webrtc::util::Conn;

use crate::candidate::{self, CandidateRecord, DEFAULT_COMPONENT_ID};
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::identity::DtlsIdentity;
use crate::negotiation::{self, AnswerParams};
use crate::peer::registry::SessionEvents;
use crate::peer::trickle::TrickleDebouncer;
use crate::signaling::{self, Envelope, SignalingPayload, SignalingSender};
use crate::transport::association::{self, MessageListener};
use crate::transport::secure::{self, IceDatagramConn};

/// Observable session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Answer sent, waiting for the remote side to trickle candidates
    AwaitingCandidates,
    /// Connectivity checks, handshake, or association bootstrap in flight
    Connecting,
    /// Association established, messages flowing
    Connected,
    /// Torn down (gracefully or after a fatal error)
    Closed,
}

/// One negotiated peer session
pub struct PeerSession {
    session_id: String,
    remote_peer: u64,
    /// Instance id for log correlation, distinct from the caller's session id
    connection_id: String,
    config: Arc<TransportConfig>,
    signaling: Arc<dyn SignalingSender>,
    listener: Arc<dyn MessageListener>,
    events: Arc<dyn SessionEvents>,

    agent: Arc<Agent>,
    local_ufrag: String,
    remote_ufrag: String,
    remote_pwd: String,
    identity: DtlsIdentity,
    remote_fingerprint: String,

    local_candidates: Vec<CandidateRecord>,
    remote_candidates: StdMutex<Vec<CandidateRecord>>,
    debouncer: Arc<TrickleDebouncer>,

    connect_started: AtomicBool,
    state: RwLock<SessionState>,
    secured: Mutex<Option<Arc<DTLSConn>>>,
    association: Mutex<Option<Arc<Association>>>,
    streams: Mutex<HashMap<u16, Arc<Stream>>>,
    dial_cancel: Mutex<Option<mpsc::Sender<()>>>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl PeerSession {
    /// Accept a remote offer: create the ICE session, harvest local
    /// candidates, and send the answer followed by one trickled-candidate
    /// message per harvested candidate.
    ///
    /// Any failure here is unrecoverable for the session: nothing is sent
    /// and the error propagates to the caller.
    #[instrument(skip_all, fields(session_id = %session_id, peer = remote_peer))]
    pub(crate) async fn negotiate(
        remote_peer: u64,
        session_id: String,
        offer_sdp: &str,
        origin_id: u64,
        config: Arc<TransportConfig>,
        signaling: Arc<dyn SignalingSender>,
        listener: Arc<dyn MessageListener>,
        events: Arc<dyn SessionEvents>,
    ) -> Result<Arc<Self>> {
        let remote = negotiation::parse_offer(offer_sdp)?;
        let identity = DtlsIdentity::generate()?;

        let agent = Arc::new(
            Agent::new(ice_agent_config(&config)?)
                .await
                .map_err(|e| Error::Ice(e.to_string()))?,
        );

        let local_candidates = match harvest_local_candidates(&agent).await {
            Ok(candidates) => candidates,
            Err(e) => {
                let _ = agent.close().await;
                return Err(e);
            }
        };
        let (local_ufrag, local_pwd) = agent.get_local_user_credentials().await;

        let sctp_port =
            candidate::first_host_port(&local_candidates).unwrap_or(config.sctp_port_fallback);
        let answer = negotiation::build_answer(&AnswerParams {
            origin_id,
            ice_ufrag: &local_ufrag,
            ice_pwd: &local_pwd,
            fingerprint: identity.fingerprint(),
            sctp_port,
            max_message_size: config.max_message_size,
        });

        let quiet = config.trickle_quiet();
        let (shutdown, _) = watch::channel(false);
        let session = Arc::new(Self {
            session_id,
            remote_peer,
            connection_id: Uuid::new_v4().to_string(),
            config,
            signaling,
            listener,
            events,
            agent,
            local_ufrag,
            remote_ufrag: remote.ice_ufrag,
            remote_pwd: remote.ice_pwd,
            identity,
            remote_fingerprint: remote.fingerprint,
            local_candidates,
            remote_candidates: StdMutex::new(Vec::new()),
            debouncer: Arc::new(TrickleDebouncer::new(quiet)),
            connect_started: AtomicBool::new(false),
            state: RwLock::new(SessionState::AwaitingCandidates),
            secured: Mutex::new(None),
            association: Mutex::new(None),
            streams: Mutex::new(HashMap::new()),
            dial_cancel: Mutex::new(None),
            shutdown,
            closed: AtomicBool::new(false),
        });

        session.watch_ice_failure();

        if let Err(e) = session.announce(answer).await {
            let _ = session.agent.close().await;
            return Err(e);
        }

        info!(
            connection_id = %session.connection_id,
            candidates = session.local_candidates.len(),
            "answer sent, awaiting remote candidates"
        );
        Ok(session)
    }

    /// Session identifier this session was keyed with
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Remote peer identity the offer came from
    pub fn remote_peer(&self) -> u64 {
        self.remote_peer
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Candidates harvested for the answer
    pub fn local_candidates(&self) -> &[CandidateRecord] {
        &self.local_candidates
    }

    /// Remote candidates accepted so far
    pub fn remote_candidates(&self) -> Vec<CandidateRecord> {
        self.remote_candidates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Ingest one trickled candidate line.
    ///
    /// Returns immediately; a malformed line is logged and dropped without
    /// affecting the session, and the first accepted candidate arms the
    /// quiescence watcher that later starts connectivity checks.
    pub fn add_candidate(self: &Arc<Self>, line: &str) {
        if self.closed.load(Ordering::SeqCst) {
            debug!(session_id = %self.session_id, "candidate after teardown ignored");
            return;
        }

        let record = {
            let known = self
                .remote_candidates
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match candidate::parse_candidate(line, &known) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        session_id = %self.session_id,
                        error = %e,
                        "dropping malformed remote candidate"
                    );
                    return;
                }
            }
        };

        // single-component session; see DESIGN.md on the silent drop
        if record.component != DEFAULT_COMPONENT_ID {
            debug!(
                session_id = %self.session_id,
                component = record.component,
                "dropping candidate for unknown component"
            );
            return;
        }

        match unmarshal_candidate(line) {
            Ok(parsed) => {
                let engine_candidate: Arc<dyn Candidate + Send + Sync> = Arc::new(parsed);
                if let Err(e) = self.agent.add_remote_candidate(&engine_candidate) {
                    warn!(
                        session_id = %self.session_id,
                        error = %e,
                        "agent rejected remote candidate"
                    );
                    return;
                }
            }
            Err(e) => {
                warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "agent could not parse remote candidate"
                );
                return;
            }
        }

        debug!(
            session_id = %self.session_id,
            address = %record.address,
            port = record.port,
            kind = %record.kind,
            "remote candidate registered"
        );
        self.remote_candidates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);

        self.debouncer.record_arrival();
        let session = Arc::clone(self);
        self.debouncer.arm(self.shutdown.subscribe(), move || {
            session.start_connectivity();
        });
    }

    /// Send one application message on `stream_id`, opening the stream on
    /// first use. Fails unless the session is connected.
    pub async fn send(&self, stream_id: u16, payload: Bytes) -> Result<usize> {
        let association = self
            .association
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Association("no active association".to_string()))?;

        let stream = {
            let mut streams = self.streams.lock().await;
            if let Some(stream) = streams.get(&stream_id) {
                Arc::clone(stream)
            } else {
                let stream = association
                    .open_stream(stream_id, PayloadProtocolIdentifier::Binary)
                    .await
                    .map_err(|e| Error::Association(e.to_string()))?;
                streams.insert(stream_id, Arc::clone(&stream));
                stream
            }
        };

        stream
            .write_sctp(&payload, PayloadProtocolIdentifier::Binary)
            .await
            .map_err(|e| Error::Association(e.to_string()))
    }

    /// Release every owned resource and notify the owner, in strict order:
    /// association, secured transport, ICE session, then the disconnect
    /// notification. Every step runs even if an earlier one fails; repeat
    /// invocations are no-ops.
    pub async fn teardown(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            session_id = %self.session_id,
            connection_id = %self.connection_id,
            reason,
            "tearing down peer session"
        );
        *self.state.write().await = SessionState::Closed;

        // stop the trickle watcher and any dial in flight
        let _ = self.shutdown.send(true);
        if let Some(cancel) = self.dial_cancel.lock().await.take() {
            let _ = cancel.try_send(());
        }

        self.streams.lock().await.clear();
        if let Some(association) = self.association.lock().await.take() {
            if let Err(e) = association.close().await {
                warn!(session_id = %self.session_id, error = %e, "association close failed");
            }
        }
        if let Some(secured) = self.secured.lock().await.take() {
            if let Err(e) = secured.close().await {
                warn!(session_id = %self.session_id, error = %e, "secured transport close failed");
            }
        }
        if let Err(e) = self.agent.close().await {
            warn!(session_id = %self.session_id, error = %e, "ice agent close failed");
        }

        self.events.on_disconnect(&self.session_id).await;
    }

    /// Answer first, then the already-harvested candidates — the remote
    /// side must see the answer before any trickled candidate.
    async fn announce(&self, answer: String) -> Result<()> {
        let response = SignalingPayload::ConnectResponse {
            session_id: self.session_id.clone(),
            sdp: answer,
        };
        self.signaling
            .send(Envelope::rtc(self.remote_peer, response.render()))
            .await?;

        for (network_id, record) in self.local_candidates.iter().enumerate() {
            let payload = SignalingPayload::CandidateAdd {
                session_id: self.session_id.clone(),
                candidate: signaling::trickled_candidate(
                    &record.marshal(),
                    &self.local_ufrag,
                    network_id as u64,
                ),
            };
            self.signaling
                .send(Envelope::rtc(self.remote_peer, payload.render()))
                .await?;
        }
        Ok(())
    }

    /// Tear the session down if the agent reaches a terminal failure state.
    /// Completion is not consumed here — the connect task observes it as
    /// its dial resolving.
    fn watch_ice_failure(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.agent
            .on_connection_state_change(Box::new(move |state: ConnectionState| {
                let weak = weak.clone();
                Box::pin(async move {
                    if state == ConnectionState::Failed {
                        if let Some(session) = weak.upgrade() {
                            warn!(session_id = %session.session_id, "ice reported failure");
                            session.teardown("ice failed").await;
                        }
                    }
                })
            }));
    }

    /// Begin connectivity establishment exactly once
    fn start_connectivity(self: Arc<Self>) {
        if self.connect_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(async move {
            self.run_connectivity().await;
        });
    }

    /// The session's dedicated connect task: dial until ICE completes, then
    /// handshake, then bootstrap the association. Blocking work stays on
    /// this task so the engines' own threads are never stalled.
    async fn run_connectivity(self: Arc<Self>) {
        *self.state.write().await = SessionState::Connecting;
        info!(session_id = %self.session_id, "starting connectivity establishment");

        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        *self.dial_cancel.lock().await = Some(cancel_tx);

        let ice_conn = match self
            .agent
            .dial(cancel_rx, self.remote_ufrag.clone(), self.remote_pwd.clone())
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "ice connectivity failed");
                self.teardown("ice connectivity failed").await;
                return;
            }
        };
        debug!(session_id = %self.session_id, "ice completed, starting dtls handshake");

        let transport: Arc<dyn Conn + Send + Sync> = Arc::new(IceDatagramConn::new(ice_conn));
        let secured = match secure::establish_secure_transport(
            transport,
            &self.identity,
            &self.remote_fingerprint,
        )
        .await
        {
            Ok(secured) => secured,
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "dtls handshake failed");
                self.teardown("dtls handshake failed").await;
                return;
            }
        };
        *self.secured.lock().await = Some(Arc::clone(&secured));

        let association = match association::start_association(
            secured as Arc<dyn Conn + Send + Sync>,
            &self.session_id,
            self.config.max_message_size,
        )
        .await
        {
            Ok(association) => association,
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "association bootstrap failed");
                self.teardown("association bootstrap failed").await;
                return;
            }
        };
        *self.association.lock().await = Some(Arc::clone(&association));

        *self.state.write().await = SessionState::Connected;
        info!(session_id = %self.session_id, "peer session established");
        self.listener.on_established(&self.session_id).await;

        let session = Arc::clone(&self);
        tokio::spawn(async move {
            association::pump_streams(
                association,
                session.session_id.clone(),
                Arc::clone(&session.listener),
                session.shutdown.subscribe(),
                session.config.max_message_size as usize,
            )
            .await;
            session.teardown("association closed").await;
        });
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("session_id", &self.session_id)
            .field("remote_peer", &self.remote_peer)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

/// Map the transport configuration onto the ICE agent
fn ice_agent_config(config: &TransportConfig) -> Result<AgentConfig> {
    let mut urls = Vec::new();
    for raw in &config.stun_servers {
        let url = Url::parse_url(raw)
            .map_err(|e| Error::InvalidConfig(format!("bad ICE server url {:?}: {}", raw, e)))?;
        urls.push(url);
    }

    let udp_network = match &config.udp_port_range {
        Some(range) => UDPNetwork::Ephemeral(
            EphemeralUDP::new(range.min, range.max)
                .map_err(|e| Error::InvalidConfig(e.to_string()))?,
        ),
        None => UDPNetwork::default(),
    };

    let candidate_types = if urls.is_empty() {
        vec![CandidateType::Host]
    } else {
        vec![CandidateType::Host, CandidateType::ServerReflexive]
    };

    let mut agent_config = AgentConfig {
        urls,
        udp_network,
        network_types: vec![NetworkType::Udp4],
        candidate_types,
        include_loopback: config.include_loopback,
        ..AgentConfig::default()
    };
    if let Some(secs) = config.ice_disconnected_timeout_secs {
        agent_config.disconnected_timeout = Some(Duration::from_secs(secs));
    }
    if let Some(secs) = config.ice_failed_timeout_secs {
        agent_config.failed_timeout = Some(Duration::from_secs(secs));
    }
    if let Some(secs) = config.ice_keepalive_interval_secs {
        agent_config.keepalive_interval = Some(Duration::from_secs(secs));
    }
    Ok(agent_config)
}

/// Run candidate harvesting to completion and return the records in
/// gathering order
async fn harvest_local_candidates(agent: &Arc<Agent>) -> Result<Vec<CandidateRecord>> {
    let (gather_tx, mut gather_rx) = mpsc::unbounded_channel();
    agent.on_candidate(Box::new(
        move |candidate: Option<Arc<dyn Candidate + Send + Sync>>| {
            let _ = gather_tx.send(candidate);
            Box::pin(async {})
        },
    ));
    agent
        .gather_candidates()
        .map_err(|e| Error::Ice(e.to_string()))?;

    let mut records = Vec::new();
    while let Some(event) = gather_rx.recv().await {
        match event {
            Some(harvested) => match CandidateRecord::from_engine(harvested.as_ref()) {
                Some(record) => {
                    debug!(address = %record.address, port = record.port, "local candidate harvested");
                    records.push(record);
                }
                None => warn!("skipping harvested candidate of unspecified type"),
            },
            // gathering complete
            None => break,
        }
    }
    agent.on_candidate(Box::new(
        |_: Option<Arc<dyn Candidate + Send + Sync>>| Box::pin(async {}),
    ));

    Ok(records)
}
