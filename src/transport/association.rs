//! SCTP association management
//!
//! Starts the message association over the secured transport and pumps
//! inbound streams to the application listener. The association ending —
//! remote close, transport failure, or local teardown — is observed as the
//! stream acceptor draining, which the owning session turns into its close
//! chain.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, warn};
use webrtc::sctp::association::{Association, Config as AssociationConfig};
use webrtc::sctp::stream::Stream;
use webrtc::util::Conn;

use crate::error::{Error, Result};

/// Application-facing listener for association lifecycle and inbound
/// messages.
///
/// Message framing and ordering are whatever the SCTP engine provides;
/// this layer only carries payloads through.
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// The association is live and messages may flow
    async fn on_established(&self, session_id: &str);

    /// One inbound message on `stream_id`
    async fn on_message(&self, session_id: &str, stream_id: u16, payload: Bytes);
}

/// Start a client-role association over the secured transport
pub(crate) async fn start_association(
    conn: Arc<dyn Conn + Send + Sync>,
    session_id: &str,
    max_message_size: u32,
) -> Result<Arc<Association>> {
    let association = Association::client(AssociationConfig {
        net_conn: conn,
        max_receive_buffer_size: 0,
        max_message_size,
        name: format!("peerlink-{}", session_id),
        local_port: 5000,
        remote_port: 5000,
    })
    .await
    .map_err(|e| Error::Association(e.to_string()))?;

    Ok(Arc::new(association))
}

/// Accept inbound streams until the association ends or the session shuts
/// down. Returns when the association is finished; the caller chains
/// teardown after it.
pub(crate) async fn pump_streams(
    association: Arc<Association>,
    session_id: String,
    listener: Arc<dyn MessageListener>,
    mut shutdown: watch::Receiver<bool>,
    max_message_size: usize,
) {
    loop {
        let stream = tokio::select! {
            stream = association.accept_stream() => stream,
            _ = shutdown.changed() => {
                debug!(session_id = %session_id, "stream pump stopped by session shutdown");
                return;
            }
        };

        match stream {
            Some(stream) => {
                debug!(
                    session_id = %session_id,
                    stream_id = stream.stream_identifier(),
                    "inbound stream accepted"
                );
                tokio::spawn(read_stream(
                    stream,
                    session_id.clone(),
                    Arc::clone(&listener),
                    max_message_size,
                ));
            }
            None => {
                debug!(session_id = %session_id, "association closed");
                return;
            }
        }
    }
}

async fn read_stream(
    stream: Arc<Stream>,
    session_id: String,
    listener: Arc<dyn MessageListener>,
    max_message_size: usize,
) {
    let stream_id = stream.stream_identifier();
    let mut buf = vec![0u8; max_message_size];
    loop {
        match stream.read_sctp(&mut buf).await {
            Ok((0, _)) => break,
            Ok((n, _)) => {
                listener
                    .on_message(&session_id, stream_id, Bytes::copy_from_slice(&buf[..n]))
                    .await;
            }
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    stream_id,
                    error = %e,
                    "stream read ended"
                );
                break;
            }
        }
    }
    debug!(session_id = %session_id, stream_id, "stream reader finished");
}
