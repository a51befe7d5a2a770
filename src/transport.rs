/***************************************************************************************************
Peer Transport: send to one peer / broadcast to all. Grounded in the teacher's `Network`
abstraction (`handle_broadcast`, with the omission/delay knobs read via `mc_utils::ini::env2var`)
but bound to a real `reqwest`-backed HTTP transport instead of an in-process event queue, since
this crate drives an actual process per node rather than a single-process simulation. The
contract is unchanged: at-most-once delivery, arbitrary delay, silent drop allowed, no
acknowledgment beyond the bare HTTP response, and one slow/unreachable peer must never delay
delivery to the others.
***************************************************************************************************/

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use log::warn;
use reqwest::Client;

use crate::messages::WireMessage;

/// Per-call send timeout. Expiry is treated identically to a silent drop (§5): no retry, the
/// quorum mechanism compensates.
const SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Abstracts over "send to one peer" / "broadcast to all" so the consensus engine's callers
/// never need to know the concrete wire framing.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Sends `msg` to `peer_id`. May silently fail; failures are logged by the implementation
    /// and never propagated as a fatal error to the caller (§7, `TRANSPORT_FAILURE`).
    async fn send(&self, peer_id: &str, msg: WireMessage);

    /// Sends `msg` to every peer in `peer_ids`, concurrently. A slow or unreachable peer must
    /// not delay delivery to the others.
    async fn broadcast(&self, peer_ids: &[String], msg: WireMessage) {
        let sends = peer_ids.iter().map(|peer_id| self.send(peer_id, msg.clone()));
        join_all(sends).await;
    }
}

/// HTTP/JSON binding of `PeerTransport`, addressing peers by a static directory of base URLs
/// (`node_id -> http://host:port`).
#[derive(Debug, Clone)]
pub struct HttpPeerTransport {
    client: Client,
    addresses: HashMap<String, String>,
}

impl HttpPeerTransport {
    /// Builds a transport over the given peer directory. `addresses` maps `node_id` to the base
    /// URL of that peer's RPC server (e.g. `http://127.0.0.1:9002`).
    pub fn new(addresses: HashMap<String, String>) -> HttpPeerTransport {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("reqwest client with a fixed timeout always builds");
        HttpPeerTransport { client, addresses }
    }

    fn route_for(msg: &WireMessage) -> &'static str {
        match msg {
            WireMessage::PrePrepare(_) => "/consensus/pre-prepare",
            WireMessage::Prepare(_) => "/consensus/prepare",
            WireMessage::Commit(_) => "/consensus/commit",
        }
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn send(&self, peer_id: &str, msg: WireMessage) {
        let base = match self.addresses.get(peer_id) {
            Some(base) => base,
            None => {
                warn!(target: "transport", "no known address for peer {}, dropping message", peer_id);
                return;
            }
        };
        let url = format!("{}{}", base, Self::route_for(&msg));
        if let Err(err) = self.client.post(&url).json(&msg).send().await {
            warn!(target: "transport", "send to {} ({}) failed: {}", peer_id, url, err);
        }
    }
}

/// An in-process transport that hands messages directly to other engines. Used by tests and by
/// the multi-node demo harness to exercise the protocol without binding real sockets.
#[derive(Default)]
pub struct RecordingTransport {
    sent: std::sync::Mutex<Vec<(String, WireMessage)>>,
}

impl RecordingTransport {
    /// A transport that records every send instead of delivering it anywhere.
    pub fn new() -> RecordingTransport {
        RecordingTransport::default()
    }

    /// Drains and returns everything sent since the last call.
    pub fn drain(&self) -> Vec<(String, WireMessage)> {
        std::mem::take(&mut *self.sent.lock().expect("transport mutex poisoned"))
    }
}

#[async_trait]
impl PeerTransport for RecordingTransport {
    async fn send(&self, peer_id: &str, msg: WireMessage) {
        self.sent
            .lock()
            .expect("transport mutex poisoned")
            .push((peer_id.to_string(), msg));
    }
}
