use std::collections::HashMap;
use std::sync::Arc;

use log::info;

use pbft_node::config::{initialize_ini, initialize_logging, NodeConfig};
use pbft_node::consensus::ConsensusEngine;
use pbft_node::node::Node;
use pbft_node::server::build_router;
use pbft_node::transport::HttpPeerTransport;

#[tokio::main]
async fn main() {
    // read settings from the ini
    initialize_ini();
    // initialize logger
    initialize_logging();

    let config = NodeConfig::from_env();
    info!(
        target: "node",
        "starting {} (primary={}, quorum={}, peers={})",
        config.node_id,
        config.is_primary(),
        config.quorum,
        config.peers.len()
    );

    let engine = ConsensusEngine::new(
        config.node_id.clone(),
        config.is_primary(),
        config.primary_id.clone(),
        config.peers.keys().cloned().collect(),
        config.view_number,
        config.quorum,
    );

    let addresses: HashMap<String, String> = config.peers.clone();
    let transport = Arc::new(HttpPeerTransport::new(addresses));
    let node = Node::new(engine, transport);

    let app = build_router(node);
    let addr = config.listen_addr.parse().expect("listen_addr must be a valid socket address");

    info!(target: "node", "listening on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .expect("server failed");
}
