/***************************************************************************************************
Startup configuration: ini file -> environment -> typed `NodeConfig`. Grounded in the teacher's
`config::initialize_ini`/`SimulationConfig`/`NodeConfig` (same `get_ini` + `ini2env` + `env2var`
pipeline), reshaped from "how many nodes to simulate" into "who am I, who is the primary, who are
my peers, and where do I listen" per §2.1/§8.
***************************************************************************************************/

use std::collections::HashMap;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use mc_utils::ini::{env2var, env2var_vec, ini2env};

/// Everything a single replica needs to start serving requests.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// this replica's own id, e.g. "n1".
    pub node_id: String,
    /// address this replica's HTTP server binds to, e.g. "0.0.0.0:9001".
    pub listen_addr: String,
    /// id of the fixed primary for the (unimplemented) current view.
    pub primary_id: String,
    /// base URL of every peer in the group, keyed by node id, excluding this node.
    pub peers: HashMap<String, String>,
    /// the view this replica starts in. View-change is out of scope, so this never changes.
    pub view_number: u64,
    /// 2f+1, derived from the configured membership size.
    pub quorum: usize,
}

impl NodeConfig {
    /// Whether this replica is the primary for `view_number`.
    pub fn is_primary(&self) -> bool {
        self.node_id == self.primary_id
    }

    /// Builds the config from environment variables populated by `initialize_ini`. Peer
    /// directory entries are read as parallel `node.peer_ids`/`node.peer_addrs` lists, both
    /// whitespace-separated and index-aligned (mirrors the teacher's `env2var_vec` usage).
    pub fn from_env() -> NodeConfig {
        let node_id: String = env2var("node.id");
        let listen_addr: String = env2var("node.listen_addr");
        let primary_id: String = env2var("node.primary_id");
        let view_number: u64 = env2var("node.view_number");

        let peer_ids: Vec<String> = env2var_vec("node.peer_ids");
        let peer_addrs: Vec<String> = env2var_vec("node.peer_addrs");
        let peers: HashMap<String, String> = peer_ids
            .into_iter()
            .zip(peer_addrs.into_iter())
            .filter(|(id, _)| *id != node_id)
            .collect();

        // membership size is peers plus self; quorum is 2f+1 for N = 3f+1.
        let n = peers.len() + 1;
        let f = (n - 1) / 3;
        let quorum = 2 * f + 1;

        NodeConfig {
            node_id,
            listen_addr,
            primary_id,
            peers,
            view_number,
            quorum,
        }
    }
}

/// Loads `node.ini` and exports the keys `NodeConfig::from_env` expects.
pub fn initialize_ini() {
    let ini = mc_utils::ini::get_ini("node.ini");
    ini2env("node", "id", &ini, None);
    ini2env("node", "listen_addr", &ini, None);
    ini2env("node", "primary_id", &ini, None);
    ini2env("node", "view_number", &ini, None);
    ini2env("node", "peer_ids", &ini, None);
    ini2env("node", "peer_addrs", &ini, None);
    ini2env("log", "debug", &ini, None);
}

/// Sets up console logging, plus per-target debug file logging for `node` and `consensus` when
/// `log.debug` is set. Grounded in the teacher's `config::initialize_logging`.
pub fn initialize_logging() {
    let stdout = ConsoleAppender::builder().build();

    let log_node = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{l} - {m}{n}")))
        .append(false)
        .build("log/node.log")
        .unwrap();

    let log_consensus = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{l} - {m}{n}")))
        .append(false)
        .build("log/consensus.log")
        .unwrap();

    let mut config =
        Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));

    if env2var::<bool>("log.debug") {
        config = config
            .appender(Appender::builder().build("log_node", Box::new(log_node)))
            .appender(Appender::builder().build("log_consensus", Box::new(log_consensus)))
            .logger(
                Logger::builder()
                    .appender("log_node")
                    .additive(false)
                    .build("node", LevelFilter::Debug),
            )
            .logger(
                Logger::builder()
                    .appender("log_consensus")
                    .additive(false)
                    .build("consensus", LevelFilter::Debug),
            );
    }

    let config = config
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .unwrap();

    log4rs::init_config(config).unwrap();
}
