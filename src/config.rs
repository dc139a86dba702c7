//! Torrent configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a single torrent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentConfig {
    /// Directory the payload is placed under
    pub download_dir: PathBuf,

    /// Port reported to trackers for incoming connections
    pub listen_port: u16,

    /// Maximum outstanding chunk requests per peer
    pub max_pending_requests: usize,

    /// Maximum peers admitted from tracker updates
    pub max_peers: usize,

    /// Seed for the piece-selection RNG. Production leaves this unset and
    /// seeds from entropy; tests inject a value for determinism.
    pub selection_seed: Option<u64>,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
            listen_port: 6881,
            max_pending_requests: 16,
            max_peers: 50,
            selection_seed: None,
        }
    }
}
