//! Events the torrent emits to its host application.

use serde::{Deserialize, Serialize};

/// Host-facing torrent events.
///
/// Ordering guarantees: `Ready` is emitted exactly once; a torrent that
/// loads already whole emits `Complete` before `Ready`; `Progress` values
/// are monotone non-decreasing; `Complete` is never emitted twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TorrentEvent {
    /// Load and verification finished; the torrent accepts start/stop.
    Ready,
    /// Every piece is verified present.
    Complete,
    /// A piece just completed; payload is completed/total in `[0, 1]`.
    Progress(f64),
    /// A tracker announce resolved (successfully or not).
    Updated,
    /// Loading failed; see `last_error` on the torrent.
    Error,
}
