//! # spindrift
//!
//! A single-torrent BitTorrent coordination engine.
//!
//! The [`Torrent`] coordinator owns a torrent's global state (the completed
//! and active piece bitfields, the peer set, the tracker set and the backing
//! files) and drives the policies that connect them: verification at load,
//! peer admission, interest tracking, piece selection, chunk upload service
//! and completion accounting. Collaborators (the peer wire transport, the
//! announce transport, disk I/O) stay behind narrow interfaces and feed the
//! coordinator through a single mailbox, so no two state transitions ever
//! race.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use spindrift::{Torrent, TorrentConfig, TorrentEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let torrent = Torrent::new(TorrentConfig::default());
//!     let mut events = torrent.subscribe();
//!
//!     let descriptor = tokio::fs::read("example.torrent").await?;
//!     torrent.load(&descriptor).await?;
//!     torrent.start();
//!
//!     tokio::spawn(torrent.clone().run());
//!     while let Ok(event) = events.recv().await {
//!         println!("event: {:?}", event);
//!         if event == TorrentEvent::Complete {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod bencode;
pub mod bitfield;
pub mod config;
pub mod error;
pub mod events;
pub mod metainfo;
pub mod peer;
pub mod piece;
pub mod storage;
pub mod torrent;
pub mod tracker;

// Re-exports for convenience
pub use bitfield::Bitfield;
pub use config::TorrentConfig;
pub use error::{Error, Result, StorageErrorKind};
pub use events::TorrentEvent;
pub use metainfo::{FileEntry, Metainfo, Sha1Hash};
pub use peer::{Peer, PeerCommand, PeerEvent, PeerSummary};
pub use piece::{ChunkRequest, Piece, PieceIndex, CHUNK_SIZE};
pub use storage::{FileSet, FileSlice};
pub use torrent::{
    PeerConnector, Torrent, TorrentHandle, TorrentMessage, TorrentStatus,
};
pub use tracker::{
    AnnounceData, AnnounceEvent, AnnounceStats, PeerAddr, Tracker, TrackerState, TrackerSummary,
};
