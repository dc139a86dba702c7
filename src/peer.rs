//! Coordinator-side peer model.
//!
//! The wire protocol itself (framing, handshake, rate accounting) lives in
//! the transport component. What the coordinator sees is a [`Peer`] record
//! keyed by socket address, a stream of [`PeerEvent`]s arriving through the
//! torrent mailbox, and a [`PeerCommand`] channel going the other way: the
//! opaque handle that keeps peers from holding the torrent itself.

use std::collections::HashSet;
use std::net::SocketAddr;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::bitfield::Bitfield;
use crate::error::Result;

/// Lifecycle and wire events a peer delivers to the coordinator.
#[derive(Debug)]
pub enum PeerEvent {
    /// Handshake finished; the peer can receive messages now.
    Connected,
    /// The peer announced its full bitfield (wire bytes).
    Bitfield(Vec<u8>),
    /// The peer announced one newly held piece.
    Have(u32),
    /// Choke state flipped; `true` means they refuse to serve us.
    Choked(bool),
    /// The peer has capacity for another piece assignment.
    Ready,
    /// A requested chunk arrived.
    Chunk { index: u32, begin: u32, data: Bytes },
    /// The peer asks us for a chunk; the reply carries data or the read
    /// error. An unknown piece index is answered with empty bytes.
    ChunkRequest {
        index: u32,
        begin: u32,
        length: u32,
        reply: oneshot::Sender<Result<Bytes>>,
    },
    /// Transfer rate sample from the wire component (bytes/sec).
    Rates { download: u64, upload: u64 },
    /// The connection is gone.
    Disconnected { reason: String },
}

/// Commands the coordinator sends to the wire component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    /// Send our completed-piece bitfield (wire bytes).
    Bitfield(Vec<u8>),
    /// Announce a newly completed piece.
    Have(u32),
    /// Assert or drop interest.
    Interested(bool),
    /// Request one chunk.
    Request { index: u32, begin: u32, length: u32 },
    /// Drop the connection with a reason for the log.
    Disconnect { reason: String },
}

impl PeerCommand {
    /// Wire framing for commands that map to peer-wire messages:
    /// 4-byte big-endian length prefix, 1-byte id, payload. `Disconnect` has
    /// no wire form.
    pub fn to_wire(&self) -> Option<Vec<u8>> {
        match self {
            Self::Bitfield(bits) => {
                let len = 1 + bits.len() as u32;
                let mut buf = Vec::with_capacity(4 + len as usize);
                buf.extend_from_slice(&len.to_be_bytes());
                buf.push(5);
                buf.extend_from_slice(bits);
                Some(buf)
            }
            Self::Have(index) => {
                let mut buf = vec![0, 0, 0, 5, 4];
                buf.extend_from_slice(&index.to_be_bytes());
                Some(buf)
            }
            Self::Interested(true) => Some(vec![0, 0, 0, 1, 2]),
            Self::Interested(false) => Some(vec![0, 0, 0, 1, 3]),
            Self::Request {
                index,
                begin,
                length,
            } => {
                let mut buf = vec![0, 0, 0, 13, 6];
                buf.extend_from_slice(&index.to_be_bytes());
                buf.extend_from_slice(&begin.to_be_bytes());
                buf.extend_from_slice(&length.to_be_bytes());
                Some(buf)
            }
            Self::Disconnect { .. } => None,
        }
    }
}

/// A peer as the coordinator tracks it.
#[derive(Debug)]
pub struct Peer {
    /// Stable identifier: remote socket address.
    pub addr: SocketAddr,
    /// Peer id from the tracker or handshake, when known.
    pub peer_id: Option<[u8; 20]>,
    /// Pieces the remote holds.
    pub bitfield: Bitfield,
    /// We want something they have.
    pub am_interested: bool,
    /// They are refusing to serve us.
    pub is_choked: bool,
    /// Outstanding chunk requests.
    pub num_requests: usize,
    /// Latest sampled rates (bytes/sec).
    pub download_rate: u64,
    pub upload_rate: u64,
    /// Piece indices this peer is currently fetching for us.
    pub pieces_in_progress: HashSet<u32>,
    /// Handshake complete; safe to address with wire messages.
    pub initialised: bool,
    commands: mpsc::UnboundedSender<PeerCommand>,
}

impl Peer {
    /// Create a peer record. `commands` is consumed by the wire component.
    pub fn new(
        addr: SocketAddr,
        num_pieces: usize,
        commands: mpsc::UnboundedSender<PeerCommand>,
    ) -> Self {
        Self {
            addr,
            peer_id: None,
            bitfield: Bitfield::new(num_pieces),
            am_interested: false,
            is_choked: true,
            num_requests: 0,
            download_rate: 0,
            upload_rate: 0,
            pieces_in_progress: HashSet::new(),
            initialised: false,
            commands,
        }
    }

    /// Send a command to the wire component. A closed channel is not an
    /// error here; the disconnect event will arrive through the mailbox.
    pub fn send(&self, command: PeerCommand) {
        if self.commands.send(command).is_err() {
            tracing::trace!(peer = %self.addr, "peer command channel closed");
        }
    }

    /// Update interest and tell the wire side when it changes.
    pub fn set_am_interested(&mut self, interested: bool) {
        if self.am_interested != interested {
            self.am_interested = interested;
            self.send(PeerCommand::Interested(interested));
        }
    }
}

/// Observer row for [`crate::torrent::Torrent::peers`].
#[derive(Debug, Clone, Serialize)]
pub struct PeerSummary {
    pub address: SocketAddr,
    pub choked: bool,
    pub requests: usize,
    pub download_rate: u64,
    pub upload_rate: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_peer() -> (Peer, mpsc::UnboundedReceiver<PeerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Peer::new("10.0.0.1:6881".parse().unwrap(), 8, tx);
        (peer, rx)
    }

    #[test]
    fn interest_changes_are_sent_once() {
        let (mut peer, mut rx) = test_peer();
        peer.set_am_interested(true);
        peer.set_am_interested(true);
        peer.set_am_interested(false);

        assert_eq!(rx.try_recv().unwrap(), PeerCommand::Interested(true));
        assert_eq!(rx.try_recv().unwrap(), PeerCommand::Interested(false));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_survives_closed_channel() {
        let (peer, rx) = test_peer();
        drop(rx);
        peer.send(PeerCommand::Have(3));
    }

    #[test]
    fn wire_framing() {
        assert_eq!(
            PeerCommand::Have(3).to_wire().unwrap(),
            vec![0, 0, 0, 5, 4, 0, 0, 0, 3]
        );
        assert_eq!(
            PeerCommand::Bitfield(vec![0b1010_0000]).to_wire().unwrap(),
            vec![0, 0, 0, 2, 5, 0b1010_0000]
        );
        assert_eq!(
            PeerCommand::Interested(true).to_wire().unwrap(),
            vec![0, 0, 0, 1, 2]
        );
        assert_eq!(
            PeerCommand::Request { index: 1, begin: 16384, length: 16384 }
                .to_wire()
                .unwrap()
                .len(),
            17
        );
        assert!(PeerCommand::Disconnect { reason: "bye".into() }
            .to_wire()
            .is_none());
    }
}
