//! The torrent coordinator.
//!
//! Owns the global torrent state (completed and active bitfields, the peer
//! map, the tracker set, the piece index and the file set) and wires events
//! from the collaborators together under one mailbox. Handlers never run
//! concurrently with each other: collaborators enqueue [`TorrentMessage`]s
//! and a single consumer dispatches them, so every state transition is
//! atomic with respect to the others.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::bitfield::Bitfield;
use crate::config::TorrentConfig;
use crate::error::{Error, Result};
use crate::events::TorrentEvent;
use crate::metainfo::{Metainfo, Sha1Hash};
use crate::peer::{Peer, PeerCommand, PeerEvent, PeerSummary};
use crate::piece::{PieceIndex, CHUNK_SIZE};
use crate::storage::FileSet;
use crate::tracker::{
    generate_peer_id, AnnounceData, AnnounceStats, Tracker, TrackerSummary,
};

/// Lifecycle state of the torrent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TorrentStatus {
    /// Parsing the descriptor, opening files, verifying pieces.
    Loading,
    /// Load finished; start/stop are accepted.
    Ready,
    /// Load failed; terminal for this instance.
    LoadError,
}

/// Everything that only exists once the descriptor has been loaded.
struct Loaded {
    metainfo: Arc<Metainfo>,
    files: Arc<FileSet>,
    stats: Arc<AnnounceStats>,
}

/// Messages delivered to the coordinator mailbox.
#[derive(Debug)]
pub enum TorrentMessage {
    /// An event from (or about) a peer connection.
    Peer { addr: SocketAddr, event: PeerEvent },
    /// A tracker announce resolved; `None` means it failed.
    Tracker {
        index: usize,
        data: Option<AnnounceData>,
    },
}

/// Cheap cloneable way into the coordinator mailbox. This is the handle
/// collaborators hold instead of the torrent itself.
#[derive(Debug, Clone)]
pub struct TorrentHandle {
    tx: mpsc::UnboundedSender<TorrentMessage>,
}

impl TorrentHandle {
    /// Deliver a peer event to the coordinator.
    pub fn peer_event(&self, addr: SocketAddr, event: PeerEvent) {
        let _ = self.tx.send(TorrentMessage::Peer { addr, event });
    }

    /// Deliver a tracker callback to the coordinator.
    pub fn tracker_update(&self, index: usize, data: Option<AnnounceData>) {
        let _ = self.tx.send(TorrentMessage::Tracker { index, data });
    }
}

/// Seam to the peer wire transport. Given a candidate address, the
/// implementation opens the connection, feeds parsed events back through the
/// [`TorrentHandle`], and returns the command channel it will service.
pub trait PeerConnector: Send + Sync {
    fn connect(
        &self,
        addr: SocketAddr,
        handle: TorrentHandle,
    ) -> mpsc::UnboundedSender<PeerCommand>;
}

/// The coordinator for one torrent.
pub struct Torrent {
    config: TorrentConfig,
    status: RwLock<TorrentStatus>,
    last_error: RwLock<Option<Error>>,
    loaded: RwLock<Option<Loaded>>,
    pieces: Mutex<PieceIndex>,
    /// Pieces verified present. Disjoint from `active` at every quiescent
    /// point.
    completed: RwLock<Bitfield>,
    /// Pieces currently assigned to at least one peer.
    active: RwLock<Bitfield>,
    peers: RwLock<HashMap<SocketAddr, Peer>>,
    trackers: RwLock<Vec<Arc<Tracker>>>,
    seeders: AtomicU32,
    leechers: AtomicU32,
    complete_emitted: AtomicBool,
    stopped: AtomicBool,
    rng: Mutex<StdRng>,
    events: broadcast::Sender<TorrentEvent>,
    mailbox_tx: mpsc::UnboundedSender<TorrentMessage>,
    mailbox_rx: Mutex<Option<mpsc::UnboundedReceiver<TorrentMessage>>>,
    connector: RwLock<Option<Arc<dyn PeerConnector>>>,
}

impl Torrent {
    /// Create a torrent in `Loading` state. Call [`Torrent::load`] next.
    pub fn new(config: TorrentConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let rng = match config.selection_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Arc::new(Self {
            config,
            status: RwLock::new(TorrentStatus::Loading),
            last_error: RwLock::new(None),
            loaded: RwLock::new(None),
            pieces: Mutex::new(PieceIndex::empty()),
            completed: RwLock::new(Bitfield::new(0)),
            active: RwLock::new(Bitfield::new(0)),
            peers: RwLock::new(HashMap::new()),
            trackers: RwLock::new(Vec::new()),
            seeders: AtomicU32::new(0),
            leechers: AtomicU32::new(0),
            complete_emitted: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            rng: Mutex::new(rng),
            events,
            mailbox_tx,
            mailbox_rx: Mutex::new(Some(mailbox_rx)),
            connector: RwLock::new(None),
        })
    }

    /// Subscribe to host-facing events. Subscribe before calling `load` to
    /// observe the `ready`/`complete` emissions.
    pub fn subscribe(&self) -> broadcast::Receiver<TorrentEvent> {
        self.events.subscribe()
    }

    /// Mailbox handle for collaborators (wire transports, tests).
    pub fn handle(&self) -> TorrentHandle {
        TorrentHandle {
            tx: self.mailbox_tx.clone(),
        }
    }

    /// Install the peer wire transport used to dial tracker-discovered
    /// peers. Without one, candidates from announces are logged and skipped.
    pub fn set_connector(&self, connector: Arc<dyn PeerConnector>) {
        *self.connector.write() = Some(connector);
    }

    fn emit(&self, event: TorrentEvent) {
        // A host without a live subscriber is fine.
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Parse the descriptor, open the backing files and verify what is
    /// already on disk. Emits `ready` (preceded by `complete` when the
    /// payload is already whole) or `error`.
    pub async fn load(&self, data: &[u8]) -> Result<()> {
        match self.try_load(data).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "torrent load failed");
                *self.status.write() = TorrentStatus::LoadError;
                *self.last_error.write() = Some(e.clone());
                self.emit(TorrentEvent::Error);
                Err(e)
            }
        }
    }

    async fn try_load(&self, data: &[u8]) -> Result<()> {
        let metainfo = Arc::new(Metainfo::parse(data)?);
        tracing::info!(
            name = %metainfo.name,
            info_hash = %metainfo.info_hash_hex(),
            pieces = metainfo.num_pieces(),
            size = metainfo.total_size,
            "loading torrent"
        );

        let files = Arc::new(
            FileSet::create(
                &self.config.download_dir,
                &metainfo.name,
                &metainfo.files,
                metainfo.single_file,
            )
            .await?,
        );

        let mut index = PieceIndex::build(&metainfo);
        let present = index.verify_on_disk(&files).await;
        let bytes_present: u64 = index
            .iter()
            .filter(|p| p.is_complete())
            .map(|p| p.length)
            .sum();

        let stats = Arc::new(AnnounceStats::new(
            metainfo.info_hash,
            generate_peer_id(),
            self.config.listen_port,
            metainfo.total_size - bytes_present,
        ));
        let trackers: Vec<Arc<Tracker>> = metainfo
            .announce_urls
            .iter()
            .map(|url| Arc::new(Tracker::new(url.clone())))
            .collect();

        let num_pieces = metainfo.num_pieces();
        let whole = present.is_full();

        *self.pieces.lock() = index;
        *self.completed.write() = present;
        *self.active.write() = Bitfield::new(num_pieces);
        *self.trackers.write() = trackers;
        *self.loaded.write() = Some(Loaded {
            metainfo,
            files,
            stats,
        });
        *self.status.write() = TorrentStatus::Ready;

        // A torrent that loads whole reports completion before readiness.
        if whole {
            self.complete_emitted.store(true, Ordering::SeqCst);
            self.emit(TorrentEvent::Complete);
        }
        self.emit(TorrentEvent::Ready);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mailbox
    // ------------------------------------------------------------------

    /// Consume the mailbox until every sender is gone. The single consumer
    /// is what serialises handler execution.
    pub async fn run(self: Arc<Self>) {
        let rx = self.mailbox_rx.lock().take();
        let Some(mut rx) = rx else {
            tracing::warn!("torrent mailbox already taken; run() called twice?");
            return;
        };
        while let Some(message) = rx.recv().await {
            self.dispatch(message).await;
        }
    }

    /// Dispatch one mailbox message. Exposed so hosts embedding their own
    /// loop (and tests) can drive the coordinator directly.
    pub async fn dispatch(&self, message: TorrentMessage) {
        match message {
            TorrentMessage::Peer { addr, event } => self.handle_peer_event(addr, event).await,
            TorrentMessage::Tracker { index, data } => self.handle_tracker_update(index, data),
        }
    }

    // ------------------------------------------------------------------
    // Start / stop
    // ------------------------------------------------------------------

    /// Start the tracker announce loops.
    pub fn start(&self) {
        if self.status() != TorrentStatus::Ready {
            tracing::debug!("start ignored: torrent not ready");
            return;
        }
        self.stopped.store(false, Ordering::SeqCst);
        let Some(stats) = self.announce_stats() else {
            return;
        };
        let handle = self.handle();
        for (index, tracker) in self.trackers.read().iter().enumerate() {
            let handle = handle.clone();
            tracker.start(Arc::clone(&stats), move |data| {
                handle.tracker_update(index, data);
            });
        }
    }

    /// Stop announcing and disconnect every peer. The torrent stays usable;
    /// `start` may be called again.
    pub fn stop(&self) {
        if self.status() != TorrentStatus::Ready {
            return;
        }
        self.stopped.store(true, Ordering::SeqCst);
        for tracker in self.trackers.read().iter() {
            tracker.stop();
        }
        for peer in self.peers.read().values() {
            peer.send(PeerCommand::Disconnect {
                reason: "Torrent stopped.".to_string(),
            });
        }
    }

    // ------------------------------------------------------------------
    // Peer admission and events
    // ------------------------------------------------------------------

    /// Admit a peer. Idempotent by address: a known peer is left untouched.
    /// No admissions happen after `stop()`.
    pub fn add_peer(&self, peer: Peer) {
        if self.stopped.load(Ordering::SeqCst) {
            tracing::debug!(peer = %peer.addr, "admission refused: torrent stopped");
            return;
        }
        let mut peers = self.peers.write();
        if peers.contains_key(&peer.addr) {
            return;
        }
        tracing::debug!(peer = %peer.addr, "peer admitted");
        peers.insert(peer.addr, peer);
    }

    /// Handle one peer event. Unknown addresses are ignored except for the
    /// chunk-request path, which still gets its reply.
    pub async fn handle_peer_event(&self, addr: SocketAddr, event: PeerEvent) {
        match event {
            PeerEvent::Connected => {
                let wire_bits = self.completed.read().to_bytes();
                let mut peers = self.peers.write();
                if let Some(peer) = peers.get_mut(&addr) {
                    if !peer.initialised {
                        peer.initialised = true;
                        peer.send(PeerCommand::Bitfield(wire_bits));
                    }
                }
            }
            PeerEvent::Bitfield(bytes) => {
                let num_pieces = self.num_pieces();
                if let Some(peer) = self.peers.write().get_mut(&addr) {
                    peer.bitfield = Bitfield::from_bytes(&bytes, num_pieces);
                }
                self.update_interest(addr);
            }
            PeerEvent::Have(index) => {
                if let Some(peer) = self.peers.write().get_mut(&addr) {
                    peer.bitfield.set(index as usize);
                }
                self.update_interest(addr);
            }
            PeerEvent::Choked(choked) => {
                if let Some(peer) = self.peers.write().get_mut(&addr) {
                    peer.is_choked = choked;
                }
            }
            PeerEvent::Rates { download, upload } => {
                if let Some(peer) = self.peers.write().get_mut(&addr) {
                    peer.download_rate = download;
                    peer.upload_rate = upload;
                }
            }
            PeerEvent::Ready => self.peer_ready(addr),
            PeerEvent::Chunk { index, begin, data } => {
                self.chunk_received(addr, index, begin, data).await;
            }
            PeerEvent::ChunkRequest {
                index,
                begin,
                length,
                reply,
            } => {
                self.request_chunk(index, begin, length, reply).await;
            }
            PeerEvent::Disconnected { reason } => self.remove_peer(addr, &reason),
        }
    }

    /// Interest = the peer has at least one piece we lack. Recomputed on
    /// every bitfield change; flapping is acceptable.
    fn update_interest(&self, addr: SocketAddr) {
        let completed = self.completed.read().clone();
        let mut peers = self.peers.write();
        let Some(peer) = peers.get_mut(&addr) else {
            return;
        };
        let wanted = peer.bitfield.difference(&completed).any();
        peer.set_am_interested(wanted);
    }

    /// Piece selection on peer capacity. Reuse an active piece with
    /// unrequested chunks first; otherwise activate a uniformly random piece
    /// from what the peer has and nothing else claims; otherwise drop
    /// interest if the peer has nothing outstanding.
    fn peer_ready(&self, addr: SocketAddr) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let active_indices = self.active.read().set_indices();
        let mut pieces = self.pieces.lock();
        let mut peers = self.peers.write();
        let Some(peer) = peers.get_mut(&addr) else {
            return;
        };
        let budget = self
            .config
            .max_pending_requests
            .saturating_sub(peer.num_requests);
        if budget == 0 {
            return;
        }

        // Step 1: reuse an already-active piece.
        for index in active_indices {
            if !peer.bitfield.get(index) {
                continue;
            }
            if let Some(piece) = pieces.get_mut(index) {
                if !piece.has_requested_all_chunks() {
                    Self::assign_piece(peer, piece, budget);
                    return;
                }
            }
        }

        // Step 2: activate a new piece, chosen uniformly at random.
        let claimed = self.active.read().or(&self.completed.read());
        let available = peer.bitfield.difference(&claimed).set_indices();
        if !available.is_empty() {
            let pick = {
                let mut rng = self.rng.lock();
                available[rng.gen_range(0..available.len())]
            };
            self.active.write().set(pick);
            if let Some(piece) = pieces.get_mut(pick) {
                tracing::trace!(peer = %addr, piece = pick, "piece activated");
                Self::assign_piece(peer, piece, budget);
            }
            return;
        }

        // Step 3: nothing assignable. With no outstanding requests the peer
        // is of no use right now.
        if peer.num_requests == 0 {
            peer.set_am_interested(false);
        }
    }

    fn assign_piece(peer: &mut Peer, piece: &mut crate::piece::Piece, budget: usize) {
        let requests = piece.next_requests(budget);
        if requests.is_empty() {
            return;
        }
        peer.pieces_in_progress.insert(piece.index);
        peer.num_requests += requests.len();
        for request in requests {
            peer.send(PeerCommand::Request {
                index: request.piece,
                begin: request.begin,
                length: request.length,
            });
        }
    }

    /// A requested chunk arrived from a peer.
    async fn chunk_received(&self, addr: SocketAddr, index: u32, begin: u32, data: Bytes) {
        if let Some(peer) = self.peers.write().get_mut(&addr) {
            peer.num_requests = peer.num_requests.saturating_sub(1);
        }
        if !self.active.read().get(index as usize) {
            tracing::trace!(piece = index, "chunk for inactive piece dropped");
            return;
        }

        let assembled = {
            let mut pieces = self.pieces.lock();
            let Some(piece) = pieces.get_mut(index as usize) else {
                return;
            };
            match piece.add_chunk(begin, data) {
                Ok(true) => piece.take_data(),
                Ok(false) => None,
                Err(e) => {
                    tracing::debug!(peer = %addr, piece = index, error = %e, "bad chunk");
                    None
                }
            }
        };
        if let Some(bytes) = assembled {
            self.finish_piece(index, bytes).await;
        }
    }

    /// Verify and persist a fully received piece, then account for it.
    async fn finish_piece(&self, index: u32, bytes: Vec<u8>) {
        let (hash_ok, offset, length) = {
            let pieces = self.pieces.lock();
            let Some(piece) = pieces.get(index as usize) else {
                return;
            };
            (piece.verify(&bytes), piece.offset, piece.length)
        };

        if !hash_ok {
            // Corrupt download: discard and let selection hand it out again.
            tracing::debug!(piece = index, "hash mismatch after download");
            self.abandon_piece(index);
            return;
        }

        let Some(files) = self.file_set() else {
            return;
        };
        if let Err(e) = files.write(offset, &bytes).await {
            tracing::error!(piece = index, error = %e, "failed to persist piece");
            self.abandon_piece(index);
            return;
        }

        if let Some(piece) = self.pieces.lock().get_mut(index as usize) {
            piece.mark_complete();
        }
        let (count, total) = {
            let mut completed = self.completed.write();
            completed.set(index as usize);
            (completed.count(), completed.len())
        };
        self.active.write().clear(index as usize);
        self.clear_in_progress(index);

        if let Some(stats) = self.announce_stats() {
            stats.add_downloaded(length);
            stats.set_left(stats.left().saturating_sub(length));
        }
        tracing::debug!(piece = index, completed = count, total, "piece complete");
        self.emit(TorrentEvent::Progress(count as f64 / total as f64));

        for peer in self.peers.read().values().filter(|p| p.initialised) {
            peer.send(PeerCommand::Have(index));
        }

        if count == total && !self.complete_emitted.swap(true, Ordering::SeqCst) {
            tracing::info!("torrent complete");
            self.emit(TorrentEvent::Complete);
            for tracker in self.trackers.read().iter() {
                tracker.notify_complete();
            }
        }
    }

    /// Drop a piece back to Idle and release its activation.
    fn abandon_piece(&self, index: u32) {
        if let Some(piece) = self.pieces.lock().get_mut(index as usize) {
            piece.reset();
        }
        self.active.write().clear(index as usize);
        self.clear_in_progress(index);
    }

    fn clear_in_progress(&self, index: u32) {
        for peer in self.peers.write().values_mut() {
            peer.pieces_in_progress.remove(&index);
        }
    }

    /// Serve a chunk to a peer. An unknown piece index answers with empty
    /// bytes; a read failure is passed through for the peer layer to act on.
    pub async fn request_chunk(
        &self,
        index: u32,
        begin: u32,
        length: u32,
        reply: oneshot::Sender<Result<Bytes>>,
    ) {
        let extent = {
            let pieces = self.pieces.lock();
            pieces.get(index as usize).map(|p| (p.offset, p.length))
        };
        let Some((offset, piece_length)) = extent else {
            let _ = reply.send(Ok(Bytes::new()));
            return;
        };
        if u64::from(begin) + u64::from(length) > piece_length || length > CHUNK_SIZE + 1024 {
            let _ = reply.send(Err(Error::peer(format!(
                "chunk request {begin}+{length} outside piece {index}"
            ))));
            return;
        }
        let Some(files) = self.file_set() else {
            let _ = reply.send(Ok(Bytes::new()));
            return;
        };
        match files.read(offset + u64::from(begin), u64::from(length)).await {
            Ok(data) => {
                if let Some(stats) = self.announce_stats() {
                    stats.add_uploaded(data.len() as u64);
                }
                let _ = reply.send(Ok(Bytes::from(data)));
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    /// Peer went away: release its claims and drop it.
    fn remove_peer(&self, addr: SocketAddr, reason: &str) {
        let Some(peer) = self.peers.write().remove(&addr) else {
            return;
        };
        tracing::debug!(peer = %addr, reason, "peer removed");
        let mut pieces = self.pieces.lock();
        let mut active = self.active.write();
        for &index in &peer.pieces_in_progress {
            active.clear(index as usize);
            if let Some(piece) = pieces.get_mut(index as usize) {
                if !piece.is_complete() {
                    piece.release_requests();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Tracker updates
    // ------------------------------------------------------------------

    /// Fold a tracker callback into the aggregates and admit new peers.
    pub fn handle_tracker_update(&self, index: usize, data: Option<AnnounceData>) {
        if let Some(data) = data {
            if let Some(tracker) = self.trackers.read().get(index).cloned() {
                // swap this tracker's contribution out of the aggregates
                let (old_seeders, old_leechers) =
                    tracker.swap_counts(data.seeders, data.leechers);
                let seeders = self.seeders.load(Ordering::Relaxed);
                self.seeders.store(
                    seeders.saturating_sub(old_seeders) + data.seeders,
                    Ordering::Relaxed,
                );
                let leechers = self.leechers.load(Ordering::Relaxed);
                self.leechers.store(
                    leechers.saturating_sub(old_leechers) + data.leechers,
                    Ordering::Relaxed,
                );
            }
            if !self.is_complete() && !self.stopped.load(Ordering::SeqCst) {
                self.admit_candidates(&data);
            }
        }
        self.emit(TorrentEvent::Updated);
    }

    fn admit_candidates(&self, data: &AnnounceData) {
        let connector = self.connector.read().clone();
        let Some(connector) = connector else {
            if !data.peers.is_empty() {
                tracing::debug!(
                    candidates = data.peers.len(),
                    "no peer connector installed; skipping tracker peers"
                );
            }
            return;
        };
        let num_pieces = self.num_pieces();
        let handle = self.handle();
        for candidate in &data.peers {
            if self.peers.read().len() >= self.config.max_peers {
                break;
            }
            let Some(addr) = candidate.to_socket_addr() else {
                continue;
            };
            if self.peers.read().contains_key(&addr) {
                continue;
            }
            let commands = connector.connect(addr, handle.clone());
            let mut peer = Peer::new(addr, num_pieces, commands);
            peer.peer_id = candidate.peer_id;
            self.add_peer(peer);
        }
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn status(&self) -> TorrentStatus {
        *self.status.read()
    }

    pub fn last_error(&self) -> Option<Error> {
        self.last_error.read().clone()
    }

    pub fn name(&self) -> Option<String> {
        self.loaded.read().as_ref().map(|l| l.metainfo.name.clone())
    }

    pub fn info_hash(&self) -> Option<Sha1Hash> {
        self.loaded.read().as_ref().map(|l| l.metainfo.info_hash)
    }

    pub fn total_size(&self) -> u64 {
        self.loaded
            .read()
            .as_ref()
            .map(|l| l.metainfo.total_size)
            .unwrap_or(0)
    }

    pub fn num_pieces(&self) -> usize {
        self.completed.read().len()
    }

    /// True once every piece is verified present.
    pub fn is_complete(&self) -> bool {
        self.completed.read().is_full()
    }

    /// Completed fraction in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        let completed = self.completed.read();
        if completed.is_empty() {
            return 0.0;
        }
        completed.count() as f64 / completed.len() as f64
    }

    /// Bytes acquired this session (excludes data found on disk at load).
    pub fn downloaded(&self) -> u64 {
        self.announce_stats().map(|s| s.downloaded()).unwrap_or(0)
    }

    /// Bytes served to peers this session.
    pub fn uploaded(&self) -> u64 {
        self.announce_stats().map(|s| s.uploaded()).unwrap_or(0)
    }

    /// Bytes still missing from the payload.
    pub fn left(&self) -> u64 {
        self.announce_stats().map(|s| s.left()).unwrap_or(0)
    }

    pub fn seeders(&self) -> u32 {
        self.seeders.load(Ordering::Relaxed)
    }

    pub fn leechers(&self) -> u32 {
        self.leechers.load(Ordering::Relaxed)
    }

    /// Snapshot of the peer set.
    pub fn peers(&self) -> Vec<PeerSummary> {
        self.peers
            .read()
            .values()
            .map(|peer| PeerSummary {
                address: peer.addr,
                choked: peer.is_choked,
                requests: peer.num_requests,
                download_rate: peer.download_rate,
                upload_rate: peer.upload_rate,
            })
            .collect()
    }

    /// Snapshot of the tracker set.
    pub fn trackers(&self) -> Vec<TrackerSummary> {
        self.trackers.read().iter().map(|t| t.summary()).collect()
    }

    /// Sum of current per-peer download rates.
    pub fn download_rate(&self) -> u64 {
        self.peers
            .read()
            .values()
            .map(|p| p.download_rate)
            .fold(0, u64::saturating_add)
    }

    /// Sum of current per-peer upload rates.
    pub fn upload_rate(&self) -> u64 {
        self.peers
            .read()
            .values()
            .map(|p| p.upload_rate)
            .fold(0, u64::saturating_add)
    }

    /// Copy of the completed bitfield.
    pub fn completed_pieces(&self) -> Bitfield {
        self.completed.read().clone()
    }

    /// Copy of the active bitfield.
    pub fn active_pieces(&self) -> Bitfield {
        self.active.read().clone()
    }

    fn announce_stats(&self) -> Option<Arc<AnnounceStats>> {
        self.loaded.read().as_ref().map(|l| Arc::clone(&l.stats))
    }

    fn file_set(&self) -> Option<Arc<FileSet>> {
        self.loaded.read().as_ref().map(|l| Arc::clone(&l.files))
    }
}
