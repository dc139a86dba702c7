//! Pieces and the piece index.
//!
//! A piece is the atomic unit of integrity: it is always verified whole
//! against its expected SHA-1 before its bytes count as present. At runtime
//! each piece moves through Idle -> InProgress -> Verifying -> Complete, with
//! a hash mismatch dropping it back to Idle and discarding whatever was
//! received.

use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::bitfield::Bitfield;
use crate::error::{Error, Result};
use crate::metainfo::{Metainfo, Sha1Hash};
use crate::storage::FileSet;

/// Bytes per chunk on the peer wire.
pub const CHUNK_SIZE: u32 = 16_384;

/// A chunk the coordinator wants a peer to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRequest {
    pub piece: u32,
    pub begin: u32,
    pub length: u32,
}

/// Receipt state of one chunk within an in-progress piece.
#[derive(Debug, Clone)]
enum ChunkSlot {
    Missing,
    Requested,
    Received(Bytes),
}

#[derive(Debug, Clone)]
enum PieceState {
    Idle,
    InProgress { chunks: Vec<ChunkSlot>, received: usize },
    Verifying,
    Complete,
}

/// One piece: its extent in the payload, expected hash, and runtime state.
#[derive(Debug, Clone)]
pub struct Piece {
    pub index: u32,
    /// Byte offset of this piece within the payload
    pub offset: u64,
    /// Piece length; only the last piece may be short
    pub length: u64,
    pub expected_hash: Sha1Hash,
    state: PieceState,
}

impl Piece {
    pub fn new(index: u32, offset: u64, length: u64, expected_hash: Sha1Hash) -> Self {
        Self {
            index,
            offset,
            length,
            expected_hash,
            state: PieceState::Idle,
        }
    }

    fn num_chunks(&self) -> usize {
        self.length.div_ceil(CHUNK_SIZE as u64) as usize
    }

    fn chunk_length(&self, slot: usize) -> u32 {
        let begin = slot as u64 * CHUNK_SIZE as u64;
        (self.length - begin).min(CHUNK_SIZE as u64) as u32
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, PieceState::Complete)
    }

    /// Record the piece as already present (used by the load-time scan and
    /// after a verified download is persisted).
    pub fn mark_complete(&mut self) {
        self.state = PieceState::Complete;
    }

    /// Discard any received chunks and return to Idle.
    pub fn reset(&mut self) {
        self.state = PieceState::Idle;
    }

    /// True once every chunk is requested or received. Pieces like this are
    /// skipped by the reuse step of peer-ready selection.
    pub fn has_requested_all_chunks(&self) -> bool {
        match &self.state {
            PieceState::Idle => false,
            PieceState::InProgress { chunks, .. } => {
                !chunks.iter().any(|c| matches!(c, ChunkSlot::Missing))
            }
            PieceState::Verifying | PieceState::Complete => true,
        }
    }

    /// Hand out up to `max` chunk requests, marking them outstanding. The
    /// first request moves an Idle piece to InProgress.
    pub fn next_requests(&mut self, max: usize) -> Vec<ChunkRequest> {
        if matches!(self.state, PieceState::Idle) {
            self.state = PieceState::InProgress {
                chunks: vec![ChunkSlot::Missing; self.num_chunks()],
                received: 0,
            };
        }
        let index = self.index;
        let lengths: Vec<u32> = (0..self.num_chunks()).map(|i| self.chunk_length(i)).collect();

        let PieceState::InProgress { chunks, .. } = &mut self.state else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (slot, chunk) in chunks.iter_mut().enumerate() {
            if out.len() == max {
                break;
            }
            if matches!(chunk, ChunkSlot::Missing) {
                *chunk = ChunkSlot::Requested;
                out.push(ChunkRequest {
                    piece: index,
                    begin: slot as u32 * CHUNK_SIZE,
                    length: lengths[slot],
                });
            }
        }
        out
    }

    /// Return outstanding requests to the pool (the requesting peer went
    /// away). Received chunks are kept.
    pub fn release_requests(&mut self) {
        if let PieceState::InProgress { chunks, .. } = &mut self.state {
            for chunk in chunks.iter_mut() {
                if matches!(chunk, ChunkSlot::Requested) {
                    *chunk = ChunkSlot::Missing;
                }
            }
        }
    }

    /// Store a received chunk. Returns `true` when this was the last one and
    /// the piece is ready to verify.
    pub fn add_chunk(&mut self, begin: u32, data: Bytes) -> Result<bool> {
        if begin % CHUNK_SIZE != 0 {
            return Err(Error::peer(format!(
                "chunk offset {begin} not aligned to {CHUNK_SIZE}"
            )));
        }
        let slot = (begin / CHUNK_SIZE) as usize;
        if slot >= self.num_chunks() {
            return Err(Error::peer(format!(
                "chunk offset {begin} outside piece {}",
                self.index
            )));
        }
        let expected = self.chunk_length(slot);
        if data.len() != expected as usize {
            return Err(Error::peer(format!(
                "chunk at {begin} has {} bytes, expected {expected}",
                data.len()
            )));
        }

        let total = self.num_chunks();
        let PieceState::InProgress { chunks, received } = &mut self.state else {
            return Err(Error::peer(format!(
                "chunk for piece {} which is not in progress",
                self.index
            )));
        };
        if !matches!(chunks[slot], ChunkSlot::Received(_)) {
            *received += 1;
        }
        chunks[slot] = ChunkSlot::Received(data);
        Ok(*received == total)
    }

    /// Assemble the piece bytes once every chunk has arrived, moving the
    /// piece to Verifying. Returns `None` if chunks are still outstanding.
    pub fn take_data(&mut self) -> Option<Vec<u8>> {
        let PieceState::InProgress { chunks, received } = &self.state else {
            return None;
        };
        if *received != chunks.len() {
            return None;
        }
        let mut data = Vec::with_capacity(self.length as usize);
        for chunk in chunks {
            match chunk {
                ChunkSlot::Received(bytes) => data.extend_from_slice(bytes),
                _ => return None,
            }
        }
        self.state = PieceState::Verifying;
        Some(data)
    }

    /// Check bytes against the expected hash.
    pub fn verify(&self, data: &[u8]) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let digest: Sha1Hash = hasher.finalize().into();
        digest == self.expected_hash
    }
}

/// Ordered sequence of pieces plus the initial on-disk verification scan.
#[derive(Debug)]
pub struct PieceIndex {
    pieces: Vec<Piece>,
}

impl PieceIndex {
    /// An index with no pieces; the state before a descriptor is loaded.
    pub fn empty() -> Self {
        Self { pieces: Vec::new() }
    }

    /// Build the piece sequence from the parsed descriptor.
    pub fn build(metainfo: &Metainfo) -> Self {
        let pieces = (0..metainfo.num_pieces())
            .map(|i| {
                let (start, end) = metainfo
                    .piece_range(i)
                    .expect("index within piece count");
                Piece::new(i as u32, start, end - start, metainfo.piece_hashes[i])
            })
            .collect();
        Self { pieces }
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Piece> {
        self.pieces.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Piece> {
        self.pieces.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Piece> {
        self.pieces.iter()
    }

    /// Hash every piece extent on disk and mark the ones that match. Runs
    /// sequentially by index so memory stays bounded at one piece. Read
    /// failures degrade to "not present" rather than failing the torrent.
    pub async fn verify_on_disk(&mut self, files: &FileSet) -> Bitfield {
        let mut present = Bitfield::new(self.pieces.len());
        for piece in &mut self.pieces {
            match files.read(piece.offset, piece.length).await {
                Ok(data) => {
                    if piece.verify(&data) {
                        piece.mark_complete();
                        present.set(piece.index as usize);
                    }
                }
                Err(e) => {
                    tracing::warn!(piece = piece.index, error = %e, "piece scan read failed");
                }
            }
        }
        tracing::info!(
            present = present.count(),
            total = self.pieces.len(),
            "initial piece verification finished"
        );
        present
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(data: &[u8]) -> Sha1Hash {
        let mut h = Sha1::new();
        h.update(data);
        h.finalize().into()
    }

    #[test]
    fn chunking_covers_the_piece() {
        // 2.5 chunks
        let len = CHUNK_SIZE as u64 * 2 + 100;
        let mut piece = Piece::new(0, 0, len, [0u8; 20]);

        let reqs = piece.next_requests(16);
        assert_eq!(reqs.len(), 3);
        assert_eq!(reqs[0], ChunkRequest { piece: 0, begin: 0, length: CHUNK_SIZE });
        assert_eq!(reqs[1], ChunkRequest { piece: 0, begin: CHUNK_SIZE, length: CHUNK_SIZE });
        assert_eq!(reqs[2], ChunkRequest { piece: 0, begin: CHUNK_SIZE * 2, length: 100 });
        assert!(piece.has_requested_all_chunks());
        // nothing left to hand out
        assert!(piece.next_requests(16).is_empty());
    }

    #[test]
    fn request_budget_is_respected() {
        let len = CHUNK_SIZE as u64 * 4;
        let mut piece = Piece::new(7, 0, len, [0u8; 20]);

        assert_eq!(piece.next_requests(2).len(), 2);
        assert!(!piece.has_requested_all_chunks());
        assert_eq!(piece.next_requests(16).len(), 2);
        assert!(piece.has_requested_all_chunks());
    }

    #[test]
    fn receives_and_assembles() {
        let data = vec![7u8; CHUNK_SIZE as usize + 10];
        let mut piece = Piece::new(0, 0, data.len() as u64, hash_of(&data));

        piece.next_requests(16);
        let last = piece
            .add_chunk(0, Bytes::copy_from_slice(&data[..CHUNK_SIZE as usize]))
            .unwrap();
        assert!(!last);
        let last = piece
            .add_chunk(CHUNK_SIZE, Bytes::copy_from_slice(&data[CHUNK_SIZE as usize..]))
            .unwrap();
        assert!(last);

        let assembled = piece.take_data().unwrap();
        assert_eq!(assembled, data);
        assert!(piece.verify(&assembled));
        piece.mark_complete();
        assert!(piece.is_complete());
    }

    #[test]
    fn duplicate_chunks_do_not_double_count() {
        let mut piece = Piece::new(0, 0, CHUNK_SIZE as u64 * 2, [0u8; 20]);
        piece.next_requests(16);

        let chunk = Bytes::from(vec![1u8; CHUNK_SIZE as usize]);
        assert!(!piece.add_chunk(0, chunk.clone()).unwrap());
        assert!(!piece.add_chunk(0, chunk.clone()).unwrap());
        assert!(piece.add_chunk(CHUNK_SIZE, chunk).unwrap());
    }

    #[test]
    fn rejects_bad_chunks() {
        let mut piece = Piece::new(3, 0, CHUNK_SIZE as u64, [0u8; 20]);
        // not in progress yet
        assert!(piece
            .add_chunk(0, Bytes::from(vec![0u8; CHUNK_SIZE as usize]))
            .is_err());

        piece.next_requests(16);
        // misaligned offset
        assert!(piece.add_chunk(5, Bytes::from(vec![0u8; 16])).is_err());
        // out of range
        assert!(piece
            .add_chunk(CHUNK_SIZE * 2, Bytes::from(vec![0u8; 16]))
            .is_err());
        // wrong size
        assert!(piece.add_chunk(0, Bytes::from(vec![0u8; 3])).is_err());
    }

    #[test]
    fn reset_discards_progress() {
        let mut piece = Piece::new(0, 0, CHUNK_SIZE as u64, [0u8; 20]);
        piece.next_requests(16);
        piece
            .add_chunk(0, Bytes::from(vec![0u8; CHUNK_SIZE as usize]))
            .unwrap();
        piece.reset();
        assert!(!piece.has_requested_all_chunks());
        assert!(!piece.is_complete());
        // a fresh round of requests hands out everything again
        assert_eq!(piece.next_requests(16).len(), 1);
    }

    #[test]
    fn release_returns_outstanding_only() {
        let mut piece = Piece::new(0, 0, CHUNK_SIZE as u64 * 3, [0u8; 20]);
        piece.next_requests(16);
        piece
            .add_chunk(0, Bytes::from(vec![0u8; CHUNK_SIZE as usize]))
            .unwrap();

        piece.release_requests();
        // two chunks go back to missing, the received one stays
        assert_eq!(piece.next_requests(16).len(), 2);
    }
}
