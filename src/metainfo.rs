//! Metainfo descriptor parsing.
//!
//! Produces the torrent plan the coordinator is built from: name, piece
//! geometry, piece hashes, the file layout, and the announce URL set. The
//! info-hash is SHA-1 over the `info` dictionary as it appeared in the
//! source bytes, never over a re-encoding.

use sha1::{Digest, Sha1};
use std::path::PathBuf;

use crate::bencode::{self, Value};
use crate::error::{Error, Result};

/// SHA-1 digest (20 bytes)
pub type Sha1Hash = [u8; 20];

/// Parsed torrent descriptor
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// SHA-1 of the raw bencoded info dictionary
    pub info_hash: Sha1Hash,
    /// Display name; directory name for multi-file torrents
    pub name: String,
    /// Nominal bytes per piece
    pub piece_length: u64,
    /// Total payload size (sum of file lengths)
    pub total_size: u64,
    /// One expected hash per piece
    pub piece_hashes: Vec<Sha1Hash>,
    /// Files in payload order
    pub files: Vec<FileEntry>,
    /// True when the descriptor used `info.length` rather than `info.files`
    pub single_file: bool,
    /// Announce URLs: `announce` then the flattened `announce-list`,
    /// de-duplicated, insertion order preserved
    pub announce_urls: Vec<String>,
    /// Optional `created by` tag
    pub created_by: Option<String>,
    /// Optional creation timestamp (Unix epoch)
    pub creation_date: Option<i64>,
}

/// A single file in the payload
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Path relative to the torrent directory (just the name for
    /// single-file torrents)
    pub path: PathBuf,
    /// File size in bytes
    pub length: u64,
    /// Byte offset of this file within the flat payload
    pub offset: u64,
}

impl Metainfo {
    /// Parse a descriptor from its raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let root = Value::decode(data)?;
        if root.as_dict().is_none() {
            return Err(Error::metainfo("root is not a dictionary"));
        }

        let info_bytes = bencode::info_dict_bytes(data)?;
        let mut hasher = Sha1::new();
        hasher.update(info_bytes);
        let info_hash: Sha1Hash = hasher.finalize().into();

        let info = root
            .get("info")
            .ok_or_else(|| Error::metainfo("missing 'info' dictionary"))?;
        if info.as_dict().is_none() {
            return Err(Error::metainfo("'info' is not a dictionary"));
        }

        let name = info
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::metainfo("missing 'name' in info"))?
            .to_string();

        let piece_length = info
            .get("piece length")
            .and_then(|v| v.as_uint())
            .ok_or_else(|| Error::metainfo("missing 'piece length' in info"))?;
        if piece_length == 0 {
            return Err(Error::metainfo("'piece length' must be positive"));
        }

        let pieces_bytes = info
            .get("pieces")
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| Error::metainfo("missing 'pieces' in info"))?;
        if pieces_bytes.len() % 20 != 0 {
            return Err(Error::metainfo(format!(
                "'pieces' length {} is not a multiple of 20",
                pieces_bytes.len()
            )));
        }
        let piece_hashes: Vec<Sha1Hash> = pieces_bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let (files, total_size, single_file) = match (info.get("length"), info.get("files")) {
            (Some(_), Some(_)) => {
                return Err(Error::metainfo("info has both 'length' and 'files'"));
            }
            (None, None) => {
                return Err(Error::metainfo("info has neither 'length' nor 'files'"));
            }
            (Some(length), None) => {
                let length = length
                    .as_uint()
                    .ok_or_else(|| Error::metainfo("invalid 'length'"))?;
                let entry = FileEntry {
                    path: PathBuf::from(&name),
                    length,
                    offset: 0,
                };
                (vec![entry], length, true)
            }
            (None, Some(files)) => {
                let (files, total) = parse_file_list(files)?;
                (files, total, false)
            }
        };

        if total_size == 0 {
            return Err(Error::metainfo("torrent payload is empty"));
        }

        let expected_pieces = total_size.div_ceil(piece_length);
        if piece_hashes.len() as u64 != expected_pieces {
            return Err(Error::metainfo(format!(
                "{} piece hashes but {} bytes at {} bytes per piece require {}",
                piece_hashes.len(),
                total_size,
                piece_length,
                expected_pieces
            )));
        }

        let announce_urls = collect_announce_urls(&root);

        let created_by = root
            .get("created by")
            .and_then(|v| v.as_str())
            .map(String::from);
        let creation_date = root.get("creation date").and_then(|v| v.as_int());

        Ok(Self {
            info_hash,
            name,
            piece_length,
            total_size,
            piece_hashes,
            files,
            single_file,
            announce_urls,
            created_by,
            creation_date,
        })
    }

    /// Total number of pieces.
    pub fn num_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Byte range `[start, end)` of a piece within the payload.
    pub fn piece_range(&self, index: usize) -> Option<(u64, u64)> {
        if index >= self.num_pieces() {
            return None;
        }
        let start = index as u64 * self.piece_length;
        let end = (start + self.piece_length).min(self.total_size);
        Some((start, end))
    }

    /// Length of a piece; only the last piece may be short.
    pub fn piece_size(&self, index: usize) -> Option<u64> {
        self.piece_range(index).map(|(start, end)| end - start)
    }

    /// Expected hash for a piece.
    pub fn piece_hash(&self, index: usize) -> Option<&Sha1Hash> {
        self.piece_hashes.get(index)
    }

    /// Info-hash as lowercase hex.
    pub fn info_hash_hex(&self) -> String {
        self.info_hash.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn parse_file_list(value: &Value) -> Result<(Vec<FileEntry>, u64)> {
    let list = value
        .as_list()
        .ok_or_else(|| Error::metainfo("'files' is not a list"))?;
    if list.is_empty() {
        return Err(Error::metainfo("'files' list is empty"));
    }

    let mut files = Vec::with_capacity(list.len());
    let mut offset = 0u64;
    for entry in list {
        let length = entry
            .get("length")
            .and_then(|v| v.as_uint())
            .ok_or_else(|| Error::metainfo("file entry missing 'length'"))?;
        let components = entry
            .get("path")
            .and_then(|v| v.as_list())
            .ok_or_else(|| Error::metainfo("file entry missing 'path'"))?;
        if components.is_empty() {
            return Err(Error::metainfo("file entry has empty 'path'"));
        }

        let mut path = PathBuf::new();
        for component in components {
            let part = component
                .as_str()
                .ok_or_else(|| Error::metainfo("path component is not a string"))?;
            path.push(part);
        }

        files.push(FileEntry {
            path,
            length,
            offset,
        });
        offset += length;
    }

    Ok((files, offset))
}

/// Union of `announce` and the flattened `announce-list`, de-duplicated with
/// insertion order preserved. Entries that do not parse as URLs are skipped.
fn collect_announce_urls(root: &Value) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        if url::Url::parse(candidate).is_err() {
            tracing::debug!(url = candidate, "skipping unparseable announce URL");
            return;
        }
        if !urls.iter().any(|u| u == candidate) {
            urls.push(candidate.to_string());
        }
    };

    if let Some(announce) = root.get("announce").and_then(|v| v.as_str()) {
        push(announce);
    }
    if let Some(tiers) = root.get("announce-list").and_then(|v| v.as_list()) {
        for tier in tiers {
            if let Some(tier) = tier.as_list() {
                for entry in tier {
                    if let Some(u) = entry.as_str() {
                        push(u);
                    }
                }
            }
        }
    }

    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_file_doc() -> Vec<u8> {
        // "abcdef" split into two pieces of 4 and 2 bytes
        let mut pieces = Vec::new();
        for chunk in [&b"abcd"[..], &b"ef"[..]] {
            let mut h = Sha1::new();
            h.update(chunk);
            pieces.extend_from_slice(&h.finalize());
        }
        let mut doc = Vec::new();
        doc.extend_from_slice(b"d8:announce21:http://tr.example/ann4:infod");
        doc.extend_from_slice(b"6:lengthi6e4:name5:a.bin12:piece lengthi4e");
        doc.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
        doc.extend_from_slice(&pieces);
        doc.extend_from_slice(b"ee");
        doc
    }

    #[test]
    fn parses_single_file() {
        let meta = Metainfo::parse(&single_file_doc()).unwrap();
        assert_eq!(meta.name, "a.bin");
        assert_eq!(meta.piece_length, 4);
        assert_eq!(meta.total_size, 6);
        assert_eq!(meta.num_pieces(), 2);
        assert!(meta.single_file);
        assert_eq!(meta.files.len(), 1);
        assert_eq!(meta.files[0].length, 6);
        assert_eq!(meta.files[0].offset, 0);
        assert_eq!(meta.announce_urls, vec!["http://tr.example/ann"]);
    }

    #[test]
    fn piece_geometry() {
        let meta = Metainfo::parse(&single_file_doc()).unwrap();
        assert_eq!(meta.piece_range(0), Some((0, 4)));
        assert_eq!(meta.piece_range(1), Some((4, 6)));
        assert_eq!(meta.piece_size(1), Some(2));
        assert_eq!(meta.piece_range(2), None);
    }

    #[test]
    fn info_hash_matches_raw_bytes() {
        let doc = single_file_doc();
        let meta = Metainfo::parse(&doc).unwrap();

        let raw = bencode::info_dict_bytes(&doc).unwrap();
        let mut h = Sha1::new();
        h.update(raw);
        let expected: Sha1Hash = h.finalize().into();
        assert_eq!(meta.info_hash, expected);
        assert_eq!(meta.info_hash_hex().len(), 40);

        // decoding and canonically re-encoding the info dict reproduces the
        // hashed bytes
        let reencoded = Value::decode(raw).unwrap().encode();
        assert_eq!(reencoded.as_slice(), raw);
    }

    #[test]
    fn rejects_malformed_descriptors() {
        // not bencode at all
        assert!(Metainfo::parse(b"not a torrent").is_err());
        // no info dict
        assert!(Metainfo::parse(b"d8:announce9:http://tre").is_err());
        // pieces not a multiple of 20
        let doc = b"d4:infod6:lengthi6e4:name1:a12:piece lengthi4e6:pieces5:abcdeee";
        assert!(Metainfo::parse(doc).is_err());
        // zero-byte payload
        let doc = b"d4:infod6:lengthi0e4:name1:a12:piece lengthi4e6:pieces0:ee";
        assert!(Metainfo::parse(doc).is_err());
    }

    #[test]
    fn rejects_length_and_files_together() {
        let doc = b"d4:infod5:filesld6:lengthi1e4:pathl1:xeee6:lengthi1e4:name1:a12:piece lengthi4e6:pieces20:aaaaaaaaaaaaaaaaaaaaee";
        assert!(Metainfo::parse(doc).is_err());
    }

    #[test]
    fn multi_file_layout_and_announce_list() {
        // files: sub/x (3 bytes) then y (2 bytes); piece length 4 -> 2 pieces
        let payload = b"abcde";
        let mut pieces = Vec::new();
        for chunk in [&payload[..4], &payload[4..]] {
            let mut h = Sha1::new();
            h.update(chunk);
            pieces.extend_from_slice(&h.finalize());
        }
        let mut doc = Vec::new();
        doc.extend_from_slice(b"d8:announce13:udp://one/ann13:announce-listll13:udp://one/ann14:http://two/annee4:infod");
        doc.extend_from_slice(b"5:filesld6:lengthi3e4:pathl3:sub1:xeed6:lengthi2e4:pathl1:yeee");
        doc.extend_from_slice(b"4:name1:t12:piece lengthi4e");
        doc.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
        doc.extend_from_slice(&pieces);
        doc.extend_from_slice(b"ee");

        let meta = Metainfo::parse(&doc).unwrap();
        assert!(!meta.single_file);
        assert_eq!(meta.total_size, 5);
        assert_eq!(meta.num_pieces(), 2);
        assert_eq!(meta.files[0].path, PathBuf::from("sub/x"));
        assert_eq!(meta.files[0].offset, 0);
        assert_eq!(meta.files[1].path, PathBuf::from("y"));
        assert_eq!(meta.files[1].offset, 3);
        // de-duplicated, insertion order kept
        assert_eq!(
            meta.announce_urls,
            vec!["udp://one/ann", "http://two/ann"]
        );
    }
}
