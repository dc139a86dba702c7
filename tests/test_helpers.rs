//! Shared fixtures for the coordinator tests: a builder that produces valid
//! bencoded descriptors with real piece hashes, plus helpers to lay the
//! payload (or a corrupted version of it) out on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use spindrift::bencode::Value;

/// Builds a descriptor and its payload for tests.
pub struct TorrentFixture {
    pub name: String,
    pub piece_length: u64,
    pub announce_urls: Vec<String>,
    /// (relative path, content) in payload order
    pub files: Vec<(PathBuf, Vec<u8>)>,
}

impl TorrentFixture {
    pub fn new(name: impl Into<String>, piece_length: u64) -> Self {
        Self {
            name: name.into(),
            piece_length,
            announce_urls: vec!["http://tracker.test/announce".to_string()],
            files: Vec::new(),
        }
    }

    /// Single-file fixture with the given content.
    pub fn single_file(name: impl Into<String>, piece_length: u64, content: &[u8]) -> Self {
        let name = name.into();
        let mut fixture = Self::new(name.clone(), piece_length);
        fixture.files.push((PathBuf::from(name), content.to_vec()));
        fixture
    }

    pub fn add_file(mut self, path: impl Into<PathBuf>, content: Vec<u8>) -> Self {
        self.files.push((path.into(), content));
        self
    }

    pub fn announce_urls(mut self, urls: &[&str]) -> Self {
        self.announce_urls = urls.iter().map(|u| u.to_string()).collect();
        self
    }

    /// Concatenated payload bytes.
    pub fn payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (_, content) in &self.files {
            out.extend_from_slice(content);
        }
        out
    }

    /// Piece hashes over the payload.
    pub fn piece_hashes(&self) -> Vec<[u8; 20]> {
        self.payload()
            .chunks(self.piece_length as usize)
            .map(|chunk| {
                let mut hasher = Sha1::new();
                hasher.update(chunk);
                hasher.finalize().into()
            })
            .collect()
    }

    /// Bytes of piece `index`.
    pub fn piece_data(&self, index: usize) -> Vec<u8> {
        self.payload()
            .chunks(self.piece_length as usize)
            .nth(index)
            .map(|c| c.to_vec())
            .unwrap_or_default()
    }

    /// Encode the descriptor.
    pub fn descriptor(&self) -> Vec<u8> {
        let single_file = self.files.len() == 1;

        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), Value::Bytes(self.name.clone().into_bytes()));
        info.insert(
            b"piece length".to_vec(),
            Value::Integer(self.piece_length as i64),
        );
        let pieces: Vec<u8> = self
            .piece_hashes()
            .iter()
            .flat_map(|h| h.iter().copied())
            .collect();
        info.insert(b"pieces".to_vec(), Value::Bytes(pieces));

        if single_file {
            info.insert(
                b"length".to_vec(),
                Value::Integer(self.files[0].1.len() as i64),
            );
        } else {
            let entries: Vec<Value> = self
                .files
                .iter()
                .map(|(path, content)| {
                    let mut entry = BTreeMap::new();
                    entry.insert(b"length".to_vec(), Value::Integer(content.len() as i64));
                    let components: Vec<Value> = path
                        .components()
                        .map(|c| Value::Bytes(c.as_os_str().to_string_lossy().into_owned().into_bytes()))
                        .collect();
                    entry.insert(b"path".to_vec(), Value::List(components));
                    Value::Dict(entry)
                })
                .collect();
            info.insert(b"files".to_vec(), Value::List(entries));
        }

        let mut root = BTreeMap::new();
        if let Some(first) = self.announce_urls.first() {
            root.insert(
                b"announce".to_vec(),
                Value::Bytes(first.clone().into_bytes()),
            );
        }
        if self.announce_urls.len() > 1 {
            let tiers = Value::List(vec![Value::List(
                self.announce_urls
                    .iter()
                    .map(|u| Value::Bytes(u.clone().into_bytes()))
                    .collect(),
            )]);
            root.insert(b"announce-list".to_vec(), tiers);
        }
        root.insert(b"info".to_vec(), Value::Dict(info));

        Value::Dict(root).encode()
    }

    /// Write the full payload to disk the way the file set lays it out.
    pub async fn write_payload(&self, download_dir: &Path) {
        let single_file = self.files.len() == 1;
        for (path, content) in &self.files {
            let target = if single_file {
                download_dir.join(&self.name)
            } else {
                download_dir.join(&self.name).join(path)
            };
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.unwrap();
            }
            tokio::fs::write(&target, content).await.unwrap();
        }
    }

    /// Write the payload with only the listed pieces intact; every other
    /// piece's extent is overwritten with its bitwise complement so its hash
    /// cannot match.
    pub async fn write_payload_with_pieces(&self, download_dir: &Path, keep: &[usize]) {
        assert_eq!(self.files.len(), 1, "partial payload helper is single-file only");
        let mut payload = self.payload();
        let piece_length = self.piece_length as usize;
        let num_pieces = payload.len().div_ceil(piece_length);
        for index in 0..num_pieces {
            if keep.contains(&index) {
                continue;
            }
            let start = index * piece_length;
            let end = (start + piece_length).min(payload.len());
            for byte in &mut payload[start..end] {
                *byte = !*byte;
            }
        }
        let target = download_dir.join(&self.name);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(&target, &payload).await.unwrap();
    }
}
