//! Tracker announce loop.
//!
//! One [`Tracker`] per announce URL. `start` spawns the loop: an initial
//! `started` announce, then regular announces at the tracker's interval,
//! `completed` once when the torrent finishes, and a terminal `stopped`
//! announce on shutdown. Failures put the tracker in `Error` state and retry
//! with exponential backoff; a failing tracker never poll-spams and never
//! affects torrent status.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Serialize;
use tokio::sync::{watch, Notify};

use crate::bencode::Value;
use crate::error::{Error, Result};
use crate::metainfo::Sha1Hash;

/// Announce request timeout
const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(15);

/// Bounds applied to the interval a tracker hands back
const MIN_INTERVAL: u64 = 60;
const MAX_INTERVAL: u64 = 3600;

/// Error backoff: base doubling up to the cap
const BACKOFF_BASE: Duration = Duration::from_secs(30);
const BACKOFF_CAP: Duration = Duration::from_secs(900);

/// Peers requested per announce
const NUMWANT: u32 = 50;

/// Announce event parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    /// Regular announce, no event parameter
    None,
    Started,
    Stopped,
    Completed,
}

impl AnnounceEvent {
    fn query_value(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        }
    }
}

/// Counters the announce loop reads on every cycle. The coordinator keeps
/// them current; trackers never see the torrent itself.
#[derive(Debug)]
pub struct AnnounceStats {
    pub info_hash: Sha1Hash,
    pub peer_id: [u8; 20],
    pub port: u16,
    uploaded: AtomicU64,
    downloaded: AtomicU64,
    left: AtomicU64,
}

impl AnnounceStats {
    pub fn new(info_hash: Sha1Hash, peer_id: [u8; 20], port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
            left: AtomicU64::new(left),
        }
    }

    pub fn add_uploaded(&self, bytes: u64) {
        self.uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn set_left(&self, bytes: u64) {
        self.left.store(bytes, Ordering::Relaxed);
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn left(&self) -> u64 {
        self.left.load(Ordering::Relaxed)
    }
}

/// A peer candidate from an announce response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub ip: String,
    pub port: u16,
    pub peer_id: Option<[u8; 20]>,
}

impl PeerAddr {
    /// Literal-address form; hostnames are skipped (no DNS in this layer).
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.ip.parse().ok()?;
        Some(SocketAddr::new(ip, self.port))
    }
}

/// A successful announce, as delivered to the coordinator.
#[derive(Debug, Clone)]
pub struct AnnounceData {
    pub seeders: u32,
    pub leechers: u32,
    pub interval: u64,
    pub peers: Vec<PeerAddr>,
    pub warning: Option<String>,
}

/// Announce-loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerState {
    Stopped,
    Announcing,
    Waiting,
    Error,
}

/// Observer row for [`crate::torrent::Torrent::trackers`].
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSummary {
    pub url: String,
    pub state: TrackerState,
    pub error: Option<String>,
}

/// One announce loop bound to a single tracker URL.
#[derive(Debug)]
pub struct Tracker {
    url: String,
    state: RwLock<TrackerState>,
    error_message: RwLock<Option<String>>,
    /// Last (seeders, leechers) this tracker contributed to the aggregates.
    counts: RwLock<(u32, u32)>,
    shutdown: watch::Sender<bool>,
    wake: Notify,
    pending_completed: AtomicBool,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Tracker {
    pub fn new(url: impl Into<String>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            url: url.into(),
            state: RwLock::new(TrackerState::Stopped),
            error_message: RwLock::new(None),
            counts: RwLock::new((0, 0)),
            shutdown,
            wake: Notify::new(),
            pending_completed: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> TrackerState {
        *self.state.read()
    }

    pub fn summary(&self) -> TrackerSummary {
        TrackerSummary {
            url: self.url.clone(),
            state: self.state(),
            error: self.error_message.read().clone(),
        }
    }

    /// Replace this tracker's swarm-count contribution, returning the
    /// previous one so the caller can adjust its aggregates.
    pub fn swap_counts(&self, seeders: u32, leechers: u32) -> (u32, u32) {
        std::mem::replace(&mut *self.counts.write(), (seeders, leechers))
    }

    /// Begin the announce loop. Each resolved announce is delivered through
    /// `callback`: `Some(data)` on success, `None` on failure.
    pub fn start(
        self: &Arc<Self>,
        stats: Arc<AnnounceStats>,
        callback: impl Fn(Option<AnnounceData>) + Send + Sync + 'static,
    ) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        let _ = self.shutdown.send(false);
        let tracker = Arc::clone(self);
        let task = tokio::spawn(async move {
            tracker.announce_loop(stats, callback).await;
        });
        *self.task.lock() = Some(task);
    }

    /// Ask the loop to send the `completed` announce on its next cycle.
    pub fn notify_complete(&self) {
        self.pending_completed.store(true, Ordering::Relaxed);
        self.wake.notify_one();
    }

    /// Signal the loop to send the terminal `stopped` announce and exit.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        self.wake.notify_one();
    }

    async fn announce_loop(
        self: Arc<Self>,
        stats: Arc<AnnounceStats>,
        callback: impl Fn(Option<AnnounceData>) + Send + Sync + 'static,
    ) {
        let client = match reqwest::Client::builder().timeout(ANNOUNCE_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                *self.state.write() = TrackerState::Error;
                *self.error_message.write() = Some(e.to_string());
                return;
            }
        };
        let mut shutdown = self.shutdown.subscribe();
        let mut event = AnnounceEvent::Started;
        let mut backoff = BACKOFF_BASE;
        let mut announced = false;

        loop {
            if *shutdown.borrow() {
                break;
            }
            if self.pending_completed.swap(false, Ordering::Relaxed) {
                event = AnnounceEvent::Completed;
            }

            *self.state.write() = TrackerState::Announcing;
            let wait = match announce_http(&client, &self.url, &stats, event).await {
                Ok(data) => {
                    tracing::debug!(
                        url = %self.url,
                        seeders = data.seeders,
                        leechers = data.leechers,
                        peers = data.peers.len(),
                        "announce ok"
                    );
                    announced = true;
                    *self.state.write() = TrackerState::Waiting;
                    *self.error_message.write() = None;
                    backoff = BACKOFF_BASE;
                    event = AnnounceEvent::None;
                    let wait = Duration::from_secs(data.interval.clamp(MIN_INTERVAL, MAX_INTERVAL));
                    callback(Some(data));
                    wait
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, "announce failed");
                    *self.state.write() = TrackerState::Error;
                    *self.error_message.write() = Some(e.to_string());
                    callback(None);
                    let wait = backoff;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                    wait
                }
            };

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }

        // Terminal announce; best effort, nothing to deliver.
        if announced {
            let _ = announce_http(&client, &self.url, &stats, AnnounceEvent::Stopped).await;
        }
        *self.state.write() = TrackerState::Stopped;
    }
}

/// Azureus-style peer id: client tag plus random tail.
pub fn generate_peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..8].copy_from_slice(b"-SD0101-");
    let mut rng = rand::thread_rng();
    for byte in &mut id[8..] {
        *byte = rng.gen_range(b'0'..=b'9');
    }
    id
}

fn percent_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("%{b:02X}")).collect()
}

/// One HTTP announce round-trip.
async fn announce_http(
    client: &reqwest::Client,
    tracker_url: &str,
    stats: &AnnounceStats,
    event: AnnounceEvent,
) -> Result<AnnounceData> {
    let mut url = String::from(tracker_url);
    url.push(if tracker_url.contains('?') { '&' } else { '?' });
    url.push_str("info_hash=");
    url.push_str(&percent_encode(&stats.info_hash));
    url.push_str("&peer_id=");
    url.push_str(&percent_encode(&stats.peer_id));
    url.push_str(&format!(
        "&port={}&uploaded={}&downloaded={}&left={}&compact=1&numwant={}",
        stats.port,
        stats.uploaded(),
        stats.downloaded(),
        stats.left(),
        NUMWANT
    ));
    let event_value = event.query_value();
    if !event_value.is_empty() {
        url.push_str("&event=");
        url.push_str(event_value);
    }

    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(Error::tracker(format!(
            "tracker returned status {}",
            response.status()
        )));
    }
    let body = response.bytes().await?;
    parse_announce_response(&body)
}

/// Decode a bencoded announce response, accepting both the compact and the
/// dictionary peer models.
pub fn parse_announce_response(body: &[u8]) -> Result<AnnounceData> {
    let value =
        Value::decode(body).map_err(|e| Error::tracker(format!("unparseable response: {e}")))?;
    if value.as_dict().is_none() {
        return Err(Error::tracker("response is not a dictionary"));
    }

    if let Some(reason) = value.get("failure reason").and_then(|v| v.as_str()) {
        return Err(Error::tracker(reason.to_string()));
    }

    let interval = value
        .get("interval")
        .and_then(|v| v.as_uint())
        .ok_or_else(|| Error::tracker("response missing 'interval'"))?;

    let seeders = value
        .get("complete")
        .and_then(|v| v.as_uint())
        .unwrap_or(0) as u32;
    let leechers = value
        .get("incomplete")
        .and_then(|v| v.as_uint())
        .unwrap_or(0) as u32;
    let warning = value
        .get("warning message")
        .and_then(|v| v.as_str())
        .map(String::from);

    let peers = match value.get("peers") {
        Some(Value::Bytes(compact)) => parse_compact_peers(compact),
        Some(Value::List(entries)) => parse_dict_peers(entries),
        _ => Vec::new(),
    };

    Ok(AnnounceData {
        seeders,
        leechers,
        interval,
        peers,
        warning,
    })
}

/// 6 bytes per peer: IPv4 address then big-endian port.
fn parse_compact_peers(compact: &[u8]) -> Vec<PeerAddr> {
    compact
        .chunks_exact(6)
        .map(|chunk| PeerAddr {
            ip: format!("{}.{}.{}.{}", chunk[0], chunk[1], chunk[2], chunk[3]),
            port: u16::from_be_bytes([chunk[4], chunk[5]]),
            peer_id: None,
        })
        .collect()
}

fn parse_dict_peers(entries: &[Value]) -> Vec<PeerAddr> {
    entries
        .iter()
        .filter_map(|entry| {
            let ip = entry.get("ip")?.as_str()?.to_string();
            let port = entry.get("port")?.as_uint()? as u16;
            let peer_id = entry
                .get("peer id")
                .and_then(|v| v.as_bytes())
                .and_then(|b| <[u8; 20]>::try_from(b).ok());
            Some(PeerAddr { ip, port, peer_id })
        })
        .collect()
}
