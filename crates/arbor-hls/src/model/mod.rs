//! In-memory model of an HLS presentation.
//!
//! Ownership is a strict tree: [`Presentation`] owns [`Period`]s, which own
//! [`AdaptationSet`]s, which own [`Representation`]s, which own their segment
//! timelines. Child-to-parent links are expressed as positional indices
//! ([`RepAddress`]), which stay stable across discontinuity splits because
//! every split period copies the structural layout of its predecessor.

mod adaptation;
mod period;
mod representation;

pub use adaptation::AdaptationSet;
pub use period::{KeyResolution, PSSH_SET_CLEAR, Period, PsshSet, PsshSetData};
pub use representation::{NO_PTS, NO_RANGE, Representation, Segment};

use std::time::{Duration, Instant};

use url::Url;

use crate::error::HlsResult;
use crate::options::HlsOptions;
use crate::urls;

/// Timescale (ticks per second) for entities created during master-playlist
/// parsing.
pub const DEFAULT_TIMESCALE: u64 = 1_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum StreamType {
    NoType = 0,
    Video = 1,
    Audio = 2,
    Subtitle = 3,
}

impl StreamType {
    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerType {
    NoType,
    Invalid,
    Ts,
    Adts,
    Mp4,
    Text,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionState {
    Clear,
    /// Encrypted with a scheme this tree cannot hand to the host.
    Encrypted,
    /// Encrypted with a scheme the host resolves (Widevine).
    EncryptedSupported,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CryptoMode {
    #[default]
    None,
    AesCtr,
    AesCbc,
}

/// Positional address of a representation inside the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepAddress {
    pub period: usize,
    pub adaptation: usize,
    pub representation: usize,
}

impl RepAddress {
    pub fn new(period: usize, adaptation: usize, representation: usize) -> Self {
        Self {
            period,
            adaptation,
            representation,
        }
    }
}

/// Buffer-duration hints copied onto every created representation.
#[derive(Clone, Copy, Debug)]
pub struct BufferSettings {
    pub assured_duration_secs: u32,
    pub max_duration_secs: u32,
}

impl From<&HlsOptions> for BufferSettings {
    fn from(opts: &HlsOptions) -> Self {
        Self {
            assured_duration_secs: opts.buffer_assured_duration_secs,
            max_duration_secs: opts.buffer_max_duration_secs,
        }
    }
}

/// The whole presentation: an ordered sequence of periods plus the stream-
/// level state the parsers and the refresh driver maintain.
#[derive(Debug)]
pub struct Presentation {
    pub manifest_url: Option<Url>,
    /// Parameter-stripped effective URL of the master playlist.
    pub base_url: Option<Url>,
    pub periods: Vec<Period>,
    /// Index of the currently playing period.
    pub current_period: usize,
    /// Whether the presentation has a timeshift buffer (live).
    pub is_live: bool,
    /// Whether child playlists should be re-fetched periodically.
    pub refresh_playlist: bool,
    /// Live update cadence; `Duration::MAX` until a target duration is seen.
    pub update_interval: Duration,
    pub total_duration_secs: u64,
    /// Last `#EXT-X-DISCONTINUITY-SEQUENCE` value seen.
    pub discont_seq: u64,
    pub has_discont_seq: bool,
    /// First discontinuity sequence ever seen, captured once.
    pub initial_sequence: Option<u64>,
    pub last_updated: Option<Instant>,
    pub settings: BufferSettings,
    next_period_id: u32,
}

impl Presentation {
    pub fn new(settings: BufferSettings) -> Self {
        Self {
            manifest_url: None,
            base_url: None,
            periods: Vec::new(),
            current_period: 0,
            is_live: false,
            refresh_playlist: true,
            update_interval: Duration::MAX,
            total_duration_secs: 0,
            discont_seq: 0,
            has_discont_seq: false,
            initial_sequence: None,
            last_updated: None,
            settings,
            next_period_id: 0,
        }
    }

    /// Append a period, stamping it with a tree-unique id.
    pub fn add_period(&mut self, mut period: Period) -> usize {
        period.id = self.next_period_id;
        self.next_period_id += 1;
        self.periods.push(period);
        self.periods.len() - 1
    }

    pub fn period_index_by_id(&self, id: u32) -> Option<usize> {
        self.periods.iter().position(|p| p.id == id)
    }

    pub fn representation(&self, addr: RepAddress) -> Option<&Representation> {
        self.periods
            .get(addr.period)?
            .adaptation_sets
            .get(addr.adaptation)?
            .representations
            .get(addr.representation)
    }

    pub fn representation_mut(&mut self, addr: RepAddress) -> Option<&mut Representation> {
        self.periods
            .get_mut(addr.period)?
            .adaptation_sets
            .get_mut(addr.adaptation)?
            .representations
            .get_mut(addr.representation)
    }

    /// Resolve a manifest reference against the tree's base URL.
    pub fn build_download_url(&self, reference: &str) -> HlsResult<Url> {
        urls::resolve(self.base_url.as_ref(), reference)
    }
}
