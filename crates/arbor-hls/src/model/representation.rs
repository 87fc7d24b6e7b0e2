use url::Url;

use super::{ContainerType, DEFAULT_TIMESCALE, PSSH_SET_CLEAR};

/// Sentinel for segments without a byte range.
pub const NO_RANGE: u64 = u64::MAX;

/// Sentinel PTS for segments outside the timeline (initialization segments).
pub const NO_PTS: u64 = u64::MAX;

/// One chunk of media bytes on a representation's timeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub start_pts: u64,
    /// Duration in the representation's timescale.
    pub duration: u64,
    /// Segment URL; `None` when the parent representation carries a single
    /// template URL and segments address into it by byte range.
    pub url: Option<Url>,
    pub range_begin: u64,
    pub range_end: u64,
    /// Index into the owning period's PSSH-set table.
    pub pssh_set: u16,
}

impl Segment {
    pub fn new(start_pts: u64, duration: u64, pssh_set: u16) -> Self {
        Self {
            start_pts,
            duration,
            url: None,
            range_begin: NO_RANGE,
            range_end: NO_RANGE,
            pssh_set,
        }
    }

    pub fn has_byte_range(&self) -> bool {
        self.range_begin != NO_RANGE
    }
}

/// One encoded version of a stream; owns a segment timeline.
#[derive(Clone, Debug)]
pub struct Representation {
    /// Child-playlist URL. `None` for included (muxed) streams.
    pub source_url: Option<Url>,
    /// Single media URL for byte-range playlists.
    pub url: Option<Url>,
    pub bandwidth: u32,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub frame_rate_scale: u32,
    codecs: Vec<String>,
    pub audio_channels: u32,
    pub timescale: u64,
    /// Media sequence number of `timeline[0]`.
    pub start_number: u64,
    /// Total timeline duration in `timescale` ticks.
    pub duration: u64,
    pub container_type: ContainerType,
    /// Whether segments carry their own URLs (as opposed to byte ranges into
    /// a single media URL).
    pub has_segments_url: bool,
    pub has_initialization: bool,
    pub is_included_stream: bool,
    pub is_enabled: bool,
    pub is_downloaded: bool,
    pub is_waiting_for_segment: bool,
    /// Playback cursor: index into `timeline`.
    pub current_segment: Option<usize>,
    /// Period PSSH-set index attached at representation level (Widevine).
    pub pssh_set: u16,
    pub assured_buffer_duration_secs: u32,
    pub max_buffer_duration_secs: u32,
    pub initialization: Option<Segment>,
    pub timeline: Vec<Segment>,
}

impl Default for Representation {
    fn default() -> Self {
        Self::new()
    }
}

impl Representation {
    pub fn new() -> Self {
        Self {
            source_url: None,
            url: None,
            bandwidth: 0,
            width: 0,
            height: 0,
            frame_rate: 0,
            frame_rate_scale: 0,
            codecs: Vec::new(),
            audio_channels: 0,
            timescale: DEFAULT_TIMESCALE,
            start_number: 0,
            duration: 0,
            container_type: ContainerType::NoType,
            has_segments_url: false,
            has_initialization: false,
            is_included_stream: false,
            is_enabled: true,
            is_downloaded: false,
            is_waiting_for_segment: false,
            current_segment: None,
            pssh_set: PSSH_SET_CLEAR,
            assured_buffer_duration_secs: 0,
            max_buffer_duration_secs: 0,
            initialization: None,
            timeline: Vec::new(),
        }
    }

    /// Add codecs from a comma-separated list, with set semantics.
    pub fn add_codecs(&mut self, codecs: &str) {
        for codec in codecs.split(',') {
            let codec = codec.trim();
            if !codec.is_empty() && !self.codecs.iter().any(|c| c == codec) {
                self.codecs.push(codec.to_string());
            }
        }
    }

    pub fn codecs(&self) -> &[String] {
        &self.codecs
    }

    /// Substring match over the codec set, e.g. `contains_codec("avc1")`.
    pub fn contains_codec(&self, needle: &str) -> bool {
        self.codecs.iter().any(|c| c.contains(needle))
    }

    /// Duplicate the structural metadata for a discontinuity split: the new
    /// representation keeps identity attributes but owns no timeline, cursor,
    /// or key references of its own yet.
    pub fn copy_structure(&self) -> Self {
        Self {
            source_url: self.source_url.clone(),
            url: None,
            bandwidth: self.bandwidth,
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            frame_rate_scale: self.frame_rate_scale,
            codecs: self.codecs.clone(),
            audio_channels: self.audio_channels,
            timescale: self.timescale,
            start_number: 0,
            duration: 0,
            container_type: self.container_type,
            has_segments_url: false,
            has_initialization: false,
            is_included_stream: self.is_included_stream,
            is_enabled: self.is_enabled,
            is_downloaded: false,
            is_waiting_for_segment: false,
            current_segment: None,
            pssh_set: PSSH_SET_CLEAR,
            assured_buffer_duration_secs: self.assured_buffer_duration_secs,
            max_buffer_duration_secs: self.max_buffer_duration_secs,
            initialization: None,
            timeline: Vec::new(),
        }
    }

    /// Media sequence number of the segment under the cursor.
    pub fn current_segment_number(&self) -> Option<u64> {
        self.current_segment.map(|idx| self.start_number + idx as u64)
    }

    /// Re-aim the cursor after a timeline refresh.
    ///
    /// A previous number inside the new window maps to its new index; beyond
    /// the end clamps to the last segment; before the start (or absent)
    /// clears the cursor.
    pub fn remap_current_segment(&mut self, prev_number: Option<u64>) {
        self.current_segment = match prev_number {
            None | Some(0) => None,
            Some(n) if n < self.start_number || self.timeline.is_empty() => None,
            Some(n) => {
                let last = self.start_number + self.timeline.len() as u64 - 1;
                Some((n.min(last) - self.start_number) as usize)
            }
        };
    }

    /// Whether a segment after the cursor exists (the first segment when the
    /// cursor is unset).
    pub fn has_next_segment(&self) -> bool {
        match self.current_segment {
            Some(idx) => idx + 1 < self.timeline.len(),
            None => !self.timeline.is_empty(),
        }
    }
}
