/// A parsed media playlist.
///
/// Segment order is playback order. `media_sequence` is the number of
/// `segments[0]` in the stream's global sequence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Playlist {
    pub uri: String,
    pub resolved_uri: Option<String>,
    pub media_sequence: u64,
    /// Seconds
    pub target_duration: f64,
    pub end_list: bool,
    pub segments: Vec<Segment>,
    /// Indices of segments carrying a discontinuity marker.
    pub discontinuity_starts: Vec<usize>,
}

impl Playlist {
    /// `true` while the server may still append segments.
    pub fn is_live(&self) -> bool {
        !self.end_list
    }

    /// URI used as the base for relative segment and key URIs.
    pub fn base_uri(&self) -> &str {
        self.resolved_uri.as_deref().unwrap_or(&self.uri)
    }

    /// Global sequence number of the segment at `index`.
    pub fn sequence_of(&self, index: usize) -> u64 {
        self.media_sequence + index as u64
    }

    /// Local index of the segment with global sequence `msn`, if listed.
    pub fn index_of_sequence(&self, msn: u64) -> Option<usize> {
        let index = msn.checked_sub(self.media_sequence)? as usize;
        (index < self.segments.len()).then_some(index)
    }

    pub(crate) fn rebuild_discontinuity_starts(&mut self) {
        self.discontinuity_starts = self
            .segments
            .iter()
            .enumerate()
            .filter(|(_, segment)| segment.discontinuity)
            .map(|(index, _)| index)
            .collect();
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Segment {
    pub uri: String,
    pub resolved_uri: Option<String>,
    pub byte_range: Option<ByteRange>,
    pub key: Option<SegmentKey>,
    pub discontinuity: bool,
    /// Declared duration in seconds, refined once the segment is buffered.
    pub duration: f64,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub timing: Option<TimingInfo>,
}

impl Segment {
    pub fn new(uri: impl Into<String>, duration: f64) -> Self {
        Self {
            uri: uri.into(),
            duration,
            ..Default::default()
        }
    }

    /// URI to request, falling back to the raw playlist URI.
    pub fn request_uri(&self) -> &str {
        self.resolved_uri.as_deref().unwrap_or(&self.uri)
    }

    /// Copies fields known on `old` that this segment lacks.
    ///
    /// Fields this segment already carries are never overwritten.
    pub fn fill_missing_from(&mut self, old: &Segment) {
        if self.resolved_uri.is_none() {
            self.resolved_uri = old.resolved_uri.clone();
        }
        if self.byte_range.is_none() {
            self.byte_range = old.byte_range;
        }
        match (&mut self.key, &old.key) {
            (None, Some(old_key)) => self.key = Some(old_key.clone()),
            (Some(key), Some(old_key)) if key.uri == old_key.uri => key.fill_missing_from(old_key),
            _ => {}
        }
        self.discontinuity |= old.discontinuity;
        if self.start.is_none() {
            self.start = old.start;
        }
        if self.end.is_none() {
            self.end = old.end;
        }
        if self.timing.is_none() {
            self.timing = old.timing;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// Inclusive last byte.
    pub fn last_byte(&self) -> u64 {
        (self.offset + self.length).saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentKey {
    pub method: String,
    pub uri: String,
    pub resolved_uri: Option<String>,
    pub iv: Option<[u8; 16]>,
    /// Key material, once fetched.
    pub bytes: Option<[u8; 16]>,
}

impl SegmentKey {
    pub fn request_uri(&self) -> &str {
        self.resolved_uri.as_deref().unwrap_or(&self.uri)
    }

    fn fill_missing_from(&mut self, old: &SegmentKey) {
        if self.resolved_uri.is_none() {
            self.resolved_uri = old.resolved_uri.clone();
        }
        if self.iv.is_none() {
            self.iv = old.iv;
        }
        if self.bytes.is_none() {
            self.bytes = old.bytes;
        }
    }
}

/// First and last decode timestamps (seconds) of one elementary stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DtsSpan {
    pub first: f64,
    pub last: f64,
}

/// Timing observed by inspecting a downloaded segment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimingInfo {
    pub video: Option<DtsSpan>,
    pub audio: Option<DtsSpan>,
}

impl TimingInfo {
    /// Earliest decode timestamp, preferring video.
    pub fn first_dts(&self) -> Option<f64> {
        self.video.or(self.audio).map(|span| span.first)
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }
}

/// Timing the segment loader learned about one segment after appending it.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTimingUpdate {
    pub playlist_uri: String,
    pub media_sequence_number: u64,
    pub end: f64,
    pub duration: f64,
    pub timing: Option<TimingInfo>,
}

impl Segment {
    pub(crate) fn apply_timing(&mut self, update: &SegmentTimingUpdate) {
        self.end = Some(update.end);
        self.duration = update.duration;
        if update.timing.is_some() {
            self.timing = update.timing;
        }
    }
}
