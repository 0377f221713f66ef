use std::fmt;
use std::io::Write;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::playlist::TimingInfo;
use crate::ranges::TimeRanges;

/// What the loader knows about the bytes it appends.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AppendHint {
    /// Presentation time the playlist places the segment at.
    pub start: Option<f64>,
    /// Declared segment duration in seconds.
    pub duration: f64,
    pub timing: Option<TimingInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Complete,
    /// The host will call
    /// [`SegmentLoader::handle_append_complete`](crate::loader::SegmentLoader::handle_append_complete)
    /// once the append finishes.
    Pending,
}

/// Media buffer the loader feeds.
pub trait BufferSink {
    fn append_buffer(&mut self, bytes: Bytes, hint: AppendHint) -> AppendOutcome;

    fn buffered(&self) -> TimeRanges;

    fn set_timestamp_offset(&mut self, offset: f64);

    fn timestamp_offset(&self) -> f64;

    fn remove(&mut self, start: f64, end: f64);
}

/// In-memory buffer that derives buffered ranges from segment timing.
///
/// Setting the timestamp offset anchors that decode timestamp at the end of
/// the previous append, or at the hinted start when nothing was appended
/// yet. Appends with observed timing land relative to that anchor; appends
/// without it are placed right after the previous one. Bytes are mirrored to
/// the optional writer, otherwise retained in memory.
pub struct MemoryBufferSink {
    buffered: TimeRanges,
    timestamp_offset: f64,
    anchor: Option<f64>,
    last_append_end: Option<f64>,
    bytes_appended: u64,
    appends: usize,
    retained: Vec<Bytes>,
    writer: Option<Box<dyn Write + Send>>,
}

impl fmt::Debug for MemoryBufferSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBufferSink")
            .field("buffered", &self.buffered)
            .field("timestamp_offset", &self.timestamp_offset)
            .field("bytes_appended", &self.bytes_appended)
            .field("appends", &self.appends)
            .field("has_writer", &self.writer.is_some())
            .finish()
    }
}

impl Default for MemoryBufferSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBufferSink {
    pub fn new() -> Self {
        Self {
            buffered: TimeRanges::new(),
            timestamp_offset: 0.0,
            anchor: None,
            last_append_end: None,
            bytes_appended: 0,
            appends: 0,
            retained: Vec::new(),
            writer: None,
        }
    }

    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Some(writer),
            ..Self::new()
        }
    }

    pub fn bytes_appended(&self) -> u64 {
        self.bytes_appended
    }

    pub fn appends(&self) -> usize {
        self.appends
    }

    /// Appended payloads, when no writer is attached.
    pub fn retained(&self) -> &[Bytes] {
        &self.retained
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl BufferSink for MemoryBufferSink {
    fn append_buffer(&mut self, bytes: Bytes, hint: AppendHint) -> AppendOutcome {
        let fallback = self.last_append_end.or(hint.start).unwrap_or(0.0);
        let start = match hint.timing.and_then(|timing| timing.first_dts()) {
            Some(first_dts) => {
                let anchor = *self.anchor.get_or_insert(fallback);
                anchor + (first_dts - self.timestamp_offset)
            }
            None => fallback,
        };
        let end = start + hint.duration;
        self.buffered.add(start, end);
        self.last_append_end = Some(end);
        self.bytes_appended += bytes.len() as u64;
        self.appends += 1;
        debug!(start, end, len = bytes.len(), buffered = %self.buffered, "Appended segment");

        match self.writer.as_mut() {
            Some(writer) => {
                if let Err(e) = writer.write_all(&bytes) {
                    warn!(error = %e, "Failed to mirror appended bytes");
                }
            }
            None => self.retained.push(bytes),
        }
        AppendOutcome::Complete
    }

    fn buffered(&self) -> TimeRanges {
        self.buffered.clone()
    }

    fn set_timestamp_offset(&mut self, offset: f64) {
        self.timestamp_offset = offset;
        self.anchor = None;
    }

    fn timestamp_offset(&self) -> f64 {
        self.timestamp_offset
    }

    fn remove(&mut self, start: f64, end: f64) {
        self.buffered.remove(start, end);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::playlist::DtsSpan;

    fn timing(first: f64) -> Option<TimingInfo> {
        Some(TimingInfo {
            video: Some(DtsSpan {
                first,
                last: first + 9.9,
            }),
            audio: None,
        })
    }

    #[test]
    fn appends_without_timing_are_contiguous() {
        let mut sink = MemoryBufferSink::new();
        sink.append_buffer(Bytes::from_static(b"a"), AppendHint { start: None, duration: 10.0, timing: None });
        sink.append_buffer(Bytes::from_static(b"b"), AppendHint { start: None, duration: 8.0, timing: None });
        assert_eq!(sink.buffered(), TimeRanges::from_pairs(&[(0.0, 18.0)]));
        assert_eq!(sink.appends(), 2);
        assert_eq!(sink.retained().len(), 2);
    }

    #[test]
    fn offset_anchors_timing_at_buffer_end() {
        let mut sink = MemoryBufferSink::new();
        sink.set_timestamp_offset(100.0);
        sink.append_buffer(Bytes::new(), AppendHint { start: None, duration: 10.0, timing: timing(100.0) });
        sink.append_buffer(Bytes::new(), AppendHint { start: None, duration: 10.0, timing: timing(110.0) });
        assert_eq!(sink.buffered(), TimeRanges::from_pairs(&[(0.0, 20.0)]));

        // Discontinuity: new timeline continues at the buffer end.
        sink.set_timestamp_offset(5.0);
        sink.append_buffer(Bytes::new(), AppendHint { start: None, duration: 10.0, timing: timing(5.0) });
        assert_eq!(sink.buffered(), TimeRanges::from_pairs(&[(0.0, 30.0)]));
        assert_eq!(sink.timestamp_offset(), 5.0);
    }

    #[test]
    fn first_append_lands_at_hinted_start() {
        let mut sink = MemoryBufferSink::new();
        sink.set_timestamp_offset(7.0);
        let hint = AppendHint {
            start: Some(30.0),
            duration: 10.0,
            timing: timing(7.0),
        };
        sink.append_buffer(Bytes::new(), hint);
        sink.append_buffer(Bytes::new(), AppendHint { start: Some(99.0), duration: 10.0, timing: timing(17.0) });
        assert_eq!(sink.buffered(), TimeRanges::from_pairs(&[(30.0, 50.0)]));
    }

    #[test]
    fn remove_cuts_range() {
        let mut sink = MemoryBufferSink::new();
        sink.append_buffer(Bytes::new(), AppendHint { start: None, duration: 30.0, timing: None });
        sink.remove(0.0, 10.0);
        assert_eq!(sink.buffered(), TimeRanges::from_pairs(&[(10.0, 30.0)]));
    }

    #[derive(Clone, Default)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn mirrors_bytes_to_writer() {
        let writer = SharedWriter::default();
        let mut sink = MemoryBufferSink::with_writer(Box::new(writer.clone()));
        sink.append_buffer(Bytes::from_static(b"abc"), AppendHint { start: None, duration: 1.0, timing: None });
        sink.append_buffer(Bytes::from_static(b"def"), AppendHint { start: None, duration: 1.0, timing: None });
        sink.flush().unwrap();

        assert_eq!(&*writer.0.lock().unwrap(), b"abcdef");
        assert_eq!(sink.bytes_appended(), 6);
        assert!(sink.retained().is_empty());
    }
}
