use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use super::request::{default_iv, key_request, segment_request};
use crate::config::{LoaderConfig, PlayerConfig};
use crate::crypto::{Aes128CbcDecrypter, DecryptId, DecryptOutcome, Decrypter};
use crate::error::{ErrorKind, ErrorRecord};
use crate::gate::has_enough_buffer;
use crate::inspect::{TimingInspector, TsTimingInspector};
use crate::playlist::{Playlist, Segment, SegmentTimingUpdate, playlist_duration};
use crate::ranges::{TimeRanges, find_range, find_sole_uncommon_end};
use crate::rules::{RuleChain, SelectionContext};
use crate::sink::{AppendHint, AppendOutcome, BufferSink};
use crate::transport::{Completion, RequestId, TransferError, Transport};

/// The playhead the loader schedules around.
pub trait PlaybackClock {
    fn current_time(&self) -> f64;

    fn set_current_time(&mut self, time: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    KeyAndSegmentInFlight,
    Decrypting,
    Appending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoaderEvent {
    /// A segment was appended, or a request timed out.
    Progress,
    Error(ErrorRecord),
    /// The playhead was moved near the live edge of a newly attached playlist.
    LiveEdgeJump(f64),
    /// The sink's timestamp offset was re-anchored to this decode timestamp.
    TimestampOffset(f64),
    SegmentTimingUpdated(SegmentTimingUpdate),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoaderStats {
    /// Round trip of the last segment request.
    pub round_trip: Duration,
    /// Bits per second of the last segment request. Reset to zero on timeout.
    pub bandwidth: f64,
    pub media_bytes_transferred: u64,
    pub media_requests: u64,
    pub media_transfer_duration: Duration,
}

/// Everything captured for the segment currently being worked on.
///
/// The playlist snapshot is the one the request was issued against, so a
/// playlist swap mid-request cannot change which segment the bytes belong to.
#[derive(Debug)]
struct PendingSegment {
    index: usize,
    playlist: Arc<Playlist>,
    segment: Segment,
    bytes: Option<Bytes>,
    key: Option<[u8; 16]>,
    iv: Option<[u8; 16]>,
    decrypt_id: Option<DecryptId>,
    buffered_before: Option<TimeRanges>,
}

impl PendingSegment {
    fn media_sequence_number(&self) -> u64 {
        self.playlist.sequence_of(self.index)
    }
}

/// Fetches, decrypts and appends one segment at a time.
///
/// The loader never blocks. The host calls [`tick`](Self::tick) on a fixed
/// interval and feeds completions back through
/// [`handle_response`](Self::handle_response),
/// [`handle_decrypted`](Self::handle_decrypted) and
/// [`handle_append_complete`](Self::handle_append_complete). Completions for
/// requests the loader no longer tracks are ignored.
pub struct SegmentLoader {
    config: LoaderConfig,
    with_credentials: bool,
    transport: Box<dyn Transport>,
    decrypter: Box<dyn Decrypter>,
    inspector: Box<dyn TimingInspector>,
    clock: Box<dyn PlaybackClock>,
    sink: Option<Box<dyn BufferSink>>,
    rules: RuleChain,
    playlist: Option<Arc<Playlist>>,
    buffer_playlist_uri: Option<String>,
    expired: f64,
    state: LoaderState,
    paused: bool,
    seeking: bool,
    new_playlist: bool,
    disposed: bool,
    segment_request: Option<RequestId>,
    key_request: Option<RequestId>,
    next_decrypt_id: DecryptId,
    pending: Option<PendingSegment>,
    stats: LoaderStats,
    error: Option<ErrorRecord>,
    events: VecDeque<LoaderEvent>,
}

impl fmt::Debug for SegmentLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentLoader")
            .field("state", &self.state)
            .field("paused", &self.paused)
            .field("seeking", &self.seeking)
            .field("rules", &self.rules)
            .field("segment_request", &self.segment_request)
            .field("key_request", &self.key_request)
            .finish_non_exhaustive()
    }
}

impl SegmentLoader {
    /// Creates a paused loader with the default rule chain, AES-128
    /// decryption and MPEG-TS timing inspection.
    pub fn new(
        config: &PlayerConfig,
        transport: Box<dyn Transport>,
        clock: Box<dyn PlaybackClock>,
    ) -> Self {
        Self {
            config: config.loader_config.clone(),
            with_credentials: config.http.with_credentials,
            transport,
            decrypter: Box::new(Aes128CbcDecrypter::new()),
            inspector: Box::new(TsTimingInspector::new()),
            clock,
            sink: None,
            rules: RuleChain::new(&config.loader_config),
            playlist: None,
            buffer_playlist_uri: None,
            expired: 0.0,
            state: LoaderState::Idle,
            paused: true,
            seeking: false,
            new_playlist: false,
            disposed: false,
            segment_request: None,
            key_request: None,
            next_decrypt_id: 0,
            pending: None,
            stats: LoaderStats::default(),
            error: None,
            events: VecDeque::new(),
        }
    }

    pub fn with_decrypter(mut self, decrypter: Box<dyn Decrypter>) -> Self {
        self.decrypter = decrypter;
        self
    }

    pub fn with_inspector(mut self, inspector: Box<dyn TimingInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn with_rules(mut self, rules: RuleChain) -> Self {
        self.rules = rules;
        self
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn playlist(&self) -> Option<Arc<Playlist>> {
        self.playlist.clone()
    }

    pub fn stats(&self) -> LoaderStats {
        self.stats
    }

    /// Last error surfaced through [`LoaderEvent::Error`].
    pub fn error(&self) -> Option<&ErrorRecord> {
        self.error.as_ref()
    }

    pub fn current_time(&self) -> f64 {
        self.clock.current_time()
    }

    /// Buffered ranges of the attached sink, empty without one.
    pub fn buffered(&self) -> TimeRanges {
        self.sink
            .as_ref()
            .map(|sink| sink.buffered())
            .unwrap_or_default()
    }

    pub fn owns_request(&self, id: RequestId) -> bool {
        self.segment_request == Some(id) || self.key_request == Some(id)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = LoaderEvent> + '_ {
        self.events.drain(..)
    }

    /// Attaches the buffer sink. Any in-flight work is discarded.
    pub fn attach_sink(&mut self, sink: Box<dyn BufferSink>) {
        self.clear_everything();
        self.sink = Some(sink);
        self.fill_buffer();
    }

    /// Seconds of live content that scrolled out of the playlist window.
    pub fn set_expired(&mut self, expired: f64) {
        self.expired = expired;
    }

    /// Installs a playlist snapshot.
    ///
    /// A snapshot with a different URI counts as a new playlist. When a new
    /// live playlist arrives and the playhead is not buffered, the playhead
    /// is moved to `live_edge_offset_segments` segments before the end.
    pub fn set_playlist(&mut self, playlist: Arc<Playlist>) {
        if self.disposed {
            return;
        }
        let is_new = self
            .playlist
            .as_ref()
            .is_none_or(|current| current.uri != playlist.uri);
        self.playlist = Some(Arc::clone(&playlist));
        if !is_new {
            trace!(uri = %playlist.uri, segments = playlist.segments.len(), "Playlist snapshot updated");
            return;
        }

        debug!(uri = %playlist.uri, "New playlist attached");
        self.new_playlist = true;
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        let current_time = self.clock.current_time();
        if playlist.is_live() && find_range(&sink.buffered(), current_time).is_empty() {
            let end_index = playlist
                .segments
                .len()
                .saturating_sub(self.config.live_edge_offset_segments);
            let target = playlist_duration(&playlist, end_index);
            info!(uri = %playlist.uri, from = current_time, to = target, "Jumping to live edge");
            self.seek(target);
            self.events.push_back(LoaderEvent::LiveEdgeJump(target));
        }
    }

    pub fn pause(&mut self) {
        if !self.paused {
            debug!("Segment loader paused");
        }
        self.paused = true;
        self.clear_everything();
    }

    /// Clears the pause flag. Loading restarts on the next tick.
    pub fn resume(&mut self) {
        if self.disposed {
            return;
        }
        if self.paused {
            debug!("Segment loader resumed");
        }
        self.paused = false;
    }

    /// Moves the playhead and discards in-flight work.
    pub fn seek(&mut self, time: f64) {
        debug!(time, "Seeking");
        self.clock.set_current_time(time);
        self.clear_everything();
        self.seeking = true;
    }

    /// Scheduling tick.
    pub fn tick(&mut self) {
        self.fill_buffer();
    }

    pub fn dispose(&mut self) {
        self.clear_everything();
        self.disposed = true;
        self.paused = true;
    }

    /// Feeds a transport completion. Returns `false` for ids this loader
    /// does not own.
    pub fn handle_response(&mut self, id: RequestId, completion: Completion) -> bool {
        let is_segment = self.segment_request == Some(id);
        let is_key = self.key_request == Some(id);
        if !is_segment && !is_key {
            trace!(id, "Ignoring stale response");
            return false;
        }

        let response = match completion {
            Ok(response) => response,
            Err(TransferError::TimedOut) => {
                warn!(id, key = is_key, "Segment loader request timed out");
                self.clear_everything();
                self.stats.bandwidth = 0.0;
                self.events.push_back(LoaderEvent::Progress);
                return true;
            }
            Err(TransferError::Aborted) => {
                debug!(id, "Segment loader request aborted");
                self.clear_everything();
                return true;
            }
            Err(TransferError::Failed {
                status,
                response_text,
                ..
            }) => {
                let message = match self.pending.as_ref() {
                    Some(pending) if is_key => format!(
                        "HLS key request error at URL: {}",
                        pending.segment.key.as_ref().map_or("", |key| key.request_uri())
                    ),
                    Some(pending) => format!(
                        "HLS segment request error at URL: {}",
                        pending.segment.request_uri()
                    ),
                    None => "HLS request error".to_string(),
                };
                let mut record = ErrorRecord::new(ErrorKind::Network, status, message);
                if let Some(text) = response_text {
                    record = record.with_response_text(text);
                }
                self.fail(record);
                return true;
            }
        };

        let Some(body) = response.body else {
            debug!(id, "Response without body, resetting");
            self.clear_everything();
            return true;
        };

        if is_segment {
            self.segment_request = None;
            self.stats.round_trip = response.round_trip;
            self.stats.bandwidth = response.bandwidth;
            self.stats.media_bytes_transferred += response.bytes_received;
            self.stats.media_requests += 1;
            self.stats.media_transfer_duration += response.round_trip;
            trace!(id, bytes = body.len(), bandwidth = response.bandwidth, "Segment bytes received");
            if let Some(pending) = self.pending.as_mut() {
                pending.bytes = Some(body);
            }
        } else {
            self.key_request = None;
            if let Err(record) = self.store_key(&body) {
                self.fail(record);
                return true;
            }
        }

        if self.segment_request.is_none() && self.key_request.is_none() {
            self.process_response();
        }
        true
    }

    /// Delivers plaintext for a decrypt that returned
    /// [`DecryptOutcome::Pending`]. Returns `false` for unknown ids.
    pub fn handle_decrypted(&mut self, id: DecryptId, plaintext: Bytes) -> bool {
        if self.state != LoaderState::Decrypting {
            return false;
        }
        let Some(pending) = self
            .pending
            .as_mut()
            .filter(|pending| pending.decrypt_id == Some(id))
        else {
            trace!(id, "Ignoring stale decrypt result");
            return false;
        };
        pending.bytes = Some(plaintext);
        self.append_segment();
        true
    }

    /// Completes an append that returned [`AppendOutcome::Pending`].
    pub fn handle_append_complete(&mut self) -> bool {
        if self.state != LoaderState::Appending {
            return false;
        }
        self.events.push_back(LoaderEvent::Progress);
        self.update_timeline();
        self.state = LoaderState::Idle;
        self.pending = None;
        self.fill_buffer();
        true
    }

    fn fill_buffer(&mut self) {
        if self.disposed || self.paused || self.state != LoaderState::Idle {
            return;
        }
        let (Some(sink), Some(playlist)) = (self.sink.as_ref(), self.playlist.as_ref()) else {
            return;
        };
        if playlist.segments.is_empty() {
            return;
        }

        let buffered = sink.buffered();
        let current_time = self.clock.current_time();
        if has_enough_buffer(&buffered, current_time, self.config.goal_buffer_length) {
            return;
        }
        if !find_range(&buffered, current_time).is_empty() {
            self.seeking = false;
            self.new_playlist = false;
        }

        let playlist = Arc::clone(playlist);
        let ctx = SelectionContext {
            playlist: &playlist,
            current_time,
            buffered: &buffered,
            expired: self.expired,
            is_seeking: self.seeking,
            is_new_playlist: self.new_playlist,
        };
        let candidate = self.rules.select(&ctx);
        if !candidate.is_decided() {
            trace!(candidate = %candidate, current_time, "Nothing to fetch");
            return;
        }

        self.request_segment(playlist, candidate.index as usize, buffered);
    }

    fn request_segment(&mut self, playlist: Arc<Playlist>, index: usize, buffered: TimeRanges) {
        let segment = playlist.segments[index].clone();
        let timeout = self.config.request_timeout;

        self.key_request = segment
            .key
            .as_ref()
            .map(|key| self.transport.request(key_request(key, self.with_credentials, timeout)));
        self.segment_request = Some(
            self.transport
                .request(segment_request(&segment, self.with_credentials, timeout)),
        );
        debug!(
            index,
            msn = playlist.sequence_of(index),
            uri = %segment.request_uri(),
            encrypted = segment.key.is_some(),
            %buffered,
            "Requesting segment"
        );

        self.pending = Some(PendingSegment {
            index,
            playlist,
            segment,
            bytes: None,
            key: None,
            iv: None,
            decrypt_id: None,
            buffered_before: None,
        });
        self.state = LoaderState::KeyAndSegmentInFlight;
    }

    fn store_key(&mut self, body: &Bytes) -> Result<(), ErrorRecord> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(());
        };
        let Some(key) = pending.segment.key.as_ref() else {
            return Ok(());
        };
        let bytes = <[u8; 16]>::try_from(&body[..]).map_err(|_| {
            ErrorRecord::new(
                ErrorKind::InvalidKey,
                None,
                format!("Invalid HLS key at URL: {}", key.request_uri()),
            )
        })?;
        let iv = key
            .iv
            .unwrap_or_else(|| default_iv(pending.media_sequence_number()));
        pending.iv = Some(iv);
        pending.key = Some(bytes);
        Ok(())
    }

    fn process_response(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        let (Some(key), Some(iv)) = (pending.key, pending.iv) else {
            self.append_segment();
            return;
        };
        let Some(ciphertext) = pending.bytes.take() else {
            return;
        };

        self.next_decrypt_id += 1;
        let id = self.next_decrypt_id;
        pending.decrypt_id = Some(id);
        self.state = LoaderState::Decrypting;
        match self.decrypter.decrypt(id, ciphertext, &key, &iv) {
            DecryptOutcome::Ready(plaintext) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.bytes = Some(plaintext);
                }
                self.append_segment();
            }
            DecryptOutcome::Pending => trace!(id, "Waiting for decrypted bytes"),
        }
    }

    fn append_segment(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        let Some(bytes) = pending.bytes.take() else {
            return;
        };
        let timing = self.inspector.inspect(&bytes);
        pending.segment.timing = timing;
        self.update_timestamp_offset();

        let (Some(sink), Some(pending)) = (self.sink.as_mut(), self.pending.as_mut()) else {
            return;
        };
        pending.buffered_before = Some(sink.buffered());
        self.state = LoaderState::Appending;
        let hint = AppendHint {
            start: Some(playlist_duration(&pending.playlist, pending.index)),
            duration: pending.segment.duration,
            timing,
        };
        if sink.append_buffer(bytes, hint) == AppendOutcome::Complete {
            self.handle_append_complete();
        }
    }

    /// Re-anchors the sink when switching playlists or crossing a
    /// discontinuity.
    fn update_timestamp_offset(&mut self) {
        let (Some(sink), Some(pending)) = (self.sink.as_mut(), self.pending.as_ref()) else {
            return;
        };
        let switched = self.buffer_playlist_uri.as_deref() != Some(pending.playlist.uri.as_str());
        if !switched && !pending.segment.discontinuity {
            return;
        }
        match pending.segment.timing.and_then(|timing| timing.first_dts()) {
            Some(first_dts) => {
                debug!(
                    offset = first_dts,
                    switched,
                    discontinuity = pending.segment.discontinuity,
                    "Setting timestamp offset"
                );
                sink.set_timestamp_offset(first_dts);
                self.buffer_playlist_uri = Some(pending.playlist.uri.clone());
                self.events.push_back(LoaderEvent::TimestampOffset(first_dts));
            }
            None => warn!(
                uri = %pending.segment.request_uri(),
                "No decode timestamps in segment, timestamp offset unchanged"
            ),
        }
    }

    /// Attributes the buffer growth of the last append to its segment.
    fn update_timeline(&mut self) {
        let (Some(sink), Some(pending)) = (self.sink.as_ref(), self.pending.as_ref()) else {
            return;
        };
        let Some(current) = self.playlist.as_mut() else {
            return;
        };
        if current.uri != pending.playlist.uri {
            return;
        }
        let buffered = sink.buffered();
        let Some(end) = find_sole_uncommon_end(pending.buffered_before.as_ref(), Some(&buffered)) else {
            debug!(%buffered, "Cannot attribute buffer growth to the appended segment");
            return;
        };

        let msn = pending.media_sequence_number();
        let playlist = Arc::make_mut(current);
        let Some(index) = playlist.index_of_sequence(msn) else {
            debug!(msn, "Appended segment no longer in playlist");
            return;
        };
        let duration = if index == 0 {
            end
        } else {
            match index.checked_sub(1).and_then(|prev| playlist.segments[prev].end) {
                Some(prev_end) => end - prev_end,
                None => playlist.segments[index].duration,
            }
        };

        let update = SegmentTimingUpdate {
            playlist_uri: playlist.uri.clone(),
            media_sequence_number: msn,
            end,
            duration,
            timing: pending.segment.timing,
        };
        playlist.segments[index].apply_timing(&update);
        trace!(msn, end, duration, "Segment timing updated");
        self.events.push_back(LoaderEvent::SegmentTimingUpdated(update));
    }

    fn fail(&mut self, record: ErrorRecord) {
        warn!(kind = %record.kind, status = ?record.status, "{}", record.message);
        self.error = Some(record.clone());
        self.events.push_back(LoaderEvent::Error(record));
        self.pause();
    }

    /// Aborts in-flight requests and forgets the pending segment.
    fn clear_everything(&mut self) {
        if let Some(id) = self.key_request.take() {
            self.transport.abort(id);
        }
        if let Some(id) = self.segment_request.take() {
            self.transport.abort(id);
        }
        self.pending = None;
        self.state = LoaderState::Idle;
    }
}

#[cfg(test)]
mod testing {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::PlaybackClock;

    /// Clock whose time is set by the test.
    #[derive(Debug, Clone, Default)]
    pub struct ManualClock(pub Rc<Cell<f64>>);

    impl ManualClock {
        pub fn at(time: f64) -> Self {
            Self(Rc::new(Cell::new(time)))
        }

        pub fn get(&self) -> f64 {
            self.0.get()
        }
    }

    impl PlaybackClock for ManualClock {
        fn current_time(&self) -> f64 {
            self.0.get()
        }

        fn set_current_time(&mut self, time: f64) {
            self.0.set(time);
        }
    }
}
