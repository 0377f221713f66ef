use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use url::Url;

use crate::config::{PlayerConfig, PlaylistConfig};
use crate::error::{ErrorKind, ErrorRecord, PlayerError};
use crate::playlist::merge::{MergeOutcome, compute_expired, merge_playlists};
use crate::playlist::model::{Playlist, SegmentTimingUpdate};
use crate::playlist::parser::{M3u8Parser, ParsedManifest, PlaylistParser};
use crate::transport::{Completion, RequestId, RequestOptions, ResponseType, TransferError, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistState {
    Empty,
    Loading,
    HavePlaylist,
    Refreshing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistEvent {
    /// A playlist is available after `load`.
    Loaded,
    /// A refresh produced a changed playlist.
    Refreshed,
    Error(ErrorRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchPurpose {
    Load,
    Refresh,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: RequestId,
    purpose: FetchPurpose,
}

/// Fetches one media playlist and keeps it current.
///
/// The loader never sleeps. [`refresh_deadline`](Self::refresh_deadline)
/// tells the host when to call [`on_refresh_timer`](Self::on_refresh_timer),
/// and transport completions are handed in through
/// [`handle_response`](Self::handle_response).
pub struct PlaylistLoader {
    uri: String,
    config: PlaylistConfig,
    with_credentials: bool,
    transport: Box<dyn Transport>,
    parser: Box<dyn PlaylistParser>,
    state: PlaylistState,
    playlist: Option<Arc<Playlist>>,
    expired: f64,
    initial_response: Option<String>,
    in_flight: Option<InFlight>,
    last_response: Option<Instant>,
    refresh_deadline: Option<Instant>,
    bandwidth: Option<f64>,
    error: Option<ErrorRecord>,
    events: VecDeque<PlaylistEvent>,
    disposed: bool,
}

impl fmt::Debug for PlaylistLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaylistLoader")
            .field("uri", &self.uri)
            .field("state", &self.state)
            .field("expired", &self.expired)
            .field("refresh_deadline", &self.refresh_deadline)
            .finish_non_exhaustive()
    }
}

impl PlaylistLoader {
    pub fn new(
        uri: impl Into<String>,
        config: &PlayerConfig,
        transport: Box<dyn Transport>,
        parser: Box<dyn PlaylistParser>,
    ) -> Result<Self, PlayerError> {
        let uri = uri.into();
        if uri.is_empty() {
            return Err(PlayerError::PlaylistUrlMissing);
        }
        Ok(Self {
            uri,
            config: config.playlist_config.clone(),
            with_credentials: config.http.with_credentials,
            transport,
            parser,
            state: PlaylistState::Empty,
            playlist: None,
            expired: 0.0,
            initial_response: None,
            in_flight: None,
            last_response: None,
            refresh_deadline: None,
            bandwidth: None,
            error: None,
            events: VecDeque::new(),
            disposed: false,
        })
    }

    /// Primes the loader with a response the host already fetched.
    ///
    /// The text is parsed on the first `load`, which then treats the
    /// playlist as fresh as of `received_at`.
    pub fn with_initial_response(mut self, text: impl Into<String>, received_at: Instant) -> Self {
        self.initial_response = Some(text.into());
        self.last_response = Some(received_at);
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn state(&self) -> PlaylistState {
        self.state
    }

    pub fn playlist(&self) -> Option<Arc<Playlist>> {
        self.playlist.clone()
    }

    /// Seconds of live content that scrolled out of the window.
    pub fn expired(&self) -> f64 {
        self.expired
    }

    pub fn error(&self) -> Option<&ErrorRecord> {
        self.error.as_ref()
    }

    /// Bandwidth (bits/s) observed on the last playlist response.
    pub fn bandwidth(&self) -> Option<f64> {
        self.bandwidth
    }

    pub fn refresh_deadline(&self) -> Option<Instant> {
        self.refresh_deadline
    }

    pub fn owns_request(&self, id: RequestId) -> bool {
        self.in_flight.is_some_and(|in_flight| in_flight.id == id)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = PlaylistEvent> + '_ {
        self.events.drain(..)
    }

    /// Delay before the next refresh.
    pub fn refresh_delay(&self) -> Duration {
        match &self.playlist {
            Some(playlist) if playlist.target_duration > 0.0 => {
                Duration::from_secs_f64(playlist.target_duration)
            }
            _ => self.config.default_refresh,
        }
    }

    pub fn load(&mut self, now: Instant) {
        if self.disposed {
            return;
        }

        if let Some(text) = self.initial_response.take() {
            let received_at = self.last_response.unwrap_or(now);
            if let Err(record) = self.have_playlist(&text, received_at) {
                self.fail(record);
                return;
            }
        }

        if let Some(playlist) = &self.playlist {
            if playlist.end_list {
                self.events.push_back(PlaylistEvent::Loaded);
                return;
            }
            let fresh = self
                .last_response
                .is_some_and(|at| now.saturating_duration_since(at) < self.config.default_refresh);
            if fresh {
                debug!(uri = %self.uri, "Playlist is fresh, skipping fetch");
                self.events.push_back(PlaylistEvent::Loaded);
                self.arm_refresh(now, self.refresh_delay());
                return;
            }
        }

        if self.in_flight.is_some() {
            debug!(uri = %self.uri, "Playlist request already in flight");
            return;
        }
        self.fetch(FetchPurpose::Load);
    }

    /// Fires the refresh timer. Does nothing before the deadline.
    pub fn on_refresh_timer(&mut self, now: Instant) {
        if self.disposed || self.in_flight.is_some() {
            return;
        }
        match self.refresh_deadline {
            Some(deadline) if deadline <= now => {
                self.refresh_deadline = None;
                self.fetch(FetchPurpose::Refresh);
            }
            _ => {}
        }
    }

    /// Feeds a transport completion. Returns `false` for ids this loader
    /// does not own.
    pub fn handle_response(&mut self, id: RequestId, completion: Completion, now: Instant) -> bool {
        let Some(in_flight) = self.in_flight.filter(|in_flight| in_flight.id == id) else {
            return false;
        };
        self.in_flight = None;
        self.settle_state();

        let response = match completion {
            Ok(response) => response,
            Err(TransferError::Aborted) => {
                debug!(uri = %self.uri, "Playlist request aborted");
                return true;
            }
            Err(TransferError::TimedOut) => {
                warn!(uri = %self.uri, "Playlist request timed out, retrying after refresh delay");
                self.refresh_deadline = None;
                if !self.playlist.as_ref().is_some_and(|p| p.end_list) {
                    self.refresh_deadline = Some(now + self.refresh_delay());
                }
                return true;
            }
            Err(TransferError::Failed {
                status,
                response_text,
                ..
            }) => {
                let mut record = ErrorRecord::new(
                    ErrorKind::Network,
                    status,
                    format!("HLS playlist request error at URL: {}", self.uri),
                );
                if let Some(text) = response_text {
                    record = record.with_response_text(text);
                }
                self.fail(record);
                return true;
            }
        };

        let had_playlist = self.playlist.is_some();
        self.bandwidth = Some(response.bandwidth);
        let text = response.text().unwrap_or_default();
        let changed = match self.have_playlist(&text, now) {
            Ok(changed) => changed,
            Err(record) => {
                self.fail(record);
                return true;
            }
        };

        let mut delay = self.refresh_delay();
        match in_flight.purpose {
            _ if !had_playlist => self.events.push_back(PlaylistEvent::Loaded),
            FetchPurpose::Load => self.events.push_back(PlaylistEvent::Loaded),
            FetchPurpose::Refresh if changed => self.events.push_back(PlaylistEvent::Refreshed),
            FetchPurpose::Refresh => {
                delay /= 2;
                debug!(uri = %self.uri, ?delay, "Playlist unchanged, refreshing sooner");
            }
        }
        self.arm_refresh(now, delay);
        true
    }

    /// Writes loader-observed timing into the stored playlist.
    pub fn apply_segment_timing(&mut self, update: &SegmentTimingUpdate) -> bool {
        let Some(playlist) = self.playlist.as_mut() else {
            return false;
        };
        if playlist.uri != update.playlist_uri {
            return false;
        }
        let Some(index) = playlist.index_of_sequence(update.media_sequence_number) else {
            return false;
        };
        Arc::make_mut(playlist).segments[index].apply_timing(update);
        true
    }

    /// Aborts the in-flight request and cancels the refresh timer.
    pub fn stop(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            self.transport.abort(in_flight.id);
        }
        self.refresh_deadline = None;
        self.settle_state();
    }

    pub fn dispose(&mut self) {
        self.stop();
        self.disposed = true;
        self.events.clear();
    }

    fn fetch(&mut self, purpose: FetchPurpose) {
        let options = RequestOptions::get(self.uri.clone(), ResponseType::Text)
            .with_credentials(self.with_credentials)
            .with_timeout(self.config.request_timeout);
        let id = self.transport.request(options);
        debug!(uri = %self.uri, id, ?purpose, "Requesting playlist");
        self.in_flight = Some(InFlight { id, purpose });
        self.state = if self.playlist.is_some() {
            PlaylistState::Refreshing
        } else {
            PlaylistState::Loading
        };
    }

    /// Parses and merges `text`. Returns whether the playlist changed.
    fn have_playlist(&mut self, text: &str, now: Instant) -> Result<bool, ErrorRecord> {
        self.last_response = Some(now);
        let update = self.parser.parse(text, &self.uri).map_err(|e| {
            ErrorRecord::new(
                ErrorKind::Parse,
                None,
                format!("HLS playlist parse error at URL: {}: {e}", self.uri),
            )
            .with_response_text(text)
        })?;

        let previous = self.playlist.clone();
        match merge_playlists(previous.as_deref(), update) {
            MergeOutcome::Unchanged => Ok(false),
            MergeOutcome::Updated(merged) => {
                if let Some(previous) = previous.as_deref().filter(|_| !merged.end_list) {
                    self.expired = compute_expired(previous, &merged, self.expired);
                }
                debug!(
                    uri = %self.uri,
                    msn = merged.media_sequence,
                    segments = merged.segments.len(),
                    expired = self.expired,
                    "Playlist updated"
                );
                self.playlist = Some(Arc::new(merged));
                self.state = PlaylistState::HavePlaylist;
                Ok(true)
            }
        }
    }

    fn arm_refresh(&mut self, now: Instant, delay: Duration) {
        if self.playlist.as_ref().is_some_and(|p| p.end_list) {
            if self.refresh_deadline.take().is_some() {
                info!(uri = %self.uri, "Playlist ended, refresh stopped");
            }
            return;
        }
        self.refresh_deadline = Some(now + delay);
    }

    fn fail(&mut self, record: ErrorRecord) {
        warn!(uri = %self.uri, error = %record, "Playlist load failed");
        self.refresh_deadline = None;
        self.error = Some(record.clone());
        self.events.push_back(PlaylistEvent::Error(record));
    }

    fn settle_state(&mut self) {
        self.state = if self.playlist.is_some() {
            PlaylistState::HavePlaylist
        } else {
            PlaylistState::Empty
        };
    }
}

/// Builds one loader per variant of a master manifest, or a single primed
/// loader when the manifest is itself a media playlist.
pub fn resolve_manifest(
    manifest_url: &str,
    text: &str,
    received_at: Instant,
    config: &PlayerConfig,
    mut make_transport: impl FnMut() -> Box<dyn Transport>,
) -> Result<Vec<PlaylistLoader>, PlayerError> {
    if manifest_url.is_empty() {
        return Err(PlayerError::PlaylistUrlMissing);
    }
    let base = Url::parse(manifest_url).map_err(|e| PlayerError::invalid_url(manifest_url, e))?;

    match M3u8Parser::new().parse_manifest(text, manifest_url)? {
        ParsedManifest::Master(variants) => variants
            .into_iter()
            .map(|variant| {
                let uri = base
                    .join(&variant.uri)
                    .map_err(|e| PlayerError::invalid_url(&variant.uri, e))?;
                PlaylistLoader::new(
                    uri.as_str(),
                    config,
                    make_transport(),
                    Box::new(M3u8Parser::new()),
                )
            })
            .collect(),
        ParsedManifest::Media(_) => {
            let loader = PlaylistLoader::new(
                manifest_url,
                config,
                make_transport(),
                Box::new(M3u8Parser::new()),
            )?
            .with_initial_response(text, received_at);
            Ok(vec![loader])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{FakeTransport, not_found, ok};

    const URI: &str = "http://example.com/live/media.m3u8";

    fn live(msn: u64, count: usize) -> String {
        let mut text = format!("#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:{msn}\n");
        for i in 0..count {
            text.push_str(&format!("#EXTINF:10,\n{}.ts\n", msn + i as u64));
        }
        text
    }

    fn vod(count: usize) -> String {
        let mut text = live(0, count);
        text.push_str("#EXT-X-ENDLIST\n");
        text
    }

    fn loader(transport: &FakeTransport) -> PlaylistLoader {
        PlaylistLoader::new(
            URI,
            &PlayerConfig::default(),
            Box::new(transport.clone()),
            Box::new(M3u8Parser::new()),
        )
        .unwrap()
    }

    fn last_id(transport: &FakeTransport) -> RequestId {
        transport.state.borrow().requests.last().unwrap().0
    }

    #[test]
    fn requires_url() {
        let result = PlaylistLoader::new(
            "",
            &PlayerConfig::default(),
            Box::new(FakeTransport::new()),
            Box::new(M3u8Parser::new()),
        );
        assert!(matches!(result, Err(PlayerError::PlaylistUrlMissing)));
    }

    #[test]
    fn load_fetches_then_signals_loaded() {
        let transport = FakeTransport::new();
        let mut loader = loader(&transport);
        let now = Instant::now();

        loader.load(now);
        assert_eq!(loader.state(), PlaylistState::Loading);
        assert_eq!(transport.state.borrow().uris(), vec![URI.to_string()]);

        // A second load while the first is in flight does not double up.
        loader.load(now);
        assert_eq!(transport.state.borrow().requests.len(), 1);

        let id = last_id(&transport);
        assert!(loader.handle_response(id, ok(live(0, 3)), now));
        assert_eq!(loader.state(), PlaylistState::HavePlaylist);
        assert_eq!(loader.drain_events().collect::<Vec<_>>(), vec![PlaylistEvent::Loaded]);
        assert_eq!(loader.refresh_deadline(), Some(now + Duration::from_secs(10)));

        let playlist = loader.playlist().unwrap();
        assert_eq!(
            playlist.segments[0].resolved_uri.as_deref(),
            Some("http://example.com/live/0.ts")
        );
    }

    #[test]
    fn fresh_playlist_skips_network() {
        let transport = FakeTransport::new();
        let mut loader = loader(&transport);
        let now = Instant::now();
        loader.load(now);
        loader.handle_response(last_id(&transport), ok(live(0, 3)), now);
        loader.drain_events().for_each(drop);

        loader.load(now + Duration::from_secs(2));
        assert_eq!(transport.state.borrow().requests.len(), 1);
        assert_eq!(loader.drain_events().collect::<Vec<_>>(), vec![PlaylistEvent::Loaded]);

        loader.load(now + Duration::from_secs(11));
        assert_eq!(transport.state.borrow().requests.len(), 2);
    }

    #[test]
    fn unchanged_refresh_halves_delay() {
        let transport = FakeTransport::new();
        let mut loader = loader(&transport);
        let now = Instant::now();
        loader.load(now);
        loader.handle_response(last_id(&transport), ok(live(0, 3)), now);
        loader.drain_events().for_each(drop);

        // Not yet due.
        loader.on_refresh_timer(now + Duration::from_secs(5));
        assert_eq!(transport.state.borrow().requests.len(), 1);

        let t1 = now + Duration::from_secs(10);
        loader.on_refresh_timer(t1);
        assert_eq!(loader.state(), PlaylistState::Refreshing);
        loader.handle_response(last_id(&transport), ok(live(0, 3)), t1);
        assert_eq!(loader.drain_events().count(), 0);
        assert_eq!(loader.refresh_deadline(), Some(t1 + Duration::from_secs(5)));

        let t2 = t1 + Duration::from_secs(5);
        loader.on_refresh_timer(t2);
        loader.handle_response(last_id(&transport), ok(live(1, 3)), t2);
        assert_eq!(loader.drain_events().collect::<Vec<_>>(), vec![PlaylistEvent::Refreshed]);
        assert_eq!(loader.refresh_deadline(), Some(t2 + Duration::from_secs(10)));
        assert_eq!(loader.playlist().unwrap().media_sequence, 1);
        assert_eq!(loader.expired(), 10.0);
    }

    #[test]
    fn end_list_stops_refresh() {
        let transport = FakeTransport::new();
        let mut loader = loader(&transport);
        let now = Instant::now();
        loader.load(now);
        loader.handle_response(last_id(&transport), ok(vod(3)), now);
        assert_eq!(loader.refresh_deadline(), None);

        loader.drain_events().for_each(drop);
        loader.load(now + Duration::from_secs(60));
        assert_eq!(transport.state.borrow().requests.len(), 1);
        assert_eq!(loader.drain_events().collect::<Vec<_>>(), vec![PlaylistEvent::Loaded]);
    }

    #[test]
    fn request_error_records_and_stops_refresh() {
        let transport = FakeTransport::new();
        let mut loader = loader(&transport);
        let now = Instant::now();
        loader.load(now);
        loader.handle_response(last_id(&transport), ok(live(0, 3)), now);
        loader.drain_events().for_each(drop);

        loader.on_refresh_timer(now + Duration::from_secs(10));
        loader.handle_response(last_id(&transport), not_found(), now + Duration::from_secs(10));

        let record = loader.error().cloned().unwrap();
        assert_eq!(record.kind, ErrorKind::Network);
        assert_eq!(record.status, Some(404));
        assert_eq!(record.message, format!("HLS playlist request error at URL: {URI}"));
        assert_eq!(record.response_text.as_deref(), Some("not found"));
        assert!(!record.is_server_error());
        assert_eq!(loader.refresh_deadline(), None);
        assert_eq!(loader.state(), PlaylistState::HavePlaylist);
        assert!(matches!(
            loader.drain_events().next(),
            Some(PlaylistEvent::Error(_))
        ));
    }

    #[test]
    fn parse_failure_is_surfaced() {
        let transport = FakeTransport::new();
        let mut loader = loader(&transport);
        let now = Instant::now();
        loader.load(now);
        loader.handle_response(last_id(&transport), ok("garbage"), now);
        assert_eq!(loader.error().map(|e| e.kind), Some(ErrorKind::Parse));
        assert_eq!(loader.state(), PlaylistState::Empty);
    }

    #[test]
    fn stale_and_foreign_ids_are_ignored() {
        let transport = FakeTransport::new();
        let mut loader = loader(&transport);
        let now = Instant::now();
        loader.load(now);
        assert!(!loader.handle_response(999, ok(live(0, 3)), now));
        assert_eq!(loader.state(), PlaylistState::Loading);
    }

    #[test]
    fn stop_aborts_and_clears_timer() {
        let transport = FakeTransport::new();
        let mut loader = loader(&transport);
        let now = Instant::now();
        loader.load(now);
        let id = last_id(&transport);
        loader.stop();
        assert_eq!(transport.state.borrow().aborted, vec![id]);
        assert!(!loader.owns_request(id));
        assert_eq!(loader.refresh_deadline(), None);
        assert_eq!(loader.state(), PlaylistState::Empty);
    }

    #[test]
    fn timeout_is_retried_not_surfaced() {
        let transport = FakeTransport::new();
        let mut loader = loader(&transport);
        let now = Instant::now();
        loader.load(now);
        loader.handle_response(last_id(&transport), Err(TransferError::TimedOut), now);
        assert!(loader.error().is_none());
        assert_eq!(loader.refresh_deadline(), Some(now + Duration::from_secs(10)));

        loader.on_refresh_timer(now + Duration::from_secs(10));
        assert_eq!(transport.state.borrow().requests.len(), 2);
    }

    #[test]
    fn timing_updates_apply_by_sequence() {
        let transport = FakeTransport::new();
        let mut loader = loader(&transport);
        let now = Instant::now();
        loader.load(now);
        loader.handle_response(last_id(&transport), ok(live(5, 3)), now);

        let applied = loader.apply_segment_timing(&SegmentTimingUpdate {
            playlist_uri: URI.into(),
            media_sequence_number: 6,
            end: 20.0,
            duration: 10.0,
            timing: None,
        });
        assert!(applied);
        assert_eq!(loader.playlist().unwrap().segments[1].end, Some(20.0));

        let missing = loader.apply_segment_timing(&SegmentTimingUpdate {
            playlist_uri: URI.into(),
            media_sequence_number: 2,
            end: 1.0,
            duration: 1.0,
            timing: None,
        });
        assert!(!missing);
    }

    #[test]
    fn initial_response_is_used_without_fetch() {
        let transport = FakeTransport::new();
        let now = Instant::now();
        let mut loader = loader(&transport).with_initial_response(live(0, 2), now);
        loader.load(now);
        assert_eq!(transport.state.borrow().requests.len(), 0);
        assert_eq!(loader.drain_events().collect::<Vec<_>>(), vec![PlaylistEvent::Loaded]);
        assert_eq!(loader.playlist().unwrap().segments.len(), 2);
    }

    #[test]
    fn manifest_resolution() {
        let master = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=1000\n\
            low/index.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2000\n\
            /abs/high.m3u8\n";
        let transport = FakeTransport::new();
        let loaders = resolve_manifest(
            "http://example.com/master.m3u8",
            master,
            Instant::now(),
            &PlayerConfig::default(),
            || Box::new(transport.clone()) as Box<dyn Transport>,
        )
        .unwrap();
        let uris: Vec<_> = loaders.iter().map(|l| l.uri().to_string()).collect();
        assert_eq!(
            uris,
            vec![
                "http://example.com/low/index.m3u8".to_string(),
                "http://example.com/abs/high.m3u8".to_string()
            ]
        );

        let loaders = resolve_manifest(
            URI,
            &vod(2),
            Instant::now(),
            &PlayerConfig::default(),
            || Box::new(transport.clone()) as Box<dyn Transport>,
        )
        .unwrap();
        assert_eq!(loaders.len(), 1);
        assert_eq!(loaders[0].uri(), URI);
    }
}
