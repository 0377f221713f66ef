//! Async host loop tying the playlist loader, the segment loader and the
//! reqwest transport together.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::PlayerConfig;
use crate::loader::{LoaderEvent, LoaderStats, PlaybackClock, SegmentLoader};
use crate::playlist::{PlaylistEvent, PlaylistLoader};
use crate::ranges::{TimeRanges, find_range};
use crate::transport::{Completion, CompletionReceiver, RequestId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCommand {
    Pause,
    Resume,
    Seek(f64),
    /// Re-requests the playlist and resumes segment loading, typically after
    /// an error.
    Reload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Playlist(PlaylistEvent),
    Loader(LoaderEvent),
    /// Every segment of an ended playlist has been appended.
    Ended,
}

#[derive(Debug)]
struct ClockState {
    position: f64,
    rate: f64,
    playing: bool,
    last_advance: Option<Instant>,
}

/// Playback clock driven by wall time.
///
/// The position only moves while it sits inside a buffered range and never
/// past that range's end, so playback stalls on an empty buffer.
#[derive(Debug, Clone)]
pub struct WallClock {
    state: Arc<Mutex<ClockState>>,
}

impl WallClock {
    pub fn new(rate: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                position: 0.0,
                rate,
                playing: true,
                last_advance: None,
            })),
        }
    }

    pub fn set_playing(&self, playing: bool) {
        let mut state = self.state.lock();
        state.playing = playing;
        state.last_advance = None;
    }

    pub fn position(&self) -> f64 {
        self.state.lock().position
    }

    /// Moves the position by the wall time elapsed since the previous call.
    pub fn advance(&self, now: Instant, buffered: &TimeRanges) {
        let mut state = self.state.lock();
        let elapsed = state
            .last_advance
            .map_or(0.0, |last| now.saturating_duration_since(last).as_secs_f64());
        state.last_advance = Some(now);
        if !state.playing {
            return;
        }
        let Some(range) = find_range(buffered, state.position).get(0) else {
            return;
        };
        state.position = (state.position + elapsed * state.rate).min(range.end);
    }
}

impl PlaybackClock for WallClock {
    fn current_time(&self) -> f64 {
        self.state.lock().position
    }

    fn set_current_time(&mut self, time: f64) {
        self.state.lock().position = time;
    }
}

/// Sends [`PlayerCommand`]s to a running [`PlayerDriver`].
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<PlayerCommand>,
}

impl PlayerHandle {
    /// Returns `false` once the driver has stopped.
    pub fn send(&self, command: PlayerCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// Owns both loaders and routes every external stimulus to them.
///
/// Loader events are forwarded on the event channel. Playlist snapshots are
/// pushed into the segment loader after each load or refresh, and timing the
/// segment loader learns is written back into the playlist loader.
pub struct PlayerDriver {
    playlist: PlaylistLoader,
    loader: SegmentLoader,
    clock: WallClock,
    completions: CompletionReceiver,
    commands: mpsc::UnboundedReceiver<PlayerCommand>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    tick_interval: Duration,
    user_paused: bool,
    ended: bool,
}

impl PlayerDriver {
    pub fn new(
        config: &PlayerConfig,
        playlist: PlaylistLoader,
        loader: SegmentLoader,
        clock: WallClock,
        completions: CompletionReceiver,
    ) -> (Self, PlayerHandle, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let driver = Self {
            playlist,
            loader,
            clock,
            completions,
            commands: command_rx,
            events: event_tx,
            tick_interval: config.loader_config.tick_interval,
            user_paused: false,
            ended: false,
        };
        (
            driver,
            PlayerHandle {
                commands: command_tx,
            },
            event_rx,
        )
    }

    /// Runs until `token` is cancelled. Returns the segment transfer
    /// statistics gathered along the way.
    pub async fn run(mut self, token: CancellationToken) -> LoaderStats {
        info!(uri = %self.playlist.uri(), "Player started");
        self.playlist.load(Instant::now());
        self.pump();

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let refresh_deadline = self.playlist.refresh_deadline();
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    info!("Player cancelled");
                    break;
                }

                Some(command) = self.commands.recv() => self.handle_command(command),

                completion = self.completions.recv() => match completion {
                    Some((id, completion)) => self.route(id, completion),
                    None => {
                        warn!("Transport completion channel closed, stopping player");
                        break;
                    }
                },

                _ = wait_until(refresh_deadline), if refresh_deadline.is_some() => {
                    self.playlist.on_refresh_timer(Instant::now());
                }

                _ = ticker.tick() => {
                    self.clock.advance(Instant::now(), &self.loader.buffered());
                    self.loader.tick();
                }
            }
            self.pump();
        }

        self.loader.dispose();
        self.playlist.dispose();
        let stats = self.loader.stats();
        info!(
            position = self.clock.position(),
            requests = stats.media_requests,
            bytes = stats.media_bytes_transferred,
            "Player stopped"
        );
        stats
    }

    fn handle_command(&mut self, command: PlayerCommand) {
        debug!(?command, "Player command");
        match command {
            PlayerCommand::Pause => {
                self.user_paused = true;
                self.clock.set_playing(false);
                self.loader.pause();
            }
            PlayerCommand::Resume => {
                self.user_paused = false;
                self.clock.set_playing(true);
                self.loader.resume();
                self.loader.tick();
            }
            PlayerCommand::Seek(time) => {
                self.ended = false;
                self.loader.seek(time);
                self.loader.tick();
            }
            PlayerCommand::Reload => {
                self.playlist.load(Instant::now());
                if !self.user_paused {
                    self.loader.resume();
                    self.loader.tick();
                }
            }
        }
    }

    fn route(&mut self, id: RequestId, completion: Completion) {
        if self.loader.owns_request(id) {
            self.loader.handle_response(id, completion);
        } else if self.playlist.owns_request(id) {
            self.playlist.handle_response(id, completion, Instant::now());
        } else {
            trace!(id, "Dropping completion for untracked request");
        }
    }

    /// Drains both loaders' event queues until neither produces more.
    fn pump(&mut self) {
        loop {
            let playlist_events: Vec<PlaylistEvent> = self.playlist.drain_events().collect();
            let loader_events: Vec<LoaderEvent> = self.loader.drain_events().collect();
            if playlist_events.is_empty() && loader_events.is_empty() {
                break;
            }

            for event in playlist_events {
                if matches!(event, PlaylistEvent::Loaded | PlaylistEvent::Refreshed) {
                    self.install_playlist(matches!(event, PlaylistEvent::Loaded));
                }
                self.emit(PlayerEvent::Playlist(event));
            }
            for event in loader_events {
                if let LoaderEvent::SegmentTimingUpdated(update) = &event {
                    self.playlist.apply_segment_timing(update);
                }
                self.emit(PlayerEvent::Loader(event));
            }
        }

        if !self.ended && self.all_segments_appended() {
            info!("All segments appended");
            self.ended = true;
            self.emit(PlayerEvent::Ended);
        }
    }

    fn install_playlist(&mut self, start: bool) {
        let Some(playlist) = self.playlist.playlist() else {
            return;
        };
        self.loader.set_expired(self.playlist.expired());
        self.loader.set_playlist(playlist);
        if start && !self.user_paused {
            self.loader.resume();
            self.loader.tick();
        }
    }

    fn all_segments_appended(&self) -> bool {
        self.loader.playlist().is_some_and(|playlist| {
            playlist.end_list
                && playlist
                    .segments
                    .last()
                    .is_some_and(|segment| segment.end.is_some())
        })
    }

    fn emit(&self, event: PlayerEvent) {
        if self.events.send(event).is_err() {
            trace!("Player event receiver dropped");
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
