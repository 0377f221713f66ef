use std::fs::File;
use std::io::BufWriter;
use std::time::{Duration, Instant};

use clap::Parser;
use hls_player::{
    LoaderEvent, MemoryBufferSink, PlayerCommand, PlayerConfig, PlayerDriver, PlayerEvent,
    PlayerHandle, PlaylistEvent, ReqwestTransport, SegmentLoader, Transport, WallClock,
    resolve_manifest,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

mod cli;
mod error;
mod parse;

use cli::CliArgs;
use error::AppError;
use parse::{parse_header, parse_time};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    if args.rate <= 0.0 {
        return Err(AppError::InvalidInput(format!("Invalid playback rate: {}", args.rate)));
    }
    let duration_limit_s = parse_time(&args.duration)?;

    let mut builder = PlayerConfig::builder()
        .with_timeout(Duration::from_secs(args.timeout))
        .with_goal_buffer_length(args.goal_buffer);
    if let Some(user_agent) = &args.user_agent {
        builder = builder.with_user_agent(user_agent);
    }
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        builder = builder.with_header(name, value);
    }
    let config = builder.build();

    let (transport, completions) = ReqwestTransport::new(&config.http)?;

    info!(url = %args.url, "Fetching manifest");
    let manifest = transport.fetch_text(&args.url).await?;
    let variants = resolve_manifest(&args.url, &manifest, Instant::now(), &config, || {
        Box::new(transport.clone()) as Box<dyn Transport>
    })?;
    let variant_count = variants.len();
    let playlist = variants.into_iter().nth(args.variant).ok_or_else(|| {
        AppError::InvalidInput(format!(
            "Variant {} requested but the manifest lists {variant_count}",
            args.variant
        ))
    })?;
    info!(uri = %playlist.uri(), variant = args.variant, variants = variant_count, "Selected playlist");

    let output = File::create(&args.output)?;
    let sink = MemoryBufferSink::with_writer(Box::new(BufWriter::new(output)));

    let clock = WallClock::new(args.rate);
    let mut loader = SegmentLoader::new(&config, Box::new(transport.clone()), Box::new(clock.clone()));
    loader.attach_sink(Box::new(sink));

    let (driver, handle, events) = PlayerDriver::new(&config, playlist, loader, clock, completions);
    let token = CancellationToken::new();

    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping");
            ctrl_c_token.cancel();
        }
    });

    let limit = (duration_limit_s > 0.0).then(|| Duration::from_secs_f64(duration_limit_s));
    let monitor = Monitor {
        handle,
        token: token.clone(),
        max_retries: args.max_retries,
        retry_delay: Duration::from_secs(args.retry_delay),
    };
    let (stats, outcome) = tokio::join!(driver.run(token.clone()), monitor.watch(events, limit));

    info!(
        output = %args.output.display(),
        segments = stats.media_requests,
        bytes = stats.media_bytes_transferred,
        transfer_time = ?stats.media_transfer_duration,
        "Finished"
    );
    outcome
}

/// Reacts to player events: retries errors and stops at the end of the
/// stream or the time limit.
struct Monitor {
    handle: PlayerHandle,
    token: CancellationToken,
    max_retries: u32,
    retry_delay: Duration,
}

impl Monitor {
    async fn watch(
        self,
        mut events: mpsc::UnboundedReceiver<PlayerEvent>,
        limit: Option<Duration>,
    ) -> Result<(), AppError> {
        let deadline = limit.map(|limit| tokio::time::Instant::now() + limit);
        let mut retries = 0;

        loop {
            let event = tokio::select! {
                _ = self.token.cancelled() => return Ok(()),
                _ = sleep_until(deadline), if deadline.is_some() => {
                    info!("Duration limit reached");
                    self.token.cancel();
                    return Ok(());
                }
                event = events.recv() => event,
            };

            let record = match event {
                None => return Ok(()),
                Some(PlayerEvent::Ended) => {
                    info!("Stream fully buffered");
                    self.token.cancel();
                    return Ok(());
                }
                Some(PlayerEvent::Loader(LoaderEvent::Error(record)))
                | Some(PlayerEvent::Playlist(PlaylistEvent::Error(record))) => record,
                Some(PlayerEvent::Loader(LoaderEvent::SegmentTimingUpdated(update))) => {
                    retries = 0;
                    info!(msn = update.media_sequence_number, end = update.end, "Segment buffered");
                    continue;
                }
                Some(event) => {
                    debug!(?event, "Player event");
                    continue;
                }
            };

            retries += 1;
            if retries > self.max_retries {
                self.token.cancel();
                return Err(AppError::Playback(format!(
                    "giving up after {} retries: {record}",
                    self.max_retries
                )));
            }
            warn!(error = %record, attempt = retries, delay = ?self.retry_delay, "Playback error, reloading");
            tokio::select! {
                _ = self.token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
            if !self.handle.send(PlayerCommand::Reload) {
                return Ok(());
            }
        }
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
