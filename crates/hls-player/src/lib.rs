//! # HLS Player
//!
//! Core of an adaptive HTTP Live Streaming client: keeps a media playlist
//! current, decides which segment to fetch next, and drives each segment
//! through download, decryption and buffer append.
//!
//! ## Features
//!
//! - Live playlist refresh with expired-duration tracking
//! - Pluggable segment selection rule chain
//! - AES-128 segment decryption and byte-range requests
//! - Synchronous, event-driven loaders with an async tokio driver on top

pub mod builder;
pub mod config;
pub mod crypto;
pub mod driver;
pub mod error;
pub mod gate;
pub mod inspect;
pub mod loader;
pub mod playlist;
pub mod ranges;
pub mod rules;
pub mod sink;
pub mod transport;

pub use builder::PlayerConfigBuilder;
pub use config::{HttpConfig, LoaderConfig, PlayerConfig, PlaylistConfig};
pub use error::{ErrorKind, ErrorRecord, PlayerError};

pub use driver::{PlayerCommand, PlayerDriver, PlayerEvent, PlayerHandle, WallClock};
pub use loader::{LoaderEvent, LoaderState, LoaderStats, PlaybackClock, SegmentLoader};
pub use playlist::{
    M3u8Parser, Playlist, PlaylistEvent, PlaylistLoader, PlaylistParser, PlaylistState, Segment,
    resolve_manifest,
};
pub use ranges::{TimeRange, TimeRanges};
pub use rules::{RuleChain, SelectionRule};
pub use sink::{BufferSink, MemoryBufferSink};
pub use transport::{ReqwestTransport, Transport};
