use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Seconds between playlist refreshes when no target duration is known.
pub const DEFAULT_REFRESH_SECONDS: u64 = 10;

/// Seconds of media the loader tries to keep buffered ahead of playback.
pub const GOAL_BUFFER_LENGTH_SECONDS: f64 = 30.0;

/// Interval of the loader's scheduling tick.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct PlayerConfig {
    pub http: HttpConfig,
    pub playlist_config: PlaylistConfig,
    pub loader_config: LoaderConfig,
}

impl PlayerConfig {
    pub fn builder() -> crate::builder::PlayerConfigBuilder {
        crate::builder::PlayerConfigBuilder::new()
    }
}

// --- HTTP Configuration ---
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Overall timeout for the entire HTTP request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every request
    pub headers: HeaderMap,

    /// Headers sent only with requests that ask for credentials
    pub credential_headers: HeaderMap,

    /// Whether playlist, key and segment requests carry credentials
    pub with_credentials: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HttpConfig::get_default_headers(),
            credential_headers: HeaderMap::new(),
            with_credentials: false,
        }
    }
}

impl HttpConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        default_headers
    }
}

// --- Playlist Configuration ---
#[derive(Debug, Clone)]
pub struct PlaylistConfig {
    /// Refresh interval used before a target duration is known, and the
    /// window within which a previously fetched playlist counts as fresh.
    pub default_refresh: Duration,
    /// Per-request timeout for playlist fetches
    pub request_timeout: Option<Duration>,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            default_refresh: Duration::from_secs(DEFAULT_REFRESH_SECONDS),
            request_timeout: Some(Duration::from_secs(15)),
        }
    }
}

// --- Segment Loader Configuration ---
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Lookahead (seconds) after which the buffer counts as full
    pub goal_buffer_length: f64,
    /// Interval between scheduling ticks
    pub tick_interval: Duration,
    /// Per-request timeout for key and segment fetches
    pub request_timeout: Option<Duration>,
    /// Number of trailing selections the loop breaker remembers
    pub loop_window: usize,
    /// Selections of the same index tolerated inside the window
    pub loop_max_repeats: usize,
    /// Distance from the live edge (in segments) used when jumping into a live playlist
    pub live_edge_offset_segments: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            goal_buffer_length: GOAL_BUFFER_LENGTH_SECONDS,
            tick_interval: DEFAULT_TICK_INTERVAL,
            request_timeout: Some(Duration::from_secs(20)),
            loop_window: 5,
            loop_max_repeats: 2,
            live_edge_offset_segments: 3,
        }
    }
}
