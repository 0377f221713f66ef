//! # Builder for PlayerConfig
//!
//! Fluent construction of [`PlayerConfig`] values.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use hls_player::PlayerConfig;
//!
//! let config = PlayerConfig::builder()
//!     .with_goal_buffer_length(60.0)
//!     .with_tick_interval(Duration::from_millis(250))
//!     .with_user_agent("MyPlayer/1.0")
//!     .with_header("X-Api-Key", "my-secret-key")
//!     .build();
//!
//! assert_eq!(config.loader_config.goal_buffer_length, 60.0);
//! ```

use std::time::Duration;

use reqwest::header::HeaderValue;

use crate::PlayerConfig;

/// Builder for creating PlayerConfig instances with a fluent API
#[derive(Debug, Clone, Default)]
pub struct PlayerConfigBuilder {
    /// Internal config being built
    config: PlayerConfig,
}

impl PlayerConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: PlayerConfig::default(),
        }
    }

    /// Set the overall timeout for the entire HTTP request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.connect_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.http.follow_redirects = follow;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.http.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.http.headers.insert(name, value);
        }
        self
    }

    /// Add a header that is only sent when credentials are requested
    pub fn with_credential_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.http.credential_headers.insert(name, value);
        }
        self
    }

    /// Send credentials with every playlist, key and segment request
    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.config.http.with_credentials = with_credentials;
        self
    }

    /// Set the fallback playlist refresh interval
    pub fn with_default_refresh(mut self, interval: Duration) -> Self {
        self.config.playlist_config.default_refresh = interval;
        self
    }

    /// Set the playlist request timeout
    pub fn with_playlist_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.playlist_config.request_timeout = timeout;
        self
    }

    /// Set the buffer lookahead goal in seconds
    pub fn with_goal_buffer_length(mut self, seconds: f64) -> Self {
        self.config.loader_config.goal_buffer_length = seconds;
        self
    }

    /// Set the loader scheduling interval
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.config.loader_config.tick_interval = interval;
        self
    }

    /// Set the key/segment request timeout
    pub fn with_segment_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.loader_config.request_timeout = timeout;
        self
    }

    /// Tune the loop breaker window and repeat threshold
    pub fn with_loop_breaker(mut self, window: usize, max_repeats: usize) -> Self {
        self.config.loader_config.loop_window = window;
        self.config.loader_config.loop_max_repeats = max_repeats;
        self
    }

    /// Build the final PlayerConfig
    pub fn build(self) -> PlayerConfig {
        self.config
    }
}
