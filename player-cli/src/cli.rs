use clap::Parser;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Adaptive HLS player",
    long_about = "Plays an HLS stream against a simulated playback clock.\n\
                  \n\
                  Segments are fetched, decrypted and buffered exactly as a player would,\n\
                  and the buffered bytes are written to the output file."
)]
pub struct CliArgs {
    /// Master or media playlist URL
    #[arg(required = true, help = "URL of a master or media playlist")]
    pub url: String,

    /// Output file receiving the appended segment bytes
    #[arg(
        short,
        long,
        default_value = "output.ts",
        help = "File the buffered segment bytes are written to"
    )]
    pub output: PathBuf,

    /// Variant to play when the URL is a master playlist
    #[arg(long, default_value = "0", help = "Index of the master playlist variant to play")]
    pub variant: usize,

    /// Seconds of media to keep buffered ahead of the playhead
    #[arg(short, long, default_value = "30", help = "Goal buffer length in seconds")]
    pub goal_buffer: f64,

    /// Playback rate of the simulated clock
    #[arg(short, long, default_value = "1.0", help = "Playback rate (1.0 is real time)")]
    pub rate: f64,

    /// Maximum run time with optional unit (s, m, h)
    /// Examples: "30m", "1.5h", "90s"
    #[arg(
        short = 'd',
        long,
        default_value = "0",
        help = "Stop after this much wall time, with optional unit (s, m, h). Use 0 for unlimited."
    )]
    pub duration: String,

    /// Consecutive errors tolerated before giving up
    #[arg(long, default_value = "5", help = "Maximum consecutive error retries")]
    pub max_retries: u32,

    /// Delay before reloading after an error
    #[arg(long, default_value = "2", help = "Seconds to wait before retrying after an error")]
    pub retry_delay: u64,

    /// Overall HTTP request timeout
    #[arg(long, default_value = "30", help = "HTTP request timeout in seconds")]
    pub timeout: u64,

    /// Custom user agent
    #[arg(long, help = "User-Agent header sent with every request")]
    pub user_agent: Option<String>,

    /// Extra request headers
    #[arg(
        short = 'H',
        long = "header",
        help = "Extra request header as \"Name: Value\". Can be repeated."
    )]
    pub headers: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,
}
