// Playlist text -> structured playlist, backed by m3u8-rs.

use m3u8_rs::{KeyMethod, MediaPlaylist, parse_playlist_res};
use tracing::{debug, warn};

use crate::PlayerError;
use crate::playlist::model::{ByteRange, Playlist, Segment, SegmentKey};

/// Turns playlist text into a [`Playlist`].
pub trait PlaylistParser {
    fn parse(&self, text: &str, uri: &str) -> Result<Playlist, PlayerError>;
}

/// A variant stream listed by a master manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantInfo {
    pub uri: String,
    pub bandwidth: u64,
}

/// Result of parsing text that may be either manifest flavour.
#[derive(Debug, Clone)]
pub enum ParsedManifest {
    Master(Vec<VariantInfo>),
    Media(Playlist),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct M3u8Parser;

impl M3u8Parser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_manifest(&self, text: &str, uri: &str) -> Result<ParsedManifest, PlayerError> {
        match parse_playlist_res(text.as_bytes()) {
            Ok(m3u8_rs::Playlist::MasterPlaylist(pl)) => {
                let variants = pl
                    .variants
                    .into_iter()
                    .filter(|variant| !variant.is_i_frame)
                    .map(|variant| VariantInfo {
                        uri: variant.uri,
                        bandwidth: variant.bandwidth,
                    })
                    .collect();
                Ok(ParsedManifest::Master(variants))
            }
            Ok(m3u8_rs::Playlist::MediaPlaylist(pl)) => {
                convert_media_playlist(pl, &key_clears(text), uri).map(ParsedManifest::Media)
            }
            Err(e) => Err(PlayerError::Parse(format!(
                "Failed to parse playlist at {uri}: {e}"
            ))),
        }
    }
}

impl PlaylistParser for M3u8Parser {
    fn parse(&self, text: &str, uri: &str) -> Result<Playlist, PlayerError> {
        match self.parse_manifest(text, uri)? {
            ParsedManifest::Media(playlist) => Ok(playlist),
            ParsedManifest::Master(_) => Err(PlayerError::Parse(format!(
                "Expected a media playlist at {uri}, found a master playlist"
            ))),
        }
    }
}

/// For each segment URI line, whether an `#EXT-X-KEY:METHOD=NONE` tag
/// precedes it since the previous segment.
///
/// m3u8-rs drops `METHOD=NONE` keys, so they are detected on the raw text.
fn key_clears(text: &str) -> Vec<bool> {
    let mut clears = Vec::new();
    let mut pending = false;
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(attributes) = line.strip_prefix("#EXT-X-KEY:") {
            pending = attributes
                .split(',')
                .any(|attribute| attribute.trim() == "METHOD=NONE");
        } else if !line.starts_with('#') {
            clears.push(pending);
            pending = false;
        }
    }
    clears
}

fn convert_media_playlist(
    pl: MediaPlaylist,
    clears: &[bool],
    uri: &str,
) -> Result<Playlist, PlayerError> {
    let mut segments: Vec<Segment> = Vec::with_capacity(pl.segments.len());
    // EXT-X-KEY applies to every following segment until the next one.
    let mut current_key: Option<SegmentKey> = None;

    for (index, media_segment) in pl.segments.into_iter().enumerate() {
        if let Some(key) = &media_segment.key {
            current_key = convert_key(key)?;
        } else if clears.get(index).copied().unwrap_or(false) {
            current_key = None;
        }

        let byte_range = media_segment.byte_range.as_ref().map(|range| {
            let offset = range.offset.unwrap_or_else(|| {
                segments
                    .last()
                    .filter(|prev| prev.uri == media_segment.uri)
                    .and_then(|prev| prev.byte_range)
                    .map(|prev| prev.offset + prev.length)
                    .unwrap_or(0)
            });
            ByteRange {
                offset,
                length: range.length,
            }
        });

        segments.push(Segment {
            uri: media_segment.uri,
            byte_range,
            key: current_key.clone(),
            discontinuity: media_segment.discontinuity,
            duration: f64::from(media_segment.duration),
            ..Default::default()
        });
    }

    let mut playlist = Playlist {
        uri: uri.to_string(),
        resolved_uri: Some(uri.to_string()),
        media_sequence: pl.media_sequence,
        target_duration: pl.target_duration as f64,
        end_list: pl.end_list,
        segments,
        discontinuity_starts: Vec::new(),
    };
    playlist.rebuild_discontinuity_starts();

    debug!(
        uri,
        msn = playlist.media_sequence,
        segments = playlist.segments.len(),
        end_list = playlist.end_list,
        "Parsed media playlist"
    );
    Ok(playlist)
}

fn convert_key(key: &m3u8_rs::Key) -> Result<Option<SegmentKey>, PlayerError> {
    let method = match &key.method {
        KeyMethod::None => return Ok(None),
        KeyMethod::AES128 => "AES-128".to_string(),
        KeyMethod::SampleAES => "SAMPLE-AES".to_string(),
        KeyMethod::Other(other) => other.clone(),
    };

    let Some(key_uri) = key.uri.clone() else {
        warn!(method, "EXT-X-KEY without URI, treating segments as clear");
        return Ok(None);
    };

    let iv = key.iv.as_deref().map(parse_iv).transpose()?;

    Ok(Some(SegmentKey {
        method,
        uri: key_uri,
        resolved_uri: None,
        iv,
        bytes: None,
    }))
}

pub(crate) fn parse_iv(iv_hex_str: &str) -> Result<[u8; 16], PlayerError> {
    let iv_str = iv_hex_str
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let mut iv_bytes = [0u8; 16];
    hex::decode_to_slice(iv_str, &mut iv_bytes)
        .map_err(|e| PlayerError::Parse(format!("Failed to parse IV '{iv_hex_str}': {e}")))?;
    Ok(iv_bytes)
}
