use tracing::{trace, warn};
use url::Url;

use crate::config::DEFAULT_REFRESH_SECONDS;
use crate::playlist::model::{Playlist, Segment};

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Same segment count and media sequence: nothing to do.
    Unchanged,
    Updated(Playlist),
}

/// Merges a freshly fetched playlist into the previous copy of the same URI.
///
/// The new segment list is the base; overlapping old segments only fill
/// fields the update omits.
pub fn merge_playlists(old: Option<&Playlist>, mut update: Playlist) -> MergeOutcome {
    let Some(old) = old else {
        resolve_uris(&mut update);
        return MergeOutcome::Updated(update);
    };

    if old.segments.len() == update.segments.len() && old.media_sequence == update.media_sequence {
        return MergeOutcome::Unchanged;
    }

    let offset = update.media_sequence as i64 - old.media_sequence as i64;
    update.segments = update_segments(&old.segments, update.segments, offset);
    if update.resolved_uri.is_none() {
        update.resolved_uri = old.resolved_uri.clone();
    }
    update.rebuild_discontinuity_starts();
    resolve_uris(&mut update);
    MergeOutcome::Updated(update)
}

/// Aligns `original[i]` with `update[i - offset]` and lets the old segment
/// fill gaps in the new one.
pub fn update_segments(original: &[Segment], mut update: Vec<Segment>, offset: i64) -> Vec<Segment> {
    let upper = original.len() as i64;
    let upper = upper.min(update.len() as i64 + offset);
    let mut i = offset.max(0);
    while i < upper {
        let old = &original[i as usize];
        update[(i - offset) as usize].fill_missing_from(old);
        i += 1;
    }
    update
}

/// Joins relative segment and key URIs against the playlist's base URI.
pub fn resolve_uris(playlist: &mut Playlist) {
    let base = match Url::parse(playlist.base_uri()) {
        Ok(base) => base,
        Err(e) => {
            warn!(uri = %playlist.base_uri(), error = %e, "Cannot resolve URIs against playlist base");
            return;
        }
    };

    for segment in &mut playlist.segments {
        if segment.resolved_uri.is_none() {
            segment.resolved_uri = join(&base, &segment.uri);
        }
        if let Some(key) = segment.key.as_mut().filter(|key| key.resolved_uri.is_none()) {
            key.resolved_uri = join(&base, &key.uri);
        }
    }
}

fn join(base: &Url, uri: &str) -> Option<String> {
    match base.join(uri) {
        Ok(resolved) => Some(resolved.to_string()),
        Err(e) => {
            warn!(base = %base, uri, error = %e, "Failed to resolve URI");
            None
        }
    }
}

/// Seconds of content that scrolled out of the live window between `old`
/// and `update`.
///
/// Precise timing on the update's first segment wins. Otherwise walks back
/// over the old segments that dropped out, accumulating declared durations
/// until a segment with known timing is found.
pub fn compute_expired(old: &Playlist, update: &Playlist, expired: f64) -> f64 {
    if let Some(first) = update.segments.first() {
        if let Some(start) = first.start {
            return start;
        }
        if let Some(end) = first.end {
            return end - first.duration;
        }
    }

    let fallback = if old.target_duration > 0.0 {
        old.target_duration
    } else {
        DEFAULT_REFRESH_SECONDS as f64
    };

    let mut expired = expired;
    let mut i = update.media_sequence as i64 - old.media_sequence as i64 - 1;
    while i >= 0 {
        match old.segments.get(i as usize) {
            None => expired += fallback,
            Some(segment) => {
                if let Some(end) = segment.end {
                    return end;
                }
                if let Some(start) = segment.start {
                    return start + segment.duration;
                }
                expired += segment.duration;
            }
        }
        i -= 1;
    }
    trace!(expired, "Estimated expired duration from declared durations");
    expired
}
