//! Time lookups over a playlist's declared and observed segment timing.

use crate::config::DEFAULT_REFRESH_SECONDS;
use crate::playlist::model::{Playlist, Segment};

fn target_duration(playlist: &Playlist) -> f64 {
    if playlist.target_duration > 0.0 {
        playlist.target_duration
    } else {
        DEFAULT_REFRESH_SECONDS as f64
    }
}

fn declared_duration(segment: &Segment, fallback: f64) -> f64 {
    if segment.duration > 0.0 {
        segment.duration
    } else {
        fallback
    }
}

/// Index of the segment expected to contain `time`.
///
/// Segments whose `end` is already known bound the search: the walk runs
/// forward from the last known end before `time`, or backward from the first
/// known end after it, falling back to linear interpolation between the two.
/// Without any observed timing it walks forward from `expired`.
///
/// Returns `-1` for times before the live window and `segments.len()` for
/// times past the last known segment end.
pub fn media_index_for_time(playlist: &Playlist, time: f64, expired: f64) -> i64 {
    if time < 0.0 {
        return 0;
    }
    let segments = &playlist.segments;
    if segments.is_empty() {
        return 0;
    }

    let fallback = target_duration(playlist);
    let last_segment = segments.len() as i64 - 1;

    let mut known_start: Option<(usize, f64)> = None;
    let mut known_end: Option<(usize, f64)> = None;
    for (i, segment) in segments.iter().enumerate() {
        if let Some(end) = segment.end {
            if end > time {
                known_end = Some((i, end));
                break;
            }
            known_start = Some((i + 1, end));
        }
    }

    match (known_start, known_end) {
        (Some((start_index, _)), _) if start_index == segments.len() => segments.len() as i64,
        (Some((start_index, start_time)), end) => {
            let stop = end.map_or(segments.len(), |(end_index, _)| end_index);
            let mut remaining = time - start_time;
            for (i, segment) in segments.iter().enumerate().take(stop).skip(start_index) {
                remaining -= declared_duration(segment, fallback);
                if remaining < 0.0 {
                    return i as i64;
                }
            }
            match end {
                Some((end_index, end_time)) => {
                    let span = end_time - start_time;
                    let fraction = if span > 0.0 {
                        (time - start_time) / span
                    } else {
                        0.0
                    };
                    start_index as i64
                        + (fraction * (end_index - start_index) as f64).floor() as i64
                }
                None => last_segment,
            }
        }
        (None, Some((end_index, end_time))) => {
            let mut remaining = end_time - time;
            for i in (0..=end_index).rev() {
                remaining -= declared_duration(&segments[i], fallback);
                if remaining < 0.0 {
                    return i as i64;
                }
            }
            if remaining == 0.0 { 0 } else { -1 }
        }
        (None, None) => {
            let mut remaining = time - expired;
            if remaining < 0.0 {
                return -1;
            }
            for (i, segment) in segments.iter().enumerate() {
                remaining -= declared_duration(segment, fallback);
                if remaining < 0.0 {
                    return i as i64;
                }
            }
            last_segment
        }
    }
}

/// Presentation time at which the segment at `end_index` starts.
///
/// Walks back from `end_index - 1` summing declared durations until a segment
/// with observed timing anchors the total.
pub fn playlist_duration(playlist: &Playlist, end_index: usize) -> f64 {
    let fallback = target_duration(playlist);
    let end_index = end_index.min(playlist.segments.len());
    let mut total = 0.0;
    for segment in playlist.segments[..end_index].iter().rev() {
        if let Some(end) = segment.end {
            return total + end;
        }
        if let Some(start) = segment.start {
            return total + start + declared_duration(segment, fallback);
        }
        total += declared_duration(segment, fallback);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vod(durations: &[f64]) -> Playlist {
        Playlist {
            uri: "vod.m3u8".into(),
            target_duration: 10.0,
            end_list: true,
            segments: durations
                .iter()
                .enumerate()
                .map(|(i, d)| Segment::new(format!("{i}.ts"), *d))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn walks_declared_durations_without_timing() {
        let playlist = vod(&[10.0, 10.0, 10.0]);
        assert_eq!(media_index_for_time(&playlist, 0.0, 0.0), 0);
        assert_eq!(media_index_for_time(&playlist, 9.9, 0.0), 0);
        assert_eq!(media_index_for_time(&playlist, 10.0, 0.0), 1);
        assert_eq!(media_index_for_time(&playlist, 25.0, 0.0), 2);
        assert_eq!(media_index_for_time(&playlist, 45.0, 0.0), 2);
    }

    #[test]
    fn accounts_for_expired_content() {
        let playlist = vod(&[10.0, 10.0, 10.0]);
        assert_eq!(media_index_for_time(&playlist, 35.0, 30.0), 0);
        assert_eq!(media_index_for_time(&playlist, 5.0, 30.0), -1);
        assert_eq!(media_index_for_time(&playlist, -1.0, 30.0), 0);
    }

    #[test]
    fn walks_forward_from_known_end() {
        let mut playlist = vod(&[10.0, 10.0, 10.0, 10.0]);
        playlist.segments[0].end = Some(10.0);
        assert_eq!(media_index_for_time(&playlist, 12.0, 0.0), 1);
        assert_eq!(media_index_for_time(&playlist, 31.0, 0.0), 3);
        assert_eq!(media_index_for_time(&playlist, 5.0, 0.0), 0);
    }

    #[test]
    fn past_last_known_end_is_out_of_range() {
        let mut playlist = vod(&[10.0, 10.0]);
        playlist.segments[0].end = Some(10.0);
        playlist.segments[1].end = Some(20.0);
        assert_eq!(media_index_for_time(&playlist, 20.5, 0.0), 2);
    }

    #[test]
    fn walks_backward_from_known_end() {
        let mut playlist = vod(&[10.0, 10.0, 10.0]);
        playlist.segments[2].end = Some(130.0);
        assert_eq!(media_index_for_time(&playlist, 125.0, 0.0), 2);
        assert_eq!(media_index_for_time(&playlist, 115.0, 0.0), 1);
        assert_eq!(media_index_for_time(&playlist, 50.0, 0.0), -1);
    }

    #[test]
    fn interpolates_between_bounds() {
        let mut playlist = vod(&[1.0, 1.0, 1.0, 1.0, 1.0]);
        playlist.segments[0].end = Some(10.0);
        playlist.segments[4].end = Some(50.0);
        // Declared durations run out before reaching 30s.
        assert_eq!(media_index_for_time(&playlist, 30.0, 0.0), 2);
    }

    #[test]
    fn duration_sums_declared_and_anchors_on_timing() {
        let mut playlist = vod(&[10.0, 9.0, 8.0, 7.0]);
        assert_eq!(playlist_duration(&playlist, 2), 19.0);
        assert_eq!(playlist_duration(&playlist, 10), 34.0);
        playlist.segments[1].end = Some(100.0);
        assert_eq!(playlist_duration(&playlist, 3), 108.0);
    }
}
