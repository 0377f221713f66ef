use super::{Candidate, SelectionContext, SelectionRule};
use crate::playlist::{Playlist, TimingInfo, media_index_for_time};
use crate::ranges::find_range;

/// Probes outward from a starting index for the nearest segment that is not
/// buffered yet: `i, i+1, i-1, i+2, i-2, ...`.
///
/// Starts at the running candidate, or at the segment whose observed timing
/// covers the playhead. A segment without observed timing counts as not
/// buffered. Yields `-1` once the probe walks off the playlist.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferCenteredSearch;

impl SelectionRule for BufferCenteredSearch {
    fn name(&self) -> &'static str {
        "buffer-centered-search"
    }

    fn select(&mut self, ctx: &SelectionContext<'_>, current: Candidate) -> Candidate {
        let segments = &ctx.playlist.segments;
        let mut index = if current.is_decided() {
            current.index
        } else {
            index_for_time(ctx.playlist, ctx.current_time, ctx.expired)
        };

        let mut jump: i64 = 1;
        while index >= 0 && (index as usize) < segments.len() {
            let Some(timing) = segments[index as usize].timing.as_ref().and_then(span) else {
                return Candidate::new(self.name(), index);
            };
            let midpoint = (timing.0 + timing.1) / 2.0;
            if find_range(ctx.buffered, midpoint).is_empty() {
                return Candidate::new(self.name(), index);
            }
            index += jump;
            jump = -(jump + jump.signum());
        }
        Candidate::new(self.name(), -1)
    }
}

fn span(timing: &TimingInfo) -> Option<(f64, f64)> {
    timing
        .video
        .or(timing.audio)
        .map(|span| (span.first, span.last))
}

fn index_for_time(playlist: &Playlist, time: f64, expired: f64) -> i64 {
    playlist
        .segments
        .iter()
        .position(|segment| {
            segment
                .timing
                .as_ref()
                .and_then(span)
                .is_some_and(|(first, last)| first <= time && time <= last)
        })
        .map(|index| index as i64)
        .unwrap_or_else(|| media_index_for_time(playlist, time, expired))
}
