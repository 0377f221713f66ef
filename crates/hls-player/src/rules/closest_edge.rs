use tracing::error;

use super::{Candidate, SelectionContext, SelectionRule};
use crate::playlist::media_index_for_time;

/// Targets the gap next to the buffered range closest to the playhead.
///
/// Only acts when no earlier rule decided. With nothing buffered it looks
/// up the segment at the playhead directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosestBufferEdge;

impl SelectionRule for ClosestBufferEdge {
    fn name(&self) -> &'static str {
        "closest-buffer-edge"
    }

    fn select(&mut self, ctx: &SelectionContext<'_>, current: Candidate) -> Candidate {
        if current.is_decided() {
            return current;
        }

        let time = ctx.current_time;
        if ctx.buffered.is_empty() {
            return Candidate::new(
                "closest-buffer-edge: no buffer",
                media_index_for_time(ctx.playlist, time, ctx.expired),
            );
        }

        let Some(closest) = ctx.buffered.iter().copied().min_by(|a, b| {
            distance(a.start, a.end, time).total_cmp(&distance(b.start, b.end, time))
        }) else {
            return current;
        };

        if closest.end < time {
            let target = closest.end + (time - closest.end) / 2.0;
            return Candidate::new(
                "closest-buffer-edge: playhead past closest buffer end",
                media_index_for_time(ctx.playlist, target, ctx.expired),
            );
        }

        if closest.start > time {
            let target = time + (closest.start - time) / 2.0;
            return Candidate::new(
                "closest-buffer-edge: playhead before closest buffer start",
                media_index_for_time(ctx.playlist, target, ctx.expired),
            );
        }

        error!(
            time,
            buffered = %ctx.buffered,
            expired = ctx.expired,
            "Playhead is inside a buffered range, no edge to target"
        );
        debug_assert!(false, "closest-buffer-edge reached with playhead inside {closest:?}");
        current
    }
}

fn distance(start: f64, end: f64, time: f64) -> f64 {
    if end < time { time - end } else { start - time }
}
