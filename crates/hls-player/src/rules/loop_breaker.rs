use std::collections::VecDeque;

use tracing::debug;

use super::{Candidate, SelectionContext, SelectionRule};

/// Stalls selection when the same index keeps coming back.
///
/// Remembers the last `window` emitted indices. A proposal that would make
/// an index appear more than `max_repeats` times in that window becomes
/// `-1` instead. The window is cleared whenever a new playlist is attached.
#[derive(Debug, Clone)]
pub struct LoopBreaker {
    window: usize,
    max_repeats: usize,
    history: VecDeque<i64>,
}

impl LoopBreaker {
    pub fn new(window: usize, max_repeats: usize) -> Self {
        Self {
            window,
            max_repeats,
            history: VecDeque::with_capacity(window),
        }
    }
}

impl Default for LoopBreaker {
    fn default() -> Self {
        Self::new(5, 2)
    }
}

impl SelectionRule for LoopBreaker {
    fn name(&self) -> &'static str {
        "loop-breaker"
    }

    fn select(&mut self, ctx: &SelectionContext<'_>, current: Candidate) -> Candidate {
        if ctx.is_new_playlist {
            self.history.clear();
        }

        let mut emitted = current;
        if current.is_decided() {
            let occurrences = self.history.iter().filter(|&&index| index == current.index).count();
            if occurrences + 1 > self.max_repeats {
                debug!(
                    index = current.index,
                    occurrences, "Same index selected repeatedly, stalling"
                );
                emitted = Candidate::new(self.name(), -1);
            }
        }

        if self.window > 0 {
            if self.history.len() == self.window {
                self.history.pop_front();
            }
            self.history.push_back(emitted.index);
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranges::TimeRanges;
    use crate::rules::testing::playlist;

    fn run(rule: &mut LoopBreaker, index: i64, is_new_playlist: bool) -> i64 {
        let playlist = playlist(10);
        let buffered = TimeRanges::new();
        let ctx = SelectionContext {
            playlist: &playlist,
            current_time: 0.0,
            buffered: &buffered,
            expired: 0.0,
            is_seeking: false,
            is_new_playlist,
        };
        rule.select(&ctx, Candidate::new("test", index)).index
    }

    #[test]
    fn third_repeat_is_stalled() {
        let mut rule = LoopBreaker::default();
        assert_eq!(run(&mut rule, 4, false), 4);
        assert_eq!(run(&mut rule, 4, false), 4);
        assert_eq!(run(&mut rule, 4, false), -1);
        assert_eq!(run(&mut rule, 5, false), 5);
    }

    #[test]
    fn new_playlist_resets_history() {
        let mut rule = LoopBreaker::default();
        run(&mut rule, 4, false);
        run(&mut rule, 4, false);
        assert_eq!(run(&mut rule, 4, true), 4);
        assert_eq!(run(&mut rule, 4, false), 4);
        assert_eq!(run(&mut rule, 4, false), -1);
    }

    #[test]
    fn repeats_outside_window_are_forgotten() {
        let mut rule = LoopBreaker::default();
        run(&mut rule, 1, false);
        run(&mut rule, 1, false);
        for index in [2, 3, 4, 5, 6] {
            assert_eq!(run(&mut rule, index, false), index);
        }
        assert_eq!(run(&mut rule, 1, false), 1);
    }

    #[test]
    fn undecided_candidates_pass_through() {
        let mut rule = LoopBreaker::default();
        for _ in 0..5 {
            assert_eq!(run(&mut rule, -1, false), -1);
        }
    }
}
