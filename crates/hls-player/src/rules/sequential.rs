use super::{Candidate, SelectionContext, SelectionRule};

/// Proposes the index after the last one it proposed.
///
/// The counter only moves forward and survives seeks. While any seek is in
/// progress the rule stays out of the way so later rules can locate the
/// seek target. This is broader than passing through only for a seek that
/// also attached a new playlist (`is_seeking && is_new_playlist`): a seek on
/// the same playlist would otherwise fetch the next sequential index instead
/// of the segment at the seek target.
#[derive(Debug, Clone)]
pub struct SequentialAdvance {
    last_index: i64,
}

impl SequentialAdvance {
    pub fn new() -> Self {
        Self { last_index: -1 }
    }
}

impl Default for SequentialAdvance {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionRule for SequentialAdvance {
    fn name(&self) -> &'static str {
        "sequential-advance"
    }

    fn select(&mut self, ctx: &SelectionContext<'_>, current: Candidate) -> Candidate {
        if ctx.is_seeking {
            return current;
        }
        self.last_index += 1;
        Candidate::new(self.name(), self.last_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranges::TimeRanges;
    use crate::rules::testing::playlist;

    #[test]
    fn counts_up_and_pauses_while_seeking() {
        let playlist = playlist(5);
        let buffered = TimeRanges::new();
        let mut ctx = SelectionContext {
            playlist: &playlist,
            current_time: 0.0,
            buffered: &buffered,
            expired: 0.0,
            is_seeking: false,
            is_new_playlist: false,
        };
        let mut rule = SequentialAdvance::new();

        assert_eq!(rule.select(&ctx, Candidate::none()).index, 0);
        assert_eq!(rule.select(&ctx, Candidate::none()).index, 1);

        ctx.is_seeking = true;
        assert_eq!(rule.select(&ctx, Candidate::none()), Candidate::none());

        ctx.is_seeking = false;
        assert_eq!(rule.select(&ctx, Candidate::none()).index, 2);
    }
}
