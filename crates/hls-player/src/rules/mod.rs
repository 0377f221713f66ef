//! Ordered rule chain that picks the next media index to fetch.
//!
//! Every rule sees the running [`Candidate`] and either passes it through or
//! replaces it. Most rules only act while `current.index <= -1`, so earlier
//! rules take priority.

mod centered;
mod closest_edge;
mod loop_breaker;
mod sequential;

use std::fmt;

use tracing::trace;

use crate::config::LoaderConfig;
use crate::playlist::Playlist;
use crate::ranges::TimeRanges;

pub use centered::BufferCenteredSearch;
pub use closest_edge::ClosestBufferEdge;
pub use loop_breaker::LoopBreaker;
pub use sequential::SequentialAdvance;

/// A proposed media index and the rule that proposed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub rule: &'static str,
    pub index: i64,
}

impl Candidate {
    pub fn new(rule: &'static str, index: i64) -> Self {
        Self { rule, index }
    }

    /// The starting value: nothing decided yet.
    pub fn none() -> Self {
        Self::new("none", -1)
    }

    pub fn is_decided(&self) -> bool {
        self.index > -1
    }
}

impl Default for Candidate {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.rule, self.index)
    }
}

/// Per-tick inputs shared by every rule.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub playlist: &'a Playlist,
    pub current_time: f64,
    pub buffered: &'a TimeRanges,
    pub expired: f64,
    pub is_seeking: bool,
    pub is_new_playlist: bool,
}

pub trait SelectionRule {
    fn name(&self) -> &'static str;

    fn select(&mut self, ctx: &SelectionContext<'_>, current: Candidate) -> Candidate;
}

pub struct RuleChain {
    rules: Vec<Box<dyn SelectionRule>>,
}

impl fmt::Debug for RuleChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|rule| rule.name()))
            .finish()
    }
}

impl RuleChain {
    /// Sequential advance, closest buffer edge, loop breaker.
    pub fn new(config: &LoaderConfig) -> Self {
        Self::with_rules(vec![
            Box::new(SequentialAdvance::new()),
            Box::new(ClosestBufferEdge),
            Box::new(LoopBreaker::new(config.loop_window, config.loop_max_repeats)),
        ])
    }

    pub fn with_rules(rules: Vec<Box<dyn SelectionRule>>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runs every rule in order.
    ///
    /// The result is either a valid index into `ctx.playlist.segments` or
    /// `-1` for "nothing to fetch this tick".
    pub fn select(&mut self, ctx: &SelectionContext<'_>) -> Candidate {
        let mut current = Candidate::none();
        for rule in &mut self.rules {
            let next = rule.select(ctx, current);
            if next != current {
                trace!(rule = rule.name(), from = %current, to = %next, "Rule changed candidate");
            }
            current = next;
        }

        let len = ctx.playlist.segments.len() as i64;
        if current.index >= len {
            trace!(candidate = %current, segments = len, "Candidate past the end of the playlist");
            return Candidate::new(current.rule, -1);
        }
        if current.index < -1 {
            return Candidate::new(current.rule, -1);
        }
        current
    }
}


#[cfg(test)]
mod tests {
    use super::testing::playlist;
    use super::*;

    fn ctx<'a>(playlist: &'a Playlist, buffered: &'a TimeRanges, time: f64) -> SelectionContext<'a> {
        SelectionContext {
            playlist,
            current_time: time,
            buffered,
            expired: 0.0,
            is_seeking: false,
            is_new_playlist: false,
        }
    }

    #[test]
    fn default_chain_advances_sequentially() {
        let playlist = playlist(3);
        let buffered = TimeRanges::new();
        let mut chain = RuleChain::new(&LoaderConfig::default());
        assert_eq!(chain.len(), 3);

        let picks: Vec<i64> = (0..4).map(|_| chain.select(&ctx(&playlist, &buffered, 0.0)).index).collect();
        assert_eq!(picks, vec![0, 1, 2, -1]);
    }

    #[test]
    fn seeking_falls_through_to_time_lookup() {
        let playlist = playlist(5);
        let buffered = TimeRanges::new();
        let mut chain = RuleChain::new(&LoaderConfig::default());
        let mut context = ctx(&playlist, &buffered, 25.0);
        context.is_seeking = true;

        let candidate = chain.select(&context);
        assert_eq!(candidate.index, 2);
        assert_eq!(candidate.rule, "closest-buffer-edge: no buffer");
    }

    #[test]
    fn custom_chain_order() {
        let playlist = playlist(3);
        let buffered = TimeRanges::new();
        let mut chain = RuleChain::with_rules(vec![Box::new(ClosestBufferEdge)]);
        assert_eq!(chain.select(&ctx(&playlist, &buffered, 11.0)).index, 1);
        assert!(RuleChain::with_rules(Vec::new()).is_empty());
    }
}
