use crate::ranges::{TimeRanges, find_range};

/// Whether the buffer already holds enough media ahead of `current_time`.
///
/// Playback sitting past the end of the buffer, or inside a gap, never has
/// enough buffer. Otherwise the lookahead inside the range containing
/// `current_time` is compared against `goal`.
pub fn has_enough_buffer(buffered: &TimeRanges, current_time: f64, goal: f64) -> bool {
    let end_of_buffer = buffered.last_end().unwrap_or(0.0);
    if current_time > end_of_buffer {
        return false;
    }

    match find_range(buffered, current_time).get(0) {
        Some(range) => range.end - current_time >= goal,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_is_never_enough() {
        assert!(!has_enough_buffer(&TimeRanges::new(), 0.0, 30.0));
        assert!(!has_enough_buffer(&TimeRanges::new(), 5.0, 30.0));
    }

    #[test]
    fn enough_when_lookahead_meets_goal() {
        let buffered = TimeRanges::from_pairs(&[(0.0, 40.0)]);
        assert!(has_enough_buffer(&buffered, 5.0, 30.0));
        assert!(has_enough_buffer(&buffered, 10.0, 30.0));
        assert!(!has_enough_buffer(&buffered, 10.5, 30.0));
    }

    #[test]
    fn short_lookahead_is_not_enough() {
        let buffered = TimeRanges::from_pairs(&[(0.0, 10.0)]);
        assert!(!has_enough_buffer(&buffered, 5.0, 30.0));
        assert!(!has_enough_buffer(&buffered, 11.0, 30.0));
    }

    #[test]
    fn playhead_past_buffer_end() {
        let buffered = TimeRanges::from_pairs(&[(0.0, 40.0)]);
        assert!(!has_enough_buffer(&buffered, 41.0, 0.0));
    }

    #[test]
    fn playhead_in_gap() {
        let buffered = TimeRanges::from_pairs(&[(0.0, 10.0), (20.0, 80.0)]);
        assert!(!has_enough_buffer(&buffered, 15.0, 30.0));
        assert!(has_enough_buffer(&buffered, 20.0, 30.0));
    }
}
