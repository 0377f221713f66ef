//! Buffered time ranges and the queries the loader runs over them.

use std::fmt;

/// A single contiguous span of buffered media, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Closed-interval containment.
    pub fn contains(&self, time: f64) -> bool {
        self.start <= time && time <= self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Ordered, non-overlapping list of buffered spans.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeRanges {
    ranges: Vec<TimeRange>,
}

impl TimeRanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        let mut ranges = Self::new();
        for &(start, end) in pairs {
            ranges.add(start, end);
        }
        ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn start(&self, index: usize) -> Option<f64> {
        self.ranges.get(index).map(|r| r.start)
    }

    pub fn end(&self, index: usize) -> Option<f64> {
        self.ranges.get(index).map(|r| r.end)
    }

    pub fn get(&self, index: usize) -> Option<TimeRange> {
        self.ranges.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeRange> + '_ {
        self.ranges.iter()
    }

    /// End of the last buffered span.
    pub fn last_end(&self) -> Option<f64> {
        self.ranges.last().map(|r| r.end)
    }

    /// Inserts a span, coalescing it with anything it touches or overlaps.
    pub fn add(&mut self, start: f64, end: f64) {
        if end <= start {
            return;
        }
        let mut merged = TimeRange::new(start, end);
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for range in self.ranges.drain(..) {
            if range.end < merged.start || range.start > merged.end {
                kept.push(range);
            } else {
                merged.start = merged.start.min(range.start);
                merged.end = merged.end.max(range.end);
            }
        }
        let at = kept
            .iter()
            .position(|r| r.start > merged.start)
            .unwrap_or(kept.len());
        kept.insert(at, merged);
        self.ranges = kept;
    }

    /// Cuts `[start, end)` out of the buffered spans.
    pub fn remove(&mut self, start: f64, end: f64) {
        if end <= start {
            return;
        }
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for range in self.ranges.drain(..) {
            if range.end <= start || range.start >= end {
                kept.push(range);
                continue;
            }
            if range.start < start {
                kept.push(TimeRange::new(range.start, start));
            }
            if range.end > end {
                kept.push(TimeRange::new(end, range.end));
            }
        }
        self.ranges = kept;
    }
}

impl fmt::Display for TimeRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:.3}-{:.3}", range.start, range.end)?;
        }
        f.write_str("]")
    }
}

/// Ranges that contain `time` (inclusive on both edges).
pub fn find_range(buffered: &TimeRanges, time: f64) -> TimeRanges {
    TimeRanges {
        ranges: buffered
            .iter()
            .filter(|r| r.contains(time))
            .copied()
            .collect(),
    }
}

/// The gap strictly between two adjacent ranges that contains `time`.
///
/// Times before the first range, after the last, or on a range edge yield an
/// empty result.
pub fn find_gap(buffered: &TimeRanges, time: f64) -> TimeRanges {
    let gaps = buffered
        .ranges
        .windows(2)
        .map(|pair| TimeRange::new(pair[0].end, pair[1].start))
        .filter(|gap| gap.start < time && time < gap.end)
        .collect();
    TimeRanges { ranges: gaps }
}

/// Finds the single range end present in `update` that is not already
/// covered by `original`.
///
/// Used after an append to learn where the appended media ended. Returns
/// `None` when the update is empty, when nothing new appeared, or when more
/// than one end is new.
pub fn find_sole_uncommon_end(
    original: Option<&TimeRanges>,
    update: Option<&TimeRanges>,
) -> Option<f64> {
    let update = update.filter(|u| !u.is_empty())?;

    let mut uncommon = update.iter().map(|r| r.end).filter(|&end| {
        original.is_none_or(|original| !original.iter().any(|r| r.start <= end && end <= r.end))
    });

    let first = uncommon.next()?;
    match uncommon.next() {
        Some(_) => None,
        None => Some(first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(pairs: &[(f64, f64)]) -> TimeRanges {
        TimeRanges::from_pairs(pairs)
    }

    #[test]
    fn find_range_is_inclusive() {
        let buffered = ranges(&[(0.0, 5.0), (6.0, 12.0)]);
        assert_eq!(find_range(&buffered, 3.0), ranges(&[(0.0, 5.0)]));
        assert_eq!(find_range(&buffered, 6.0), ranges(&[(6.0, 12.0)]));
        assert_eq!(find_range(&buffered, 5.0), ranges(&[(0.0, 5.0)]));
        assert!(find_range(&buffered, 5.5).is_empty());
        assert!(find_range(&buffered, 12.5).is_empty());
    }

    #[test]
    fn find_gap_only_between_ranges() {
        let buffered = ranges(&[(5.0, 10.0), (15.0, 20.0)]);
        assert!(find_gap(&buffered, 5.0).is_empty());
        assert!(find_gap(&buffered, 7.0).is_empty());
        assert!(find_gap(&buffered, 20.0).is_empty());
        assert!(find_gap(&buffered, 4.0).is_empty());
        assert!(find_gap(&buffered, 21.0).is_empty());
        assert_eq!(find_gap(&buffered, 11.0), ranges(&[(10.0, 15.0)]));

        let single = ranges(&[(0.0, 10.0)]);
        for time in [-1.0, 0.0, 5.0, 10.0, 11.0] {
            assert!(find_gap(&single, time).is_empty());
        }
    }

    #[test]
    fn sole_uncommon_end_detects_extension() {
        assert_eq!(
            find_sole_uncommon_end(Some(&ranges(&[(5.0, 10.0)])), Some(&ranges(&[(0.0, 10.0)]))),
            None
        );
        assert_eq!(
            find_sole_uncommon_end(Some(&ranges(&[(5.0, 10.0)])), Some(&ranges(&[(0.0, 11.0)]))),
            Some(11.0)
        );
        assert_eq!(
            find_sole_uncommon_end(Some(&ranges(&[(0.0, 10.0)])), Some(&ranges(&[(2.0, 7.0)]))),
            None
        );
        assert_eq!(
            find_sole_uncommon_end(Some(&ranges(&[(2.0, 10.0)])), Some(&ranges(&[(0.0, 7.0)]))),
            None
        );
        assert_eq!(
            find_sole_uncommon_end(Some(&ranges(&[(2.0, 10.0)])), Some(&ranges(&[(5.0, 15.0)]))),
            Some(15.0)
        );
    }

    #[test]
    fn sole_uncommon_end_across_multiple_ranges() {
        let original = ranges(&[(0.0, 10.0), (20.0, 40.0)]);
        assert_eq!(
            find_sole_uncommon_end(Some(&original), Some(&ranges(&[(20.0, 50.0)]))),
            Some(50.0)
        );
        assert_eq!(
            find_sole_uncommon_end(Some(&original), Some(&ranges(&[(0.0, 40.0)]))),
            None
        );
    }

    #[test]
    fn sole_uncommon_end_ignores_shrink_and_reports_merge() {
        let original = ranges(&[(0.0, 10.0)]);
        assert_eq!(
            find_sole_uncommon_end(Some(&original), Some(&ranges(&[(0.0, 11.0)]))),
            Some(11.0)
        );
        assert_eq!(
            find_sole_uncommon_end(Some(&original), Some(&ranges(&[(0.0, 9.0)]))),
            None
        );
        assert_eq!(
            find_sole_uncommon_end(
                Some(&ranges(&[(0.0, 10.0), (20.0, 40.0)])),
                Some(&ranges(&[(0.0, 50.0)]))
            ),
            Some(50.0)
        );
        assert_eq!(
            find_sole_uncommon_end(Some(&original), Some(&ranges(&[(0.0, 11.0), (12.0, 15.0)]))),
            None
        );
    }

    #[test]
    fn sole_uncommon_end_with_missing_sides() {
        let update = ranges(&[(0.0, 11.0)]);
        assert_eq!(find_sole_uncommon_end(None, Some(&update)), Some(11.0));
        assert_eq!(
            find_sole_uncommon_end(Some(&TimeRanges::new()), Some(&update)),
            Some(11.0)
        );
        assert_eq!(find_sole_uncommon_end(Some(&update), None), None);
        assert_eq!(
            find_sole_uncommon_end(Some(&update), Some(&TimeRanges::new())),
            None
        );
    }

    #[test]
    fn sole_uncommon_end_is_none_when_ambiguous() {
        let update = ranges(&[(0.0, 5.0), (10.0, 15.0)]);
        assert_eq!(find_sole_uncommon_end(None, Some(&update)), None);
    }

    #[test]
    fn add_merges_touching_spans() {
        let mut buffered = TimeRanges::new();
        buffered.add(10.0, 20.0);
        buffered.add(0.0, 5.0);
        buffered.add(5.0, 10.0);
        assert_eq!(buffered, ranges(&[(0.0, 20.0)]));

        buffered.add(30.0, 40.0);
        assert_eq!(buffered.len(), 2);
        assert_eq!(buffered.last_end(), Some(40.0));
    }

    #[test]
    fn remove_splits_spans() {
        let mut buffered = ranges(&[(0.0, 20.0)]);
        buffered.remove(5.0, 10.0);
        assert_eq!(buffered, ranges(&[(0.0, 5.0), (10.0, 20.0)]));
        buffered.remove(0.0, 100.0);
        assert!(buffered.is_empty());
    }
}
