//! Buffered range arithmetic.

use serde::{Deserialize, Serialize};

/// One contiguous buffered span of playback time, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferedRange {
    pub start: f64,
    pub end: f64,
}

impl BufferedRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Inclusive at both ends.
    pub fn contains(&self, time: f64) -> bool {
        self.start <= time && time <= self.end
    }
}

/// End of the contiguous buffered span that covers `time`, if any.
///
/// Ranges that start exactly where the span ends are treated as part of it.
fn covered_until(ranges: &[BufferedRange], time: f64) -> Option<f64> {
    let mut end = ranges.iter().find(|range| range.contains(time))?.end;

    loop {
        let extended = ranges
            .iter()
            .filter(|range| range.start <= end && range.end > end)
            .map(|range| range.end)
            .fold(end, f64::max);
        if extended == end {
            return Some(end);
        }
        end = extended;
    }
}

/// Earliest time at or after `position` that some track has not buffered.
///
/// Each item is the range list of one track. A track with nothing covering
/// `position` makes `position` itself the answer. With no tracks at all
/// there is nothing buffered, so the answer is also `position`.
pub fn next_unbuffered_time<'a, I>(position: f64, tracks: I) -> f64
where
    I: IntoIterator<Item = &'a [BufferedRange]>,
{
    let mut next: Option<f64> = None;

    for ranges in tracks {
        match covered_until(ranges, position) {
            Some(end) => next = Some(next.map_or(end, |current| current.min(end))),
            None => return position,
        }
    }

    next.unwrap_or(position)
}
