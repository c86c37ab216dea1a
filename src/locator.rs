//! Time window extraction over sorted record streams
//!
//! Every stream is sorted ascending by timestamp, so a window is a contiguous
//! index range. Callers that walk ascending, non-overlapping windows pass the
//! previous `next` as the hint of the following call to keep the whole walk
//! linear.

use std::ops::Range;

use crate::types::{Event, Fixation, Saccade, Sample};

/// A record with a position on the time axis
pub trait Timed {
    fn timestamp(&self) -> i64;

    /// Extent of the record in ms (0 for point records)
    fn duration(&self) -> i64 {
        0
    }
}

impl Timed for Sample {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Timed for Event {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Timed for Saccade {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Timed for Fixation {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn duration(&self) -> i64 {
        self.duration
    }
}

/// Membership rule for records that straddle a window boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// `start <= ts <= end`
    Point,
    /// `[ts, ts + duration]` inside `[start, end]`, or at least half of it
    /// when `include_half` is set
    Interval { include_half: bool },
}

/// Result of a [`locate`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRange {
    /// Hint for the next call over a later window
    pub next: usize,
    pub first: usize,
    /// Exclusive
    pub last: usize,
}

impl WindowRange {
    pub fn range(&self) -> Range<usize> {
        self.first..self.last
    }

    pub fn len(&self) -> usize {
        self.last - self.first
    }

    pub fn is_empty(&self) -> bool {
        self.first == self.last
    }

    /// Slice of `records` covered by this window
    pub fn slice<'a, T>(&self, records: &'a [T]) -> &'a [T] {
        &records[self.first..self.last]
    }
}

/// Locate the records of `[start, end]`, scanning forward from `hint`.
pub fn locate<T: Timed>(
    records: &[T],
    hint: usize,
    start: i64,
    end: i64,
    policy: WindowPolicy,
) -> WindowRange {
    let len = records.len();
    if hint >= len {
        return WindowRange {
            next: len,
            first: len,
            last: len,
        };
    }

    let mut curr = hint;
    while curr < len && records[curr].timestamp() < start {
        curr += 1;
    }

    match policy {
        WindowPolicy::Point => {
            let first = curr;
            while curr < len && records[curr].timestamp() <= end {
                curr += 1;
            }
            WindowRange {
                next: curr,
                first,
                last: curr,
            }
        }
        WindowPolicy::Interval { include_half } => {
            if include_half && curr > 0 && midpoint_after(&records[curr - 1], start) {
                curr -= 1;
            }
            let first = curr;
            while curr < len && records[curr].timestamp() + records[curr].duration() <= end {
                curr += 1;
            }
            if include_half && curr < len && !midpoint_after(&records[curr], end) {
                curr += 1;
            }
            WindowRange {
                next: curr,
                first,
                last: curr,
            }
        }
    }
}

/// `ts + duration / 2 > at`, without integer rounding
fn midpoint_after<T: Timed>(record: &T, at: i64) -> bool {
    2 * record.timestamp() + record.duration() > 2 * at
}

/// Point-policy locate for samples, saccades and events
pub fn locate_points<T: Timed>(records: &[T], hint: usize, start: i64, end: i64) -> WindowRange {
    locate(records, hint, start, end, WindowPolicy::Point)
}

/// Interval-policy locate for fixations
pub fn locate_fixations(
    fixations: &[Fixation],
    hint: usize,
    start: i64,
    end: i64,
    include_half: bool,
) -> WindowRange {
    locate(
        fixations,
        hint,
        start,
        end,
        WindowPolicy::Interval { include_half },
    )
}
