//! Chart series for the operator UI: the moisture trace plus a flat
//! threshold line spanning the same time range.

use serde::Serialize;
use time::OffsetDateTime;

use crate::window::SampleWindow;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    #[serde(with = "time::serde::rfc3339")]
    pub t: OffsetDateTime,
    pub value: f64,
}

#[derive(Debug, Serialize)]
pub struct Series {
    pub moisture: Vec<Point>,
    pub threshold: Vec<Point>,
}

/// Build both series from a time-sorted snapshot. The threshold line runs
/// from the earliest retained sample to `now`.
pub fn build(window: &SampleWindow, threshold: f64, now: OffsetDateTime) -> Series {
    let moisture: Vec<Point> = window
        .snapshot_ordered_by_time()
        .into_iter()
        .map(|s| Point {
            t: s.timestamp,
            value: s.value,
        })
        .collect();

    let start = moisture.first().map(|p| p.t).unwrap_or(now);
    let threshold = vec![
        Point {
            t: start,
            value: threshold,
        },
        Point {
            t: now,
            value: threshold,
        },
    ];

    Series {
        moisture,
        threshold,
    }
}
