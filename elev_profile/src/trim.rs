use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scan::PixelSample;

/// Settling rule for discarding edge artifacts (axis labels, stray marks).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimParams {
    /// Neighbours that must stay close to a candidate boundary sample.
    pub window: usize,
    /// Largest allowed row jump, exclusive.
    pub tolerance_px: u32,
}

impl Default for TrimParams {
    fn default() -> Self {
        Self {
            window: 5,
            tolerance_px: 50,
        }
    }
}

/// Inclusive sample index range kept after trimming.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimBounds {
    pub start: usize,
    pub end: usize,
}

fn settled(ys: &[u32], i: usize, mut neighbours: impl Iterator<Item = usize>, tol: u32) -> bool {
    let base = ys[i];
    neighbours.all(|k| base.abs_diff(ys[k]) < tol)
}

/// Locate the first forward-settled and last backward-settled samples.
///
/// `samples` must be non-empty. Runs that cannot be found fall back to the
/// full range.
pub fn find_bounds(samples: &[PixelSample], params: &TrimParams) -> TrimBounds {
    debug_assert!(!samples.is_empty());
    let ys: Vec<u32> = samples.iter().map(|s| s.y).collect();
    let len = ys.len();
    let last = len.saturating_sub(1);
    let w = params.window;
    let tol = params.tolerance_px;

    let start = (0..len.saturating_sub(w))
        .find(|&i| settled(&ys, i, (1..=w).map(|j| i + j), tol))
        .unwrap_or(0);

    let end = (w.saturating_add(1)..len)
        .rev()
        .find(|&i| settled(&ys, i, (1..=w).map(|j| i - j), tol))
        .unwrap_or(last);

    if start > end {
        warn!(start, end, "trim bounds crossed; keeping full sample range");
        return TrimBounds { start: 0, end: last };
    }
    TrimBounds { start, end }
}

/// Samples inside the settled range, with the bounds that selected them.
pub fn trim<'a>(
    samples: &'a [PixelSample],
    params: &TrimParams,
) -> (TrimBounds, &'a [PixelSample]) {
    if samples.is_empty() {
        return (TrimBounds { start: 0, end: 0 }, samples);
    }
    let bounds = find_bounds(samples, params);
    (bounds, &samples[bounds.start..=bounds.end])
}
