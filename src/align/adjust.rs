//! Marker-driven boundary refinement, applied after alignment.
//!
//! A group whose text starts or ends with an ellipsis indicates speech
//! spilling over the forced boundary. Rather than mutating intervals during
//! alignment, this pass computes an adjusted copy of the target timeline
//! from the immutable alignment result.

use crate::align::Alignment;
use crate::timing::Interval;
use std::time::Duration;

fn starts_with_ellipsis(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with("...") || trimmed.starts_with('…')
}

fn ends_with_ellipsis(text: &str) -> bool {
    let trimmed = text.trim_end();
    trimmed.ends_with("...") || trimmed.ends_with('…')
}

#[derive(Debug, Clone, Copy)]
pub struct AdjustOptions {
    /// Upper bound on how far a boundary may move.
    pub max_extension: Duration,
}

impl Default for AdjustOptions {
    fn default() -> Self {
        Self {
            max_extension: Duration::from_millis(1500),
        }
    }
}

/// Return an adjusted copy of `timings`.
///
/// A leading ellipsis pulls the interval's start back toward the previous
/// interval's end; a trailing ellipsis pushes its end toward the next
/// interval's start. Neighbors are never overlapped and each move is capped
/// by `max_extension`. Intervals with no matched text are left untouched.
pub fn adjust_boundaries(
    alignment: &Alignment,
    timings: &[Interval],
    options: AdjustOptions,
) -> Vec<Interval> {
    let mut adjusted: Vec<Interval> = timings.to_vec();

    for index in 0..timings.len() {
        let text: String = alignment
            .groups_for_timing(index)
            .map(|g| g.concatenated_text())
            .collect();
        if text.is_empty() {
            continue;
        }

        if starts_with_ellipsis(&text) {
            let floor = if index > 0 {
                timings[index - 1].end
            } else {
                Duration::ZERO
            };
            let target = timings[index].start.saturating_sub(options.max_extension);
            adjusted[index].start = target.max(floor).min(adjusted[index].start);
        }

        if ends_with_ellipsis(&text) {
            let ceiling = timings
                .get(index + 1)
                .map(|next| next.start)
                .unwrap_or(timings[index].end + options.max_extension);
            let target = timings[index].end + options.max_extension;
            adjusted[index].end = target.min(ceiling).max(adjusted[index].end);
        }
    }

    adjusted
}
