//! Time intervals and timecode parsing/formatting.
//!
//! Everything in the pipeline is anchored to `Interval`s on the video
//! timeline. AI engines echo timecodes back as text, so parsing has to be
//! lenient (`1:02.5`, `00:00:01`, `2.350` are all accepted); formatting is
//! always the canonical `hh:mm:ss.fff`.

use crate::error::{Result, SubgenError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A half-open span `[start, end)` on the shared video timeline.
///
/// `end >= start` is enforced at construction. Boundaries only change in the
/// explicit post-alignment adjustment pass (`align::adjust`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    #[serde(with = "timecode")]
    pub start: Duration,
    #[serde(with = "timecode")]
    pub end: Duration,
}

impl Interval {
    pub fn new(start: Duration, end: Duration) -> Result<Self> {
        if end < start {
            return Err(SubgenError::InvariantViolation(format!(
                "interval end {} is before start {}",
                format_timecode(end),
                format_timecode(start)
            )));
        }
        Ok(Self { start, end })
    }

    /// Construct from fractional seconds. Convenience for tests and importers.
    pub fn from_secs(start: f64, end: f64) -> Result<Self> {
        Self::new(Duration::from_secs_f64(start), Duration::from_secs_f64(end))
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Midpoint in nanoseconds, used for nearest-interval distance math.
    pub fn midpoint_nanos(&self) -> i128 {
        let start = self.start.as_nanos() as i128;
        let end = self.end.as_nanos() as i128;
        start + (end - start) / 2
    }

    /// Strict overlap: shared span with positive length.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Fraction of each interval covered by the shared span.
    ///
    /// Returns `None` when there is no positive-length overlap, or when
    /// either operand is zero-length (a zero-length span covers nothing).
    pub fn overlap_with(&self, other: &Interval) -> Option<Overlap> {
        if self.end <= self.start || other.end <= other.start {
            return None;
        }
        let overlap_start = self.start.max(other.start);
        let overlap_end = self.end.min(other.end);
        if overlap_end <= overlap_start {
            return None;
        }
        let shared = (overlap_end - overlap_start).as_secs_f64();
        Some(Overlap {
            of_a: (shared / self.duration().as_secs_f64()) as f32,
            of_b: (shared / other.duration().as_secs_f64()) as f32,
        })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} --> {}",
            format_timecode(self.start),
            format_timecode(self.end)
        )
    }
}

/// How much of two intervals is shared, as a fraction of each.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlap {
    /// Shared span / duration of `a`.
    pub of_a: f32,
    /// Shared span / duration of `b`.
    pub of_b: f32,
}

/// Format a duration as `hh:mm:ss.fff`.
pub fn format_timecode(d: Duration) -> String {
    let total_ms = d.as_millis();
    let ms = total_ms % 1000;
    let secs = (total_ms / 1000) % 60;
    let mins = (total_ms / 60_000) % 60;
    let hours = total_ms / 3_600_000;
    format!("{hours:02}:{mins:02}:{secs:02}.{ms:03}")
}

/// Parse a timecode, accepting `hh:mm:ss.fff`, `mm:ss.fff`, `ss.fff` and
/// missing fractional parts. AI responses are sloppy about the hour field.
pub fn parse_timecode(text: &str) -> Result<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return Err(parse_error(text, "empty timecode"));
    }

    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() > 3 {
        return Err(parse_error(text, "too many ':' separators"));
    }

    let mut seconds = 0.0f64;
    for part in &parts {
        let value: f64 = part
            .parse()
            .map_err(|_| parse_error(text, "non-numeric component"))?;
        if !value.is_finite() || value < 0.0 {
            return Err(parse_error(text, "component out of range"));
        }
        seconds = seconds * 60.0 + value;
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| parse_error(text, "value out of range"))
}

fn parse_error(text: &str, detail: &str) -> SubgenError {
    SubgenError::ResponseParse {
        message: format!("invalid timecode '{text}': {detail}"),
        repaired: String::new(),
    }
}

/// Serde helper: `Duration` as a `hh:mm:ss.fff` string.
pub mod timecode {
    use super::{format_timecode, parse_timecode};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timecode(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_timecode(&text).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(start: f64, end: f64) -> Interval {
        Interval::from_secs(start, end).unwrap()
    }

    #[test]
    fn interval_rejects_reversed_bounds() {
        assert!(Interval::from_secs(5.0, 4.0).is_err());
    }

    #[test]
    fn zero_length_interval_is_allowed() {
        let i = iv(3.0, 3.0);
        assert_eq!(i.duration(), Duration::ZERO);
    }

    #[test]
    fn overlaps_is_strict() {
        assert!(iv(0.0, 5.0).overlaps(&iv(4.0, 9.0)));
        // Touching boundaries do not overlap
        assert!(!iv(0.0, 5.0).overlaps(&iv(5.0, 9.0)));
    }

    #[test]
    fn overlap_fractions() {
        // word (4,9) vs timing (0,5): shared 1s
        let o = iv(4.0, 9.0).overlap_with(&iv(0.0, 5.0)).unwrap();
        assert!((o.of_a - 0.2).abs() < 1e-6);
        assert!((o.of_b - 0.2).abs() < 1e-6);
    }

    #[test]
    fn overlap_with_zero_length_operand_is_none() {
        assert!(iv(0.0, 5.0).overlap_with(&iv(3.0, 3.0)).is_none());
        assert!(iv(3.0, 3.0).overlap_with(&iv(0.0, 5.0)).is_none());
    }

    #[test]
    fn format_round_trip() {
        let d = Duration::from_millis(3_723_456); // 01:02:03.456
        assert_eq!(format_timecode(d), "01:02:03.456");
        assert_eq!(parse_timecode("01:02:03.456").unwrap(), d);
    }

    #[test]
    fn parse_accepts_short_forms() {
        assert_eq!(parse_timecode("2.5").unwrap(), Duration::from_millis(2500));
        assert_eq!(parse_timecode("1:02").unwrap(), Duration::from_secs(62));
        assert_eq!(
            parse_timecode("00:00:01").unwrap(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_timecode("").is_err());
        assert!(parse_timecode("abc").is_err());
        assert!(parse_timecode("1:2:3:4").is_err());
        assert!(parse_timecode("-5").is_err());
    }

    #[test]
    fn parse_rejects_non_finite_and_overflowing_values() {
        // All of these are valid f64 literals; none must escape as a panic.
        for text in ["NaN", "inf", "-inf", "1e20", "9e99", "1:inf"] {
            assert!(parse_timecode(text).is_err(), "{text} should be rejected");
        }
    }

    #[test]
    fn midpoint_math() {
        let i = iv(4.0, 9.0);
        assert_eq!(i.midpoint_nanos(), Duration::from_secs_f64(6.5).as_nanos() as i128);
    }
}
