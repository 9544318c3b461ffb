//! Per-request cost accounting for AI stages.
//!
//! Every request, successful or not, appends a record to the owning
//! transcription/translation so the end-of-run report can show where time
//! and tokens went.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Stage that issued the request (e.g. `full-ai` or `full/en`).
    pub task: String,
    /// Engine identifier (base address + model, or "manual").
    pub engine: String,
    /// Wall-clock time spent on the request.
    #[serde(with = "millis")]
    pub elapsed: Duration,
    pub items_in_request: usize,
    pub items_in_response: usize,
    pub prompt_chars: usize,
    pub completion_chars: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Totals over a set of cost records, for the run report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostSummary {
    pub requests: usize,
    pub elapsed: Duration,
    pub items_in_response: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl CostSummary {
    pub fn sum<'a>(records: impl IntoIterator<Item = &'a CostRecord>) -> Self {
        let mut total = Self::default();
        for r in records {
            total.requests += 1;
            total.elapsed += r.elapsed;
            total.items_in_response += r.items_in_response;
            total.prompt_tokens += r.prompt_tokens.unwrap_or(0);
            total.completion_tokens += r.completion_tokens.unwrap_or(0);
        }
        total
    }
}

/// Serde helper: `Duration` as integer milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(elapsed_ms: u64, items: usize, tokens: Option<u64>) -> CostRecord {
        CostRecord {
            task: "full-ai".into(),
            engine: "http://localhost:10000,test-model".into(),
            elapsed: Duration::from_millis(elapsed_ms),
            items_in_request: items,
            items_in_response: items,
            prompt_chars: 100,
            completion_chars: 50,
            prompt_tokens: tokens,
            completion_tokens: tokens,
            total_tokens: tokens.map(|t| t * 2),
        }
    }

    #[test]
    fn summary_sums_across_records() {
        let records = vec![record(1000, 5, Some(200)), record(500, 3, None)];
        let total = CostSummary::sum(&records);
        assert_eq!(total.requests, 2);
        assert_eq!(total.elapsed, Duration::from_millis(1500));
        assert_eq!(total.items_in_response, 8);
        assert_eq!(total.prompt_tokens, 200);
    }

    #[test]
    fn elapsed_round_trips_as_millis() {
        let r = record(1234, 1, Some(10));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["elapsed"], 1234);
        let back: CostRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.elapsed, Duration::from_millis(1234));
    }
}
