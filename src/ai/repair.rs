//! Speculative repair of malformed AI responses.
//!
//! Models wrap their JSON in prose, reasoning blocks and markdown quotes,
//! drop commas, and truncate arrays mid-object. Each repair here corresponds
//! to a failure pattern seen in the wild; the repaired text is kept on parse
//! failure so a human can finish the job instead of losing the response.

use crate::error::{Result, SubgenError};
use crate::metadata::MetadataBag;
use crate::timing::parse_timecode;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;

/// One array element from a response: the reserved timing fields extracted,
/// everything else collected as metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItem {
    pub start: Duration,
    /// Missing in some responses; the caller resolves it against the
    /// reference item sharing the same start time.
    pub end: Option<Duration>,
    pub metadata: MetadataBag,
}

fn think_blocks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<think>.*?</think>").unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

fn quoted_lines() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*>.*$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

fn missing_comma_after_field() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // A known string field followed (after whitespace only) by the next
        // key's opening quote, meaning the separating comma was dropped.
        Regex::new(r#"("(?:Original|StartTime)"\s*:\s*"[^"]*")(\s*")"#)
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

fn missing_comma_between_objects() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\})(\s*\{)").unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

/// Apply every textual repair. Returns the best candidate for parsing; it
/// may still be invalid.
pub fn repair_response(raw: &str) -> String {
    let text = think_blocks().replace_all(raw, "");
    let text = quoted_lines().replace_all(&text, "");

    // Trim to the outermost [...] span.
    let text = match text.find('[') {
        Some(open) => text[open..].to_string(),
        None => text.into_owned(),
    };
    let text = match text.rfind(']') {
        Some(close) => text[..=close].to_string(),
        None => auto_close_array(&text),
    };

    let text = missing_comma_after_field().replace_all(&text, "$1,$2");
    let text = missing_comma_between_objects().replace_all(&text, "$1,$2");
    text.into_owned()
}

/// No closing bracket: cut after the last balanced object and close the
/// array there, discarding a truncated trailing object.
fn auto_close_array(text: &str) -> String {
    let mut depth = 0i32;
    let mut last_balanced = 0usize;
    for (index, c) in text.char_indices() {
        let diff = match c {
            '{' => 1,
            '}' => -1,
            _ => 0,
        };
        depth += diff;
        if diff != 0 && depth == 0 {
            last_balanced = index + c.len_utf8();
        }
    }
    let mut out = text[..last_balanced].to_string();
    out.push(']');
    out
}

/// Repair then parse a response into items.
pub fn parse_items(raw: &str) -> Result<Vec<ParsedItem>> {
    let repaired = repair_response(raw);

    let array: Vec<serde_json::Map<String, Value>> =
        serde_json::from_str(&repaired).map_err(|e| SubgenError::ResponseParse {
            message: format!("response is not a JSON array of objects: {e}"),
            repaired: repaired.clone(),
        })?;

    let mut items = Vec::with_capacity(array.len());
    for object in array {
        items.push(parse_object(object, &repaired)?);
    }
    Ok(items)
}

fn parse_object(
    mut object: serde_json::Map<String, Value>,
    repaired: &str,
) -> Result<ParsedItem> {
    let start_text = take_string(&mut object, "StartTime").ok_or_else(|| {
        SubgenError::ResponseParse {
            message: "response object is missing StartTime".into(),
            repaired: repaired.to_string(),
        }
    })?;
    let start = parse_timecode(&start_text).map_err(|e| SubgenError::ResponseParse {
        message: format!("bad StartTime: {e}"),
        repaired: repaired.to_string(),
    })?;

    let end = match take_string(&mut object, "EndTime") {
        Some(text) => Some(parse_timecode(&text).map_err(|e| SubgenError::ResponseParse {
            message: format!("bad EndTime: {e}"),
            repaired: repaired.to_string(),
        })?),
        None => None,
    };

    // Everything left is metadata ("parse known fields, collect the rest").
    let mut metadata = MetadataBag::new();
    for (key, value) in object {
        let text = match value {
            Value::String(s) => s,
            Value::Null => continue,
            other => other.to_string(),
        };
        metadata.insert(&key, &text);
    }

    Ok(ParsedItem {
        start,
        end,
        metadata,
    })
}

/// Remove a key case-insensitively, returning its string rendering.
fn take_string(object: &mut serde_json::Map<String, Value>, key: &str) -> Option<String> {
    let found = object
        .keys()
        .find(|k| k.eq_ignore_ascii_case(key))
        .cloned()?;
    match object.remove(&found)? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repairs_prose_wrapping_and_missing_inter_object_comma() {
        let raw = "Here's my answer: [{\"StartTime\":\"00:00:01\",\"Original\":\"a\"} {\"StartTime\":\"00:00:02\",\"Original\":\"b\"}]\nhope that helps";
        let items = parse_items(raw).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].start, Duration::from_secs(1));
        assert_eq!(items[1].metadata.get("Original"), Some("b"));
    }

    #[test]
    fn strips_think_blocks_and_quoted_lines() {
        let raw = "<think>\nthe user wants JSON\n</think>\n> quoting the prompt\n[{\"StartTime\": \"00:00:01\", \"Original\": \"x\"}]";
        let items = parse_items(raw).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn auto_closes_a_truncated_array() {
        let raw = "[{\"StartTime\": \"00:00:01\", \"Original\": \"x\"}, {\"StartTime\": \"00:00:02\", \"Orig";
        let items = parse_items(raw).unwrap();
        // The truncated trailing object is discarded.
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn patches_missing_comma_after_known_field() {
        let raw = "[{\"StartTime\": \"00:00:01\"\n\"Original\": \"x\"}]";
        let items = parse_items(raw).unwrap();
        assert_eq!(items[0].metadata.get("Original"), Some("x"));
    }

    #[test]
    fn existing_commas_are_not_doubled() {
        let raw = "[{\"StartTime\": \"00:00:01\", \"Original\": \"x\"}]";
        assert_eq!(parse_items(raw).unwrap().len(), 1);
    }

    #[test]
    fn reserved_fields_do_not_become_metadata() {
        let raw = "[{\"StartTime\": \"00:00:01\", \"EndTime\": \"00:00:02\", \"Original\": \"x\"}]";
        let items = parse_items(raw).unwrap();
        assert!(!items[0].metadata.contains_key("StartTime"));
        assert!(!items[0].metadata.contains_key("EndTime"));
        assert_eq!(items[0].end, Some(Duration::from_secs(2)));
    }

    #[test]
    fn missing_end_time_is_left_unresolved() {
        let raw = "[{\"StartTime\": \"00:00:01\", \"Original\": \"x\"}]";
        assert_eq!(parse_items(raw).unwrap()[0].end, None);
    }

    #[test]
    fn non_string_extra_fields_are_stringified() {
        let raw = "[{\"StartTime\": \"00:00:01\", \"Confidence\": 0.9, \"Flagged\": true}]";
        let items = parse_items(raw).unwrap();
        assert_eq!(items[0].metadata.get("Confidence"), Some("0.9"));
        assert_eq!(items[0].metadata.get("Flagged"), Some("true"));
    }

    #[test]
    fn absurd_timecodes_are_a_parse_error_not_a_crash() {
        for start in ["NaN", "inf", "9e99", "1e20"] {
            let raw = format!("[{{\"StartTime\": \"{start}\", \"Original\": \"x\"}}]");
            match parse_items(&raw) {
                Err(SubgenError::ResponseParse { message, .. }) => {
                    assert!(message.contains("StartTime"), "{message}");
                }
                other => panic!("expected ResponseParse for '{start}', got {other:?}"),
            }
        }
    }

    #[test]
    fn unparseable_response_keeps_the_repaired_text() {
        let raw = "no json here at all";
        match parse_items(raw) {
            Err(SubgenError::ResponseParse { repaired, .. }) => {
                assert!(!repaired.is_empty());
            }
            other => panic!("expected ResponseParse, got {other:?}"),
        }
    }
}
