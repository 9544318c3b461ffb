//! Blocking chat-completions client.
//!
//! The pipeline is single threaded, so the HTTP layer blocks too; a small
//! heartbeat thread keeps the terminal alive while a slow engine thinks.
//! Works against any OpenAI-compatible endpoint, streaming or not.

use crate::ai::engine::AiResponse;
use crate::ai::request::AiRequest;
use crate::config::ApiEngineConfig;
use crate::error::{Result, SubgenError, TransportKind};
use crate::project::CostRecord;
use crate::report;
use crossbeam_channel::RecvTimeoutError;
use reqwest::StatusCode;
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};

/// Send one request to an API engine and collect the assistant message.
pub fn execute(
    name: &str,
    config: &ApiEngineConfig,
    api_key: Option<&str>,
    request: &AiRequest,
) -> Result<AiResponse> {
    let client = reqwest::blocking::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| transport(TransportKind::Other, format!("http client: {e}")))?;

    if config.validate_model_name {
        validate_model(&client, config, api_key)?;
    }

    let body = build_body(config, request);
    let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
    let started = Instant::now();

    let heartbeat = Heartbeat::start(name);
    let mut builder = client.post(&url).json(&body);
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key);
    }
    let response = builder
        .send()
        .map_err(|e| transport(TransportKind::Other, format!("request to {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        drop(heartbeat);
        let body_text = response.text().unwrap_or_default();
        let kind = if status == StatusCode::TOO_MANY_REQUESTS {
            TransportKind::QuotaExhausted
        } else if status.is_server_error() {
            TransportKind::ServiceUnavailable
        } else {
            TransportKind::Other
        };
        return Err(transport(
            kind,
            format!("{url} returned {status}: {}", snippet(&body_text)),
        ));
    }

    let (content, usage) = if config.stream {
        read_stream(response, heartbeat)?
    } else {
        drop(heartbeat);
        let value: Value = response
            .json()
            .map_err(|e| transport(TransportKind::Other, format!("reading response: {e}")))?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        (content, value.get("usage").cloned())
    };

    let cost = CostRecord {
        task: request.task_id.clone(),
        engine: format!("{},{}", config.base_url, config.model),
        elapsed: started.elapsed(),
        items_in_request: request.items_to_do,
        items_in_response: 0,
        prompt_chars: request.full_prompt.chars().count(),
        completion_chars: content.chars().count(),
        prompt_tokens: usage.as_ref().and_then(|u| u["prompt_tokens"].as_u64()),
        completion_tokens: usage.as_ref().and_then(|u| u["completion_tokens"].as_u64()),
        total_tokens: usage.as_ref().and_then(|u| u["total_tokens"].as_u64()),
    };

    Ok(AiResponse {
        assistant_message: Some(content),
        cost: Some(cost),
    })
}

fn build_body(config: &ApiEngineConfig, request: &AiRequest) -> Value {
    let mut body = Value::Object(config.request_extra.clone());
    body["model"] = Value::String(config.model.clone());
    if config.stream {
        body["stream"] = Value::Bool(true);
    }
    body["messages"] = serde_json::to_value(&request.messages).unwrap_or(Value::Null);
    body
}

/// Cheap sanity check that the configured model actually exists on the
/// endpoint, so a typo fails fast instead of producing junk.
fn validate_model(
    client: &reqwest::blocking::Client,
    config: &ApiEngineConfig,
    api_key: Option<&str>,
) -> Result<()> {
    let url = format!("{}/models", config.base_url.trim_end_matches('/'));
    let mut builder = client.get(&url);
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key);
    }
    let value: Value = builder
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.json())
        .map_err(|e| transport(TransportKind::Other, format!("listing models at {url}: {e}")))?;
    let known = value["data"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .any(|m| m["id"].as_str() == Some(config.model.as_str()))
        })
        .unwrap_or(true);
    if !known {
        return Err(SubgenError::Config {
            message: format!("model '{}' not found at {}", config.model, config.base_url),
        });
    }
    Ok(())
}

/// Concatenate SSE deltas into one message. The heartbeat stops at the
/// first token, when the wait is over.
fn read_stream(
    response: reqwest::blocking::Response,
    heartbeat: Heartbeat,
) -> Result<(String, Option<Value>)> {
    let mut heartbeat = Some(heartbeat);
    let mut content = String::new();
    let mut usage = None;
    let reader = BufReader::new(response);
    for line in reader.lines() {
        let line =
            line.map_err(|e| transport(TransportKind::Other, format!("reading stream: {e}")))?;
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data == "[DONE]" {
            break;
        }
        let Ok(chunk) = serde_json::from_str::<Value>(data) else {
            continue;
        };
        if let Some(delta) = chunk["choices"][0]["delta"]["content"].as_str() {
            heartbeat.take();
            content.push_str(delta);
        }
        // Usage arrives in a trailing chunk on endpoints that report it.
        if chunk.get("usage").is_some_and(|u| !u.is_null()) {
            usage = chunk.get("usage").cloned();
        }
    }
    Ok((content, usage))
}

fn transport(kind: TransportKind, message: String) -> SubgenError {
    SubgenError::Transport { kind, message }
}

fn snippet(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(300)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    text[..end].trim()
}

/// Prints a dim "waiting" line once per second until dropped.
struct Heartbeat {
    stop: Option<crossbeam_channel::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Heartbeat {
    fn start(engine: &str) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let engine = engine.to_string();
        let handle = std::thread::spawn(move || {
            let started = Instant::now();
            loop {
                match stop_rx.recv_timeout(Duration::from_secs(1)) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        report::heartbeat(&engine, started.elapsed());
                    }
                }
            }
        });
        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        report::clear_line();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::request::{Message, Role};

    #[test]
    fn body_merges_extra_fields_under_the_model() {
        let config = ApiEngineConfig {
            model: "test-model".into(),
            request_extra: serde_json::from_str(r#"{"temperature": 0.2}"#).unwrap(),
            ..ApiEngineConfig::default()
        };
        let request = AiRequest::new(
            "full",
            1,
            vec![Message::text(Role::User, "hello")],
            1,
        );
        let body = build_body(&config, &request);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["messages"][0]["content"], "hello");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn snippet_caps_long_error_bodies() {
        let long = "e".repeat(1000);
        assert_eq!(snippet(&long).len(), 300);
        assert_eq!(snippet("short"), "short");
    }

    #[test]
    fn heartbeat_stops_on_drop() {
        let heartbeat = Heartbeat::start("test");
        drop(heartbeat);
    }
}
