//! Model invocation with a bounded retry budget for malformed output.
//!
//! The split of responsibility is strict: transport failures (timeout, auth,
//! rate limit, network) end the item immediately, while output that arrived
//! intact but does not parse into the contract is retried up to
//! `max_retries` extra attempts. Providers occasionally wrap JSON in code
//! fences, prepend chatter, or truncate mid-object even when a structured
//! output schema is attached, so each response goes through an escalating
//! salvage chain before an attempt is declared malformed:
//!
//! 1. strip Markdown code fences and parse directly,
//! 2. extract the outermost `{...}` span and parse that,
//! 3. close unbalanced brackets left by truncation and parse again.
//!
//! When every attempt is exhausted the last raw body is written to the debug
//! store (one artifact per item, not per attempt) and the item fails with
//! the attempt count and artifact path in the error.

use crate::config::ExtractionConfig;
use crate::error::ItemError;
use crate::pipeline::source::SourceImage;
use crate::schema::{check_shape, response_schema};
use crate::store::ResultStore;
use crate::transport::{ModelTransport, TransportError, TransportRequest};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

static JSON_OBJECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{.*\}").unwrap_or_else(|e| panic!("invalid JSON extraction regex: {e}"))
});

/// Call the model for one image and return contract-conformant JSON.
pub async fn invoke_model(
    transport: &dyn ModelTransport,
    config: &ExtractionConfig,
    store: &ResultStore,
    image: &SourceImage,
) -> Result<Value, ItemError> {
    let schema = response_schema();
    let user_instruction = config.prompts.user_instruction(&image.display_name);
    let total_attempts = config.max_retries + 1;

    let mut last_body = String::new();
    let mut last_detail = String::new();

    for attempt in 1..=total_attempts {
        if attempt > 1 && config.retry_backoff_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.retry_backoff_ms)).await;
        }

        let request = TransportRequest {
            system_instruction: &config.prompts.system,
            user_instruction: &user_instruction,
            image: &image.bytes,
            image_mime: image.mime,
            response_schema: &schema,
            temperature: config.temperature,
        };

        debug!(
            "Model call for '{}', attempt {attempt}/{total_attempts}",
            image.display_name
        );

        let call = transport.generate(request);
        let body = match tokio::time::timeout(
            Duration::from_secs(config.api_timeout_secs),
            call,
        )
        .await
        {
            Err(_) => {
                return Err(ItemError::Transport {
                    source: image.display_name.clone(),
                    error: TransportError::Timeout {
                        secs: config.api_timeout_secs,
                    },
                })
            }
            Ok(Err(error)) => {
                return Err(ItemError::Transport {
                    source: image.display_name.clone(),
                    error,
                })
            }
            Ok(Ok(body)) => body,
        };

        match parse_structured(&body) {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        "'{}' produced valid output on attempt {attempt}",
                        image.display_name
                    );
                }
                return Ok(value);
            }
            Err(detail) => {
                warn!(
                    "Malformed output for '{}' on attempt {attempt}/{total_attempts}: {detail}",
                    image.display_name
                );
                last_body = body;
                last_detail = detail;
            }
        }
    }

    let debug_artifact = match store
        .save_debug_artifact(&image.display_name, total_attempts, &last_body, &last_detail)
        .await
    {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("Could not save debug artifact for '{}': {e}", image.display_name);
            None
        }
    };

    Err(ItemError::MalformedOutput {
        source: image.display_name.clone(),
        attempts: total_attempts,
        detail: last_detail,
        debug_artifact,
    })
}

/// Coerce one raw response body into JSON that satisfies the output contract.
pub fn parse_structured(body: &str) -> Result<Value, String> {
    let cleaned = strip_code_fences(body);

    let value = serde_json::from_str::<Value>(cleaned)
        .ok()
        .or_else(|| extract_json_object(cleaned))
        .or_else(|| repair_truncated(cleaned));

    let value = match value {
        Some(v) => v,
        None => {
            return Err(format!(
                "response is not parseable JSON (first bytes: {:?})",
                cleaned.chars().take(60).collect::<String>()
            ))
        }
    };

    check_shape(&value)?;
    Ok(value)
}

/// Remove a leading ```` ```json ```` (or bare ```` ``` ````) fence and its
/// closing fence, leaving anything without fences untouched.
fn strip_code_fences(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start();
    rest.strip_suffix("```").map(str::trim_end).unwrap_or(rest)
}

/// Pull the outermost `{...}` span out of surrounding chatter.
fn extract_json_object(body: &str) -> Option<Value> {
    let candidate = JSON_OBJECT_RE.find(body)?.as_str();
    serde_json::from_str(candidate).ok()
}

/// Close brackets a truncated response left open.
///
/// Walks the text from the first `{`, tracking string and escape state so
/// braces inside values don't count, then appends whatever closers are still
/// pending. A response cut off mid string-literal gets its quote closed too.
fn repair_truncated(body: &str) -> Option<Value> {
    let start = body.find('{')?;
    let text = &body[start..];

    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                if stack.last() == Some(&c) {
                    stack.pop();
                } else {
                    return None;
                }
            }
            _ => {}
        }
    }

    if stack.is_empty() && !in_string {
        return None;
    }

    let mut repaired = text.trim_end().trim_end_matches(',').to_string();
    if in_string {
        repaired.push('"');
    }
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    serde_json::from_str(&repaired).ok()
}
