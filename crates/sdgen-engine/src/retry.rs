use std::env;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use sdgen_contracts::ledger::RunLedger;

pub const RETRY_ATTEMPTS_DEFAULT: u32 = 3;
pub const RETRY_BACKOFF_MS_DEFAULT: u64 = 2000;

/// Bounded-retry parameters shared by every orchestrated stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_ATTEMPTS_DEFAULT,
            backoff: Duration::from_millis(RETRY_BACKOFF_MS_DEFAULT),
        }
    }
}

impl RetryPolicy {
    /// Policy from the environment, clamped to sane bounds.
    pub fn from_env() -> Self {
        let max_attempts = env::var("SDGEN_RETRY_ATTEMPTS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .map(|value| value.clamp(1, 6))
            .unwrap_or(RETRY_ATTEMPTS_DEFAULT);
        let backoff_ms = env::var("SDGEN_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map(|value| value.min(10_000))
            .unwrap_or(RETRY_BACKOFF_MS_DEFAULT);
        Self {
            max_attempts,
            backoff: Duration::from_millis(backoff_ms),
        }
    }
}

/// Run a named fallible stage with bounded retries.
///
/// Each failed attempt appends a failure record (1-based attempt index) to
/// the ledger; the sleep between attempts grows with the attempt index. The
/// final error is returned to the caller, which decides whether exhaustion
/// is fatal or degradable.
pub fn run_with_retries<T>(
    stage: &str,
    policy: &RetryPolicy,
    ledger: &mut RunLedger,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=max_attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                ledger.record_failure(stage, &error_chain_text(&err, 400), attempt);
                last_err = Some(err);
                if attempt < max_attempts && !policy.backoff.is_zero() {
                    thread::sleep(policy.backoff * attempt);
                }
            }
        }
    }
    match last_err {
        Some(err) => Err(err),
        None => unreachable!("retry loop runs at least one attempt"),
    }
}

/// Flatten an error chain into one line for ledger entries.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(": "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
