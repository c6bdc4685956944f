use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One failed attempt of an orchestrated stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: String,
    pub error: String,
    pub attempt: u32,
    pub ts: String,
}

/// One degradation notice emitted when a stage gives up and falls back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningRecord {
    pub message: String,
    pub ts: String,
}

/// Accumulated failures and warnings for one generation run.
///
/// Created at run start, appended to by any stage that fails or degrades,
/// and serialized into every image sidecar at save time. Ordering follows
/// insertion order within each list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLedger {
    failures: Vec<FailureRecord>,
    warnings: Vec<WarningRecord>,
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, stage: &str, error: &str, attempt: u32) {
        self.failures.push(FailureRecord {
            stage: stage.to_string(),
            error: error.to_string(),
            attempt,
            ts: now_utc_iso(),
        });
    }

    pub fn record_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(WarningRecord {
            message: message.into(),
            ts: now_utc_iso(),
        });
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn warnings(&self) -> &[WarningRecord] {
        &self.warnings
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.warnings.is_empty()
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
