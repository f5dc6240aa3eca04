use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a single attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Attempt exceeded its time budget (or was cancelled)
    Timeout,
    /// Bot detection or IP ban
    Blocked,
    /// The source has no extractable content
    PermanentlyUnavailable,
    /// Non-zero exit without a recognizable signal
    ProcessError,
    /// Exit zero but unparseable output
    ParseError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Blocked => "blocked",
            FailureKind::PermanentlyUnavailable => "permanentlyUnavailable",
            FailureKind::ProcessError => "processError",
            FailureKind::ParseError => "parseError",
        }
    }

    /// Only a block is worth rotating identity and retrying the same strategy
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Blocked)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Extracted text plus whatever metadata the tool reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<u32>,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language_hint: None,
            duration_secs: None,
            segments: None,
        }
    }
}

/// Result of one strategy attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum AttemptOutcome {
    #[serde(rename_all = "camelCase")]
    Success {
        payload: Transcript,
        duration_ms: u64,
        strategy_name: String,
        attempt: u32,
        started_at: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        proxy: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        reason_kind: FailureKind,
        raw_diagnostics: String,
        strategy_name: String,
        attempt: u32,
        duration_ms: u64,
        started_at: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        proxy: Option<String>,
    },
}

impl AttemptOutcome {
    pub fn strategy_name(&self) -> &str {
        match self {
            AttemptOutcome::Success { strategy_name, .. } => strategy_name,
            AttemptOutcome::Failure { strategy_name, .. } => strategy_name,
        }
    }

    pub fn reason_kind(&self) -> Option<FailureKind> {
        match self {
            AttemptOutcome::Success { .. } => None,
            AttemptOutcome::Failure { reason_kind, .. } => Some(*reason_kind),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success { .. })
    }
}

/// Final output of one extraction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ExtractionResult {
    #[serde(rename_all = "camelCase")]
    Success {
        request_id: Uuid,
        payload: Transcript,
        strategy_name: String,
        /// Forced-rotation retries spent across the whole request
        retries: u32,
        /// Failed attempts that preceded the success
        attempts: Vec<AttemptOutcome>,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        request_id: Uuid,
        attempts: Vec<AttemptOutcome>,
        cancelled: bool,
    },
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionResult::Success { .. })
    }

    pub fn request_id(&self) -> Uuid {
        match self {
            ExtractionResult::Success { request_id, .. } => *request_id,
            ExtractionResult::Failure { request_id, .. } => *request_id,
        }
    }

    pub fn payload(&self) -> Option<&Transcript> {
        match self {
            ExtractionResult::Success { payload, .. } => Some(payload),
            ExtractionResult::Failure { .. } => None,
        }
    }

    pub fn attempts(&self) -> &[AttemptOutcome] {
        match self {
            ExtractionResult::Success { attempts, .. } => attempts,
            ExtractionResult::Failure { attempts, .. } => attempts,
        }
    }

    fn count(&self, kind: FailureKind) -> usize {
        self.attempts()
            .iter()
            .filter(|a| a.reason_kind() == Some(kind))
            .count()
    }

    /// What the consumer should show for this result
    pub fn verdict(&self) -> Verdict {
        if let ExtractionResult::Success { payload, .. } = self {
            return Verdict::Transcript(payload.text.clone());
        }

        let unavailable = self.count(FailureKind::PermanentlyUnavailable);
        let transient = self.count(FailureKind::Blocked) + self.count(FailureKind::Timeout);

        if unavailable > 0 && unavailable >= transient {
            Verdict::NoTranscript
        } else if transient > 0 {
            Verdict::TemporarilyUnavailable
        } else {
            Verdict::Unavailable
        }
    }
}

/// Consumer-facing reading of an [`ExtractionResult`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Transcript(String),
    NoTranscript,
    TemporarilyUnavailable,
    Unavailable,
}

impl Verdict {
    pub fn message(&self) -> &str {
        match self {
            Verdict::Transcript(text) => text,
            Verdict::NoTranscript => "No transcript available",
            Verdict::TemporarilyUnavailable => "Temporarily unavailable, retry later",
            Verdict::Unavailable => "Extraction unavailable",
        }
    }
}
