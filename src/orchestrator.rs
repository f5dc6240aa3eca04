//! Strategy escalation
//!
//! Walks a request's strategy chain strictly in order, one attempt in
//! flight at a time:
//!
//! ```text
//! Pending -> Attempting(i, retry) -> Succeeded
//!                 |  blocked, retry < max: force rotation, Attempting(i, retry + 1)
//!                 v
//!            Escalating(i) -> Attempting(i + 1, 0) | Exhausted
//! ```
//!
//! Every failed attempt lands in the trail. Nothing here returns an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::detector::{BlockDetector, FailureClassifier};
use crate::error::Result;
use crate::models::{
    AttemptOutcome, ExtractionRequest, ExtractionResult, FailureKind, StrategyBudget, Transcript,
};
use crate::proxy::ProxyPool;
use crate::process::ProcessSpec;
use crate::strategy::{
    AttemptContext, AudioTranscriptionStrategy, ExtractionStrategy, FailureSignal,
    StrategyAttempt, StructuredCommandStrategy,
};

/// Slack on top of a strategy's own timeout before the attempt future is dropped.
/// Longer than the runner's post-exit drain so a finished child is never cut off.
const DEADLINE_GRACE: Duration = Duration::from_millis(250);

const CANCELLED_DIAGNOSTICS: &str = "cancelled by caller";

#[derive(Debug)]
enum State {
    Pending,
    Attempting { index: usize, retry: u32 },
    Succeeded { payload: Transcript, strategy_name: String },
    Escalating { from: usize },
    Exhausted { cancelled: bool },
}

/// Runs extraction requests against a shared proxy pool
pub struct StrategyOrchestrator {
    pool: Arc<ProxyPool>,
    classifier: Arc<dyn FailureClassifier>,
    strategies: HashMap<String, Arc<dyn ExtractionStrategy>>,
}

impl StrategyOrchestrator {
    pub fn new(pool: Arc<ProxyPool>, classifier: Arc<dyn FailureClassifier>) -> Self {
        Self {
            pool,
            classifier,
            strategies: HashMap::new(),
        }
    }

    /// Direct, proxied and audio strategies plus the configured rule set
    pub fn from_config(config: &Config, pool: Arc<ProxyPool>) -> Result<Self> {
        let detector = BlockDetector::with_extra_patterns(
            &config.detector.block_patterns,
            &config.detector.unavailable_patterns,
        )?;
        let transcript = ProcessSpec::from_command_line(&config.strategies.transcript_command)?;
        let audio = ProcessSpec::from_command_line(&config.strategies.audio_command)?;

        Ok(Self::new(pool, Arc::new(detector))
            .with_strategy(Arc::new(StructuredCommandStrategy::direct(transcript.clone())))
            .with_strategy(Arc::new(StructuredCommandStrategy::proxied(transcript)))
            .with_strategy(Arc::new(AudioTranscriptionStrategy::new(audio))))
    }

    /// Register a strategy under its own name, replacing any previous one
    pub fn with_strategy(mut self, strategy: Arc<dyn ExtractionStrategy>) -> Self {
        self.register(strategy);
        self
    }

    pub fn register(&mut self, strategy: Arc<dyn ExtractionStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn has_strategy(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Run the request's chain to success or exhaustion
    #[instrument(skip_all, fields(request_id = %request.id(), reference = %request.content_reference()))]
    pub async fn extract(
        &self,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> ExtractionResult {
        let chain = request.strategy_chain();
        let mut attempts: Vec<AttemptOutcome> = Vec::new();
        let mut retries: u32 = 0;
        let mut state = State::Pending;

        info!(
            strategies = chain.len(),
            worst_case_ms = request.worst_case_duration().as_millis() as u64,
            "Starting extraction"
        );

        loop {
            state = match state {
                State::Pending => {
                    if chain.is_empty() {
                        State::Exhausted { cancelled: false }
                    } else {
                        State::Attempting { index: 0, retry: 0 }
                    }
                }

                State::Attempting { index, retry } => {
                    if cancel.is_cancelled() {
                        State::Exhausted { cancelled: true }
                    } else {
                        let budget = &chain[index];
                        let (outcome, cancelled) = self
                            .attempt(request.content_reference(), budget, retry + 1, cancel)
                            .await;

                        match outcome {
                            AttemptOutcome::Success {
                                payload,
                                strategy_name,
                                duration_ms,
                                ..
                            } => {
                                info!(
                                    strategy = %strategy_name,
                                    duration_ms,
                                    "Extraction succeeded"
                                );
                                State::Succeeded {
                                    payload,
                                    strategy_name,
                                }
                            }
                            failure => {
                                let kind = failure.reason_kind();
                                attempts.push(failure);

                                if cancelled {
                                    State::Exhausted { cancelled: true }
                                } else if kind.is_some_and(|k| k.is_retryable())
                                    && retry < budget.max_retries
                                {
                                    self.pool.force_rotation();
                                    retries += 1;
                                    debug!(
                                        strategy = %budget.name,
                                        retry = retry + 1,
                                        max_retries = budget.max_retries,
                                        "Blocked, retrying with a fresh identity"
                                    );
                                    State::Attempting {
                                        index,
                                        retry: retry + 1,
                                    }
                                } else {
                                    State::Escalating { from: index }
                                }
                            }
                        }
                    }
                }

                State::Escalating { from } => {
                    let next = from + 1;
                    if cancel.is_cancelled() {
                        State::Exhausted { cancelled: true }
                    } else if next < chain.len() {
                        info!(
                            from = %chain[from].name,
                            to = %chain[next].name,
                            "Escalating to next strategy"
                        );
                        State::Attempting {
                            index: next,
                            retry: 0,
                        }
                    } else {
                        State::Exhausted { cancelled: false }
                    }
                }

                State::Succeeded {
                    payload,
                    strategy_name,
                } => {
                    return ExtractionResult::Success {
                        request_id: request.id(),
                        payload,
                        strategy_name,
                        retries,
                        attempts,
                    };
                }

                State::Exhausted { cancelled } => {
                    warn!(
                        attempts = attempts.len(),
                        cancelled,
                        "Extraction failed: {}",
                        summarize(&attempts)
                    );
                    return ExtractionResult::Failure {
                        request_id: request.id(),
                        attempts,
                        cancelled,
                    };
                }
            };
        }
    }

    /// One attempt, classified; the flag is set when the caller cancelled it
    async fn attempt(
        &self,
        reference: &str,
        budget: &StrategyBudget,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> (AttemptOutcome, bool) {
        let started_at = Utc::now();
        let started = Instant::now();

        let Some(strategy) = self.strategies.get(&budget.name) else {
            warn!(strategy = %budget.name, "No strategy registered under this name");
            let outcome = AttemptOutcome::Failure {
                reason_kind: FailureKind::ProcessError,
                raw_diagnostics: format!("no strategy registered as {}", budget.name),
                strategy_name: budget.name.clone(),
                attempt,
                duration_ms: 0,
                started_at,
                proxy: None,
            };
            return (outcome, false);
        };

        debug!(
            strategy = %budget.name,
            attempt,
            timeout_ms = budget.timeout.as_millis() as u64,
            "Attempting"
        );

        let ctx = AttemptContext {
            timeout: budget.timeout,
            cancel,
            pool: &self.pool,
        };
        // Dropping the attempt future kills its child and removes its scratch files.
        let StrategyAttempt { proxy, result } = match tokio::time::timeout(
            budget.timeout.saturating_add(DEADLINE_GRACE),
            strategy.attempt(reference, ctx),
        )
        .await
        {
            Ok(attempt) => attempt,
            Err(_) => StrategyAttempt::new(
                None,
                Err(FailureSignal::Timeout(format!(
                    "strategy overran its {}ms budget",
                    budget.timeout.as_millis()
                ))),
            ),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let proxy_label = proxy.as_ref().map(|p| p.label());

        let (reason_kind, raw_diagnostics, cancelled) = match result {
            Ok(payload) => {
                let outcome = AttemptOutcome::Success {
                    payload,
                    duration_ms,
                    strategy_name: budget.name.clone(),
                    attempt,
                    started_at,
                    proxy: proxy_label,
                };
                return (outcome, false);
            }
            Err(FailureSignal::Timeout(text)) => (FailureKind::Timeout, text, false),
            Err(FailureSignal::Cancelled) => {
                (FailureKind::Timeout, CANCELLED_DIAGNOSTICS.to_string(), true)
            }
            Err(FailureSignal::Parse(text)) => (FailureKind::ParseError, text, false),
            Err(FailureSignal::Spawn(text)) => (FailureKind::ProcessError, text, false),
            Err(FailureSignal::Diagnostics(text)) => {
                (self.classifier.classify(&text), text, false)
            }
        };

        if reason_kind == FailureKind::Blocked {
            if let Some(endpoint) = &proxy {
                self.pool.record_block(endpoint);
            }
        }

        info!(
            strategy = %budget.name,
            attempt,
            kind = reason_kind.as_str(),
            duration_ms,
            proxy = proxy_label.as_deref().unwrap_or("none"),
            "Attempt failed"
        );

        let outcome = AttemptOutcome::Failure {
            reason_kind,
            raw_diagnostics,
            strategy_name: budget.name.clone(),
            attempt,
            duration_ms,
            started_at,
            proxy: proxy_label,
        };
        (outcome, cancelled)
    }
}

impl std::fmt::Debug for StrategyOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.strategies.keys().collect();
        names.sort();
        f.debug_struct("StrategyOrchestrator")
            .field("pool", &self.pool)
            .field("strategies", &names)
            .finish()
    }
}

fn summarize(attempts: &[AttemptOutcome]) -> String {
    attempts
        .iter()
        .filter_map(|a| a.reason_kind().map(|k| format!("{}={}", a.strategy_name(), k)))
        .collect::<Vec<_>>()
        .join(", ")
}
