//! Extraction strategies
//!
//! A strategy is one named way of getting a transcript for a content
//! reference. The orchestrator only sees the [`ExtractionStrategy`] trait;
//! classification of failures happens there, not here.

pub mod audio;
pub mod output;
pub mod structured;
pub mod user_agent;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::detector::truncate;
use crate::models::{ProxyEndpoint, Transcript, PROXY_ENV_VARS};
use crate::process::{ProcessSpec, RunError};
use crate::proxy::ProxyPool;

pub use audio::AudioTranscriptionStrategy;
pub use output::{interpret_output, ToolOutput};
pub use structured::{Route, StructuredCommandStrategy};
pub use user_agent::random_user_agent;

pub const DIRECT: &str = "direct";
pub const PROXIED: &str = "proxied";
pub const AUDIO: &str = "audio";

/// Stderr kept from a killed process
const PARTIAL_STDERR_LEN: usize = 500;

/// What a strategy gets for one attempt
#[derive(Clone, Copy)]
pub struct AttemptContext<'a> {
    pub timeout: Duration,
    pub cancel: &'a CancellationToken,
    pub pool: &'a ProxyPool,
}

/// Unclassified reason an attempt did not produce a transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureSignal {
    /// Budget ran out; carries whatever was captured before the kill
    Timeout(String),
    Cancelled,
    /// Tool-reported failure text, to be classified
    Diagnostics(String),
    /// Exit zero but the output could not be read
    Parse(String),
    /// The command never ran
    Spawn(String),
}

impl From<RunError> for FailureSignal {
    fn from(err: RunError) -> Self {
        match &err {
            RunError::Timeout { .. } => {
                let stderr = err.partial_stderr().trim();
                if stderr.is_empty() {
                    FailureSignal::Timeout(err.to_string())
                } else {
                    FailureSignal::Timeout(format!(
                        "{}; stderr: {}",
                        err,
                        truncate(stderr, PARTIAL_STDERR_LEN)
                    ))
                }
            }
            RunError::Cancelled { .. } => FailureSignal::Cancelled,
            RunError::Spawn { .. } | RunError::Wait(_) => FailureSignal::Spawn(err.to_string()),
        }
    }
}

/// One attempt's result plus the identity it went out under
#[derive(Debug, Clone)]
pub struct StrategyAttempt {
    pub proxy: Option<Arc<ProxyEndpoint>>,
    pub result: Result<Transcript, FailureSignal>,
}

impl StrategyAttempt {
    pub fn new(proxy: Option<Arc<ProxyEndpoint>>, result: Result<Transcript, FailureSignal>) -> Self {
        Self { proxy, result }
    }
}

#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Must return within `ctx.timeout` and stop promptly on cancellation
    async fn attempt(&self, reference: &str, ctx: AttemptContext<'_>) -> StrategyAttempt;
}

/// Point the child at a proxy, or strip inherited proxy variables entirely
pub fn route_through(mut spec: ProcessSpec, proxy: Option<&ProxyEndpoint>) -> ProcessSpec {
    match proxy {
        Some(endpoint) => spec.envs(endpoint.env_overlay()),
        None => {
            for key in PROXY_ENV_VARS {
                spec = spec.env_remove(*key);
            }
            spec
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProxyProtocol, ProxyTier};

    #[test]
    fn test_route_through_proxy_sets_overlay() {
        let endpoint =
            ProxyEndpoint::new("10.0.0.1", 8080, ProxyProtocol::Http, "free", ProxyTier::Free);
        let spec = route_through(ProcessSpec::new("tool"), Some(&endpoint));
        assert!(spec
            .get_env()
            .iter()
            .any(|(k, v)| k == "HTTPS_PROXY" && v == "http://10.0.0.1:8080"));
        assert!(spec.get_env_remove().is_empty());
    }

    #[test]
    fn test_route_direct_strips_proxy_vars() {
        let spec = route_through(ProcessSpec::new("tool"), None);
        assert!(spec.get_env().is_empty());
        assert_eq!(spec.get_env_remove().len(), PROXY_ENV_VARS.len());
    }

    #[test]
    fn test_run_error_mapping() {
        let timeout = RunError::Timeout {
            timeout: Duration::from_millis(50),
            stderr: "HTTP Error 429".into(),
        };
        match FailureSignal::from(timeout) {
            FailureSignal::Timeout(msg) => {
                assert!(msg.starts_with("timed out after 50ms"));
                assert!(msg.contains("429"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let cancelled = RunError::Cancelled {
            stderr: String::new(),
        };
        assert_eq!(FailureSignal::from(cancelled), FailureSignal::Cancelled);

        let spawn = RunError::Spawn {
            program: "python3".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(matches!(FailureSignal::from(spawn), FailureSignal::Spawn(_)));
    }
}
