use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, SluiceError};

/// Time and retry budget for one strategy in a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyBudget {
    pub name: String,
    #[serde(serialize_with = "serialize_millis")]
    pub timeout: Duration,
    pub max_retries: u32,
}

impl StrategyBudget {
    pub fn new(name: impl Into<String>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            name: name.into(),
            timeout,
            max_retries,
        }
    }

    /// Longest this strategy can hold the caller: every try runs to its timeout.
    /// Saturates at `Duration::MAX` for absurd budgets.
    pub fn worst_case(&self) -> Duration {
        self.timeout
            .checked_mul(self.max_retries.saturating_add(1))
            .unwrap_or(Duration::MAX)
    }
}

fn serialize_millis<S: serde::Serializer>(
    d: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(d.as_millis() as u64)
}

/// One extraction call. Immutable once built.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    id: Uuid,
    content_reference: String,
    strategy_chain: Vec<StrategyBudget>,
}

impl ExtractionRequest {
    /// Start a request from the configured default chain
    pub fn builder(
        content_reference: impl Into<String>,
        default_chain: &[StrategyBudget],
    ) -> ExtractionRequestBuilder {
        ExtractionRequestBuilder {
            content_reference: content_reference.into(),
            chain: default_chain.to_vec(),
            selection: None,
            timeouts: Vec::new(),
            retries: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn content_reference(&self) -> &str {
        &self.content_reference
    }

    pub fn strategy_chain(&self) -> &[StrategyBudget] {
        &self.strategy_chain
    }

    /// Configured upper bound on wall-clock time for this request.
    ///
    /// A process attempt returns within its own timeout plus the time to kill
    /// and reap the child. An attempt that never yields is cut off by the
    /// orchestrator a short grace period after its timeout.
    pub fn worst_case_duration(&self) -> Duration {
        self.strategy_chain
            .iter()
            .map(StrategyBudget::worst_case)
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Applies per-call overrides on top of the default chain
#[derive(Debug, Clone)]
pub struct ExtractionRequestBuilder {
    content_reference: String,
    chain: Vec<StrategyBudget>,
    selection: Option<Vec<String>>,
    timeouts: Vec<(String, Duration)>,
    retries: Vec<(String, u32)>,
}

impl ExtractionRequestBuilder {
    /// Restrict (and order) the chain to the named strategies
    pub fn strategies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn timeout(mut self, strategy: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.push((strategy.into(), timeout));
        self
    }

    pub fn max_retries(mut self, strategy: impl Into<String>, retries: u32) -> Self {
        self.retries.push((strategy.into(), retries));
        self
    }

    pub fn build(self) -> Result<ExtractionRequest> {
        let content_reference = self.content_reference.trim().to_string();
        if content_reference.is_empty() {
            return Err(SluiceError::InvalidRequest(
                "content reference must not be empty".into(),
            ));
        }

        let mut chain = match self.selection {
            None => self.chain,
            Some(names) => {
                let mut seen = HashSet::new();
                let mut selected = Vec::with_capacity(names.len());
                for name in names {
                    if !seen.insert(name.clone()) {
                        return Err(SluiceError::InvalidRequest(format!(
                            "strategy listed twice: {}",
                            name
                        )));
                    }
                    let budget = self
                        .chain
                        .iter()
                        .find(|b| b.name == name)
                        .cloned()
                        .ok_or(SluiceError::UnknownStrategy(name))?;
                    selected.push(budget);
                }
                selected
            }
        };

        for (name, timeout) in self.timeouts {
            if timeout.is_zero() {
                return Err(SluiceError::InvalidRequest(format!(
                    "timeout for {} must be positive",
                    name
                )));
            }
            let budget = chain
                .iter_mut()
                .find(|b| b.name == name)
                .ok_or(SluiceError::UnknownStrategy(name))?;
            budget.timeout = timeout;
        }

        for (name, retries) in self.retries {
            let budget = chain
                .iter_mut()
                .find(|b| b.name == name)
                .ok_or(SluiceError::UnknownStrategy(name))?;
            budget.max_retries = retries;
        }

        if chain.is_empty() {
            return Err(SluiceError::InvalidRequest(
                "strategy chain must not be empty".into(),
            ));
        }

        Ok(ExtractionRequest {
            id: Uuid::new_v4(),
            content_reference,
            strategy_chain: chain,
        })
    }
}
