//! Structured-data extraction via an external command

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{
    interpret_output, random_user_agent, route_through, AttemptContext, ExtractionStrategy,
    StrategyAttempt, DIRECT, PROXIED,
};
use crate::process::{ProcessRunner, ProcessSpec};

/// Which network identity the command goes out under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The host's own identity; inherited proxy variables are stripped
    Direct,
    /// The pool's current identity, or direct when the pool is empty
    Proxied,
}

/// Runs `<command> --user-agent <UA> -- <reference>` and reads its JSON
pub struct StructuredCommandStrategy {
    name: String,
    command: ProcessSpec,
    route: Route,
    runner: ProcessRunner,
}

impl StructuredCommandStrategy {
    pub fn new(name: impl Into<String>, command: ProcessSpec, route: Route) -> Self {
        Self {
            name: name.into(),
            command,
            route,
            runner: ProcessRunner::new(),
        }
    }

    pub fn direct(command: ProcessSpec) -> Self {
        Self::new(DIRECT, command, Route::Direct)
    }

    pub fn proxied(command: ProcessSpec) -> Self {
        Self::new(PROXIED, command, Route::Proxied)
    }

    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn route(&self) -> Route {
        self.route
    }
}

#[async_trait]
impl ExtractionStrategy for StructuredCommandStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, reference: &str, ctx: AttemptContext<'_>) -> StrategyAttempt {
        let proxy = match self.route {
            Route::Direct => None,
            Route::Proxied => {
                let current = ctx.pool.get_current();
                if current.is_none() {
                    warn!(strategy = %self.name, "Proxy pool is empty, running without a proxy");
                }
                current
            }
        };

        let spec = route_through(
            self.command
                .clone()
                .args(["--user-agent", random_user_agent(), "--"])
                .arg(reference)
                .timeout(ctx.timeout),
            proxy.as_deref(),
        );
        debug!(
            strategy = %self.name,
            proxy = proxy.as_ref().map(|p| p.label()).as_deref().unwrap_or("none"),
            "Running {}",
            spec.display()
        );

        let result = match self.runner.run(&spec, ctx.cancel).await {
            Ok(output) => interpret_output(&output),
            Err(e) => Err(e.into()),
        };
        StrategyAttempt::new(proxy, result)
    }
}
