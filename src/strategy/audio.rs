//! Audio download plus speech-to-text fallback
//!
//! Slowest and most expensive strategy, but works when the source has no
//! structured transcript at all. Intermediate media goes into a per-attempt
//! scratch directory that is removed however the attempt ends.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{
    interpret_output, random_user_agent, route_through, AttemptContext, ExtractionStrategy,
    FailureSignal, StrategyAttempt, AUDIO,
};
use crate::process::{ProcessRunner, ProcessSpec, ScratchDir};

const SCRATCH_PREFIX: &str = "sluice-audio-";

/// Runs `<command> --user-agent <UA> --output <path> -- <reference>`
pub struct AudioTranscriptionStrategy {
    name: String,
    command: ProcessSpec,
    use_proxy: bool,
    runner: ProcessRunner,
}

impl AudioTranscriptionStrategy {
    pub fn new(command: ProcessSpec) -> Self {
        Self {
            name: AUDIO.to_string(),
            command,
            use_proxy: true,
            runner: ProcessRunner::new(),
        }
    }

    /// Download under the host's own identity instead of the pool's
    pub fn without_proxy(mut self) -> Self {
        self.use_proxy = false;
        self
    }

    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }
}

#[async_trait]
impl ExtractionStrategy for AudioTranscriptionStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, reference: &str, ctx: AttemptContext<'_>) -> StrategyAttempt {
        let proxy = if self.use_proxy {
            ctx.pool.get_current()
        } else {
            None
        };

        let scratch = match ScratchDir::new(SCRATCH_PREFIX) {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Cannot create scratch dir for audio fallback: {}", e);
                return StrategyAttempt::new(
                    proxy,
                    Err(FailureSignal::Spawn(format!("scratch dir: {}", e))),
                );
            }
        };
        // The tool picks the container extension itself.
        let output_path = scratch.file("audio");

        let spec = route_through(
            self.command
                .clone()
                .args(["--user-agent", random_user_agent()])
                .arg("--output")
                .arg(output_path.to_string_lossy())
                .arg("--")
                .arg(reference)
                .timeout(ctx.timeout),
            proxy.as_deref(),
        );
        debug!(
            proxy = proxy.as_ref().map(|p| p.label()).as_deref().unwrap_or("none"),
            scratch = %scratch.path().display(),
            "Running {}",
            spec.display()
        );

        let result = match self.runner.run(&spec, ctx.cancel).await {
            Ok(output) => interpret_output(&output),
            Err(e) => Err(e.into()),
        };
        scratch.close();

        StrategyAttempt::new(proxy, result)
    }
}
