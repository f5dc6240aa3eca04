//! Reading the JSON contract shared by the extraction tools
//!
//! Tools print one JSON object on stdout:
//! `{"payload": "...", "error": null, "languageHint": "en"}`.
//! Log noise before the object is tolerated; the last line is tried when the
//! whole stdout is not valid JSON.

use serde::Deserialize;

use super::FailureSignal;
use crate::detector::truncate;
use crate::models::Transcript;
use crate::process::ProcessOutput;

const QUOTED_OUTPUT_LEN: usize = 300;

/// Stdout of an extraction tool
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    #[serde(default, alias = "transcript")]
    pub payload: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "language")]
    pub language_hint: Option<String>,
    /// Media length in seconds
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub segments: Option<u32>,
}

impl ToolOutput {
    pub fn parse(stdout: &str) -> serde_json::Result<Self> {
        let trimmed = stdout.trim();
        match serde_json::from_str(trimmed) {
            Ok(parsed) => Ok(parsed),
            Err(e) => match trimmed.lines().rev().find(|l| !l.trim().is_empty()) {
                Some(last) if last.len() != trimmed.len() => {
                    serde_json::from_str(last.trim()).map_err(|_| e)
                }
                _ => Err(e),
            },
        }
    }

    fn non_empty(value: Option<String>) -> Option<String> {
        value.filter(|v| !v.trim().is_empty())
    }
}

/// Turn a finished process into a transcript or an unclassified failure
pub fn interpret_output(output: &ProcessOutput) -> Result<Transcript, FailureSignal> {
    let parsed = ToolOutput::parse(&output.stdout);

    if output.success() {
        let tool = parsed.map_err(|e| {
            FailureSignal::Parse(format!(
                "malformed tool output ({}): {}",
                e,
                truncate(output.stdout.trim(), QUOTED_OUTPUT_LEN)
            ))
        })?;

        return match (
            ToolOutput::non_empty(tool.payload),
            ToolOutput::non_empty(tool.error),
        ) {
            (Some(text), _) => Ok(Transcript {
                text,
                language_hint: ToolOutput::non_empty(tool.language_hint),
                duration_secs: tool.duration,
                segments: tool.segments,
            }),
            (None, Some(error)) => Err(FailureSignal::Diagnostics(error)),
            (None, None) => Err(FailureSignal::Diagnostics("tool reported no payload".into())),
        };
    }

    let mut parts = Vec::new();
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        parts.push(stderr.to_string());
    }
    if let Some(error) = parsed.ok().and_then(|t| ToolOutput::non_empty(t.error)) {
        parts.push(error);
    }
    parts.push(match output.exit_code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    });
    Err(FailureSignal::Diagnostics(parts.join("\n")))
}
