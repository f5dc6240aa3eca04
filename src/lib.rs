//! Sluice - Resilient Transcript Extraction
//!
//! Pulls transcripts out of video platforms that rate-limit, IP-ban and
//! bot-detect automated clients.
//!
//! ## Features
//!
//! - Ordered strategy escalation: direct call, proxied call, audio transcription
//! - Shared proxy pool with passive (interval) and forced (on block) rotation
//! - Pattern-based failure classification with configurable rules
//! - Time-boxed external processes that are always killed and cleaned up
//! - Caller cancellation threaded through every attempt

pub mod config;
pub mod detector;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod process;
pub mod proxy;
pub mod strategy;

pub use config::Config;
pub use detector::{BlockDetector, FailureClassifier};
pub use error::{Result, SluiceError};
pub use models::{ExtractionRequest, ExtractionResult, Verdict};
pub use orchestrator::StrategyOrchestrator;
pub use proxy::ProxyPool;
