//! External process execution with bounded lifetime

pub mod runner;
pub mod scratch;

pub use runner::{ProcessOutput, ProcessRunner, ProcessSpec, RunError, DEFAULT_MAX_OUTPUT_BYTES};
pub use scratch::ScratchDir;
