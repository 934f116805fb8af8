//! Engine error types.

use thiserror::Error;

/// Errors raised while building or initializing the engine.
///
/// All of them are fatal at startup; nothing in steady-state ingest or
/// publishing returns an error to the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The station directory could not be read.
    #[error("Station directory unavailable: {0}")]
    Directory(String),

    /// A required builder setting was not provided.
    #[error("Engine misconfigured: {0}")]
    Config(String),
}
