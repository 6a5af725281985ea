//! Supervisor error types.

use shared_types::TokenError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Could not run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("No tokio runtime available to run supervision tasks")]
    NoRuntime,
}
