use thiserror::Error;

use crate::tailer::{State, Transition};

/// Errors hit while building a component at startup.
#[derive(Debug, Error)]
pub enum Creation {
    #[error("invalid include pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("failed to build the HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Fatal conditions that terminate the tailing loop. Graceful shutdown still
/// runs on the way out.
#[derive(Debug, Error)]
pub enum TailerError {
    #[error("no action for state {state:?} on transition {transition:?}")]
    UnmatchedTransition { state: State, transition: Transition },
    #[error("failed to scan the log directory: {0}")]
    DirectoryScan(std::io::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
