// Error types shared across the engine, caches and lockers

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy of the engine.
///
/// Structural errors surface when a graph is compiled; the remaining
/// variants propagate out of a call immediately and abort it. Nothing is
/// recovered locally: the failure of one node fails the whole call.
#[derive(Debug, Error)]
pub enum Error {
    /// The graph failed validation: missing input, arity mismatch, cycle.
    #[error("invalid graph: {0}")]
    Structural(String),
    /// An edge body failed during a call, attributed to its node.
    #[error("evaluation failed at node `{node}`: {message}")]
    Evaluation { node: String, message: String },
    /// Reservation retries were exhausted; a deadlock is suspected.
    #[error("suspected deadlock while reserving key `{0}`")]
    Contention(String),
    /// A cache backend or coordination store failed.
    #[error("cache backend failure: {0}")]
    Backend(String),
    /// An identifier is absent from a routing or grouping map.
    #[error("unknown identifier: {0}")]
    Identifier(String),
}

impl Error {
    /// An evaluation failure that has not reached its node yet; the
    /// evaluator fills the node name in when the error crosses it.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Error::Evaluation {
            node: String::new(),
            message: message.into(),
        }
    }

    pub(crate) fn attributed_to(self, node: &str) -> Self {
        match self {
            Error::Evaluation { node: n, message } if n.is_empty() => Error::Evaluation {
                node: node.to_string(),
                message,
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Backend(err.to_string())
    }
}
