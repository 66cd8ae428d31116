/// Errors returned by a decision capability.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    /// The capability could not be set up or reached.
    #[error("decision service unavailable: {0}")]
    Unavailable(String),

    /// The request failed in transit.
    #[error("decision request failed: {0}")]
    Network(String),

    /// The service answered with an error status.
    #[error("decision service returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The response could not be interpreted.
    #[error("malformed decision response: {0}")]
    Parse(String),
}
