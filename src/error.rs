use thiserror::Error;

/// Errors produced by the client, transports, and the shared endpoint.
///
/// Validation errors (`InvalidArgument`) fail fast at the API boundary and
/// never reach the wire. Resolution and transport errors propagate to the
/// direct caller. The async sender surfaces only `ClientClosed` to the
/// submitter; transport errors observed by its worker are recorded via
/// `tracing` instead (see the async sender module).
#[derive(Debug, Error)]
pub enum StatsdError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("could not resolve host '{host}': {source}")]
    ResolutionFailed {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport failed: {0}")]
    TransportFailed(#[from] std::io::Error),

    #[error("client is closed")]
    ClientClosed,

    #[error("endpoint is closed")]
    EndpointClosed,
}

pub type Result<T> = std::result::Result<T, StatsdError>;
