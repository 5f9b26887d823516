use thiserror::Error;

/// Core error type for the flow registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// An application registration tried to replace a platform flow
    #[error("cannot replace platform flow: {0}")]
    PlatformFlowConflict(String),

    /// An application registration tried to widen an installed responder
    #[error("incompatible responder already registered for initiator: {0}")]
    IncompatibleResponder(String),

    /// A core registration declared a protocol version other than 1
    #[error("core flows are not independently versioned: {0} declares version {1}; their version is the node's platform version")]
    CoreFlowVersion(String, u32),

    /// No responder flow is installed for an inbound session initiation
    #[error("no responder flow registered for initiator: {0}")]
    UnknownInitiatingFlow(String),

    /// A factory failed to construct its responder flow
    #[error("flow construction error: {0}")]
    FlowConstruction(String),

    /// A responder flow body failed
    #[error("flow execution error: {0}")]
    FlowExecution(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}

impl From<String> for FlowError {
    fn from(err: String) -> Self {
        FlowError::Other(err)
    }
}

impl From<&str> for FlowError {
    fn from(err: &str) -> Self {
        FlowError::Other(err.to_string())
    }
}
