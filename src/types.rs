use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Value object: stable, fully qualified name of a flow type
///
/// Two distinct flow types never share an identity. The registry uses it as
/// the table key and as the basis of responder narrowing checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowIdentity(pub String);

impl FlowIdentity {
    /// Create an identity from a fully qualified type name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

/// An initiating flow as declared at registration time
///
/// The protocol version is supplied explicitly by the caller; the registry
/// never derives it from annotations or runtime type information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatingFlow {
    /// Identity of the initiating flow type
    pub identity: FlowIdentity,

    /// Protocol version the flow declares
    pub version: u32,
}

impl InitiatingFlow {
    /// Declare an initiating flow with an explicit protocol version
    pub fn new(identity: FlowIdentity, version: u32) -> Self {
        Self { identity, version }
    }
}

/// A responder flow type together with its declared supertype chain
///
/// Ancestry is data supplied at registration time, so narrowing checks are a
/// finite relation lookup rather than runtime type introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderType {
    /// Identity of the responder flow type
    pub identity: FlowIdentity,

    /// Declared ancestors, nearest first
    pub supertypes: Vec<FlowIdentity>,
}

impl ResponderType {
    /// A responder type with no declared ancestors
    pub fn new(identity: FlowIdentity) -> Self {
        Self {
            identity,
            supertypes: Vec::new(),
        }
    }

    /// A responder type extending the given ancestor chain, nearest first
    pub fn extending(identity: FlowIdentity, supertypes: Vec<FlowIdentity>) -> Self {
        Self {
            identity,
            supertypes,
        }
    }

    /// True when `self` is `other`'s type or a declared subtype of it
    pub fn narrows(&self, other: &ResponderType) -> bool {
        self.identity == other.identity || self.supertypes.contains(&other.identity)
    }
}

/// Value object: unique identifier of an open peer session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a fresh session id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Handle to an open session with an initiating peer
///
/// Constructed by the execution engine once a session initiation is accepted
/// and handed to the responder factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSession {
    /// Unique session identifier
    pub id: SessionId,

    /// Display name of the initiating peer
    pub counterparty: String,

    /// Identity the peer declared when initiating the session
    pub initiating: FlowIdentity,
}

impl FlowSession {
    /// Open a session handle for the given peer and initiating identity
    pub fn new(counterparty: impl Into<String>, initiating: FlowIdentity) -> Self {
        Self {
            id: SessionId::generate(),
            counterparty: counterparty.into(),
            initiating,
        }
    }
}
