//!
//! Responder flow factory registry for the node flow runtime
//!
//! When a remote peer opens a session against this node it declares the
//! identity of its initiating flow. This crate owns the table consulted on
//! every such session initiation: it decides whether a responder flow can
//! be constructed for that identity and hands the execution engine the
//! factory that builds it. Platform ("core") registrations can never be
//! replaced by application code, application registrations may only be
//! narrowed to a declared subtype, and every registration can opt into a
//! live, type-filtered stream of created instances.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use async_trait::async_trait;

/// Domain layer - instance events and the engine event source
pub mod domain;

/// Application services - the registry and instance tracking
pub mod application;

/// Core value objects
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use application::registry::{FlowFactoryRegistry, FlowKind, RegisteredFlow};
pub use application::tracking::TrackedInstances;
pub use domain::events::{FlowInstanceCreated, FlowInstanceId, InstanceEventSource};
pub use error::FlowError;
pub use types::{FlowIdentity, FlowSession, InitiatingFlow, ResponderType, SessionId};

/// Factory function to construct responder flows
///
/// Registered by platform bootstrap code and application-module loaders,
/// invoked by the execution engine with the session handle of an accepted
/// inbound initiation.
pub type ResponderFactory =
    Arc<dyn Fn(FlowSession) -> Result<Box<dyn FlowLogic>, FlowError> + Send + Sync>;

/// Non-async base trait for responder flows
/// This trait is object-safe and carries the runtime type information the
/// instance tracker filters on
pub trait FlowLogicBase: Send + Sync + std::fmt::Debug {
    /// Runtime type of this flow, with its declared ancestry
    fn responder_type(&self) -> ResponderType;
}

/// A responder flow constructed for an inbound session
///
/// The registry only constructs these; running them is the execution
/// engine's business.
#[async_trait]
pub trait FlowLogic: FlowLogicBase {
    /// Run the responder side of the session to completion
    async fn call(&mut self) -> Result<serde_json::Value, FlowError>;
}

/// Example responder flow that greets the initiating peer
#[derive(Debug)]
pub struct EchoResponder {
    /// Session with the initiating peer
    pub session: FlowSession,
}

impl EchoResponder {
    /// Identity of this responder flow type
    pub fn identity() -> FlowIdentity {
        FlowIdentity::new("flows.common.EchoResponder")
    }

    /// Create an echo responder for the given session
    pub fn new(session: FlowSession) -> Self {
        Self { session }
    }

    /// Factory suitable for registration
    pub fn factory() -> ResponderFactory {
        Arc::new(|session| Ok(Box::new(EchoResponder::new(session)) as Box<dyn FlowLogic>))
    }
}

impl FlowLogicBase for EchoResponder {
    fn responder_type(&self) -> ResponderType {
        ResponderType::new(Self::identity())
    }
}

#[async_trait]
impl FlowLogic for EchoResponder {
    async fn call(&mut self) -> Result<serde_json::Value, FlowError> {
        Ok(serde_json::json!({
            "echoed_to": self.session.counterparty,
            "session_id": self.session.id.0,
        }))
    }
}
