use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::application::tracking::TrackedInstances;
use crate::domain::events::InstanceEventSource;
use crate::error::FlowError;
use crate::types::{FlowIdentity, InitiatingFlow, ResponderType};
use crate::ResponderFactory;

/// Origin of a registered factory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Built-in platform flow; never replaceable by application code
    Core,

    /// Flow supplied by an installed application module
    Application,
}

/// A registration binding an initiating identity to a responder factory
#[derive(Clone)]
pub struct RegisteredFlow {
    /// Identity the remote initiator declares; the table key
    pub initiating: FlowIdentity,

    /// Declared type the factory produces; `None` only for core entries
    /// that fix no responder type
    pub responder: Option<ResponderType>,

    /// Constructor for the responder flow
    pub factory: ResponderFactory,

    /// Origin of the registration
    pub kind: FlowKind,
}

impl fmt::Debug for RegisteredFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredFlow")
            .field("initiating", &self.initiating)
            .field("responder", &self.responder)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Thread-safe table mapping initiating flow identities to responder
/// factories
///
/// One registry instance is owned by the node and shared (via `Arc`)
/// between the bootstrap path, application-module loaders and the execution
/// engine. Registrations for different identities never block one another.
/// Two racing registrations for the same identity serialize on the entry
/// guard for the whole read-validate-write sequence, so exactly one of them
/// observes the prior state and the other validates against the winner's
/// write.
///
/// Entries are created at node startup and module load, are never
/// individually deleted, and live until the registry is dropped at node
/// shutdown.
pub struct FlowFactoryRegistry {
    entries: DashMap<FlowIdentity, RegisteredFlow>,
    events: InstanceEventSource,
}

impl FlowFactoryRegistry {
    /// Create a registry fed by the engine's instance event source
    pub fn new(events: InstanceEventSource) -> Self {
        Self {
            entries: DashMap::with_capacity(64),
            events,
        }
    }

    /// Register an application-supplied responder factory for `initiating`
    ///
    /// An existing application entry may only be replaced by a responder
    /// type that narrows it; platform entries are never replaced. On
    /// success, `track` selects between a live stream of creation events
    /// for instances of `responder` (or its declared subtypes) and a
    /// closed no-op stream. Validation fully precedes mutation: on error
    /// the table is unchanged.
    pub fn register(
        &self,
        initiating: FlowIdentity,
        responder: ResponderType,
        factory: ResponderFactory,
        track: bool,
    ) -> Result<TrackedInstances, FlowError> {
        match self.entries.entry(initiating.clone()) {
            Entry::Occupied(mut current) => {
                let existing = current.get();
                if existing.kind == FlowKind::Core {
                    return Err(FlowError::PlatformFlowConflict(initiating.0));
                }
                let narrows = existing
                    .responder
                    .as_ref()
                    .map_or(false, |installed| responder.narrows(installed));
                if !narrows {
                    return Err(FlowError::IncompatibleResponder(initiating.0));
                }
                // The replacement stays keyed by the initiating identity
                current.insert(RegisteredFlow {
                    initiating: initiating.clone(),
                    responder: Some(responder.clone()),
                    factory,
                    kind: FlowKind::Application,
                });
                debug!(
                    initiating = %initiating.0,
                    responder = %responder.identity.0,
                    "Narrowed installed responder flow"
                );
                Ok(self.tracker(responder, track))
            }
            Entry::Vacant(slot) => {
                slot.insert(RegisteredFlow {
                    initiating: initiating.clone(),
                    responder: Some(responder.clone()),
                    factory,
                    kind: FlowKind::Application,
                });
                debug!(
                    initiating = %initiating.0,
                    responder = %responder.identity.0,
                    "Installed application responder flow"
                );
                Ok(self.tracker(responder, track))
            }
        }
    }

    /// Register a platform-builtin responder factory
    ///
    /// Core flows are versioned by the node's platform version, so the
    /// initiating declaration must carry protocol version 1. The write is
    /// unconditional: core registration is the node's own bootstrap and
    /// overwrites any previous entry for the identity. Re-registering an
    /// identical triple at startup succeeds and leaves the table unchanged.
    pub fn register_core(
        &self,
        client: InitiatingFlow,
        factory: ResponderFactory,
        responder: Option<ResponderType>,
    ) -> Result<(), FlowError> {
        if client.version != 1 {
            return Err(FlowError::CoreFlowVersion(
                client.identity.0,
                client.version,
            ));
        }
        let identity = client.identity;
        self.entries.insert(
            identity.clone(),
            RegisteredFlow {
                initiating: identity.clone(),
                responder,
                factory,
                kind: FlowKind::Core,
            },
        );
        debug!(flow = %identity.0, "Installed core flow");
        Ok(())
    }

    /// Factory currently registered for `initiating`, if any
    ///
    /// A miss is normal signal: the execution engine rejects the session.
    /// The read is a point-in-time snapshot; racing a registration it
    /// returns either the old or the new factory, never a torn entry.
    pub fn lookup(&self, initiating: &FlowIdentity) -> Option<ResponderFactory> {
        let found = self
            .entries
            .get(initiating)
            .map(|entry| entry.factory.clone());
        trace!(initiating = %initiating.0, hit = found.is_some(), "Flow factory lookup");
        found
    }

    /// Kind of the registration held for `initiating`, if any
    pub fn registered_kind(&self, initiating: &FlowIdentity) -> Option<FlowKind> {
        self.entries.get(initiating).map(|entry| entry.kind)
    }

    /// Number of registered initiating identities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tracker(&self, responder: ResponderType, track: bool) -> TrackedInstances {
        if track {
            TrackedInstances::subscribed(self.events.subscribe(), responder)
        } else {
            TrackedInstances::empty(responder)
        }
    }
}

impl fmt::Debug for FlowFactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowFactoryRegistry")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

/// Stub collaborators for exercising the session-acceptance path in tests
#[cfg(feature = "testing")]
pub mod stub {
    use std::sync::Arc;

    use super::FlowFactoryRegistry;
    use crate::domain::events::{FlowInstanceCreated, InstanceEventSource};
    use crate::error::FlowError;
    use crate::types::{FlowIdentity, FlowSession};
    use crate::FlowLogic;

    /// Minimal stand-in for the execution engine
    ///
    /// Looks up the responder factory for an inbound session initiation,
    /// constructs the flow and publishes the creation event the real engine
    /// would emit. The registry must have been created from a clone of the
    /// same event source for trackers to observe the published events.
    pub struct StubExecutionEngine {
        registry: Arc<FlowFactoryRegistry>,
        events: InstanceEventSource,
    }

    impl StubExecutionEngine {
        /// Build a stub engine publishing into `events`
        pub fn new(registry: Arc<FlowFactoryRegistry>, events: InstanceEventSource) -> Self {
            Self { registry, events }
        }

        /// Accept an inbound session initiation
        ///
        /// Rejects the session when no responder is installed for
        /// `initiating`.
        pub fn initiate_session(
            &self,
            initiating: &FlowIdentity,
            counterparty: &str,
        ) -> Result<Box<dyn FlowLogic>, FlowError> {
            let factory = self
                .registry
                .lookup(initiating)
                .ok_or_else(|| FlowError::UnknownInitiatingFlow(initiating.0.clone()))?;
            let session = FlowSession::new(counterparty, initiating.clone());
            let flow = (factory)(session)?;
            self.events.publish(FlowInstanceCreated::new(
                initiating.clone(),
                flow.responder_type(),
            ));
            Ok(flow)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FlowLogic, FlowLogicBase, FlowSession};
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Debug)]
    struct FixedTypeFlow {
        #[allow(dead_code)]
        session: FlowSession,
        responder: ResponderType,
    }

    impl FlowLogicBase for FixedTypeFlow {
        fn responder_type(&self) -> ResponderType {
            self.responder.clone()
        }
    }

    #[async_trait]
    impl FlowLogic for FixedTypeFlow {
        async fn call(&mut self) -> Result<serde_json::Value, FlowError> {
            Ok(serde_json::json!({ "type": self.responder.identity.0 }))
        }
    }

    fn identity(name: &str) -> FlowIdentity {
        FlowIdentity::new(name)
    }

    fn responder(name: &str) -> ResponderType {
        ResponderType::new(identity(name))
    }

    fn factory_of(responder: ResponderType) -> ResponderFactory {
        Arc::new(move |session| {
            Ok(Box::new(FixedTypeFlow {
                session,
                responder: responder.clone(),
            }) as Box<dyn FlowLogic>)
        })
    }

    fn registry() -> FlowFactoryRegistry {
        FlowFactoryRegistry::new(InstanceEventSource::default())
    }

    #[test]
    fn test_register_then_lookup() {
        let registry = registry();
        let greet = identity("flows.Greet");

        registry
            .register(
                greet.clone(),
                responder("flows.BasicGreet"),
                factory_of(responder("flows.BasicGreet")),
                false,
            )
            .unwrap();

        assert!(registry.lookup(&greet).is_some());
        assert_eq!(
            registry.registered_kind(&greet),
            Some(FlowKind::Application)
        );
        assert!(registry.lookup(&identity("flows.Other")).is_none());
    }

    #[test]
    fn test_core_entry_is_never_replaced() {
        let registry = registry();
        let ping = identity("flows.Ping");

        registry
            .register_core(
                InitiatingFlow::new(ping.clone(), 1),
                factory_of(responder("flows.CorePing")),
                Some(responder("flows.CorePing")),
            )
            .unwrap();

        let err = registry
            .register(
                ping.clone(),
                responder("flows.PongA"),
                factory_of(responder("flows.PongA")),
                false,
            )
            .unwrap_err();

        assert_eq!(err, FlowError::PlatformFlowConflict("flows.Ping".into()));
        assert_eq!(registry.registered_kind(&ping), Some(FlowKind::Core));
    }

    #[test]
    fn test_core_entry_without_responder_type_still_protected() {
        let registry = registry();
        let ping = identity("flows.Ping");

        registry
            .register_core(
                InitiatingFlow::new(ping.clone(), 1),
                factory_of(responder("flows.CorePing")),
                None,
            )
            .unwrap();

        let err = registry
            .register(
                ping,
                responder("flows.PongA"),
                factory_of(responder("flows.PongA")),
                false,
            )
            .unwrap_err();

        assert!(matches!(err, FlowError::PlatformFlowConflict(_)));
    }

    #[test]
    fn test_incompatible_override_is_rejected() {
        let registry = registry();
        let greet = identity("flows.Greet");

        registry
            .register(
                greet.clone(),
                responder("flows.BasicGreet"),
                factory_of(responder("flows.BasicGreet")),
                false,
            )
            .unwrap();

        let err = registry
            .register(
                greet.clone(),
                responder("flows.Unrelated"),
                factory_of(responder("flows.Unrelated")),
                false,
            )
            .unwrap_err();

        assert_eq!(err, FlowError::IncompatibleResponder("flows.Greet".into()));
        // The original entry is unchanged
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(&greet).is_some());
    }

    #[test]
    fn test_narrowing_override_replaces_entry() {
        let registry = registry();
        let greet = identity("flows.Greet");
        let narrowed = ResponderType::extending(
            identity("flows.SpecialGreet"),
            vec![identity("flows.BasicGreet")],
        );

        registry
            .register(
                greet.clone(),
                responder("flows.BasicGreet"),
                factory_of(responder("flows.BasicGreet")),
                false,
            )
            .unwrap();
        registry
            .register(
                greet.clone(),
                narrowed.clone(),
                factory_of(narrowed.clone()),
                false,
            )
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.registered_kind(&greet),
            Some(FlowKind::Application)
        );
    }

    #[test]
    fn test_core_version_guard() {
        let registry = registry();
        let ack = identity("flows.Ack");

        let err = registry
            .register_core(
                InitiatingFlow::new(ack.clone(), 2),
                factory_of(responder("flows.CoreAck")),
                None,
            )
            .unwrap_err();

        assert_eq!(err, FlowError::CoreFlowVersion("flows.Ack".into(), 2));
        assert!(registry.is_empty());
        assert!(registry.lookup(&ack).is_none());
    }

    #[test]
    fn test_registered_factory_constructs_responder() {
        let registry = registry();
        let greet = identity("flows.Greet");

        registry
            .register(
                greet.clone(),
                responder("flows.BasicGreet"),
                factory_of(responder("flows.BasicGreet")),
                false,
            )
            .unwrap();

        let factory = registry.lookup(&greet).unwrap();
        let flow = (factory)(FlowSession::new("PartyA", greet)).unwrap();
        assert_eq!(flow.responder_type(), responder("flows.BasicGreet"));
    }
}
