use crate::types::{FlowIdentity, ResponderType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default per-subscriber event buffer before lagging sets in
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Value object: unique identifier of a flow-logic instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowInstanceId(pub String);

impl FlowInstanceId {
    /// Generate a fresh instance id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Event: a responder flow instance was created by the execution engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowInstanceCreated {
    /// Unique identifier of the new instance
    pub instance_id: FlowInstanceId,

    /// Identity the remote peer declared when initiating the session
    pub initiating: FlowIdentity,

    /// Runtime type of the created instance, with its declared ancestry
    pub responder_type: ResponderType,

    /// When the instance was created
    pub timestamp: DateTime<Utc>,
}

impl FlowInstanceCreated {
    /// Record a creation event for a fresh instance of `responder_type`
    pub fn new(initiating: FlowIdentity, responder_type: ResponderType) -> Self {
        Self {
            instance_id: FlowInstanceId::generate(),
            initiating,
            responder_type,
            timestamp: Utc::now(),
        }
    }
}

/// Hot, unordered stream of [`FlowInstanceCreated`] events
///
/// The execution engine owns one of these (handles are cheap clones of the
/// same channel) and publishes one event per created flow-logic instance.
/// Publishing never blocks: a subscriber that falls behind drops the oldest
/// events instead of slowing the engine down.
#[derive(Debug, Clone)]
pub struct InstanceEventSource {
    tx: broadcast::Sender<FlowInstanceCreated>,
}

impl InstanceEventSource {
    /// Create an event source buffering up to `capacity` events per
    /// subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a creation event
    ///
    /// Events published while no subscriber is listening are dropped.
    pub fn publish(&self, event: FlowInstanceCreated) {
        // send only errors when there are no receivers
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<FlowInstanceCreated> {
        self.tx.subscribe()
    }
}

impl Default for InstanceEventSource {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
