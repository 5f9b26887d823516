use crate::domain::events::FlowInstanceCreated;
use crate::types::ResponderType;
use tokio::sync::broadcast;
use tracing::warn;

/// Live stream of creation events for instances whose runtime type narrows
/// a registered responder type
///
/// Obtained from [`FlowFactoryRegistry::register`] with `track` set. Each
/// tracker owns an independent subscription to the engine's event source;
/// cancelling or dropping it releases that subscription without affecting
/// other trackers.
///
/// [`FlowFactoryRegistry::register`]: crate::application::registry::FlowFactoryRegistry::register
#[derive(Debug)]
pub struct TrackedInstances {
    rx: Option<broadcast::Receiver<FlowInstanceCreated>>,
    filter: ResponderType,
}

impl TrackedInstances {
    pub(crate) fn subscribed(
        rx: broadcast::Receiver<FlowInstanceCreated>,
        filter: ResponderType,
    ) -> Self {
        Self {
            rx: Some(rx),
            filter,
        }
    }

    /// A stream that yields nothing, handed back for untracked registrations
    pub(crate) fn empty(filter: ResponderType) -> Self {
        Self { rx: None, filter }
    }

    /// The responder type this tracker filters on
    pub fn filter(&self) -> &ResponderType {
        &self.filter
    }

    /// Wait for the next matching creation event
    ///
    /// Events whose runtime type does not narrow the tracked responder type
    /// are skipped. Returns `None` once the event source has shut down, or
    /// immediately for an untracked registration. A tracker that falls
    /// behind the engine drops the oldest events and keeps receiving.
    pub async fn recv(&mut self) -> Option<FlowInstanceCreated> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.responder_type.narrows(&self.filter) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "instance tracker lagged behind the engine");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already buffered, without waiting
    pub fn try_recv(&mut self) -> Option<FlowInstanceCreated> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    if event.responder_type.narrows(&self.filter) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "instance tracker lagged behind the engine");
                }
                Err(_) => return None,
            }
        }
    }

    /// Stop tracking and release the subscription
    pub fn cancel(&mut self) {
        self.rx = None;
    }

    /// Whether this tracker still holds a live subscription
    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }
}
