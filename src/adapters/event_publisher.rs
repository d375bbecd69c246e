//! Event Publisher Adapters
//!
//! Sinks for catalog domain events: the tracing log, an in-memory recorder
//! used by tests, a tokio broadcast channel for in-process subscribers, and
//! a fan-out over several of those.

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::events::DomainEvent;
use crate::domain::ports::{EventPublisher, ProductId};
use crate::error::Result;

/// Writes every event to the tracing log.
///
/// Degradation events (`CacheDegraded`, `IndexFailed`) always go out at
/// `warn`; everything else at `info` or `debug` depending on configuration.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher {
    info_level: bool,
}

impl LoggingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log routine events at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    /// Log routine events at debug level.
    pub fn debug_level() -> Self {
        Self { info_level: false }
    }
}

fn is_degradation(event: &DomainEvent) -> bool {
    matches!(
        event,
        DomainEvent::CacheDegraded { .. } | DomainEvent::IndexFailed { .. }
    )
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let event_type = event.event_type();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        if is_degradation(&event) {
            warn!(event_type = %event_type, event = %json, "Catalog event");
        } else if self.info_level {
            info!(event_type = %event_type, event = %json, "Catalog event");
        } else {
            debug!(event_type = %event_type, event = %json, "Catalog event");
        }

        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

/// Records events in memory for later inspection.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: RwLock<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Recorded events with the given type name.
    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Recorded events about one product.
    pub fn events_for(&self, id: ProductId) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.product_id() == Some(id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        self.events.write().extend(events);
        Ok(())
    }
}

/// Broadcasts events to in-process subscribers.
///
/// Publishing never fails: with no subscribers the event is dropped, and a
/// lagging subscriber loses the oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in events {
            let _ = self.sender.send(event);
        }
        Ok(())
    }
}

/// Fans events out to several publishers in order.
#[derive(Default)]
pub struct CompositeEventPublisher {
    publishers: Vec<Box<dyn EventPublisher>>,
}

impl CompositeEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publisher<P: EventPublisher + 'static>(mut self, publisher: P) -> Self {
        self.publishers.push(Box::new(publisher));
        self
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl std::fmt::Debug for CompositeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeEventPublisher")
            .field("publisher_count", &self.publishers.len())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for CompositeEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish(event.clone()).await?;
        }
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish_all(events.clone()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_logging_publisher() {
        let publisher = LoggingEventPublisher::info_level();

        publisher
            .publish(DomainEvent::product_created(ProductId::new(1), "Pen"))
            .await
            .unwrap();
        publisher
            .publish(DomainEvent::cache_degraded("get", "connection reset"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_collector() {
        let collector = InMemoryEventCollector::new();
        assert!(collector.is_empty());

        collector
            .publish_all(vec![
                DomainEvent::product_created(ProductId::new(1), "Pen"),
                DomainEvent::product_created(ProductId::new(2), "Ink"),
                DomainEvent::index_failed(ProductId::new(2), "timeout"),
            ])
            .await
            .unwrap();

        assert_eq!(collector.len(), 3);
        assert_eq!(collector.events_of_type("ProductCreated").len(), 2);
        assert_eq!(collector.events_for(ProductId::new(2)).len(), 2);

        collector.clear();
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_publisher() {
        let publisher = BroadcastEventPublisher::new(8);

        // No subscribers yet; must not error
        publisher
            .publish(DomainEvent::product_updated(ProductId::new(1)))
            .await
            .unwrap();

        let mut rx = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        publisher
            .publish(DomainEvent::product_deleted(ProductId::new(4), true))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_matches!(
            received,
            DomainEvent::ProductDeleted { purged_derived: true, .. }
        );
        assert_eq!(received.product_id(), Some(ProductId::new(4)));
    }

    #[tokio::test]
    async fn test_composite_publisher() {
        struct Forward(Arc<InMemoryEventCollector>);

        #[async_trait]
        impl EventPublisher for Forward {
            async fn publish(&self, event: DomainEvent) -> Result<()> {
                self.0.publish(event).await
            }

            async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
                self.0.publish_all(events).await
            }
        }

        let collector = Arc::new(InMemoryEventCollector::new());
        let composite = CompositeEventPublisher::new()
            .with_publisher(LoggingEventPublisher::debug_level())
            .with_publisher(Forward(collector.clone()));
        assert_eq!(composite.len(), 2);

        composite
            .publish(DomainEvent::index_repaired(ProductId::new(9)))
            .await
            .unwrap();

        assert_eq!(collector.events_of_type("IndexRepaired").len(), 1);
    }
}
