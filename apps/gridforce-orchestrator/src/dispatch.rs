use std::sync::Arc;

use gridforce_protocol::{Envelope, JobOffer, ProtocolError};
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use crate::registry::{LinkError, ProviderRegistry};
use crate::session::{ConnectionKey, Session};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no providers available")]
    NoProvidersAvailable,
    #[error("failed to deliver job to {key}: {source}")]
    DispatchFailed {
        key: ConnectionKey,
        #[source]
        source: LinkError,
    },
    #[error(transparent)]
    Encode(#[from] ProtocolError),
}

impl DispatchError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            DispatchError::NoProvidersAvailable => "no_providers",
            DispatchError::DispatchFailed { .. } => "delivery_failed",
            DispatchError::Encode(_) => "encode",
        }
    }
}

/// Picks the provider that receives the next offer.
pub trait SelectionStrategy: Send + Sync {
    fn select(&self, sessions: &[Session]) -> Option<ConnectionKey>;
}

/// First session in the registry snapshot, whatever its status.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstListed;

impl SelectionStrategy for FirstListed {
    fn select(&self, sessions: &[Session]) -> Option<ConnectionKey> {
        sessions.first().map(|s| s.connection_key.clone())
    }
}

/// Fire-and-forget delivery of job offers to connected providers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: ProviderRegistry,
    strategy: Arc<dyn SelectionStrategy>,
}

impl Dispatcher {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self::with_strategy(registry, Arc::new(FirstListed))
    }

    pub fn with_strategy(registry: ProviderRegistry, strategy: Arc<dyn SelectionStrategy>) -> Self {
        Self { registry, strategy }
    }

    /// Writes one `JOB_OFFER` to the selected provider. Returns once the frame
    /// reached the socket; nothing tracks the job afterwards.
    pub async fn dispatch(&self, offer: JobOffer) -> Result<ConnectionKey, DispatchError> {
        let result = self.deliver(offer).await;
        match &result {
            Ok(key) => {
                counter!("gridforce_dispatch_total", "outcome" => "delivered").increment(1);
                info!(connection = %key, "job dispatched");
            }
            Err(err) => {
                counter!("gridforce_dispatch_total", "outcome" => err.metric_label()).increment(1);
                warn!(error = %err, "job dispatch failed");
            }
        }
        result
    }

    async fn deliver(&self, offer: JobOffer) -> Result<ConnectionKey, DispatchError> {
        let text = Envelope::job_offer(&offer)?.to_json()?;
        let snapshot = self.registry.list();
        let key = self
            .strategy
            .select(&snapshot)
            .ok_or(DispatchError::NoProvidersAvailable)?;
        let link = self
            .registry
            .link(&key)
            .ok_or_else(|| DispatchError::DispatchFailed {
                key: key.clone(),
                source: LinkError::Closed,
            })?;

        // Set before the write; the reply can arrive before `send` returns.
        let mut previous = None;
        self.registry.update(&key, |session| {
            previous = session.last_offered_image.replace(offer.image);
        });

        if let Err(source) = link.send(text).await {
            self.registry
                .update(&key, |session| session.last_offered_image = previous);
            return Err(DispatchError::DispatchFailed { key, source });
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProviderLink;
    use gridforce_protocol::ProtocolMessage;

    fn offer() -> JobOffer {
        JobOffer::new("alpine", vec!["echo".into(), "hi".into()])
    }

    #[tokio::test]
    async fn empty_registry_has_no_providers() {
        let dispatcher = Dispatcher::new(ProviderRegistry::new());
        assert!(matches!(
            dispatcher.dispatch(offer()).await,
            Err(DispatchError::NoProvidersAvailable)
        ));
    }

    #[tokio::test]
    async fn offer_reaches_first_listed_provider() {
        let registry = ProviderRegistry::new();
        let (first, mut first_rx) = ProviderLink::channel(4);
        let (second, mut second_rx) = ProviderLink::channel(4);
        registry.admit(ConnectionKey::from("first"), first).unwrap();
        registry.admit(ConnectionKey::from("second"), second).unwrap();

        let writer = tokio::spawn(async move {
            let frame = first_rx.recv().await.unwrap();
            let _ = frame.ack.send(true);
            frame.text
        });

        let dispatcher = Dispatcher::new(registry.clone());
        let key = dispatcher.dispatch(offer()).await.unwrap();
        assert_eq!(key.as_str(), "first");

        let text = writer.await.unwrap();
        let message = Envelope::from_json(&text).unwrap().decode().unwrap();
        assert_eq!(message, ProtocolMessage::JobOffer(offer()));
        assert!(second_rx.try_recv().is_err());
        assert_eq!(
            registry
                .get(&ConnectionKey::from("first"))
                .unwrap()
                .last_offered_image
                .as_deref(),
            Some("alpine")
        );
    }

    #[tokio::test]
    async fn closed_writer_is_a_dispatch_failure() {
        let registry = ProviderRegistry::new();
        let (link, rx) = ProviderLink::channel(4);
        registry.admit(ConnectionKey::from("dead"), link).unwrap();
        drop(rx);

        let dispatcher = Dispatcher::new(registry);
        match dispatcher.dispatch(offer()).await {
            Err(DispatchError::DispatchFailed { key, source }) => {
                assert_eq!(key.as_str(), "dead");
                assert_eq!(source, LinkError::Closed);
            }
            other => panic!("unexpected dispatch result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_offered_image() {
        let registry = ProviderRegistry::new();
        let key = ConnectionKey::from("flaky");
        let (link, mut rx) = ProviderLink::channel(4);
        registry.admit(key.clone(), link).unwrap();
        registry.update(&key, |s| s.last_offered_image = Some("busybox".into()));
        tokio::spawn(async move {
            if let Some(frame) = rx.recv().await {
                let _ = frame.ack.send(false);
            }
        });

        let dispatcher = Dispatcher::new(registry.clone());
        assert!(matches!(
            dispatcher.dispatch(offer()).await,
            Err(DispatchError::DispatchFailed {
                source: LinkError::WriteFailed,
                ..
            })
        ));
        assert_eq!(
            registry.get(&key).unwrap().last_offered_image.as_deref(),
            Some("busybox")
        );
    }

    struct LastListed;

    impl SelectionStrategy for LastListed {
        fn select(&self, sessions: &[Session]) -> Option<ConnectionKey> {
            sessions.last().map(|s| s.connection_key.clone())
        }
    }

    #[tokio::test]
    async fn strategy_decides_the_target() {
        let registry = ProviderRegistry::new();
        let (first, _first_rx) = ProviderLink::channel(4);
        let (second, mut second_rx) = ProviderLink::channel(4);
        registry.admit(ConnectionKey::from("first"), first).unwrap();
        registry.admit(ConnectionKey::from("second"), second).unwrap();
        tokio::spawn(async move {
            if let Some(frame) = second_rx.recv().await {
                let _ = frame.ack.send(true);
            }
        });

        let dispatcher = Dispatcher::with_strategy(registry, Arc::new(LastListed));
        let key = dispatcher.dispatch(offer()).await.unwrap();
        assert_eq!(key.as_str(), "second");
    }
}
