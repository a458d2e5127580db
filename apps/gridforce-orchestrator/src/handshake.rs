use gridforce_protocol::AuthPayload;
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use crate::registry::ProviderRegistry;
use crate::session::{ConnectionKey, Session, SessionStatus};
use crate::store::{NodeRecord, Store};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionKey),
}

impl HandshakeError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            HandshakeError::UnknownConnection(_) => "unknown_connection",
        }
    }
}

/// Promotes the session behind `key` to `ONLINE` using the identity in `auth`.
///
/// Counters persisted for this connection key are carried into the session.
/// Storage failures are logged and never undo the in-memory transition.
/// Running it again simply overwrites the same fields.
pub async fn authenticate(
    registry: &ProviderRegistry,
    store: &dyn Store,
    key: &ConnectionKey,
    auth: AuthPayload,
) -> Result<Session, HandshakeError> {
    if registry.get(key).is_none() {
        let err = HandshakeError::UnknownConnection(key.clone());
        counter!("gridforce_handshakes_failure_total", "reason" => err.metric_label()).increment(1);
        return Err(err);
    }

    let persisted = match store.find_node(key.as_str()).await {
        Ok(node) => node,
        Err(err) => {
            warn!(connection = %key, error = %err, "failed to load persisted node");
            None
        }
    };

    let capabilities = auth.capabilities_summary();
    let updated = registry.update(key, |session| {
        session.device_id = auth.device_id;
        session.wallet_address = auth.wallet_address;
        session.capabilities_summary = capabilities;
        session.status = SessionStatus::Online;
        session.touch();
        if let Some(node) = &persisted {
            session.token_balance = node.tokens;
            session.benchmark_score = node.benchmark_score;
        }
    });
    let Some(session) = updated else {
        let err = HandshakeError::UnknownConnection(key.clone());
        counter!("gridforce_handshakes_failure_total", "reason" => err.metric_label()).increment(1);
        return Err(err);
    };

    if let Err(err) = store.save_node(node_record(&session)).await {
        warn!(connection = %key, error = %err, "failed to persist node after handshake");
    }

    counter!("gridforce_handshakes_success_total").increment(1);
    info!(
        connection = %key,
        device_id = %session.device_id,
        wallet = %session.wallet_address,
        specs = %session.capabilities_summary,
        restored_tokens = session.token_balance,
        "provider online"
    );
    Ok(session)
}

pub(crate) fn node_record(session: &Session) -> NodeRecord {
    NodeRecord {
        id: session.connection_key.to_string(),
        ip_address: session.ip.clone(),
        device_id: session.device_id.clone(),
        wallet_address: session.wallet_address.clone(),
        specs: session.capabilities_summary.clone(),
        status: session.status.to_string(),
        last_seen: session.last_seen,
        tokens: session.token_balance,
        benchmark_score: session.benchmark_score,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::registry::ProviderLink;
    use crate::store::MemoryStore;

    fn auth(device: &str) -> AuthPayload {
        AuthPayload {
            device_id: device.into(),
            wallet_address: "0xabc".into(),
            os: "linux".into(),
            arch: "amd64".into(),
            cpu_cores: 8,
        }
    }

    fn admitted(registry: &ProviderRegistry, key: &str) -> ConnectionKey {
        let key = ConnectionKey::from(key);
        let (link, _rx) = ProviderLink::channel(1);
        registry.admit(key.clone(), link).unwrap();
        key
    }

    #[tokio::test]
    async fn auth_moves_session_online_and_persists_node() {
        let registry = ProviderRegistry::new();
        let store = MemoryStore::new();
        let key = admitted(&registry, "10.0.0.5:4000");

        let session = authenticate(&registry, store.as_ref(), &key, auth("gpu-1"))
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Online);
        assert_eq!(session.device_id, "gpu-1");
        assert_eq!(session.capabilities_summary, "linux/amd64 - 8 Cores");

        let node = store.find_node(key.as_str()).await.unwrap().unwrap();
        assert_eq!(node.device_id, "gpu-1");
        assert_eq!(node.status, "ONLINE");
        assert_eq!(node.specs, "linux/amd64 - 8 Cores");
    }

    #[tokio::test]
    async fn persisted_counters_are_restored() {
        let registry = ProviderRegistry::new();
        let store = MemoryStore::new();
        let key = admitted(&registry, "10.0.0.5:4001");
        store
            .save_node(NodeRecord {
                id: key.to_string(),
                ip_address: key.to_string(),
                device_id: "gpu-1".into(),
                wallet_address: "0xabc".into(),
                specs: String::new(),
                status: "DISCONNECTED".into(),
                last_seen: Utc::now(),
                tokens: 50,
                benchmark_score: 900,
            })
            .await
            .unwrap();

        let session = authenticate(&registry, store.as_ref(), &key, auth("gpu-1"))
            .await
            .unwrap();
        assert_eq!(session.token_balance, 50);
        assert_eq!(session.benchmark_score, 900);
    }

    #[tokio::test]
    async fn repeated_auth_is_idempotent() {
        let registry = ProviderRegistry::new();
        let store = MemoryStore::new();
        let key = admitted(&registry, "10.0.0.5:4002");

        let mut first = authenticate(&registry, store.as_ref(), &key, auth("gpu-1"))
            .await
            .unwrap();
        let second = authenticate(&registry, store.as_ref(), &key, auth("gpu-1"))
            .await
            .unwrap();
        first.last_seen = second.last_seen;
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn online_sessions_always_carry_a_device_id() {
        let registry = ProviderRegistry::new();
        let store = MemoryStore::new();
        let online = admitted(&registry, "a:1");
        admitted(&registry, "b:2");
        authenticate(&registry, store.as_ref(), &online, auth("gpu-a"))
            .await
            .unwrap();

        for session in registry.list() {
            match session.status {
                SessionStatus::Online => assert!(!session.device_id.is_empty()),
                SessionStatus::Connected => assert!(session.device_id.is_empty()),
                SessionStatus::Disconnected => panic!("removed sessions are never listed"),
            }
        }
    }

    #[tokio::test]
    async fn unknown_connection_is_rejected() {
        let registry = ProviderRegistry::new();
        let store = MemoryStore::new();
        let key = ConnectionKey::from("ghost:1");
        assert_eq!(
            authenticate(&registry, store.as_ref(), &key, auth("gpu-1")).await,
            Err(HandshakeError::UnknownConnection(key))
        );
        assert!(store.nodes().await.is_empty());
    }
}
