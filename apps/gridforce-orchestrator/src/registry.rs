use std::collections::HashMap;
use std::sync::Arc;

use metrics::gauge;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::session::{ConnectionKey, Session};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    AlreadyAdmitted(ConnectionKey),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("connection writer has shut down")]
    Closed,
    #[error("socket write failed")]
    WriteFailed,
}

/// One text frame queued for a connection's writer task. The writer answers
/// on `ack` once the socket write has completed (`true`) or failed (`false`).
#[derive(Debug)]
pub struct Outbound {
    pub text: String,
    pub ack: oneshot::Sender<bool>,
}

/// Sending half of a connection's outbound channel.
#[derive(Debug, Clone)]
pub struct ProviderLink {
    tx: mpsc::Sender<Outbound>,
}

impl ProviderLink {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    /// Queues `text` and waits until the writer reports the socket write.
    pub async fn send(&self, text: String) -> Result<(), LinkError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Outbound { text, ack })
            .await
            .map_err(|_| LinkError::Closed)?;
        match done.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(LinkError::WriteFailed),
            Err(_) => Err(LinkError::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct Entry {
    admitted: u64,
    session: Session,
    link: ProviderLink,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<ConnectionKey, Entry>,
    next_admission: u64,
}

/// Live provider sessions keyed by connection.
///
/// All access goes through a single reader/writer lock which is never held
/// across an await point. Snapshots are returned in admission order.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, key: ConnectionKey, link: ProviderLink) -> Result<Session, RegistryError> {
        let mut inner = self.inner.write();
        if inner.entries.contains_key(&key) {
            return Err(RegistryError::AlreadyAdmitted(key));
        }
        let admitted = inner.next_admission;
        inner.next_admission += 1;
        let session = Session::connected(key.clone());
        inner.entries.insert(
            key,
            Entry {
                admitted,
                session: session.clone(),
                link,
            },
        );
        gauge!("gridforce_sessions_active").set(inner.entries.len() as f64);
        Ok(session)
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<Session> {
        self.inner.read().entries.get(key).map(|e| e.session.clone())
    }

    /// Applies `mutate` under the write lock and returns the updated copy,
    /// or `None` when the connection is gone.
    pub fn update<F>(&self, key: &ConnectionKey, mutate: F) -> Option<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut inner = self.inner.write();
        let entry = inner.entries.get_mut(key)?;
        mutate(&mut entry.session);
        Some(entry.session.clone())
    }

    pub fn list(&self) -> Vec<Session> {
        let inner = self.inner.read();
        let mut entries: Vec<&Entry> = inner.entries.values().collect();
        entries.sort_by_key(|e| e.admitted);
        entries.into_iter().map(|e| e.session.clone()).collect()
    }

    pub fn link(&self, key: &ConnectionKey) -> Option<ProviderLink> {
        self.inner.read().entries.get(key).map(|e| e.link.clone())
    }

    pub fn remove(&self, key: &ConnectionKey) -> Option<Session> {
        let mut inner = self.inner.write();
        let removed = inner.entries.remove(key).map(|e| e.session);
        gauge!("gridforce_sessions_active").set(inner.entries.len() as f64);
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}
