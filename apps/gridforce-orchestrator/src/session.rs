use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identity of a live provider connection (the peer socket address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionKey(String);

impl ConnectionKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for ConnectionKey {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for ConnectionKey {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Connected,
    Online,
    Disconnected,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connected => "CONNECTED",
            SessionStatus::Online => "ONLINE",
            SessionStatus::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory record of one connected provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub connection_key: ConnectionKey,
    pub device_id: String,
    pub wallet_address: String,
    pub capabilities_summary: String,
    pub ip: String,
    pub status: SessionStatus,
    pub last_seen: DateTime<Utc>,
    pub token_balance: i64,
    pub benchmark_score: i64,
    /// Image of the most recent offer written to this provider.
    pub last_offered_image: Option<String>,
}

impl Session {
    /// Fresh, unauthenticated session for a just-accepted connection.
    pub fn connected(connection_key: ConnectionKey) -> Self {
        let ip = connection_key.as_str().to_string();
        Self {
            connection_key,
            device_id: String::new(),
            wallet_address: String::new(),
            capabilities_summary: String::new(),
            ip,
            status: SessionStatus::Connected,
            last_seen: Utc::now(),
            token_balance: 0,
            benchmark_score: 0,
            last_offered_image: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Device identity to record against persisted jobs.
    pub fn job_node_id(&self) -> &str {
        if self.device_id.is_empty() {
            "unknown"
        } else {
            &self.device_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_session_is_anonymous() {
        let session = Session::connected(ConnectionKey::from("10.0.0.1:5000"));
        assert_eq!(session.status, SessionStatus::Connected);
        assert!(session.device_id.is_empty());
        assert_eq!(session.ip, "10.0.0.1:5000");
        assert_eq!(session.job_node_id(), "unknown");
    }

    #[test]
    fn status_serializes_upper_case() {
        let value = serde_json::to_value(SessionStatus::Online).unwrap();
        assert_eq!(value, "ONLINE");
    }
}
