use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::payload::{AuthPayload, JobOffer};

/// Message tags carried in the envelope `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Auth,
    JobOffer,
    JobResult,
    Heartbeat,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Auth => "AUTH",
            MessageType::JobOffer => "JOB_OFFER",
            MessageType::JobResult => "JOB_RESULT",
            MessageType::Heartbeat => "HEARTBEAT",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "AUTH" => Ok(MessageType::Auth),
            "JOB_OFFER" => Ok(MessageType::JobOffer),
            "JOB_RESULT" => Ok(MessageType::JobResult),
            "HEARTBEAT" => Ok(MessageType::Heartbeat),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("malformed {kind} payload: {source}")]
    MalformedPayload {
        kind: MessageType,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode {kind} message: {source}")]
    Encode {
        kind: MessageType,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Short label used for metrics.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ProtocolError::MalformedEnvelope(_) => "malformed_envelope",
            ProtocolError::UnknownType(_) => "unknown_type",
            ProtocolError::MalformedPayload { .. } => "malformed_payload",
            ProtocolError::Encode { .. } => "encode",
        }
    }
}

/// Standard wrapper for every frame exchanged with a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// Envelope after its payload has been decoded according to its tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    Auth(AuthPayload),
    JobOffer(JobOffer),
    JobResult(String),
    Heartbeat,
}

impl Envelope {
    fn encode<T: Serialize>(kind: MessageType, payload: &T) -> Result<Self, ProtocolError> {
        let payload =
            serde_json::to_value(payload).map_err(|source| ProtocolError::Encode { kind, source })?;
        Ok(Self {
            kind: kind.as_str().to_string(),
            payload,
        })
    }

    pub fn auth(payload: &AuthPayload) -> Result<Self, ProtocolError> {
        Self::encode(MessageType::Auth, payload)
    }

    pub fn job_offer(offer: &JobOffer) -> Result<Self, ProtocolError> {
        Self::encode(MessageType::JobOffer, offer)
    }

    /// `JOB_RESULT` carries the job output as a bare JSON string.
    pub fn job_result(output: &str) -> Self {
        Self {
            kind: MessageType::JobResult.as_str().to_string(),
            payload: Value::String(output.to_string()),
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            kind: MessageType::Heartbeat.as_str().to_string(),
            payload: Value::Null,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::MalformedEnvelope)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(ProtocolError::MalformedEnvelope)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let kind = self.kind().unwrap_or(MessageType::Heartbeat);
        serde_json::to_string(self).map_err(|source| ProtocolError::Encode { kind, source })
    }

    pub fn kind(&self) -> Result<MessageType, ProtocolError> {
        self.kind.parse()
    }

    pub fn decode_auth(&self) -> Result<AuthPayload, ProtocolError> {
        self.decode_payload(MessageType::Auth)
    }

    pub fn decode_job_offer(&self) -> Result<JobOffer, ProtocolError> {
        self.decode_payload(MessageType::JobOffer)
    }

    pub fn decode_job_result(&self) -> Result<String, ProtocolError> {
        self.decode_payload(MessageType::JobResult)
    }

    /// Decodes the payload according to the envelope tag.
    pub fn decode(&self) -> Result<ProtocolMessage, ProtocolError> {
        match self.kind()? {
            MessageType::Auth => self.decode_auth().map(ProtocolMessage::Auth),
            MessageType::JobOffer => self.decode_job_offer().map(ProtocolMessage::JobOffer),
            MessageType::JobResult => self.decode_job_result().map(ProtocolMessage::JobResult),
            MessageType::Heartbeat => Ok(ProtocolMessage::Heartbeat),
        }
    }

    fn decode_payload<T: serde::de::DeserializeOwned>(
        &self,
        kind: MessageType,
    ) -> Result<T, ProtocolError> {
        T::deserialize(&self.payload).map_err(|source| ProtocolError::MalformedPayload { kind, source })
    }
}
