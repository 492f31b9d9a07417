//! Agent-to-agent message definitions.
//!
//! A [`Message`] is an immutable value describing one unit of communication
//! between two named agents. Its canonical wire shape is [`WireMessage`]:
//!
//! ```json
//! {"from": "...", "to": "...", "type": "...", "payload": {...},
//!  "correlationId": "...", "timestamp": "2025-01-01T12:00:00.000000"}
//! ```

use std::{
    borrow::Borrow,
    fmt,
    sync::atomic::{AtomicI64, Ordering},
};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

mod finite;

// ── Constants ────────────────────────────────────────────────────────────────

/// `strftime` layout of generated timestamps (UTC, no offset, microseconds).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Well-known message kinds exchanged by the research pipeline.
pub mod kinds {
    pub const PAPERS_FOR_SUMMARY: &str = "papers_for_summary";
    pub const SUMMARY_RESPONSE: &str = "summary_response";
}

// ── Errors ───────────────────────────────────────────────────────────────────

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required field is missing or empty.
    #[error("invalid message: {message}")]
    InvalidMessage { message: String },

    /// The payload value is not a string-keyed mapping.
    #[error("payload must be a mapping, got {found}")]
    PayloadNotObject { found: &'static str },

    /// The payload (or the whole message) could not be rendered as JSON.
    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid(message: impl fmt::Display) -> Self {
        Self::InvalidMessage {
            message: message.to_string(),
        }
    }
}

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Logical name an agent registers under. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentName(String);

impl AgentName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::invalid("agent name must not be empty"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AgentName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for AgentName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AgentName> for String {
    fn from(name: AgentName) -> Self {
        name.0
    }
}

impl AsRef<str> for AgentName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for AgentName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Opaque token linking a request to the replies derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ── Payload ──────────────────────────────────────────────────────────────────

/// Business content of a message: a string-keyed JSON mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Render any serializable value as a payload.
    ///
    /// Fails with [`Error::Serialization`] when the value has no faithful JSON
    /// form (a map with non-string keys, a NaN or infinite float) and with
    /// [`Error::PayloadNotObject`] when it is not a mapping.
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Self::try_from(to_json_value(value)?)
    }

    /// Builder-style insert. Fails under the same rules as
    /// [`from_serializable`](Self::from_serializable).
    pub fn with<T: Serialize + ?Sized>(mut self, key: impl Into<String>, value: &T) -> Result<Self> {
        self.0.insert(key.into(), to_json_value(value)?);
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Payload {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::PayloadNotObject {
                found: value_type_name(&other),
            }),
        }
    }
}

fn to_json_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    finite::ensure_finite(value)?;
    Ok(serde_json::to_value(value)?)
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Timestamps ───────────────────────────────────────────────────────────────

static LAST_TIMESTAMP_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Current UTC time in [`TIMESTAMP_FORMAT`], never earlier than a value
/// previously returned in this process.
pub fn now_timestamp() -> String {
    let now = Utc::now().timestamp_micros();
    let previous = LAST_TIMESTAMP_MICROS.fetch_max(now, Ordering::SeqCst);
    let micros = previous.max(now);
    DateTime::<Utc>::from_timestamp_micros(micros)
        .unwrap_or_else(Utc::now)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

// ── Message ──────────────────────────────────────────────────────────────────

/// One unit of inter-agent communication. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    sender: AgentName,
    recipient: AgentName,
    kind: String,
    payload: Payload,
    correlation_id: CorrelationId,
    timestamp: String,
}

impl Message {
    /// Build a message stamped with the current time.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        kind: impl Into<String>,
        payload: Payload,
        correlation_id: impl Into<CorrelationId>,
    ) -> Result<Self> {
        let kind = kind.into();
        if kind.trim().is_empty() {
            return Err(Error::invalid("message kind must not be empty"));
        }
        Ok(Self {
            sender: AgentName::new(sender)?,
            recipient: AgentName::new(recipient)?,
            kind,
            payload,
            correlation_id: correlation_id.into(),
            timestamp: now_timestamp(),
        })
    }

    /// Replace the generated timestamp. The value is kept as given.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Result<Self> {
        let timestamp = timestamp.into();
        if timestamp.is_empty() {
            return Err(Error::invalid("timestamp must not be empty"));
        }
        self.timestamp = timestamp;
        Ok(self)
    }

    /// Build the reply to this message: addressed from its recipient back to
    /// its sender, carrying the same correlation id.
    pub fn reply(&self, kind: impl Into<String>, payload: Payload) -> Result<Self> {
        Self::new(
            self.recipient.clone(),
            self.sender.clone(),
            kind,
            payload,
            self.correlation_id.clone(),
        )
    }

    pub fn sender(&self) -> &AgentName {
        &self.sender
    }

    pub fn recipient(&self) -> &AgentName {
        &self.recipient
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }

    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            from: self.sender.to_string(),
            to: self.recipient.to_string(),
            r#type: self.kind.clone(),
            payload: self.payload.clone(),
            correlation_id: self.correlation_id.to_string(),
            timestamp: self.timestamp.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_wire())?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let wire: WireMessage = serde_json::from_str(raw)?;
        Self::try_from(wire)
    }
}

// ── Wire shape ───────────────────────────────────────────────────────────────

/// Flat record used whenever a message crosses a process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub from: String,
    pub to: String,
    pub r#type: String,
    pub payload: Payload,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    pub timestamp: String,
}

impl TryFrom<WireMessage> for Message {
    type Error = Error;

    fn try_from(wire: WireMessage) -> Result<Self> {
        if wire.r#type.trim().is_empty() {
            return Err(Error::invalid("message kind must not be empty"));
        }
        if wire.timestamp.is_empty() {
            return Err(Error::invalid("timestamp must not be empty"));
        }
        Ok(Self {
            sender: AgentName::new(wire.from)?,
            recipient: AgentName::new(wire.to)?,
            kind: wire.r#type,
            payload: wire.payload,
            correlation_id: CorrelationId::new(wire.correlation_id),
            timestamp: wire.timestamp,
        })
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        message.to_wire()
    }
}
