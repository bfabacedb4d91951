// Wire protocol between chat clients and the broker
//
// Frames are newline-delimited JSON over TCP. Requests carry a correlation
// id and a client-chosen channel number; deliveries are unsolicited and
// reference the channel that registered the consumer. Message payloads are
// opaque bytes and travel base64-encoded.

use serde::{Deserialize, Serialize};

/// Frames sent by a client to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// An operation request; the broker answers with a `Response` carrying
    /// the same `id`.
    Request { id: u64, channel: u64, op: BrokerOp },
    /// Release a channel: every consumer registered under it is cancelled.
    CloseChannel { channel: u64 },
}

/// Broker operations a channel can perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BrokerOp {
    /// Idempotent queue declaration.
    DeclareQueue { name: String, durable: bool },
    /// Existence check; never creates the queue.
    DeclareQueuePassive { name: String },
    DeclareExchange { name: String, kind: ExchangeKind },
    /// Existence check; never creates the exchange.
    DeclareExchangePassive { name: String },
    /// Deleting an exchange drops its bindings implicitly.
    DeleteExchange { name: String },
    Bind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    Unbind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    Publish {
        exchange: String,
        routing_key: String,
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },
    /// Attach a consumer for `queue` on the requesting channel.
    Consume { queue: String },
}

/// Exchange routing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Copy to queues whose binding key equals the routing key.
    Direct,
    /// Copy to every bound queue regardless of routing key.
    Fanout,
}

/// Frames sent by the broker to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Response { id: u64, outcome: OpOutcome },
    Deliver {
        channel: u64,
        queue: String,
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },
}

/// Result of a broker operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OpOutcome {
    Ok,
    /// The named resource does not exist (passive declares, consume,
    /// publish to an unknown exchange).
    NotFound,
    Failed { reason: String },
}

impl ClientFrame {
    /// Serialize to newline-terminated JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl ServerFrame {
    /// Serialize to newline-terminated JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
