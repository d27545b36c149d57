use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::platform::{ChatMessage, Mention};

/// `header.event_type` of a received message in the v2 event schema
pub const MESSAGE_RECEIVE_V2: &str = "im.message.receive_v1";
/// `event.type` of a received message in the v1 event schema
pub const MESSAGE_V1: &str = "message";

/// What an inbound webhook payload asks of us
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// URL verification; the value must be echoed back verbatim
    Handshake(Value),
    MessageReceived,
    /// Anything else, with its event type tag when there is one
    Other(Option<String>),
}

impl EventKind {
    /// Classify a decoded payload. The challenge is checked first because
    /// verification payloads carry no `event` at all.
    pub fn classify(payload: &Value) -> Self {
        if let Some(challenge) = payload.get("challenge") {
            return EventKind::Handshake(challenge.clone());
        }

        let header_type = payload
            .get("header")
            .and_then(|h| h.get("event_type"))
            .and_then(Value::as_str);
        let event_type = payload
            .get("event")
            .and_then(|e| e.get("type"))
            .and_then(Value::as_str);

        if header_type == Some(MESSAGE_RECEIVE_V2) || event_type == Some(MESSAGE_V1) {
            return EventKind::MessageReceived;
        }
        EventKind::Other(header_type.or(event_type).map(str::to_owned))
    }
}

// ── Envelope shapes (every field optional so partial payloads decode) ────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EventEnvelope {
    /// Decoded on its own so a malformed body cannot take the v1 fields with it
    message: Option<Value>,
    // v1 schema keeps everything flat on the event
    #[serde(deserialize_with = "lenient_id")]
    open_chat_id: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    open_message_id: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    chat_type: Option<String>,
    text: Option<Value>,
    text_without_at_bot: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MessageBody {
    #[serde(deserialize_with = "lenient_id")]
    message_id: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    chat_id: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    chat_type: Option<String>,
    /// JSON document encoded as a string
    content: Option<Value>,
    mentions: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TextContent {
    text: Option<Value>,
    mentions: Option<Value>,
}

/// Non-string and empty values read as absent instead of failing the struct.
pub(crate) fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_owned))
}

/// Non-string values read as an empty string.
pub(crate) fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().unwrap_or_default().to_owned())
}

/// Accepts either a bare id string or the platform's `{open_id, union_id, user_id}` object.
pub(crate) fn mention_open_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(id) => Some(id),
        Value::Object(map) => map
            .get("open_id")
            .and_then(Value::as_str)
            .map(str::to_owned),
        _ => None,
    }
    .filter(|id| !id.is_empty()))
}

/// Malformed entries are dropped instead of failing the whole list.
fn parse_mentions(value: Option<&Value>) -> Vec<Mention> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_content(content: Option<&Value>) -> TextContent {
    let Some(raw) = content.and_then(Value::as_str) else {
        return TextContent::default();
    };
    match serde_json::from_str::<TextContent>(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Unparseable message content, treating as empty: {}", e);
            TextContent::default()
        }
    }
}

fn as_text(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str)
}

/// Normalize the `event` object of a message delivery. Never fails: missing
/// or malformed pieces come back as `None`, empty text or no mentions.
pub fn extract_message(event: &Value) -> ChatMessage {
    let envelope: EventEnvelope = match serde_json::from_value(event.clone()) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Unexpected event shape, using defaults: {}", e);
            EventEnvelope::default()
        }
    };

    match envelope.message {
        Some(body) => {
            let message: MessageBody = serde_json::from_value(body).unwrap_or_default();
            let content = parse_content(message.content.as_ref());
            let mut mentions = parse_mentions(content.mentions.as_ref());
            if mentions.is_empty() {
                mentions = parse_mentions(message.mentions.as_ref());
            }
            ChatMessage {
                message_id: message.message_id,
                chat_id: message.chat_id,
                chat_type: message.chat_type,
                text: as_text(content.text.as_ref())
                    .unwrap_or_default()
                    .to_lowercase(),
                mentions,
            }
        }
        None => {
            let text = as_text(envelope.text_without_at_bot.as_ref())
                .or_else(|| as_text(envelope.text.as_ref()))
                .unwrap_or_default()
                .to_lowercase();
            ChatMessage {
                message_id: envelope.open_message_id,
                chat_id: envelope.open_chat_id,
                chat_type: envelope.chat_type,
                text,
                mentions: Vec::new(),
            }
        }
    }
}
