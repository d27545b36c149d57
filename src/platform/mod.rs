pub mod lark;

use serde::Deserialize;

/// A chat message normalized from a webhook envelope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatMessage {
    pub message_id: Option<String>,
    /// Platform chat id; without it no reply can be sent
    pub chat_id: Option<String>,
    /// "group" or "p2p" when the platform reports it
    pub chat_type: Option<String>,
    /// Lower-cased plain text, empty when absent or unparseable
    pub text: String,
    pub mentions: Vec<Mention>,
}

/// A structured @-reference embedded in a message
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Mention {
    /// Placeholder inlined in the text, e.g. `@_user_1`
    #[serde(deserialize_with = "lark::lenient_text")]
    pub key: String,
    #[serde(deserialize_with = "lark::lenient_text")]
    pub name: String,
    #[serde(deserialize_with = "lark::mention_open_id")]
    #[serde(rename = "id")]
    pub open_id: Option<String>,
}

impl ChatMessage {
    /// Chat to answer in; empty ids count as absent
    pub fn reply_target(&self) -> Option<&str> {
        self.chat_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn contains_keyword(&self, keyword: &str) -> bool {
        self.text.contains(keyword)
    }

    pub fn mentions_open_id(&self, open_id: &str) -> bool {
        self.mentions
            .iter()
            .any(|m| m.open_id.as_deref() == Some(open_id))
    }
}
