//! Data models for a single chat turn's conversation

use super::token_estimator::TokenEstimator;
use crate::surface::HistoryMessage;
use serde::{Deserialize, Serialize};

/// Placeholder written over message content trimmed to save tokens
pub const REDACTED_CONTENT: &str = "deleted to save token";

/// Fixed per-message overhead added by the chat format
const TOKENS_PER_MESSAGE: usize = 3;

/// Extra overhead when a message carries a `name`
const TOKENS_PER_NAME: usize = 1;

/// Every reply is primed with `<|start|>assistant<|message|>`
const REPLY_PRIMING_TOKENS: usize = 3;

/// Author role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Assistant,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Assistant => "assistant",
            Role::User => "user",
        }
    }
}

/// One message of a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    role: Role,
    content: String,
    name: Option<String>,
    ts: String,
}

impl Message {
    pub fn new(
        role: Role,
        content: impl Into<String>,
        name: Option<String>,
        ts: impl Into<String>,
    ) -> Self {
        Self {
            role,
            content: content.into(),
            name: name.filter(|n| !n.is_empty()),
            ts: ts.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Platform timestamp, used both as ordering key and message reference
    pub fn ts(&self) -> &str {
        &self.ts
    }

    /// Replace the content with [`REDACTED_CONTENT`]. There is no way back.
    pub fn redact(&mut self) {
        self.content = REDACTED_CONTENT.to_string();
    }

    pub fn is_redacted(&self) -> bool {
        self.content == REDACTED_CONTENT
    }
}

/// Wire form of a message in a chat-completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
}

/// Ordered messages plus an optional system directive
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    system: Option<String>,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            system: None,
            messages,
        }
    }

    /// Build a conversation from a thread's replies.
    ///
    /// Messages posted by `bot_user_id` become assistant turns, except the
    /// bot's own control-button posts which are skipped. Everyone else becomes
    /// a user turn tagged with their Slack mention so the model can tell
    /// speakers apart.
    pub fn from_history(replies: &[HistoryMessage], bot_user_id: &str) -> Self {
        let messages = replies
            .iter()
            .filter_map(|m| {
                if m.user == bot_user_id {
                    if m.is_controller {
                        return None;
                    }
                    Some(Message::new(
                        Role::Assistant,
                        m.text.clone(),
                        m.username.clone(),
                        m.ts.clone(),
                    ))
                } else {
                    let text = format!("{} (UserID: <@{}>)", m.text, m.user);
                    Some(Message::new(Role::User, text, m.username.clone(), m.ts.clone()))
                }
            })
            .collect();

        Self::new(messages)
    }

    /// Set the system directive; an empty string clears it
    pub fn set_system(&mut self, content: impl Into<String>) {
        let content = content.into();
        self.system = if content.is_empty() { None } else { Some(content) };
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut [Message] {
        &mut self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop the message with timestamp `ts` and everything after it.
    ///
    /// Used so a turn never sees its own placeholder or anything posted after
    /// it. Unknown timestamps leave the conversation untouched.
    pub fn truncate_at(&mut self, ts: &str) {
        if let Some(pos) = self.messages.iter().position(|m| m.ts == ts) {
            self.messages.truncate(pos);
        }
    }

    /// Approximate prompt size in tokens
    pub fn tokens(&self, estimator: &dyn TokenEstimator) -> usize {
        let mut total = 0;

        if let Some(system) = &self.system {
            total += TOKENS_PER_MESSAGE;
            total += estimator.estimate(system);
            total += estimator.estimate(Role::System.as_str());
        }

        for message in &self.messages {
            total += TOKENS_PER_MESSAGE;
            total += estimator.estimate(&message.content);
            total += estimator.estimate(message.role.as_str());
            if let Some(name) = &message.name {
                total += estimator.estimate(name);
                total += TOKENS_PER_NAME;
            }
        }

        total + REPLY_PRIMING_TOKENS
    }

    /// Payload for the completion API, system directive first
    pub fn to_chat_messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);

        if let Some(system) = &self.system {
            out.push(ChatMessage {
                role: Role::System,
                content: system.clone(),
                name: None,
            });
        }

        // Contents are user data; never log them here.
        out.extend(self.messages.iter().map(|m| ChatMessage {
            role: m.role,
            content: m.content.clone(),
            name: m.name.clone(),
        }));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::WordBasedEstimator;

    fn reply(user: &str, text: &str, ts: &str) -> HistoryMessage {
        HistoryMessage {
            user: user.to_string(),
            username: None,
            text: text.to_string(),
            ts: ts.to_string(),
            is_controller: false,
        }
    }

    #[test]
    fn test_from_history_maps_roles() {
        let replies = vec![
            reply("U1", "hello bot", "1.0"),
            reply("UBOT", "hello human", "2.0"),
        ];
        let conv = Conversation::from_history(&replies, "UBOT");

        assert_eq!(conv.len(), 2);
        assert_eq!(conv.messages()[0].role(), Role::User);
        assert_eq!(conv.messages()[0].content(), "hello bot (UserID: <@U1>)");
        assert_eq!(conv.messages()[1].role(), Role::Assistant);
        assert_eq!(conv.messages()[1].content(), "hello human");
    }

    #[test]
    fn test_from_history_skips_controller_posts() {
        let mut controller = reply("UBOT", "", "2.5");
        controller.is_controller = true;
        let replies = vec![reply("U1", "hi", "1.0"), controller, reply("UBOT", "answer", "3.0")];

        let conv = Conversation::from_history(&replies, "UBOT");
        assert_eq!(conv.len(), 2);
        assert!(conv.messages().iter().all(|m| m.ts() != "2.5"));
    }

    #[test]
    fn test_truncate_at_removes_suffix() {
        let replies = vec![
            reply("U1", "a", "1.0"),
            reply("U1", "b", "2.0"),
            reply("UBOT", "...", "3.0"),
            reply("U1", "c", "4.0"),
        ];
        let mut conv = Conversation::from_history(&replies, "UBOT");
        conv.truncate_at("3.0");

        let ts: Vec<_> = conv.messages().iter().map(|m| m.ts()).collect();
        assert_eq!(ts, vec!["1.0", "2.0"]);
    }

    #[test]
    fn test_truncate_at_unknown_ts_is_noop() {
        let mut conv = Conversation::from_history(&[reply("U1", "a", "1.0")], "UBOT");
        conv.truncate_at("9.9");
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn test_system_directive_is_sent_first() {
        let mut conv = Conversation::from_history(&[reply("U1", "hi", "1.0")], "UBOT");
        conv.set_system("be brief");

        let payload = conv.to_chat_messages();
        assert_eq!(payload.len(), 2);
        assert_eq!(payload[0].role, Role::System);
        assert_eq!(payload[0].content, "be brief");
        assert_eq!(payload[1].role, Role::User);
    }

    #[test]
    fn test_empty_name_is_dropped() {
        let message = Message::new(Role::User, "x", Some(String::new()), "1.0");
        assert_eq!(message.name(), None);

        let json = serde_json::to_value(ChatMessage {
            role: Role::User,
            content: "x".into(),
            name: None,
        })
        .unwrap();
        assert!(json.get("name").is_none());
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn test_token_count_overheads() {
        let estimator = WordBasedEstimator::new(1.0);
        let mut conv = Conversation::new(vec![
            Message::new(Role::User, "one two", None, "1.0"),
            Message::new(Role::Assistant, "three", Some("bot".into()), "2.0"),
        ]);

        // (3 + 2 + 1) + (3 + 1 + 1 + 1 + 1) + 3
        assert_eq!(conv.tokens(&estimator), 16);

        conv.set_system("be nice");
        // + 3 + 2 + 1
        assert_eq!(conv.tokens(&estimator), 22);
    }

    #[test]
    fn test_redact_is_one_way() {
        let mut message = Message::new(Role::User, "secret", None, "1.0");
        message.redact();
        assert!(message.is_redacted());
        assert_eq!(message.content(), REDACTED_CONTENT);
    }
}
