//! CRM pub/sub messaging channels.
//!
//! The host's message service is abstracted by [`MessageService`]; the crate
//! ships [`LocalMessageService`], an in-process bus used by hosts without a
//! native message service and by tests.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// The three conversation channels published by the agent desktop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageChannel {
    AgentSend,
    EndUserMessage,
    ConversationEnded,
}

impl MessageChannel {
    pub const ALL: [MessageChannel; 3] = [
        MessageChannel::AgentSend,
        MessageChannel::EndUserMessage,
        MessageChannel::ConversationEnded,
    ];

    pub fn api_name(&self) -> &'static str {
        match self {
            MessageChannel::AgentSend => "lightning__conversationAgentSend",
            MessageChannel::EndUserMessage => "lightning__conversationEndUserMessage",
            MessageChannel::ConversationEnded => "lightning__conversationEnded",
        }
    }

    /// Role of the participant who produced messages on this channel.
    pub fn sender_role(&self) -> Option<ParticipantRole> {
        match self {
            MessageChannel::AgentSend => Some(ParticipantRole::HumanAgent),
            MessageChannel::EndUserMessage => Some(ParticipantRole::EndUser),
            MessageChannel::ConversationEnded => None,
        }
    }
}

impl fmt::Display for MessageChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    HumanAgent,
    EndUser,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::HumanAgent => "HUMAN_AGENT",
            ParticipantRole::EndUser => "END_USER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionScope {
    #[default]
    Application,
    Active,
}

/// Payload carried on a conversation channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub record_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChannelMessage {
    pub fn new(record_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            content: content.into(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub type ChannelHandler = Arc<dyn Fn(&ChannelMessage) + Send + Sync>;

pub trait MessageService: Send + Sync {
    fn subscribe(
        &self,
        channel: MessageChannel,
        scope: SubscriptionScope,
        handler: ChannelHandler,
    ) -> SubscriptionId;

    /// Returns `false` when the subscription was already released.
    fn unsubscribe(&self, subscription: SubscriptionId) -> bool;
}

pub type SharedMessageService = Arc<dyn MessageService>;

struct Subscription {
    channel: MessageChannel,
    handler: ChannelHandler,
}

#[derive(Default)]
pub struct LocalMessageService {
    next_id: AtomicU64,
    subscriptions: DashMap<SubscriptionId, Subscription>,
}

impl LocalMessageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Delivers the message to every current subscriber of `channel`.
    pub fn publish(&self, channel: MessageChannel, message: &ChannelMessage) -> usize {
        let mut handlers: Vec<(SubscriptionId, ChannelHandler)> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().channel == channel)
            .map(|entry| (*entry.key(), Arc::clone(&entry.value().handler)))
            .collect();
        handlers.sort_by_key(|(id, _)| *id);
        debug!(
            channel = channel.api_name(),
            subscribers = handlers.len(),
            "publishing channel message"
        );
        for (_, handler) in &handlers {
            handler(message);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self, channel: MessageChannel) -> usize {
        self.subscriptions
            .iter()
            .filter(|entry| entry.value().channel == channel)
            .count()
    }
}

impl MessageService for LocalMessageService {
    fn subscribe(
        &self,
        channel: MessageChannel,
        _scope: SubscriptionScope,
        handler: ChannelHandler,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .insert(id, Subscription { channel, handler });
        id
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.subscriptions.remove(&subscription).is_some()
    }
}
