//! Agent desktop collaborators: the reply composer, the CRM transcript and
//! the system clipboard.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channels::ParticipantRole;

/// One line of the CRM conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub role: ParticipantRole,
    pub content: String,
}

impl TranscriptEntry {
    pub fn new(role: ParticipantRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait AgentDesktop: Send + Sync {
    /// Places `text` in the agent's reply composer for the record's conversation.
    async fn set_agent_input(&self, record_id: &str, text: &str) -> anyhow::Result<()>;

    /// Transcript recorded by the CRM, oldest first.
    async fn conversation_log(&self, record_id: &str) -> anyhow::Result<Vec<TranscriptEntry>>;
}

pub type SharedAgentDesktop = Arc<dyn AgentDesktop>;

#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn write_text(&self, text: &str) -> anyhow::Result<()>;
}

pub type SharedClipboard = Arc<dyn Clipboard>;
