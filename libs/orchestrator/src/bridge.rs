//! State shared by the messaging and widget bridges of one session.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde_json::json;

use crate::{
    channels::ParticipantRole,
    config::FeatureSet,
    identity::ConversationName,
    widget::{SharedWidgetEvents, WidgetEvent, events},
};

/// Language code sent with every analyze-content request.
pub const ANALYZE_LANGUAGE_CODE: &str = "us";

/// Session validity flag checked by every bridge handler before it acts.
///
/// Closing the gate makes late deliveries inert even when the underlying
/// subscription has not been released yet.
#[derive(Debug, Clone, Default)]
pub struct SessionGate(Arc<AtomicBool>);

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct BridgeContext {
    pub record_id: String,
    pub conversation_name: ConversationName,
    pub features: FeatureSet,
    pub debug: bool,
    pub gate: SessionGate,
    pub events: SharedWidgetEvents,
    /// Registry owner under which the session's widget listeners live.
    pub owner: String,
}

impl BridgeContext {
    pub fn conversation_id(&self) -> &str {
        self.conversation_name.conversation_id()
    }

    pub fn namespace(&self) -> &str {
        &self.record_id
    }

    pub fn dispatch(&self, event: WidgetEvent) -> usize {
        self.events.dispatch(&event)
    }
}

pub fn analyze_content_event(
    namespace: &str,
    conversation_id: &str,
    role: ParticipantRole,
    text: &str,
) -> WidgetEvent {
    WidgetEvent::new(
        events::ANALYZE_CONTENT_REQUESTED,
        namespace,
        json!({
            "conversationId": conversation_id,
            "participantRole": role.as_str(),
            "request": {
                "textInput": {
                    "text": text,
                    "languageCode": ANALYZE_LANGUAGE_CODE,
                }
            }
        }),
    )
}

pub fn summarization_event(namespace: &str, name: &ConversationName) -> WidgetEvent {
    WidgetEvent::new(
        events::CONVERSATION_SUMMARIZATION_REQUESTED,
        namespace,
        json!({ "conversationName": name.to_string() }),
    )
}

/// Bootstrap request; the namespace doubles as the CRM record id.
pub fn initialization_event(namespace: &str, name: &ConversationName) -> WidgetEvent {
    WidgetEvent::new(
        events::CONVERSATION_INITIALIZATION_REQUESTED,
        namespace,
        json!({
            "conversationName": name.to_string(),
            "recordId": namespace,
        }),
    )
}
