use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    bridge::BridgeContext,
    config::ChannelType,
    widget::{SharedWidgetEvents, WidgetEvent, WidgetListener, events},
};

/// Participant announced by the widget once its conversation is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationParticipant {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionSource {
    SmartReply,
    AgentCoaching,
}

/// Work the widget hands back to the session controller.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetCommand {
    Bootstrap,
    ConversationInitialized {
        participants: Vec<ConversationParticipant>,
    },
    InsertSuggestion {
        source: SuggestionSource,
        text: String,
    },
    CopyToClipboard {
        text: String,
    },
    ConversationCompleted,
}

/// Widget listeners registered for one session.
///
/// Listeners only translate events into [`WidgetCommand`]s; the controller
/// task performs the effects.
pub struct WidgetBridge {
    target: SharedWidgetEvents,
    owner: String,
    active: bool,
}

impl WidgetBridge {
    pub fn activate(
        ctx: Arc<BridgeContext>,
        channel: ChannelType,
        commands: mpsc::UnboundedSender<WidgetCommand>,
    ) -> Self {
        let mut names = vec![
            events::API_CONNECTOR_INITIALIZED,
            events::CONVERSATION_INITIALIZED,
            events::SMART_REPLY_SELECTED,
            events::AGENT_COACHING_RESPONSE_SELECTED,
            events::COPY_TO_CLIPBOARD,
        ];
        let target = Arc::clone(&ctx.events);
        if channel == ChannelType::Voice {
            names.push(events::CONVERSATION_COMPLETED);
        }

        for name in names {
            let listener_ctx = Arc::clone(&ctx);
            let commands = commands.clone();
            let listener: WidgetListener = Arc::new(move |event: &WidgetEvent| {
                forward_event(&listener_ctx, &commands, event)
            });
            target.add_listener(&ctx.owner, ctx.namespace(), name, listener);
        }

        if ctx.debug {
            let record_id = ctx.record_id.clone();
            target.add_dragnet(
                &ctx.owner,
                ctx.namespace(),
                Arc::new(move |event: &WidgetEvent| {
                    debug!(
                        record_id = %record_id,
                        event = %event.name,
                        detail = %event.detail,
                        "widget event"
                    );
                }),
            );
        }

        debug!(
            record_id = %ctx.record_id,
            listeners = target.listener_count(ctx.namespace()),
            "widget bridge active"
        );
        Self {
            target,
            owner: ctx.owner.clone(),
            active: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Drops the session's registrations as a set; later calls remove nothing.
    pub fn discard(&mut self) -> usize {
        if !std::mem::take(&mut self.active) {
            return 0;
        }
        self.target.discard_owner(&self.owner)
    }
}

impl Drop for WidgetBridge {
    fn drop(&mut self) {
        self.discard();
    }
}

fn forward_event(
    ctx: &BridgeContext,
    commands: &mpsc::UnboundedSender<WidgetCommand>,
    event: &WidgetEvent,
) {
    if !ctx.gate.is_open() {
        counter!("assist_dropped_events_total", "reason" => "session_closed").increment(1);
        return;
    }
    let Some(command) = command_for(event) else {
        warn!(
            record_id = %ctx.record_id,
            event = %event.name,
            "widget event carried no usable payload"
        );
        return;
    };
    counter!(
        "assist_bridged_events_total",
        "source" => "widget",
        "event" => event.name.clone()
    )
    .increment(1);
    if commands.send(command).is_err() {
        debug!(record_id = %ctx.record_id, "session controller gone, widget event dropped");
    }
}

fn command_for(event: &WidgetEvent) -> Option<WidgetCommand> {
    match event.name.as_str() {
        events::API_CONNECTOR_INITIALIZED => Some(WidgetCommand::Bootstrap),
        events::CONVERSATION_INITIALIZED => {
            let participants = event
                .detail
                .get("participants")
                .cloned()
                .and_then(|value| serde_json::from_value(value).ok())
                .unwrap_or_default();
            Some(WidgetCommand::ConversationInitialized { participants })
        }
        events::SMART_REPLY_SELECTED => {
            suggestion_text(&event.detail).map(|text| WidgetCommand::InsertSuggestion {
                source: SuggestionSource::SmartReply,
                text,
            })
        }
        events::AGENT_COACHING_RESPONSE_SELECTED => {
            suggestion_text(&event.detail).map(|text| WidgetCommand::InsertSuggestion {
                source: SuggestionSource::AgentCoaching,
                text,
            })
        }
        events::COPY_TO_CLIPBOARD => first_string(&event.detail, &["/textToCopy", "/text"])
            .map(|text| WidgetCommand::CopyToClipboard { text }),
        events::CONVERSATION_COMPLETED => Some(WidgetCommand::ConversationCompleted),
        _ => None,
    }
}

fn suggestion_text(detail: &Value) -> Option<String> {
    first_string(
        detail,
        &["/answer/reply", "/selectedResponse", "/response", "/text"],
    )
}

fn first_string(detail: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|pointer| detail.pointer(pointer))
        .find_map(Value::as_str)
        .map(str::to_string)
}
