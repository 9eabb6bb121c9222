use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info};

use crate::{
    bridge::{BridgeContext, analyze_content_event, summarization_event},
    channels::{
        ChannelHandler, ChannelMessage, MessageChannel, SharedMessageService, SubscriptionId,
        SubscriptionScope,
    },
};

/// Forwards CRM conversation traffic for one record into the widget.
pub struct MessagingBridge {
    service: SharedMessageService,
    subscriptions: Vec<SubscriptionId>,
}

impl MessagingBridge {
    /// Subscribes to all three conversation channels at application scope.
    pub fn activate(service: SharedMessageService, ctx: Arc<BridgeContext>) -> Self {
        let subscriptions = MessageChannel::ALL
            .into_iter()
            .map(|channel| {
                let ctx = Arc::clone(&ctx);
                let handler: ChannelHandler =
                    Arc::new(move |message: &ChannelMessage| handle_message(&ctx, channel, message));
                service.subscribe(channel, SubscriptionScope::Application, handler)
            })
            .collect::<Vec<_>>();
        info!(
            record_id = %ctx.record_id,
            subscriptions = subscriptions.len(),
            "messaging bridge active"
        );
        Self {
            service,
            subscriptions,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Releases every subscription; later calls release nothing.
    pub fn unsubscribe(&mut self) -> usize {
        let service = &self.service;
        self.subscriptions
            .drain(..)
            .filter(|id| service.unsubscribe(*id))
            .count()
    }
}

impl Drop for MessagingBridge {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn handle_message(ctx: &BridgeContext, channel: MessageChannel, message: &ChannelMessage) {
    if !ctx.gate.is_open() {
        counter!("assist_dropped_events_total", "reason" => "session_closed").increment(1);
        return;
    }
    if message.record_id != ctx.record_id {
        counter!("assist_dropped_events_total", "reason" => "record_mismatch").increment(1);
        if ctx.debug {
            debug!(
                record_id = %ctx.record_id,
                message_record_id = %message.record_id,
                channel = channel.api_name(),
                "ignoring message for another record"
            );
        }
        return;
    }

    let event = match channel.sender_role() {
        Some(role) => analyze_content_event(
            ctx.namespace(),
            ctx.conversation_id(),
            role,
            &message.content,
        ),
        None if ctx.features.summarization_enabled() => {
            summarization_event(ctx.namespace(), &ctx.conversation_name)
        }
        None => {
            debug!(record_id = %ctx.record_id, "conversation ended without summarization");
            return;
        }
    };

    if ctx.debug {
        debug!(
            record_id = %ctx.record_id,
            channel = channel.api_name(),
            event = %event.name,
            "bridging channel message"
        );
    }
    counter!(
        "assist_bridged_events_total",
        "source" => "messaging",
        "event" => event.name.clone()
    )
    .increment(1);
    ctx.dispatch(event);
}
