//! Chat log reconciliation: replays CRM transcript lines the backend has not
//! seen yet, so suggestions account for messages sent before the widget loaded.

use metrics::counter;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    bridge::{BridgeContext, analyze_content_event},
    connector::{ConnectorError, ConnectorMessage, SharedConnector},
    desktop::{SharedAgentDesktop, TranscriptEntry},
    token::AuthToken,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    pub transcript: usize,
    pub known: usize,
    pub replayed: usize,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("conversation log unavailable from the agent desktop")]
    Transcript(#[source] anyhow::Error),
    #[error("conversation messages unavailable from the connector")]
    Backend(#[from] ConnectorError),
}

pub async fn reconcile_conversation_log(
    ctx: &BridgeContext,
    desktop: &SharedAgentDesktop,
    connector: &SharedConnector,
    token: &AuthToken,
) -> Result<ReconcileOutcome, ReconcileError> {
    let transcript = desktop
        .conversation_log(&ctx.record_id)
        .await
        .map_err(ReconcileError::Transcript)?;
    let known = connector
        .list_messages(token, &ctx.conversation_name)
        .await?;

    let missing = missing_tail(&transcript, &known);
    let mut replayed = 0;
    for entry in missing {
        if !ctx.gate.is_open() {
            debug!(record_id = %ctx.record_id, "session closed during reconciliation");
            break;
        }
        ctx.dispatch(analyze_content_event(
            ctx.namespace(),
            ctx.conversation_id(),
            entry.role,
            &entry.content,
        ));
        replayed += 1;
    }

    counter!("assist_reconciled_messages_total").increment(replayed as u64);
    info!(
        record_id = %ctx.record_id,
        transcript = transcript.len(),
        known = known.len(),
        replayed,
        "conversation log reconciled"
    );
    Ok(ReconcileOutcome {
        transcript: transcript.len(),
        known: known.len(),
        replayed,
    })
}

/// Transcript entries after the longest prefix already recorded by the backend.
fn missing_tail<'a>(transcript: &'a [TranscriptEntry], known: &[ConnectorMessage]) -> &'a [TranscriptEntry] {
    let matched = transcript
        .iter()
        .zip(known)
        .take_while(|(entry, message)| entry.content.trim() == message.content.trim())
        .count();
    &transcript[matched..]
}
