use tracing::{Span, info_span};

use crate::config::SessionConfig;

/// Span wrapping everything a session does; `state` is recorded as it changes.
pub fn span_for_session(session_id: &str, config: &SessionConfig) -> Span {
    info_span!(
        "assist_session",
        session_id = %session_id,
        record_id = %config.record_id,
        channel = %config.channel,
        debug = config.debug,
        state = tracing::field::Empty,
    )
}

pub fn record_state(span: &Span, state: &str) {
    span.record("state", tracing::field::display(state));
}
