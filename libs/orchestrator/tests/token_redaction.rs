mod support;

use aab_orchestrator::{ChannelMessage, MessageChannel, SessionState, events, spawn_session};
use serde_json::json;
use support::{Harness, MockConnector, RECORD_ID, chat_config, eventually};

#[tokio::test]
#[tracing_test::traced_test]
async fn debug_session_never_logs_credentials() {
    let harness = Harness::new(MockConnector::with_token("SECRET_TOKEN_123"));
    let config = chat_config(RECORD_ID).with_debug(true);
    let session = spawn_session(config, harness.deps());
    assert_eq!(session.wait_settled().await, SessionState::Active);
    assert_eq!(harness.host.transcripts(), vec![RECORD_ID.to_string()]);

    harness.messages.publish(
        MessageChannel::EndUserMessage,
        &ChannelMessage::new(RECORD_ID, "hello"),
    );
    harness.messages.publish(
        MessageChannel::AgentSend,
        &ChannelMessage::new("001other", "elsewhere"),
    );
    harness.dispatch(events::COPY_TO_CLIPBOARD, RECORD_ID, json!({ "text": "copied" }));
    eventually(|| !harness.clipboard.writes().is_empty()).await;

    session.teardown();
    session.join().await.unwrap();

    logs_assert(|lines: &[&str]| {
        let acquired = lines
            .iter()
            .any(|line| line.contains("connector token acquired"));
        let dragnet = lines.iter().any(|line| line.contains("widget event"));
        let ignored = lines
            .iter()
            .any(|line| line.contains("ignoring message for another record"));
        let leaked = lines
            .iter()
            .any(|line| line.contains("SECRET_TOKEN_123") || line.contains("consumer-secret"));
        if !acquired {
            return Err(format!("expected token log, lines: {:?}", lines));
        }
        if !dragnet {
            return Err(format!("expected dragnet log, lines: {:?}", lines));
        }
        if !ignored {
            return Err(format!("expected record filter log, lines: {:?}", lines));
        }
        if leaked {
            return Err("credential leaked into logs".into());
        }
        Ok(())
    });
}
