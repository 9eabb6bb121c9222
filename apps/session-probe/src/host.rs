//! Terminal stand-ins for the widget host, agent desktop and clipboard.

use aab_orchestrator::{AgentDesktop, Clipboard, TranscriptEntry, WidgetConfig, WidgetHost};
use async_trait::async_trait;
use tracing::info;

pub struct StdoutWidgetHost;

impl WidgetHost for StdoutWidgetHost {
    fn activate(&self, config: &WidgetConfig) -> anyhow::Result<()> {
        println!("widget activated ({}):", config.channel());
        for line in config.to_string().lines() {
            println!("  {line}");
        }
        Ok(())
    }

    fn attach_transcript(&self, namespace: &str) -> anyhow::Result<()> {
        println!("transcript attached for namespace {namespace}");
        Ok(())
    }
}

/// Prints composer updates and serves a transcript loaded at startup.
pub struct TerminalDesktop {
    transcript: Vec<TranscriptEntry>,
}

impl TerminalDesktop {
    pub fn new(transcript: Vec<TranscriptEntry>) -> Self {
        Self { transcript }
    }
}

#[async_trait]
impl AgentDesktop for TerminalDesktop {
    async fn set_agent_input(&self, record_id: &str, text: &str) -> anyhow::Result<()> {
        info!(record_id, chars = text.chars().count(), "suggestion inserted");
        println!("[{record_id}] composer <- {text}");
        Ok(())
    }

    async fn conversation_log(&self, _record_id: &str) -> anyhow::Result<Vec<TranscriptEntry>> {
        Ok(self.transcript.clone())
    }
}

pub struct StdoutClipboard;

#[async_trait]
impl Clipboard for StdoutClipboard {
    async fn write_text(&self, text: &str) -> anyhow::Result<()> {
        println!("clipboard <- {text}");
        Ok(())
    }
}
