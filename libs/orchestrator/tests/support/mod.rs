#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use aab_orchestrator::{
    AgentDesktop, AuthToken, ChannelType, Clipboard, ConnectorError, ConnectorMessage,
    ConversationName, Credentials, LocalMessageService, SessionConfig, SessionDeps,
    SharedWidgetEvents, TranscriptEntry, UiConnector, WidgetConfig, WidgetEvent,
    WidgetEventTarget, WidgetHost, config::PollSettings,
};
use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::time::Instant;
use url::Url;

pub const RECORD_ID: &str = "001xyz";
pub const PROFILE: &str = "projects/p1/locations/us/conversationProfiles/cp1";
pub const PHONE: &str = "+1 (555) 010-2000";
pub const PHONE_DIGITS: &str = "15550102000";

pub fn chat_config(record_id: &str) -> SessionConfig {
    SessionConfig::new(
        record_id,
        ChannelType::Chat,
        Url::parse("https://connector.example.com").unwrap(),
        PROFILE,
        Credentials::new("consumer-key", "consumer-secret"),
    )
    .with_features("SMART_REPLY,CONVERSATION_SUMMARIZATION")
}

pub fn voice_config() -> SessionConfig {
    SessionConfig::new(
        RECORD_ID,
        ChannelType::Voice,
        Url::parse("https://connector.example.com").unwrap(),
        PROFILE,
        Credentials::new("consumer-key", "consumer-secret"),
    )
    .with_features("AGENT_COACHING,CONVERSATION_SUMMARIZATION")
    .with_contact_phone(PHONE)
    .with_notifier_endpoint(Url::parse("https://notifier.example.com").unwrap())
    .with_poll(PollSettings {
        interval: Duration::from_secs(5),
        max_retries: None,
    })
}

#[derive(Default)]
struct ConnectorState {
    register_calls: u32,
    lookups: VecDeque<Result<Option<String>, StatusCode>>,
    lookup_log: Vec<(String, Instant)>,
    released: Vec<String>,
    bound: Vec<(String, String)>,
    list_calls: u32,
}

/// In-memory connector that records every call.
pub struct MockConnector {
    token: Result<String, StatusCode>,
    messages: Vec<ConnectorMessage>,
    lookup_delay: Option<Duration>,
    state: Mutex<ConnectorState>,
}

impl MockConnector {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Ok(token.to_string()),
            messages: Vec::new(),
            lookup_delay: None,
            state: Mutex::new(ConnectorState::default()),
        }
    }

    pub fn rejecting(status: StatusCode) -> Self {
        Self {
            token: Err(status),
            ..Self::with_token("")
        }
    }

    /// Lookup responses in order; once exhausted every lookup is empty.
    pub fn with_lookups<I>(self, lookups: I) -> Self
    where
        I: IntoIterator<Item = Option<&'static str>>,
    {
        self.with_lookup_results(lookups.into_iter().map(Ok))
    }

    /// Like `with_lookups`, with `Err(status)` entries answered as remote failures.
    pub fn with_lookup_results<I>(self, lookups: I) -> Self
    where
        I: IntoIterator<Item = Result<Option<&'static str>, StatusCode>>,
    {
        self.state.lock().unwrap().lookups = lookups
            .into_iter()
            .map(|result| result.map(|name| name.map(str::to_string)))
            .collect();
        self
    }

    /// Every lookup takes `delay` before answering.
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = Some(delay);
        self
    }

    pub fn with_messages(mut self, contents: &[&str]) -> Self {
        self.messages = contents
            .iter()
            .map(|content| ConnectorMessage {
                content: content.to_string(),
                participant_role: None,
            })
            .collect();
        self
    }

    pub fn register_calls(&self) -> u32 {
        self.state.lock().unwrap().register_calls
    }

    pub fn lookup_calls(&self) -> usize {
        self.state.lock().unwrap().lookup_log.len()
    }

    pub fn lookup_log(&self) -> Vec<(String, Instant)> {
        self.state.lock().unwrap().lookup_log.clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.state.lock().unwrap().released.clone()
    }

    pub fn list_calls(&self) -> u32 {
        self.state.lock().unwrap().list_calls
    }
}

#[async_trait]
impl UiConnector for MockConnector {
    async fn register(&self, _credentials: &Credentials) -> Result<AuthToken, ConnectorError> {
        self.state.lock().unwrap().register_calls += 1;
        match &self.token {
            Ok(token) => Ok(AuthToken::new(token.clone())),
            Err(status) => Err(ConnectorError::Remote {
                status: *status,
                message: "invalid_client".into(),
            }),
        }
    }

    async fn lookup_conversation_name(
        &self,
        _token: &AuthToken,
        phone: &str,
    ) -> Result<Option<ConversationName>, ConnectorError> {
        self.state
            .lock()
            .unwrap()
            .lookup_log
            .push((phone.to_string(), Instant::now()));
        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .state
            .lock()
            .unwrap()
            .lookups
            .pop_front()
            .unwrap_or(Ok(None));
        match next {
            Ok(name) => Ok(name.map(|raw| ConversationName::parse(&raw).unwrap())),
            Err(status) => Err(ConnectorError::Remote {
                status,
                message: "lookup unavailable".into(),
            }),
        }
    }

    async fn release_conversation_name(
        &self,
        _token: &AuthToken,
        phone: &str,
    ) -> Result<(), ConnectorError> {
        self.state.lock().unwrap().released.push(phone.to_string());
        Ok(())
    }

    async fn bind_conversation_name(
        &self,
        _token: &AuthToken,
        phone: &str,
        name: &ConversationName,
    ) -> Result<(), ConnectorError> {
        self.state
            .lock()
            .unwrap()
            .bound
            .push((phone.to_string(), name.to_string()));
        Ok(())
    }

    async fn list_messages(
        &self,
        _token: &AuthToken,
        _name: &ConversationName,
    ) -> Result<Vec<ConnectorMessage>, ConnectorError> {
        self.state.lock().unwrap().list_calls += 1;
        Ok(self.messages.clone())
    }
}

#[derive(Default)]
pub struct RecordingWidgetHost {
    fail: bool,
    activations: Mutex<Vec<WidgetConfig>>,
    transcripts: Mutex<Vec<String>>,
}

impl RecordingWidgetHost {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn activations(&self) -> Vec<WidgetConfig> {
        self.activations.lock().unwrap().clone()
    }

    pub fn transcripts(&self) -> Vec<String> {
        self.transcripts.lock().unwrap().clone()
    }
}

impl WidgetHost for RecordingWidgetHost {
    fn activate(&self, config: &WidgetConfig) -> anyhow::Result<()> {
        if self.fail {
            return Err(anyhow!("bundle failed to load"));
        }
        self.activations.lock().unwrap().push(config.clone());
        Ok(())
    }

    fn attach_transcript(&self, namespace: &str) -> anyhow::Result<()> {
        self.transcripts.lock().unwrap().push(namespace.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDesktop {
    log: Vec<TranscriptEntry>,
    inputs: Mutex<Vec<(String, String)>>,
}

impl RecordingDesktop {
    pub fn with_log(log: Vec<TranscriptEntry>) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn inputs(&self) -> Vec<(String, String)> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentDesktop for RecordingDesktop {
    async fn set_agent_input(&self, record_id: &str, text: &str) -> anyhow::Result<()> {
        self.inputs
            .lock()
            .unwrap()
            .push((record_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn conversation_log(&self, _record_id: &str) -> anyhow::Result<Vec<TranscriptEntry>> {
        Ok(self.log.clone())
    }
}

#[derive(Default)]
pub struct RecordingClipboard {
    writes: Mutex<Vec<String>>,
}

impl RecordingClipboard {
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clipboard for RecordingClipboard {
    async fn write_text(&self, text: &str) -> anyhow::Result<()> {
        self.writes.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Collects every widget event dispatched in a namespace.
pub struct EventObserver {
    seen: Arc<Mutex<Vec<WidgetEvent>>>,
}

impl EventObserver {
    pub fn attach(events: &WidgetEventTarget, namespace: &str) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        events.add_dragnet(
            &format!("observer-{namespace}"),
            namespace,
            Arc::new(move |event: &WidgetEvent| sink.lock().unwrap().push(event.clone())),
        );
        Self { seen }
    }

    pub fn events(&self) -> Vec<WidgetEvent> {
        self.seen.lock().unwrap().clone()
    }

    pub fn named(&self, name: &str) -> Vec<WidgetEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.name == name)
            .collect()
    }
}

pub struct Harness {
    pub connector: Arc<MockConnector>,
    pub messages: Arc<LocalMessageService>,
    pub events: SharedWidgetEvents,
    pub host: Arc<RecordingWidgetHost>,
    pub desktop: Arc<RecordingDesktop>,
    pub clipboard: Arc<RecordingClipboard>,
}

impl Harness {
    pub fn new(connector: MockConnector) -> Self {
        Self {
            connector: Arc::new(connector),
            messages: LocalMessageService::shared(),
            events: WidgetEventTarget::shared(),
            host: Arc::new(RecordingWidgetHost::default()),
            desktop: Arc::new(RecordingDesktop::default()),
            clipboard: Arc::new(RecordingClipboard::default()),
        }
    }

    pub fn with_host(mut self, host: RecordingWidgetHost) -> Self {
        self.host = Arc::new(host);
        self
    }

    pub fn with_desktop(mut self, desktop: RecordingDesktop) -> Self {
        self.desktop = Arc::new(desktop);
        self
    }

    pub fn deps(&self) -> SessionDeps {
        SessionDeps {
            connector: self.connector.clone(),
            messages: self.messages.clone(),
            widget_events: Arc::clone(&self.events),
            widget_host: self.host.clone(),
            desktop: self.desktop.clone(),
            clipboard: self.clipboard.clone(),
        }
    }

    pub fn dispatch(&self, name: &str, namespace: &str, detail: serde_json::Value) -> usize {
        self.events
            .dispatch(&WidgetEvent::new(name, namespace, detail))
    }
}

/// Yields to the session task until `condition` holds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
