//! Widget side of the bridge: named events, the listener registry and the
//! one-shot activation attributes.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::{
    config::{ChannelType, SessionConfig},
    identity::ConversationName,
    token::AuthToken,
};

/// Event names exchanged with the widget bundle.
pub mod events {
    pub const API_CONNECTOR_INITIALIZED: &str = "api-connector-initialized";
    pub const CONVERSATION_INITIALIZED: &str = "conversation-initialized";
    pub const SMART_REPLY_SELECTED: &str = "smart-reply-selected";
    pub const AGENT_COACHING_RESPONSE_SELECTED: &str = "agent-coaching-response-selected";
    pub const COPY_TO_CLIPBOARD: &str = "copy-to-clipboard";
    pub const CONVERSATION_COMPLETED: &str = "conversation-completed";

    pub const ANALYZE_CONTENT_REQUESTED: &str = "analyze-content-requested";
    pub const CONVERSATION_SUMMARIZATION_REQUESTED: &str = "conversation-summarization-requested";
    pub const CONVERSATION_INITIALIZATION_REQUESTED: &str =
        "conversation-initialization-requested";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetEvent {
    pub name: String,
    pub namespace: String,
    pub detail: Value,
}

impl WidgetEvent {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, detail: Value) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            detail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type WidgetListener = Arc<dyn Fn(&WidgetEvent) + Send + Sync>;

enum EventFilter {
    Named(String),
    Any,
}

struct Registration {
    id: ListenerId,
    namespace: String,
    filter: EventFilter,
    listener: WidgetListener,
}

impl Registration {
    fn matches(&self, event: &WidgetEvent) -> bool {
        self.namespace == event.namespace
            && match &self.filter {
                EventFilter::Named(name) => *name == event.name,
                EventFilter::Any => true,
            }
    }
}

/// Process-wide widget event target.
///
/// Listeners are grouped by owner (one owner per session), so a session's
/// registrations are dropped together with [`WidgetEventTarget::discard_owner`].
/// Delivery is filtered by namespace.
#[derive(Default)]
pub struct WidgetEventTarget {
    next_id: AtomicU64,
    owners: DashMap<String, Vec<Registration>>,
}

pub type SharedWidgetEvents = Arc<WidgetEventTarget>;

impl WidgetEventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedWidgetEvents {
        Arc::new(Self::new())
    }

    pub fn add_listener(
        &self,
        owner: &str,
        namespace: &str,
        name: &str,
        listener: WidgetListener,
    ) -> ListenerId {
        self.register(owner, namespace, EventFilter::Named(name.to_string()), listener)
    }

    /// Registers a listener for every event in the namespace.
    pub fn add_dragnet(&self, owner: &str, namespace: &str, listener: WidgetListener) -> ListenerId {
        self.register(owner, namespace, EventFilter::Any, listener)
    }

    fn register(
        &self,
        owner: &str,
        namespace: &str,
        filter: EventFilter,
        listener: WidgetListener,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.owners
            .entry(owner.to_string())
            .or_default()
            .push(Registration {
                id,
                namespace: namespace.to_string(),
                filter,
                listener,
            });
        id
    }

    /// Invokes every matching listener and returns how many ran.
    pub fn dispatch(&self, event: &WidgetEvent) -> usize {
        let mut matched: Vec<(ListenerId, WidgetListener)> = self
            .owners
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|registration| registration.matches(event))
                    .map(|registration| (registration.id, Arc::clone(&registration.listener)))
                    .collect::<Vec<_>>()
            })
            .collect();
        matched.sort_by_key(|(id, _)| id.0);
        for (_, listener) in &matched {
            listener(event);
        }
        matched.len()
    }

    pub fn remove_listener(&self, owner: &str, id: ListenerId) -> bool {
        let Some(mut registrations) = self.owners.get_mut(owner) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|registration| registration.id != id);
        before != registrations.len()
    }

    /// Drops every registration made by `owner`; returns how many were removed.
    pub fn discard_owner(&self, owner: &str) -> usize {
        self.owners
            .remove(owner)
            .map(|(_, registrations)| registrations.len())
            .unwrap_or(0)
    }

    pub fn listener_count(&self, namespace: &str) -> usize {
        self.owners
            .iter()
            .map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|registration| registration.namespace == namespace)
                    .count()
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportLibrary {
    SocketIo,
}

impl TransportLibrary {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportLibrary::SocketIo => "SocketIo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipboardMode {
    /// The widget emits `copy-to-clipboard` instead of writing itself.
    #[default]
    EventOnly,
    Native,
}

impl ClipboardMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipboardMode::EventOnly => "EVENT_ONLY",
            ClipboardMode::Native => "NATIVE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelTransport {
    Chat,
    Voice {
        notifier_endpoint: Url,
        library: TransportLibrary,
    },
}

/// Attribute set written to the widget element once, at activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetConfig {
    pub features: String,
    pub namespace: String,
    pub conversation_profile: String,
    pub endpoint: Url,
    pub agent_desktop: String,
    pub auth_token: AuthToken,
    pub conversation_name: ConversationName,
    pub clipboard_mode: ClipboardMode,
    pub transport: ChannelTransport,
}

pub const AGENT_DESKTOP: &str = "Custom";

impl WidgetConfig {
    pub fn build(config: &SessionConfig, name: &ConversationName, token: AuthToken) -> Self {
        let transport = match config.channel {
            ChannelType::Chat => ChannelTransport::Chat,
            ChannelType::Voice => ChannelTransport::Voice {
                notifier_endpoint: config.notifier_endpoint().clone(),
                library: TransportLibrary::SocketIo,
            },
        };
        Self {
            features: config.features.to_attribute(),
            namespace: config.record_id.clone(),
            conversation_profile: config.conversation_profile.trim().to_string(),
            endpoint: config.endpoint.clone(),
            agent_desktop: AGENT_DESKTOP.to_string(),
            auth_token: token,
            conversation_name: name.clone(),
            clipboard_mode: ClipboardMode::EventOnly,
            transport,
        }
    }

    pub fn channel(&self) -> ChannelType {
        match self.transport {
            ChannelTransport::Chat => ChannelType::Chat,
            ChannelTransport::Voice { .. } => ChannelType::Voice,
        }
    }

    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut attributes = vec![
            ("features", self.features.clone()),
            ("namespace", self.namespace.clone()),
            ("conversation-profile", self.conversation_profile.clone()),
            ("custom-api-endpoint", endpoint_attribute(&self.endpoint)),
            ("channel", self.channel().as_str().to_string()),
            ("agent-desktop", self.agent_desktop.clone()),
            ("auth-token", self.auth_token.expose().to_string()),
            ("use-custom-conversation-id", "true".to_string()),
        ];
        if let ChannelTransport::Voice {
            notifier_endpoint,
            library,
        } = &self.transport
        {
            attributes.push((
                "notifier-server-endpoint",
                endpoint_attribute(notifier_endpoint),
            ));
            attributes.push(("event-based-library", library.as_str().to_string()));
        }
        attributes
    }
}

/// Endpoints are handed over without the trailing slash `Url` adds to bare hosts.
fn endpoint_attribute(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

impl fmt::Display for WidgetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.attributes() {
            let value = if name == "auth-token" {
                "<redacted>".to_string()
            } else {
                value
            };
            writeln!(f, "{name}={value}")?;
        }
        write!(f, "clipboard-mode={}", self.clipboard_mode.as_str())
    }
}

/// Host rendering surface for the widget element.
pub trait WidgetHost: Send + Sync {
    fn activate(&self, config: &WidgetConfig) -> anyhow::Result<()>;

    /// Debug-only transcript element bound to the session namespace.
    fn attach_transcript(&self, namespace: &str) -> anyhow::Result<()>;
}

pub type SharedWidgetHost = Arc<dyn WidgetHost>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> WidgetListener {
        let log = Arc::clone(log);
        Arc::new(move |event: &WidgetEvent| {
            log.lock().unwrap().push(format!("{tag}:{}", event.name));
        })
    }

    #[test]
    fn dispatch_is_scoped_by_namespace_and_name() {
        let target = WidgetEventTarget::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        target.add_listener("s1", "001", events::COPY_TO_CLIPBOARD, recorder(&log, "a"));
        target.add_listener("s2", "002", events::COPY_TO_CLIPBOARD, recorder(&log, "b"));
        target.add_dragnet("s1", "001", recorder(&log, "net"));

        let delivered = target.dispatch(&WidgetEvent::new(
            events::COPY_TO_CLIPBOARD,
            "001",
            Value::Null,
        ));
        assert_eq!(delivered, 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:copy-to-clipboard", "net:copy-to-clipboard"]
        );
    }

    #[test]
    fn discarding_an_owner_leaves_other_sessions_intact() {
        let target = WidgetEventTarget::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        target.add_listener("s1", "001", events::CONVERSATION_INITIALIZED, recorder(&log, "a"));
        target.add_listener("s1", "001", events::COPY_TO_CLIPBOARD, recorder(&log, "a"));
        target.add_listener("s2", "001", events::COPY_TO_CLIPBOARD, recorder(&log, "b"));

        assert_eq!(target.discard_owner("s1"), 2);
        assert_eq!(target.discard_owner("s1"), 0);
        assert_eq!(target.listener_count("001"), 1);

        target.dispatch(&WidgetEvent::new(events::COPY_TO_CLIPBOARD, "001", Value::Null));
        assert_eq!(*log.lock().unwrap(), vec!["b:copy-to-clipboard"]);
    }

    #[test]
    fn remove_listener_targets_single_registration() {
        let target = WidgetEventTarget::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = target.add_listener("s1", "001", events::COPY_TO_CLIPBOARD, recorder(&log, "a"));
        assert!(target.remove_listener("s1", id));
        assert!(!target.remove_listener("s1", id));
        assert_eq!(
            target.dispatch(&WidgetEvent::new(events::COPY_TO_CLIPBOARD, "001", Value::Null)),
            0
        );
    }

    fn session(channel: ChannelType) -> SessionConfig {
        SessionConfig::new(
            "001xyz",
            channel,
            Url::parse("https://connector.example.com").unwrap(),
            "projects/p1/locations/us/conversationProfiles/cp1",
            Credentials::new("key", "secret"),
        )
        .with_features("SMART_REPLY,CONVERSATION_SUMMARIZATION")
    }

    #[test]
    fn chat_attributes_match_widget_contract() {
        let name = ConversationName::parse("projects/p1/locations/us/conversations/SF-001xyz")
            .unwrap();
        let config = WidgetConfig::build(&session(ChannelType::Chat), &name, AuthToken::new("tok"));
        assert_eq!(
            config.attributes(),
            vec![
                ("features", "SMART_REPLY,CONVERSATION_SUMMARIZATION".to_string()),
                ("namespace", "001xyz".to_string()),
                (
                    "conversation-profile",
                    "projects/p1/locations/us/conversationProfiles/cp1".to_string()
                ),
                ("custom-api-endpoint", "https://connector.example.com".to_string()),
                ("channel", "chat".to_string()),
                ("agent-desktop", "Custom".to_string()),
                ("auth-token", "tok".to_string()),
                ("use-custom-conversation-id", "true".to_string()),
            ]
        );
    }

    #[test]
    fn voice_attributes_add_transport_and_display_hides_token() {
        let name =
            ConversationName::parse("projects/p1/locations/us/conversations/conv42").unwrap();
        let session = session(ChannelType::Voice)
            .with_notifier_endpoint(Url::parse("https://notifier.example.com").unwrap());
        let config = WidgetConfig::build(&session, &name, AuthToken::new("tok-123"));
        let attributes = config.attributes();
        assert!(attributes.contains(&("channel", "voice".to_string())));
        assert!(attributes.contains(&(
            "notifier-server-endpoint",
            "https://notifier.example.com".to_string()
        )));
        assert!(attributes.contains(&("event-based-library", "SocketIo".to_string())));

        let rendered = config.to_string();
        assert!(rendered.contains("auth-token=<redacted>"));
        assert!(!rendered.contains("tok-123"));
        assert!(rendered.ends_with("clipboard-mode=EVENT_ONLY"));
    }
}
