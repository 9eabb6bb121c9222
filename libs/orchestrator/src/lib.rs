//! Agent assist session orchestration.
//!
//! Resolves the backend conversation for a CRM record, activates the assist
//! widget and bridges CRM conversation channels and widget events for the
//! lifetime of one session.
pub mod bridge;
pub mod channels;
pub mod config;
pub mod connector;
pub mod controller;
pub mod desktop;
pub mod error;
pub mod identity;
pub mod messaging_bridge;
pub mod reconcile;
pub mod telemetry;
pub mod token;
pub mod widget;
pub mod widget_bridge;

pub use bridge::{BridgeContext, SessionGate};
pub use channels::{
    ChannelHandler, ChannelMessage, LocalMessageService, MessageChannel, MessageService,
    ParticipantRole, SharedMessageService, SubscriptionId, SubscriptionScope,
};
pub use config::{ChannelType, ConfigError, Credentials, FeatureSet, PollSettings, SessionConfig};
pub use connector::{ConnectorError, ConnectorMessage, ReqwestConnector, SharedConnector, UiConnector};
pub use controller::{
    IdentityPhase, SessionDeps, SessionHandle, SessionReport, SessionState, spawn_session,
};
pub use desktop::{AgentDesktop, Clipboard, SharedAgentDesktop, SharedClipboard, TranscriptEntry};
pub use error::{LoadError, SessionError};
pub use identity::{
    ConversationName, ConversationProfile, IdentityError, IdentityResolver, Resolution,
    ResourceNameError,
};
pub use messaging_bridge::MessagingBridge;
pub use reconcile::ReconcileOutcome;
pub use token::{AuthError, AuthToken, TokenManager};
pub use widget::{
    SharedWidgetEvents, SharedWidgetHost, WidgetConfig, WidgetEvent, WidgetEventTarget,
    WidgetHost, WidgetListener, events,
};
pub use widget_bridge::{ConversationParticipant, WidgetBridge, WidgetCommand};
