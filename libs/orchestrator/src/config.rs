use std::{env, fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const SUMMARIZATION_FEATURE: &str = "CONVERSATION_SUMMARIZATION";

const ENV_ENDPOINT: &str = "AAB_ENDPOINT";
const ENV_FEATURES: &str = "AAB_FEATURES";
const ENV_PROFILE: &str = "AAB_CONVERSATION_PROFILE";
const ENV_CHANNEL: &str = "AAB_CHANNEL";
const ENV_CONSUMER_KEY: &str = "AAB_CONSUMER_KEY";
const ENV_CONSUMER_SECRET: &str = "AAB_CONSUMER_SECRET";
const ENV_RECORD_ID: &str = "AAB_RECORD_ID";
const ENV_CONTACT_PHONE: &str = "AAB_CONTACT_PHONE";
const ENV_NOTIFIER_ENDPOINT: &str = "AAB_NOTIFIER_ENDPOINT";
const ENV_DEBUG: &str = "AAB_DEBUG";
const ENV_POLL_INTERVAL: &str = "AAB_POLL_INTERVAL_SECS";
const ENV_POLL_MAX_RETRIES: &str = "AAB_POLL_MAX_RETRIES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid url in {key}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported channel `{0}` (expected chat or voice)")]
    InvalidChannel(String),
    #[error("invalid number `{value}` in {key}")]
    InvalidNumber { key: &'static str, value: String },
}

/// Interaction medium; decides how the conversation name is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Chat,
    Voice,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Chat => "chat",
            ChannelType::Voice => "voice",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chat" | "messaging" => Ok(ChannelType::Chat),
            "voice" | "phone" => Ok(ChannelType::Voice),
            other => Err(ConfigError::InvalidChannel(other.to_string())),
        }
    }
}

/// Capability tags enabled on the widget, parsed from a comma separated list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet {
    tags: Vec<String>,
}

impl FeatureSet {
    pub fn parse(raw: &str) -> Self {
        let tags = raw
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(|tag| tag.to_ascii_uppercase())
            .collect();
        Self { tags }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.iter().any(|known| known.eq_ignore_ascii_case(tag))
    }

    pub fn summarization_enabled(&self) -> bool {
        self.contains(SUMMARIZATION_FEATURE)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Attribute value handed to the widget.
    pub fn to_attribute(&self) -> String {
        self.tags.join(",")
    }
}

/// Connected-app credential pair exchanged for a connector token.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
}

impl Credentials {
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.consumer_key.trim().is_empty() && !self.consumer_secret.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .finish()
    }
}

/// Retry policy for voice conversation lookups.
///
/// `max_retries` of `None` keeps polling until the session is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_retries: Option<u32>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_retries: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub record_id: String,
    pub channel: ChannelType,
    pub endpoint: Url,
    pub features: FeatureSet,
    pub conversation_profile: String,
    pub credentials: Credentials,
    pub contact_phone: Option<String>,
    pub notifier_endpoint: Option<Url>,
    pub debug: bool,
    pub poll: PollSettings,
}

impl SessionConfig {
    pub fn new(
        record_id: impl Into<String>,
        channel: ChannelType,
        endpoint: Url,
        conversation_profile: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            channel,
            endpoint,
            features: FeatureSet::default(),
            conversation_profile: conversation_profile.into(),
            credentials,
            contact_phone: None,
            notifier_endpoint: None,
            debug: false,
            poll: PollSettings::default(),
        }
    }

    pub fn with_features(mut self, raw: &str) -> Self {
        self.features = FeatureSet::parse(raw);
        self
    }

    pub fn with_contact_phone(mut self, phone: impl Into<String>) -> Self {
        self.contact_phone = Some(phone.into());
        self
    }

    pub fn with_notifier_endpoint(mut self, endpoint: Url) -> Self {
        self.notifier_endpoint = Some(endpoint);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Endpoint the voice transport connects to; the connector endpoint unless overridden.
    pub fn notifier_endpoint(&self) -> &Url {
        self.notifier_endpoint.as_ref().unwrap_or(&self.endpoint)
    }

    /// Loads the session settings from `AAB_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| value(key).ok_or(ConfigError::Missing(key));

        let endpoint = parse_url(ENV_ENDPOINT, &required(ENV_ENDPOINT)?)?;
        let channel = match value(ENV_CHANNEL) {
            Some(raw) => raw.parse()?,
            None => ChannelType::Chat,
        };
        let credentials = Credentials::new(
            required(ENV_CONSUMER_KEY)?,
            required(ENV_CONSUMER_SECRET)?,
        );
        let mut config = Self::new(
            required(ENV_RECORD_ID)?,
            channel,
            endpoint,
            required(ENV_PROFILE)?,
            credentials,
        );

        if let Some(features) = value(ENV_FEATURES) {
            config.features = FeatureSet::parse(&features);
        }
        config.contact_phone = value(ENV_CONTACT_PHONE);
        if let Some(raw) = value(ENV_NOTIFIER_ENDPOINT) {
            config.notifier_endpoint = Some(parse_url(ENV_NOTIFIER_ENDPOINT, &raw)?);
        }
        config.debug = value(ENV_DEBUG)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        if let Some(raw) = value(ENV_POLL_INTERVAL) {
            let secs = parse_number(ENV_POLL_INTERVAL, &raw)?;
            config.poll.interval = Duration::from_secs(u64::from(secs.max(1)));
        }
        if let Some(raw) = value(ENV_POLL_MAX_RETRIES) {
            config.poll.max_retries = Some(parse_number(ENV_POLL_MAX_RETRIES, &raw)?);
        }
        Ok(config)
    }
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl { key, source })
}

fn parse_number(key: &'static str, raw: &str) -> Result<u32, ConfigError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidNumber {
            key,
            value: raw.to_string(),
        })
}
