use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    config::ChannelType,
    connector::{ConnectorError, SharedConnector},
    token::AuthToken,
};

/// Prefix applied to CRM record ids to form chat conversation ids.
pub const CHAT_CONVERSATION_PREFIX: &str = "SF-";

const PROJECTS: &str = "projects";
const LOCATIONS: &str = "locations";
const CONVERSATION_PROFILES: &str = "conversationProfiles";
const CONVERSATIONS: &str = "conversations";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceNameError {
    #[error("resource name is empty")]
    Empty,
    #[error("missing `projects/<projectId>` component")]
    MissingProject,
    #[error("missing `locations/<location>` component")]
    MissingLocation,
    #[error("missing `{0}/<id>` component")]
    MissingLeaf(&'static str),
    #[error("invalid {component} id `{value}`")]
    InvalidId {
        component: &'static str,
        value: String,
    },
    #[error("unexpected trailing segment `{0}`")]
    UnexpectedSegment(String),
}

/// Parsed `projects/{project}/locations/{location}/conversationProfiles/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationProfile {
    project: String,
    location: String,
    profile_id: String,
}

impl ConversationProfile {
    pub fn parse(raw: &str) -> Result<Self, ResourceNameError> {
        let [project, location, profile_id] = parse_resource(raw, CONVERSATION_PROFILES)?;
        Ok(Self {
            project,
            location,
            profile_id,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    /// Conversation name in the same project and location as this profile.
    pub fn conversation_name(&self, conversation_id: &str) -> ConversationName {
        ConversationName {
            project: self.project.clone(),
            location: self.location.clone(),
            conversation_id: conversation_id.to_string(),
        }
    }
}

impl FromStr for ConversationProfile {
    type Err = ResourceNameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl fmt::Display for ConversationProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PROJECTS}/{}/{LOCATIONS}/{}/{CONVERSATION_PROFILES}/{}",
            self.project, self.location, self.profile_id
        )
    }
}

/// Fully qualified `projects/{project}/locations/{location}/conversations/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationName {
    project: String,
    location: String,
    conversation_id: String,
}

impl ConversationName {
    pub fn parse(raw: &str) -> Result<Self, ResourceNameError> {
        let [project, location, conversation_id] = parse_resource(raw, CONVERSATIONS)?;
        Ok(Self {
            project,
            location,
            conversation_id,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl fmt::Display for ConversationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PROJECTS}/{}/{LOCATIONS}/{}/{CONVERSATIONS}/{}",
            self.project, self.location, self.conversation_id
        )
    }
}

impl FromStr for ConversationName {
    type Err = ResourceNameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for ConversationName {
    type Error = ResourceNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ConversationName> for String {
    fn from(value: ConversationName) -> Self {
        value.to_string()
    }
}

fn parse_resource(raw: &str, leaf: &'static str) -> Result<[String; 3], ResourceNameError> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(ResourceNameError::Empty);
    }
    let mut segments = trimmed.split('/');
    let project = expect_component(&mut segments, PROJECTS, ResourceNameError::MissingProject)?;
    let location = expect_component(&mut segments, LOCATIONS, ResourceNameError::MissingLocation)?;
    let id = expect_component(&mut segments, leaf, ResourceNameError::MissingLeaf(leaf))?;
    if let Some(extra) = segments.next() {
        return Err(ResourceNameError::UnexpectedSegment(extra.to_string()));
    }
    Ok([project, location, id])
}

fn expect_component<'a>(
    segments: &mut impl Iterator<Item = &'a str>,
    key: &'static str,
    missing: ResourceNameError,
) -> Result<String, ResourceNameError> {
    if segments.next() != Some(key) {
        return Err(missing);
    }
    let Some(value) = segments.next() else {
        return Err(missing);
    };
    if value.is_empty()
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ResourceNameError::InvalidId {
            component: key,
            value: value.to_string(),
        });
    }
    Ok(value.to_string())
}

/// Keeps the digits of a phone number; `None` when nothing dialable remains.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

/// Chat conversation id for a CRM record.
pub fn chat_conversation_id(record_id: &str) -> String {
    format!("{CHAT_CONVERSATION_PREFIX}{record_id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ConversationName),
    /// The backend has no conversation for the caller yet.
    Pending,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid conversation profile")]
    Configuration(#[from] ResourceNameError),
    #[error("voice sessions require a contact phone number")]
    MissingContactPhone,
    #[error("voice lookups require an authorization token")]
    MissingToken,
    #[error("conversation lookup failed")]
    Lookup(#[from] ConnectorError),
}

#[derive(Debug, Clone, Copy)]
pub struct IdentityRequest<'a> {
    pub channel: ChannelType,
    pub record_id: &'a str,
    pub conversation_profile: &'a str,
    pub token: Option<&'a AuthToken>,
    pub contact_phone: Option<&'a str>,
}

pub struct IdentityResolver {
    connector: SharedConnector,
}

impl IdentityResolver {
    pub fn new(connector: SharedConnector) -> Self {
        Self { connector }
    }

    pub async fn resolve(&self, request: &IdentityRequest<'_>) -> Result<Resolution, IdentityError> {
        let profile = ConversationProfile::parse(request.conversation_profile)?;
        match request.channel {
            ChannelType::Chat => Ok(Resolution::Resolved(
                profile.conversation_name(&chat_conversation_id(request.record_id)),
            )),
            ChannelType::Voice => {
                let phone = request
                    .contact_phone
                    .and_then(normalize_phone)
                    .ok_or(IdentityError::MissingContactPhone)?;
                let token = request.token.ok_or(IdentityError::MissingToken)?;
                match self.connector.lookup_conversation_name(token, &phone).await? {
                    Some(name) => Ok(Resolution::Resolved(name)),
                    None => {
                        debug!(
                            record_id = request.record_id,
                            "conversation name not yet published for caller"
                        );
                        Ok(Resolution::Pending)
                    }
                }
            }
        }
    }

    /// Deletes the backend phone to conversation mapping once a call completes.
    pub async fn release(&self, token: &AuthToken, contact_phone: &str) -> Result<(), IdentityError> {
        let phone = normalize_phone(contact_phone).ok_or(IdentityError::MissingContactPhone)?;
        self.connector
            .release_conversation_name(token, &phone)
            .await
            .map_err(IdentityError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_chat_name_from_profile() {
        let profile =
            ConversationProfile::parse("projects/p1/locations/us/conversationProfiles/cp1").unwrap();
        let name = profile.conversation_name(&chat_conversation_id("001xyz"));
        assert_eq!(
            name.to_string(),
            "projects/p1/locations/us/conversations/SF-001xyz"
        );
        assert_eq!(name.conversation_id(), "SF-001xyz");
    }

    #[test]
    fn profile_accepts_dashes_and_underscores() {
        let profile = ConversationProfile::parse(
            "/projects/my-gcp_project/locations/global/conversationProfiles/Abc-12_x/",
        )
        .unwrap();
        assert_eq!(profile.project(), "my-gcp_project");
        assert_eq!(profile.location(), "global");
        assert_eq!(profile.profile_id(), "Abc-12_x");
    }

    #[test]
    fn reports_each_missing_component() {
        assert_eq!(
            ConversationProfile::parse("").unwrap_err(),
            ResourceNameError::Empty
        );
        assert_eq!(
            ConversationProfile::parse("locations/us/conversationProfiles/cp1").unwrap_err(),
            ResourceNameError::MissingProject
        );
        assert_eq!(
            ConversationProfile::parse("projects/p1/conversationProfiles/cp1").unwrap_err(),
            ResourceNameError::MissingLocation
        );
        assert_eq!(
            ConversationProfile::parse("projects/p1/locations/us").unwrap_err(),
            ResourceNameError::MissingLeaf(CONVERSATION_PROFILES)
        );
        assert_eq!(
            ConversationProfile::parse("projects/p 1/locations/us/conversationProfiles/cp1")
                .unwrap_err(),
            ResourceNameError::InvalidId {
                component: PROJECTS,
                value: "p 1".into()
            }
        );
        assert_eq!(
            ConversationProfile::parse("projects/p1/locations/us/conversationProfiles/cp1/extra")
                .unwrap_err(),
            ResourceNameError::UnexpectedSegment("extra".into())
        );
    }

    #[test]
    fn conversation_name_round_trips_through_serde() {
        let name: ConversationName =
            serde_json::from_str("\"projects/p1/locations/us/conversations/conv42\"").unwrap();
        assert_eq!(name.conversation_id(), "conv42");
        assert_eq!(
            serde_json::to_string(&name).unwrap(),
            "\"projects/p1/locations/us/conversations/conv42\""
        );
        assert!(serde_json::from_str::<ConversationName>("\"conv42\"").is_err());
    }

    #[test]
    fn normalizes_phone_numbers_to_digits() {
        assert_eq!(normalize_phone("+1 (555) 010-2000").as_deref(), Some("15550102000"));
        assert_eq!(normalize_phone(" - "), None);
    }
}
