use thiserror::Error;
use tokio::task::JoinError;

use crate::{identity::ResourceNameError, token::AuthError};

/// User-visible reason a session could not load. Terminal for the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error(
        "Got error: \"{0}\". Unable to authorize, please check your SF Trusted URLs, console, and configuration."
    )]
    Authorization(String),
    #[error(
        "\"{profile}\" is not a valid conversation profile. Expected format: projects/<projectId>/locations/<location>/conversationProfiles/<conversationProfileId>"
    )]
    InvalidProfile { profile: String, reason: ResourceNameError },
    #[error("voice sessions require a contact phone number")]
    MissingContactPhone,
    #[error("no conversation was published for the caller after {retries} retries")]
    IdentityUnavailable { retries: u32 },
    #[error("widget could not be activated: {0}")]
    Widget(String),
}

impl LoadError {
    pub fn authorization(err: &AuthError) -> Self {
        LoadError::Authorization(err.to_string())
    }

    pub fn invalid_profile(profile: &str, reason: ResourceNameError) -> Self {
        LoadError::InvalidProfile {
            profile: profile.trim().to_string(),
            reason,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session task aborted")]
    Aborted(#[from] JoinError),
}
