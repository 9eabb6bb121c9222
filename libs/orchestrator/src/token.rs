use std::fmt;

use metrics::counter;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::Credentials,
    connector::{ConnectorError, SharedConnector},
};

/// Bearer credential issued by the connector. Never logged or persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw value, for headers and the widget `auth-token` attribute only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("consumer key and secret must both be configured")]
    MissingCredentials,
    #[error("authorization endpoint rejected the credentials ({0})")]
    Rejected(StatusCode),
    #[error("authorization endpoint returned an empty token")]
    EmptyToken,
    #[error("authorization request failed: {0}")]
    Unavailable(#[source] ConnectorError),
}

impl From<ConnectorError> for AuthError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Remote { status, .. }
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
            {
                AuthError::Rejected(status)
            }
            other => AuthError::Unavailable(other),
        }
    }
}

/// Holds the one token a session runs with.
pub struct TokenManager {
    connector: SharedConnector,
    token: Option<AuthToken>,
}

impl TokenManager {
    pub fn new(connector: SharedConnector) -> Self {
        Self {
            connector,
            token: None,
        }
    }

    /// Exchanges the credentials for a token. Failures are final for the session.
    pub async fn acquire(&mut self, credentials: &Credentials) -> Result<AuthToken, AuthError> {
        if !credentials.is_complete() {
            counter!("assist_token_requests_total", "result" => "missing_credentials").increment(1);
            return Err(AuthError::MissingCredentials);
        }

        let token = match self.connector.register(credentials).await {
            Ok(token) if token.expose().trim().is_empty() => Err(AuthError::EmptyToken),
            Ok(token) => Ok(token),
            Err(err) => Err(AuthError::from(err)),
        };

        match token {
            Ok(token) => {
                counter!("assist_token_requests_total", "result" => "ok").increment(1);
                info!("connector token acquired");
                self.token = Some(token.clone());
                Ok(token)
            }
            Err(err) => {
                counter!("assist_token_requests_total", "result" => "error").increment(1);
                warn!(error = %err, "connector token request failed");
                Err(err)
            }
        }
    }

    pub fn current(&self) -> Option<&AuthToken> {
        self.token.as_ref()
    }

    pub fn clear(&mut self) {
        self.token = None;
    }
}
