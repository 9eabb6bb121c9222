use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::{Client, Response, StatusCode, header::AUTHORIZATION};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
    config::Credentials,
    identity::ConversationName,
    token::AuthToken,
};

const INTEGRATION_KEY_PARAM: &str = "conversationIntegrationKey";

/// Backend connector: token issuance, voice conversation lookup and
/// conversation history.
#[async_trait]
pub trait UiConnector: Send + Sync {
    async fn register(&self, credentials: &Credentials) -> Result<AuthToken, ConnectorError>;

    /// `Ok(None)` while no conversation has been published for the phone number.
    async fn lookup_conversation_name(
        &self,
        token: &AuthToken,
        phone: &str,
    ) -> Result<Option<ConversationName>, ConnectorError>;

    async fn release_conversation_name(
        &self,
        token: &AuthToken,
        phone: &str,
    ) -> Result<(), ConnectorError>;

    /// Publishes the phone to conversation mapping; called from the telephony side.
    async fn bind_conversation_name(
        &self,
        token: &AuthToken,
        phone: &str,
        name: &ConversationName,
    ) -> Result<(), ConnectorError>;

    async fn list_messages(
        &self,
        token: &AuthToken,
        name: &ConversationName,
    ) -> Result<Vec<ConnectorMessage>, ConnectorError>;
}

pub type SharedConnector = Arc<dyn UiConnector>;

/// Message already recorded on the backend conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub participant_role: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connector configuration error: {0}")]
    Config(#[source] anyhow::Error),
    #[error("connector transport error")]
    Transport(#[from] reqwest::Error),
    #[error("connector returned {status}: {message}")]
    Remote { status: StatusCode, message: String },
    #[error("connector response could not be decoded")]
    Decode(#[source] anyhow::Error),
}

pub struct ReqwestConnector {
    client: Client,
    base_url: Url,
}

impl ReqwestConnector {
    pub fn new(client: Client, endpoint: &Url) -> Self {
        let mut base_url = endpoint.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ConnectorError> {
        self.base_url
            .join(path)
            .map_err(|err| ConnectorError::Config(err.into()))
    }

    fn conversation_name_url(&self, phone: &str) -> Result<Url, ConnectorError> {
        let mut url = self.endpoint("conversation-name")?;
        url.query_pairs_mut()
            .append_pair(INTEGRATION_KEY_PARAM, phone);
        Ok(url)
    }

    async fn send(
        &self,
        endpoint: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Response, ConnectorError> {
        let started = Instant::now();
        let response = request.send().await.map_err(|err| {
            counter!(
                "assist_connector_errors_total",
                "kind" => "transport",
                "endpoint" => endpoint
            )
            .increment(1);
            ConnectorError::Transport(err)
        })?;
        histogram!(
            "assist_connector_roundtrip_seconds",
            "endpoint" => endpoint,
            "status" => response.status().as_str().to_string()
        )
        .record(started.elapsed().as_secs_f64());
        Ok(response)
    }
}

#[derive(Deserialize)]
struct RegisterResponse {
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationNameResponse {
    #[serde(default)]
    conversation_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BindRequest<'a> {
    conversation_integration_key: &'a str,
    conversation_name: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<ConnectorMessage>,
}

#[async_trait]
impl UiConnector for ReqwestConnector {
    async fn register(&self, credentials: &Credentials) -> Result<AuthToken, ConnectorError> {
        let url = self.endpoint("register")?;
        let response = self
            .send("register", self.client.post(url).json(credentials))
            .await?;
        let body: RegisterResponse = map_response("register", response).await?;
        Ok(AuthToken::new(body.token))
    }

    async fn lookup_conversation_name(
        &self,
        token: &AuthToken,
        phone: &str,
    ) -> Result<Option<ConversationName>, ConnectorError> {
        let url = self.conversation_name_url(phone)?;
        let response = self
            .send(
                "conversation_name.get",
                self.client.get(url).header(AUTHORIZATION, token.expose()),
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: ConversationNameResponse =
            map_response("conversation_name.get", response).await?;
        match body.conversation_name.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => ConversationName::parse(raw)
                .map(Some)
                .map_err(|err| ConnectorError::Decode(err.into())),
        }
    }

    async fn release_conversation_name(
        &self,
        token: &AuthToken,
        phone: &str,
    ) -> Result<(), ConnectorError> {
        let url = self.conversation_name_url(phone)?;
        let response = self
            .send(
                "conversation_name.delete",
                self.client.delete(url).header(AUTHORIZATION, token.expose()),
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success("conversation_name.delete", response).await
    }

    async fn bind_conversation_name(
        &self,
        token: &AuthToken,
        phone: &str,
        name: &ConversationName,
    ) -> Result<(), ConnectorError> {
        let url = self.endpoint("conversation-name")?;
        let body = BindRequest {
            conversation_integration_key: phone,
            conversation_name: name.to_string(),
        };
        let response = self
            .send(
                "conversation_name.post",
                self.client
                    .post(url)
                    .header(AUTHORIZATION, token.expose())
                    .json(&body),
            )
            .await?;
        ensure_success("conversation_name.post", response).await
    }

    async fn list_messages(
        &self,
        token: &AuthToken,
        name: &ConversationName,
    ) -> Result<Vec<ConnectorMessage>, ConnectorError> {
        let url = self.endpoint(&format!("v2beta1/{name}/messages"))?;
        let response = self
            .send(
                "messages.list",
                self.client.get(url).header(AUTHORIZATION, token.expose()),
            )
            .await?;
        let body: MessagesResponse = map_response("messages.list", response).await?;
        Ok(body.messages)
    }
}

async fn remote_error(endpoint: &'static str, response: Response) -> ConnectorError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable>".into());
    counter!(
        "assist_connector_errors_total",
        "kind" => "remote",
        "endpoint" => endpoint,
        "status" => status.as_str().to_string()
    )
    .increment(1);
    ConnectorError::Remote {
        status,
        message: truncate(body, 512),
    }
}

async fn ensure_success(endpoint: &'static str, response: Response) -> Result<(), ConnectorError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(remote_error(endpoint, response).await)
    }
}

async fn map_response<T>(endpoint: &'static str, response: Response) -> Result<T, ConnectorError>
where
    T: for<'de> Deserialize<'de>,
{
    if !response.status().is_success() {
        return Err(remote_error(endpoint, response).await);
    }
    response.json::<T>().await.map_err(|err| {
        counter!(
            "assist_connector_errors_total",
            "kind" => "decode",
            "endpoint" => endpoint
        )
        .increment(1);
        ConnectorError::Decode(err.into())
    })
}

fn truncate(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut cut = max;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
