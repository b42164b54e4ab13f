//! Client for the remote LED controller API.
//!
//! Every request is authenticated with a short-lived token fetched from
//! `GET /module/{uuid}/` immediately beforehand; tokens are never reused.
//!
//! - `POST /request?token=..&uuid=..` with a JSON array of `add` commands
//! - `POST /reset-game?token=..&uuid=..` with `[{"action":"reset"}]`

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::command::{reset_batch, Command};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid JSON: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) => true,
            TransportError::Status { code, .. } => {
                *code >= 500 || matches!(code, 401 | 403 | 408 | 429)
            }
            TransportError::Decode(_) => false,
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("token request failed: {0}")]
    Token(TransportError),
    #[error("token response carried no token")]
    MissingToken,
    #[error("command request failed: {0}")]
    Send(TransportError),
}

impl DispatchError {
    /// Whether re-sending the same batch later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Token(_) | DispatchError::MissingToken => true,
            DispatchError::Send(err) => err.is_retryable(),
        }
    }
}

/// JSON-over-HTTP seam; paths are relative to the API base URL.
pub trait Transport: Send + Sync {
    fn get_json(&self, path: &str) -> Result<Value, TransportError>;
    fn post_json(&self, path: &str, query: &[(&str, &str)], body: &Value) -> Result<Value, TransportError>;
}

/// Blocking HTTP transport. No timeout is imposed on requests.
pub struct HttpTransport {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn read_json(response: ureq::Response) -> Result<Value, TransportError> {
    let body = response
        .into_string()
        .map_err(|e| TransportError::Network(e.to_string()))?;
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}

fn map_ureq_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Status(code, response) => TransportError::Status {
            code,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => TransportError::Network(transport.to_string()),
    }
}

impl Transport for HttpTransport {
    fn get_json(&self, path: &str) -> Result<Value, TransportError> {
        let response = self
            .agent
            .get(&self.url(path))
            .set("Accept", "application/json")
            .call()
            .map_err(map_ureq_error)?;
        read_json(response)
    }

    fn post_json(&self, path: &str, query: &[(&str, &str)], body: &Value) -> Result<Value, TransportError> {
        let mut request = self
            .agent
            .post(&self.url(path))
            .set("Accept", "application/json")
            .set("Content-Type", "application/json");
        for (name, value) in query {
            request = request.query(name, value);
        }
        let response = request.send_string(&body.to_string()).map_err(map_ureq_error)?;
        read_json(response)
    }
}

/// Authenticated command sender for one controller module.
#[derive(Clone)]
pub struct ControllerClient {
    transport: Arc<dyn Transport>,
    uuid: String,
}

impl ControllerClient {
    pub fn new(transport: Arc<dyn Transport>, uuid: impl Into<String>) -> Self {
        Self {
            transport,
            uuid: uuid.into(),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Request a fresh token for this module.
    pub fn fetch_token(&self) -> Result<String, DispatchError> {
        let path = format!("/module/{}/", self.uuid);
        let response = self.transport.get_json(&path).map_err(DispatchError::Token)?;
        response
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(DispatchError::MissingToken)
    }

    /// Send one batch of lighting commands.
    pub fn send_commands(&self, commands: &[Command]) -> Result<Value, DispatchError> {
        self.post("/request", commands)
    }

    /// Ask the controller to drop every lighting request.
    pub fn reset(&self) -> Result<Value, DispatchError> {
        self.post("/reset-game", &reset_batch())
    }

    fn post(&self, path: &str, commands: &[Command]) -> Result<Value, DispatchError> {
        let token = self.fetch_token()?;
        let body = serde_json::to_value(commands)
            .map_err(|e| DispatchError::Send(TransportError::from(e)))?;
        let response = self
            .transport
            .post_json(path, &[("token", token.as_str()), ("uuid", self.uuid.as_str())], &body)
            .map_err(DispatchError::Send)?;
        log::debug!("{} -> {}", path, response);
        Ok(response)
    }
}
