//! Client for the document-conversion bridge.
//!
//! The bridge is a single HTTP endpoint. Every call is a JSON `POST` carrying the
//! shared secret and an `action` discriminator; the reply carries either the
//! action's payload or an `error` field.

use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub endpoint: Option<String>,
    pub secret: Option<String>,
    pub timeout: Duration,
    pub edit_url_template: String,
}

impl BridgeConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.bridge_endpoint.clone(),
            secret: config.bridge_secret.clone(),
            timeout: Duration::from_secs(config.bridge_timeout_seconds.max(1)),
            edit_url_template: config.bridge_edit_url_template.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge endpoint or secret is not configured")]
    NotConfigured,
    #[error("{0}")]
    Remote(String),
    #[error("bridge response is missing `{0}`")]
    MalformedResponse(&'static str),
    #[error("bridge request timed out")]
    Timeout,
    #[error("bridge request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<reqwest::Error> for BridgeError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            BridgeError::Timeout
        } else {
            BridgeError::Transport(value)
        }
    }
}

impl From<BridgeError> for AppError {
    fn from(value: BridgeError) -> Self {
        match value {
            BridgeError::NotConfigured => AppError::bridge_not_configured(),
            BridgeError::Remote(message) => AppError::bridge(message),
            BridgeError::MalformedResponse(field) => {
                AppError::bridge_malformed(format!("Bridge response is missing '{field}'"))
            }
            BridgeError::Timeout => AppError::bridge("request timed out"),
            BridgeError::Transport(err) => {
                warn!(error = %err, "bridge transport failure");
                AppError::bridge("request failed")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum BridgeAction {
    Upload {
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "contentBase64")]
        content_base64: String,
    },
    Copy {
        #[serde(rename = "templateId")]
        template_id: String,
    },
    Export {
        #[serde(rename = "fileId")]
        file_id: String,
    },
}

impl BridgeAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Upload { .. } => "upload",
            Self::Copy { .. } => "copy",
            Self::Export { .. } => "export",
        }
    }

    fn expected_field(&self) -> &'static str {
        match self {
            Self::Upload { .. } | Self::Copy { .. } => "id",
            Self::Export { .. } => "base64",
        }
    }
}

/// Action-specific success payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutput {
    FileId(String),
    Base64(String),
}

impl BridgeOutput {
    pub fn into_string(self) -> String {
        match self {
            Self::FileId(value) | Self::Base64(value) => value,
        }
    }
}

#[derive(Serialize)]
struct BridgeEnvelope<'a> {
    secret: &'a str,
    #[serde(flatten)]
    action: &'a BridgeAction,
}

#[derive(Debug, Default, Deserialize)]
struct BridgeReply {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    base64: Option<String>,
}

pub struct BridgeClient {
    http: Client,
    config: BridgeConfig,
}

impl BridgeClient {
    pub fn new(config: BridgeConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn is_configured(&self) -> bool {
        self.credentials().is_some()
    }

    /// Builds the interactive edit link for a bridge-hosted file.
    pub fn edit_url(&self, file_id: &str) -> String {
        build_edit_url(&self.config.edit_url_template, file_id)
    }

    /// Sends one request to the bridge. No retries are attempted.
    pub async fn invoke(&self, action: BridgeAction) -> BridgeResult<BridgeOutput> {
        let (endpoint, secret) = self.credentials().ok_or(BridgeError::NotConfigured)?;

        debug!(action = action.name(), "sending bridge request");
        let envelope = BridgeEnvelope {
            secret,
            action: &action,
        };
        let response = self.http.post(endpoint).json(&envelope).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let reply: BridgeReply = match serde_json::from_str(&body) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(action = action.name(), %status, error = %err, "bridge returned a non-JSON body");
                if status.is_success() {
                    return Err(BridgeError::MalformedResponse(action.expected_field()));
                }
                return Err(BridgeError::Remote(format!(
                    "bridge responded with status {status}"
                )));
            }
        };

        interpret_reply(&action, reply)
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.config.endpoint, &self.config.secret) {
            (Some(endpoint), Some(secret)) => Some((endpoint.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

fn interpret_reply(action: &BridgeAction, reply: BridgeReply) -> BridgeResult<BridgeOutput> {
    if let Some(error) = reply.error.filter(|value| !value.is_null()) {
        let message = match error {
            Value::String(message) => message,
            other => other.to_string(),
        };
        return Err(BridgeError::Remote(message));
    }

    match action {
        BridgeAction::Upload { .. } | BridgeAction::Copy { .. } => reply
            .id
            .filter(|id| !id.is_empty())
            .map(BridgeOutput::FileId)
            .ok_or(BridgeError::MalformedResponse("id")),
        BridgeAction::Export { .. } => reply
            .base64
            .filter(|data| !data.is_empty())
            .map(BridgeOutput::Base64)
            .ok_or(BridgeError::MalformedResponse("base64")),
    }
}

const FILE_ID_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

pub fn build_edit_url(template: &str, file_id: &str) -> String {
    let encoded = utf8_percent_encode(file_id, FILE_ID_ENCODE_SET);
    template.replace("{id}", &encoded.to_string())
}
