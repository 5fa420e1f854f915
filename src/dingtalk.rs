use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::DingTalkConfig;

const TOKEN_PATH: &str = "/v1.0/oauth2/accessToken";
const GROUP_SEND_PATH: &str = "/v1.0/robot/groupMessages/send";
const MSG_KEY_TEXT: &str = "sampleText";

/// Failure modes of a group message send. The HTTP variant keeps the
/// response body so the operator can see DingTalk's error code.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("HTTP error {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("response is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    app_key: &'a str,
    app_secret: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expire_in: Option<u64>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupMessageRequest<'a> {
    msg_key: &'a str,
    msg_param: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    open_conversation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    robot_code: Option<&'a str>,
}

/// Client for the DingTalk open platform: app access tokens and robot
/// group messages.
pub struct DingTalkClient {
    client: reqwest::Client,
    config: DingTalkConfig,
}

impl DingTalkClient {
    pub fn new(config: DingTalkConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Exchange the app key/secret for an access token.
    pub async fn get_access_token(&self) -> Result<String> {
        let url = format!("{}{}", self.config.base_url, TOKEN_PATH);
        let request = TokenRequest {
            app_key: &self.config.app_key,
            app_secret: &self.config.app_secret,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send token request to DingTalk")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read DingTalk token response")?;

        let parsed: Option<TokenResponse> = serde_json::from_str(&body).ok();
        if !status.is_success() {
            return match parsed {
                Some(TokenResponse {
                    code: Some(code),
                    message: Some(message),
                    ..
                }) => Err(anyhow::anyhow!("[{}] {}", code, message)),
                _ => Err(anyhow::anyhow!("DingTalk token API error ({}): {}", status, body)),
            };
        }

        let token = parsed.context("Failed to parse DingTalk token response")?;
        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .context("DingTalk token response has no accessToken")?;

        debug!(
            "Obtained access token {}… (expires in {:?}s)",
            access_token.chars().take(6).collect::<String>(),
            token.expire_in
        );
        Ok(access_token)
    }

    /// Post `message` as a plain text robot message to the configured group
    /// and return the decoded response body.
    pub async fn send_message(
        &self,
        access_token: &str,
        message: &str,
    ) -> Result<Value, SendError> {
        let url = format!("{}{}", self.config.base_url, GROUP_SEND_PATH);
        let payload = self.build_payload(message);

        debug!("Sending group message to {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-acs-dingtalk-access-token", access_token)
            .json(&payload)
            .send()
            .await
            .map_err(SendError::Transport)?;

        let status = response.status();
        let text = response.text().await.map_err(SendError::Transport)?;
        debug!("DingTalk responded {}: {}", status, text);

        if !status.is_success() {
            return Err(SendError::Status { status, body: text });
        }

        serde_json::from_str(&text).map_err(SendError::Decode)
    }

    fn build_payload<'a>(&'a self, message: &'a str) -> GroupMessageRequest<'a> {
        GroupMessageRequest {
            msg_key: MSG_KEY_TEXT,
            msg_param: serde_json::json!({ "content": message }).to_string(),
            open_conversation_id: self.config.open_conversation_id.as_deref(),
            robot_code: self.config.robot_code.as_deref(),
        }
    }
}

/// DingTalk signals an accepted message by returning a `processQueryKey`
/// (or at least a `requestId`) in the body.
pub fn is_accepted(response: &Value) -> bool {
    response.get("processQueryKey").is_some() || response.get("requestId").is_some()
}
