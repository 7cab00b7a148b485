//! Telegram Bot API client
//!
//! Sends operational notices to the studio chat and verifies Telegram Login
//! Widget payloads used to link worker accounts.

use std::collections::BTreeMap;
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

const API_BASE: &str = "https://api.telegram.org";

/// Per-request limit for Bot API calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram Bot API client
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    bot_token: String,
    base_url: String,
}

/// sendMessage request body
#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i32>,
    disable_web_page_preview: bool,
}

/// Bot API envelope
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramClient {
    /// Create a new Telegram client
    pub fn new(bot_token: String) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Configuration(format!("Telegram HTTP client: {}", e)))?;

        Ok(Self {
            client,
            bot_token,
            base_url: API_BASE.to_string(),
        })
    }

    /// Point the client at another Bot API server (local bot API, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Send an HTML-formatted message, returning the Telegram message id
    pub async fn send_message(
        &self,
        chat_id: i64,
        thread_id: Option<i32>,
        text: &str,
    ) -> AppResult<i64> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let body = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "HTML",
            message_thread_id: thread_id,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::TelegramApiError(format!("request failed: {}", e)))?;

        let status = response.status();
        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| AppError::TelegramApiError(format!("invalid response ({}): {}", status, e)))?;

        match (parsed.ok, parsed.result) {
            (true, Some(message)) => Ok(message.message_id),
            _ => Err(AppError::TelegramApiError(
                parsed
                    .description
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            )),
        }
    }
}

/// Escape user-provided text for HTML parse mode
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Data posted by the Telegram Login Widget
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramLoginPayload {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub photo_url: Option<String>,
    pub auth_date: i64,
    pub hash: String,
}

impl TelegramLoginPayload {
    /// `key=value` lines sorted by key, excluding `hash`
    fn data_check_string(&self) -> String {
        let mut fields = BTreeMap::new();
        fields.insert("id", self.id.to_string());
        fields.insert("auth_date", self.auth_date.to_string());
        if let Some(v) = &self.first_name {
            fields.insert("first_name", v.clone());
        }
        if let Some(v) = &self.last_name {
            fields.insert("last_name", v.clone());
        }
        if let Some(v) = &self.username {
            fields.insert("username", v.clone());
        }
        if let Some(v) = &self.photo_url {
            fields.insert("photo_url", v.clone());
        }
        fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Verify a Login Widget payload
///
/// The signature is HMAC-SHA256 over the data-check string keyed with
/// SHA256(bot token); payloads older than `max_age_secs` are refused.
pub fn verify_login_payload(
    payload: &TelegramLoginPayload,
    bot_token: &str,
    now_unix: i64,
    max_age_secs: i64,
) -> Result<(), String> {
    if now_unix - payload.auth_date > max_age_secs {
        return Err("Login data is outdated".to_string());
    }

    let expected = hex::decode(&payload.hash).map_err(|_| "Malformed hash".to_string())?;

    type HmacSha256 = Hmac<Sha256>;
    let secret = Sha256::digest(bot_token.as_bytes());
    let mut mac =
        HmacSha256::new_from_slice(&secret).map_err(|_| "Failed to create HMAC".to_string())?;
    mac.update(payload.data_check_string().as_bytes());

    mac.verify_slice(&expected)
        .map_err(|_| "Signature mismatch".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &TelegramLoginPayload, bot_token: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let secret = Sha256::digest(bot_token.as_bytes());
        let mut mac = HmacSha256::new_from_slice(&secret).unwrap();
        mac.update(payload.data_check_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn payload() -> TelegramLoginPayload {
        TelegramLoginPayload {
            id: 42,
            first_name: Some("Anna".to_string()),
            last_name: None,
            username: Some("anna_photo".to_string()),
            photo_url: None,
            auth_date: 1_700_000_000,
            hash: String::new(),
        }
    }

    #[test]
    fn data_check_string_is_sorted() {
        assert_eq!(
            payload().data_check_string(),
            "auth_date=1700000000\nfirst_name=Anna\nid=42\nusername=anna_photo"
        );
    }

    #[test]
    fn valid_signature_is_accepted() {
        let mut p = payload();
        p.hash = sign(&p, "123:ABC");
        assert!(verify_login_payload(&p, "123:ABC", 1_700_000_100, 86400).is_ok());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let mut p = payload();
        p.hash = sign(&p, "123:ABC");
        p.id = 43;
        assert_eq!(
            verify_login_payload(&p, "123:ABC", 1_700_000_100, 86400),
            Err("Signature mismatch".to_string())
        );
    }

    #[test]
    fn outdated_payload_is_rejected() {
        let mut p = payload();
        p.hash = sign(&p, "123:ABC");
        assert!(verify_login_payload(&p, "123:ABC", 1_700_000_000 + 90_000, 86400).is_err());
    }

    #[test]
    fn escape_html_handles_markup() {
        assert_eq!(escape_html("<b>Tom & Jerry</b>"), "&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;");
    }

    #[tokio::test]
    async fn unreachable_server_is_an_api_error() {
        let client = TelegramClient::new("123:test".to_string())
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        let err = client.send_message(-100, None, "test").await.unwrap_err();
        assert!(matches!(err, AppError::TelegramApiError(_)));
    }
}

