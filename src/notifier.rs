use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::LarkConfig;

/// Refresh cached tokens this long before the platform says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Outbound messaging capability used by the dispatcher
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Obtain a bearer token for the messaging API.
    async fn acquire_token(&self) -> Result<String>;

    /// Post a plain text message to a chat.
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;

    /// Like `send_text`, but failures are logged and reported as `false`.
    async fn send(&self, chat_id: &str, text: &str) -> bool {
        match self.send_text(chat_id, text).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send message to chat {}: {:#}", chat_id, e);
                false
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    app_id: &'a str,
    app_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    expire: u64,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    receive_id: &'a str,
    msg_type: &'static str,
    /// JSON-encoded `{"text": ...}`
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

struct CachedToken {
    token: String,
    valid_until: Instant,
}

/// Notifier backed by the Lark open platform REST API
pub struct LarkNotifier {
    client: reqwest::Client,
    config: LarkConfig,
    token: Mutex<Option<CachedToken>>,
}

impl LarkNotifier {
    pub fn new(config: LarkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn fetch_token(&self) -> Result<(String, Duration)> {
        if self.config.app_id.is_empty() || self.config.app_secret.is_empty() {
            anyhow::bail!("Lark credentials are not configured");
        }

        let url = self.url("/auth/v3/tenant_access_token/internal");
        info!("Fetching tenant_access_token");

        let response = self
            .client
            .post(&url)
            .json(&TokenRequest {
                app_id: &self.config.app_id,
                app_secret: &self.config.app_secret,
            })
            .send()
            .await
            .context("Failed to request tenant_access_token")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Lark token endpoint error ({}): {}", status, body);
        }

        let body: TokenResponse = response
            .json()
            .await
            .context("Failed to parse tenant_access_token response")?;
        debug!("Token response code={} msg={}", body.code, body.msg);

        if body.code != 0 {
            anyhow::bail!("Lark token error {}: {}", body.code, body.msg);
        }
        let token = body
            .tenant_access_token
            .context("Token response carried no tenant_access_token")?;
        Ok((token, Duration::from_secs(body.expire)))
    }

    async fn cached_token(&self) -> Option<String> {
        let cached = self.token.lock().await;
        let token = cached
            .as_ref()
            .filter(|entry| Instant::now() < entry.valid_until)
            .map(|entry| entry.token.clone());
        token
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl Notifier for LarkNotifier {
    async fn acquire_token(&self) -> Result<String> {
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        // The lock is not held across the fetch, so concurrent requests each
        // wait at most one request timeout.
        let (token, lifetime) = self.fetch_token().await?;
        if let Some(ttl) = lifetime.checked_sub(TOKEN_EXPIRY_MARGIN) {
            *self.token.lock().await = Some(CachedToken {
                token: token.clone(),
                valid_until: Instant::now() + ttl,
            });
        }
        Ok(token)
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        let token = self.acquire_token().await?;
        let url = self.url("/im/v1/messages");
        let request = SendRequest {
            receive_id: chat_id,
            msg_type: "text",
            content: serde_json::json!({ "text": text }).to_string(),
        };

        info!("POST {} chat_id={}", url, chat_id);

        let response = self
            .client
            .post(&url)
            .query(&[("receive_id_type", "chat_id")])
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .context("Failed to send message to Lark")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: Option<ApiResponse> = serde_json::from_str(&body).ok();
        info!("Lark send status={} body={}", status, body);

        match parsed {
            Some(api) if status.is_success() && api.code == 0 => Ok(()),
            Some(api) => {
                warn!("Dropping cached token after send failure");
                self.invalidate_token().await;
                anyhow::bail!("Lark send error ({}) code={} msg={}", status, api.code, api.msg)
            }
            None => {
                self.invalidate_token().await;
                anyhow::bail!("Lark send error ({}): {}", status, body)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn config(base_url: &str) -> LarkConfig {
        LarkConfig {
            app_id: "cli_test".to_string(),
            app_secret: "secret".to_string(),
            base_url: base_url.to_string(),
            request_timeout_secs: 5,
        }
    }

    const TOKEN_OK: &str = r#"{"code":0,"msg":"ok","tenant_access_token":"t-abc","expire":7200}"#;

    #[tokio::test]
    async fn test_acquire_token_is_cached() {
        let mut server = Server::new_async().await;
        let token_mock = server
            .mock("POST", "/auth/v3/tenant_access_token/internal")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "app_id": "cli_test",
                "app_secret": "secret",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(TOKEN_OK)
            .expect(1)
            .create_async()
            .await;

        let notifier = LarkNotifier::new(config(&server.url())).unwrap();
        assert_eq!(notifier.acquire_token().await.unwrap(), "t-abc");
        assert_eq!(notifier.acquire_token().await.unwrap(), "t-abc");
        token_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_acquire_token_rejects_nonzero_code() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/v3/tenant_access_token/internal")
            .with_status(200)
            .with_body(r#"{"code":10003,"msg":"invalid param"}"#)
            .create_async()
            .await;

        let notifier = LarkNotifier::new(config(&server.url())).unwrap();
        let err = notifier.acquire_token().await.unwrap_err();
        assert!(err.to_string().contains("10003"));
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_without_request() {
        let mut cfg = config("http://127.0.0.1:9");
        cfg.app_secret.clear();
        let notifier = LarkNotifier::new(cfg).unwrap();
        assert!(notifier.acquire_token().await.is_err());
        assert!(!notifier.send("oc_1", "hello").await);
    }

    #[tokio::test]
    async fn test_send_posts_text_message() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/v3/tenant_access_token/internal")
            .with_status(200)
            .with_body(TOKEN_OK)
            .create_async()
            .await;
        let send_mock = server
            .mock("POST", "/im/v1/messages")
            .match_query(Matcher::UrlEncoded(
                "receive_id_type".into(),
                "chat_id".into(),
            ))
            .match_header("authorization", "Bearer t-abc")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "receive_id": "oc_42",
                "msg_type": "text",
                "content": "{\"text\":\"hej\"}",
            })))
            .with_status(200)
            .with_body(r#"{"code":0,"msg":"success","data":{}}"#)
            .create_async()
            .await;

        let notifier = LarkNotifier::new(config(&server.url())).unwrap();
        assert!(notifier.send("oc_42", "hej").await);
        send_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unresponsive_platform_does_not_serialize_senders() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let mut cfg = config(&format!("http://{addr}"));
        cfg.request_timeout_secs = 1;
        let notifier = LarkNotifier::new(cfg).unwrap();

        let started = Instant::now();
        let results = futures::future::join_all((0..4).map(|i| {
            let notifier = &notifier;
            async move { notifier.send(&format!("oc_{i}"), "hej").await }
        }))
        .await;

        assert!(results.iter().all(|delivered| !delivered));
        assert!(
            started.elapsed() < Duration::from_millis(2500),
            "senders waited {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_send_failure_reports_false_and_refreshes_token() {
        let mut server = Server::new_async().await;
        let token_mock = server
            .mock("POST", "/auth/v3/tenant_access_token/internal")
            .with_status(200)
            .with_body(TOKEN_OK)
            .expect(2)
            .create_async()
            .await;
        server
            .mock("POST", "/im/v1/messages")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":230002,"msg":"bot not in chat"}"#)
            .create_async()
            .await;

        let notifier = LarkNotifier::new(config(&server.url())).unwrap();
        assert!(!notifier.send("oc_42", "hej").await);
        assert!(!notifier.send("oc_42", "hej").await);
        token_mock.assert_async().await;
    }
}
