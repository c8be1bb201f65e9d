//! HTTP Chat Transport
//!
//! Talks to a chat backend that accepts the request JSON on `/api/chat` and
//! answers with a plain-text streaming body. Every body chunk is a token; the
//! end of the body completes the message.
//!
//! A non-success status is not a transport failure: the body is forwarded as
//! [`StreamingToken::Error`] so the exchange can parse `{ "error": ... }` out
//! of it and show it to the user.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::traits::{ChatRequest, ChatTransport, StreamingToken};

/// Environment variable holding the backend base URL
pub const ENDPOINT_ENV: &str = "COMPOSER_ENDPOINT";

const DEFAULT_ENDPOINT: &str = "http://localhost:3000";

/// HTTP chat backend client
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport for a base URL
    ///
    /// Only connecting is bounded; a slow stream stays open until the backend
    /// ends it or the exchange is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Create from `COMPOSER_ENDPOINT`, falling back to localhost
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url =
            std::env::var(ENDPOINT_ENV).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        Self::new(base_url)
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

/// Decode as much of `pending` as forms complete UTF-8, keeping the rest
///
/// Invalid bytes become U+FFFD. A trailing incomplete sequence stays pending
/// until the next chunk completes it.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut start = 0;
    while start < pending.len() {
        match std::str::from_utf8(&pending[start..]) {
            Ok(valid) => {
                text.push_str(valid);
                start = pending.len();
            }
            Err(e) => {
                let valid_end = start + e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&pending[start..valid_end]));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        start = valid_end + len;
                    }
                    None => {
                        start = valid_end;
                        break;
                    }
                }
            }
        }
    }
    pending.drain(..start);
    text
}

#[async_trait]
impl ChatTransport for HttpTransport {
    fn name(&self) -> &'static str {
        "HTTP"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(&self.base_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn send_streaming(
        &self,
        request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let (tx, rx) = mpsc::channel(100);

        let response = self
            .http_client
            .post(self.chat_url())
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, chat_id = %request.chat_id, "Chat backend rejected request");
            tokio::spawn(async move {
                let _ = tx.send(StreamingToken::Error(body)).await;
            });
            return Ok(rx);
        }

        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut pending = Vec::new();
            let mut full_response = String::new();

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        pending.extend_from_slice(&bytes);
                        let token = drain_utf8(&mut pending);
                        if token.is_empty() {
                            continue;
                        }
                        full_response.push_str(&token);
                        if tx.send(StreamingToken::Token(token)).await.is_err() {
                            // Receiver dropped, stop streaming
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                }
            }

            if !pending.is_empty() {
                full_response.push_str(&String::from_utf8_lossy(&pending));
            }
            let _ = tx
                .send(StreamingToken::Complete {
                    message: full_response,
                })
                .await;
        });

        Ok(rx)
    }
}
