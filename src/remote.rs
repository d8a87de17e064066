//! Client for the session server's SSE protocol.
//!
//! Sends one message per call to `POST /chat`, consumes the event stream,
//! mirrors `token` and `agent` events to callbacks, and returns the
//! concatenated tokens once `done` arrives. The session id carried by the
//! first `session` event is cached and sent with every later call.

use futures::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::types::StreamEvent;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport or non-2xx failure talking to the server.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server sent an `error` event.
    #[error("Server error: {0}")]
    Server(String),

    /// The stream ended without a terminal event.
    #[error("Stream ended without done or error")]
    UnexpectedEnd,

    #[error("Cancelled")]
    Cancelled,
}

/// Connection settings for a remote session.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Server URL, e.g. `http://127.0.0.1:8787`
    pub base_url: String,
    pub token: Option<String>,
    pub user_id: Option<String>,
}

/// A lazily-created conversation on a remote server.
pub struct RemoteSession {
    http: reqwest::Client,
    config: RemoteConfig,
    session_id: tokio::sync::Mutex<Option<String>>,
}

impl RemoteSession {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            session_id: tokio::sync::Mutex::new(None),
        }
    }

    /// The server-issued session id, once one has been received.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.lock().await.clone()
    }

    /// Send one message and stream the reply. Returns the trimmed
    /// concatenation of all `token` events.
    pub async fn send(
        &self,
        message: &str,
        on_token: Option<&(dyn Fn(&str) + Send + Sync)>,
        on_agent: Option<&(dyn Fn(&str, &str) + Send + Sync)>,
        cancel: &CancellationToken,
    ) -> Result<String, RemoteError> {
        let url = format!("{}/chat", self.config.base_url.trim_end_matches('/'));

        let mut body = json!({ "message": message });
        if let Some(id) = self.session_id.lock().await.clone() {
            body["sessionId"] = json!(id);
        }
        if let Some(user_id) = &self.config.user_id {
            body["userId"] = json!(user_id);
        }

        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let mut source = request
            .eventsource()
            .map_err(|e| RemoteError::Http(format!("{e}")))?;

        let mut answer = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    source.close();
                    return Err(RemoteError::Cancelled);
                }
                event = source.next() => match event {
                    None => break,
                    Some(Ok(Event::Open)) => {}
                    Some(Ok(Event::Message(message))) => {
                        let Ok(event) = serde_json::from_str::<StreamEvent>(&message.data) else {
                            continue;
                        };
                        match event {
                            StreamEvent::Session { session_id } => {
                                *self.session_id.lock().await = Some(session_id);
                            }
                            StreamEvent::Token { token } => {
                                if let Some(callback) = on_token {
                                    callback(&token);
                                }
                                answer.push_str(&token);
                            }
                            StreamEvent::Agent { name, content } => {
                                if let Some(callback) = on_agent {
                                    callback(&name, &content);
                                }
                            }
                            StreamEvent::Done => {
                                source.close();
                                return Ok(answer.trim().to_string());
                            }
                            StreamEvent::Error { message } => {
                                source.close();
                                return Err(RemoteError::Server(message));
                            }
                        }
                    }
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) => break,
                    Some(Err(error)) => {
                        source.close();
                        return Err(map_stream_error(error).await);
                    }
                }
            }
        }

        Err(RemoteError::UnexpectedEnd)
    }

    /// Reset the remote conversation. A no-op when no session exists yet.
    pub async fn reset(&self) -> Result<(), RemoteError> {
        let Some(id) = self.session_id.lock().await.clone() else {
            return Ok(());
        };

        let url = format!("{}/reset", self.config.base_url.trim_end_matches('/'));
        let mut request = self.http.post(&url).json(&json!({ "sessionId": id }));
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Http(format!("{e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Http(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }
}

async fn map_stream_error(error: reqwest_eventsource::Error) -> RemoteError {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            RemoteError::Http(format!("HTTP {status}: {body}"))
        }
        other => RemoteError::Http(format!("{other}")),
    }
}
