//! HTTP route handlers and the session registry.
//!
//! Each session owns a conversation, a per-user workspace, and a log.
//! The `busy` flag serializes turns within a session; concurrent `/chat`
//! calls on the same session are rejected with 409. The flag is released
//! by a drop guard owned by the turn task, so client disconnects cannot
//! leak it.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::auth;
use super::types::{
    ApiError, ChatRequest, ResetRequest, SessionRequest, SessionResponse, StreamEvent,
};
use crate::agents::{AgentLoop, Confirm, DenyAll, EventSink, LoopEvent};
use crate::config::Config;
use crate::llm::{LlmClient, OpenAiClient};
use crate::logger::SessionLogger;
use crate::sandbox::ensure_root;
use crate::session::Session;
use crate::tools::ToolRegistry;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<ToolRegistry>,
    pub sessions: RwLock<HashMap<String, Arc<SessionRecord>>>,
}

/// One registered session.
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub busy: AtomicBool,
    pub session: Mutex<Session>,
    pub agent: AgentLoop,
}

/// Releases the busy flag no matter how the turn ends.
struct BusyGuard(Arc<SessionRecord>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::SeqCst);
    }
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(&config.llm));
    let http = reqwest::Client::new();
    let tools = Arc::new(ToolRegistry::with_catalog(
        llm.clone(),
        http,
        config.search_api_key.clone(),
    ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState {
        config,
        llm,
        tools,
        sessions: RwLock::new(HashMap::new()),
    });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Build the router. Everything except `/health` sits behind the bearer
/// middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/session", post(create_session))
        .route("/reset", post(reset_session))
        .route("/chat", post(chat))
        .route("/tools", get(list_tools))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn list_tools(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "tools": state.tools.list_tools() }))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<SessionRequest>>,
) -> Result<Json<SessionResponse>, ApiError> {
    let requested = body.and_then(|Json(b)| b.user_id);
    let user_id = resolve_user_id(requested, &headers);
    let record = create_session_record(&state, &user_id).await?;
    Ok(Json(SessionResponse {
        session_id: record.id.clone(),
    }))
}

async fn reset_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResetRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.session_id.is_empty() {
        return Err(ApiError::bad_request("Missing 'sessionId'"));
    }
    let record = state
        .sessions
        .read()
        .await
        .get(&body.session_id)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("Unknown session: {}", body.session_id)))?;

    record.session.lock().await.reset();
    tracing::info!(session = %record.id, "session reset");
    Ok(Json(json!({ "ok": true })))
}

/// Run one turn, streamed as SSE.
async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::bad_request("Missing 'message'"));
    }

    let user_id = resolve_user_id(body.user_id.clone(), &headers);
    let (record, is_new) =
        get_or_create_session(&state, body.session_id.as_deref(), &user_id).await?;

    // Set before any await point of the turn; released by the guard in
    // the turn task.
    if record
        .busy
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(ApiError::busy("Session is busy"));
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();
    let message = body.message.clone();
    let turn_record = record.clone();

    tokio::spawn(async move {
        let _guard = BusyGuard(turn_record.clone());
        let started = Instant::now();
        let input_chars = message.chars().count();
        let preview: String = message.chars().take(200).collect();
        tracing::info!(
            user = %turn_record.user_id,
            session = %turn_record.id,
            input_chars,
            est_input_tokens = estimate_tokens(input_chars),
            %preview,
            "chat turn start"
        );

        let sink: EventSink = {
            let tx = tx.clone();
            Arc::new(move |event| {
                let _ = tx.send(match event {
                    LoopEvent::Token(token) => StreamEvent::Token { token },
                    LoopEvent::AgentNote { name, content } => {
                        StreamEvent::Agent { name, content }
                    }
                });
            })
        };

        let cancel = CancellationToken::new();
        let mut session = turn_record.session.lock().await;
        let result = turn_record
            .agent
            .run_turn(&mut session, &message, Some(sink), &cancel)
            .await;
        drop(session);

        match result {
            Ok(text) => {
                let output_chars = text.chars().count();
                tracing::info!(
                    session = %turn_record.id,
                    input_chars,
                    output_chars,
                    est_input_tokens = estimate_tokens(input_chars),
                    est_output_tokens = estimate_tokens(output_chars),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "chat turn done"
                );
                let _ = tx.send(StreamEvent::Done);
            }
            Err(error) => {
                tracing::warn!(
                    session = %turn_record.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "chat turn failed: {error}"
                );
                let _ = tx.send(StreamEvent::Error {
                    message: format!("{error}"),
                });
            }
        }
    });

    let session_event = is_new.then(|| StreamEvent::Session {
        session_id: record.id.clone(),
    });

    let stream = async_stream::stream! {
        if let Some(event) = session_event {
            yield Ok::<Event, Infallible>(Event::default().json_data(&event).unwrap());
        }
        while let Some(event) = rx.recv().await {
            let terminal = matches!(event, StreamEvent::Done | StreamEvent::Error { .. });
            yield Ok(Event::default().json_data(&event).unwrap());
            if terminal {
                break;
            }
        }
    };

    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    );

    let mut response = sse.into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response_headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response_headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    Ok(response)
}

/// Body, then `X-User-Id` header, then `"default"`; sanitized.
fn resolve_user_id(body_user: Option<String>, headers: &HeaderMap) -> String {
    let raw = body_user
        .or_else(|| {
            headers
                .get("x-user-id")
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })
        .unwrap_or_else(|| "default".to_string());
    sanitize_user_id(&raw)
}

/// Restrict to `[A-Za-z0-9_-]`, truncate to 64 chars; blank becomes
/// `"default"`.
fn sanitize_user_id(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

fn estimate_tokens(chars: usize) -> usize {
    chars / 4
}

async fn get_or_create_session(
    state: &Arc<AppState>,
    session_id: Option<&str>,
    user_id: &str,
) -> Result<(Arc<SessionRecord>, bool), ApiError> {
    if let Some(id) = session_id {
        if let Some(record) = state.sessions.read().await.get(id) {
            return Ok((record.clone(), false));
        }
    }
    let record = create_session_record(state, user_id).await?;
    Ok((record, true))
}

async fn create_session_record(
    state: &Arc<AppState>,
    user_id: &str,
) -> Result<Arc<SessionRecord>, ApiError> {
    let workspace_dir = state.config.user_workspace(user_id);
    let root = ensure_root(&workspace_dir)
        .map_err(|e| ApiError::internal(format!("Failed to prepare workspace: {e}")))?;
    let logger = Arc::new(SessionLogger::create(&state.config.base_dir));
    let session = Session::with_system_prompt(
        root,
        user_id,
        logger,
        crate::session::system_prompt_with_tools(&state.tools),
    );
    let id = session.id.clone();

    // No interactive channel exists over HTTP: without auto-approve the
    // confirm collaborator always denies, so remote writes require the
    // operator to opt in.
    let confirm: Option<Arc<dyn Confirm>> = if state.config.agent.auto_approve {
        None
    } else {
        Some(Arc::new(DenyAll))
    };
    let agent = AgentLoop::new(
        state.llm.clone(),
        state.tools.clone(),
        state.config.agent.max_steps,
        state.config.agent.auto_approve,
        confirm,
    );

    let record = Arc::new(SessionRecord {
        id: id.clone(),
        user_id: user_id.to_string(),
        busy: AtomicBool::new(false),
        session: Mutex::new(session),
        agent,
    });
    state.sessions.write().await.insert(id, record.clone());
    tracing::info!(session = %record.id, user = %record.user_id, "session created");
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        ChatMessage, ChatOptions, ChatResponse, ChatStream, LlmError, StreamDelta, ToolDefinition,
    };
    use crate::remote::{RemoteConfig, RemoteSession};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::collections::VecDeque;

    /// Streams scripted token sequences; unary calls echo a fixed line.
    struct StreamLlm {
        scripts: std::sync::Mutex<VecDeque<Vec<&'static str>>>,
        delay: Duration,
    }

    impl StreamLlm {
        fn new(scripts: Vec<Vec<&'static str>>) -> Self {
            Self {
                scripts: std::sync::Mutex::new(scripts.into()),
                delay: Duration::ZERO,
            }
        }

        fn slow(scripts: Vec<Vec<&'static str>>, delay: Duration) -> Self {
            Self {
                scripts: std::sync::Mutex::new(scripts.into()),
                delay,
            }
        }
    }

    #[async_trait]
    impl LlmClient for StreamLlm {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _options: ChatOptions,
            _cancel: &CancellationToken,
        ) -> Result<ChatResponse, LlmError> {
            Ok(ChatResponse {
                content: Some("specialist note".to_string()),
                ..Default::default()
            })
        }

        async fn chat_stream(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _options: ChatOptions,
            _cancel: &CancellationToken,
        ) -> Result<ChatStream, LlmError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let tokens = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| vec!["fallback"]);
            let deltas: Vec<Result<StreamDelta, LlmError>> = tokens
                .into_iter()
                .map(|t| {
                    Ok(StreamDelta {
                        content: Some(t.to_string()),
                        tool_calls: vec![],
                    })
                })
                .collect();
            Ok(futures::stream::iter(deltas).boxed())
        }
    }

    async fn spawn_server(llm: Arc<dyn LlmClient>, token: Option<&str>) -> (String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.base_dir = dir.path().to_path_buf();
        config.server.token = token.map(String::from);

        let state = Arc::new(AppState {
            config,
            llm: llm.clone(),
            tools: Arc::new(ToolRegistry::empty()),
            sessions: RwLock::new(HashMap::new()),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        (format!("http://{addr}"), dir)
    }

    #[test]
    fn user_id_sanitization() {
        assert_eq!(sanitize_user_id("alice"), "alice");
        assert_eq!(sanitize_user_id("al/ice@example"), "al_ice_example");
        assert_eq!(sanitize_user_id(""), "default");
        assert_eq!(sanitize_user_id(&"x".repeat(100)).len(), 64);
    }

    #[tokio::test]
    async fn health_needs_no_auth() {
        let llm: Arc<dyn LlmClient> = Arc::new(StreamLlm::new(vec![]));
        let (base, _dir) = spawn_server(llm, Some("sekrit")).await;

        let response = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn bearer_token_is_enforced() {
        let llm: Arc<dyn LlmClient> = Arc::new(StreamLlm::new(vec![]));
        let (base, _dir) = spawn_server(llm, Some("sekrit")).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{base}/session"))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);

        let response = client
            .post(format!("{base}/session"))
            .bearer_auth("wrong")
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);

        let response = client
            .post(format!("{base}/session"))
            .bearer_auth("sekrit")
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["sessionId"].is_string());
    }

    #[tokio::test]
    async fn session_creation_builds_user_workspace() {
        let llm: Arc<dyn LlmClient> = Arc::new(StreamLlm::new(vec![]));
        let (base, dir) = spawn_server(llm, None).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{base}/session"))
            .json(&json!({"userId": "al/ice"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(dir.path().join("workspaces").join("al_ice").is_dir());
    }

    #[tokio::test]
    async fn reset_unknown_session_is_404() {
        let llm: Arc<dyn LlmClient> = Arc::new(StreamLlm::new(vec![]));
        let (base, _dir) = spawn_server(llm, None).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/reset"))
            .json(&json!({"sessionId": "nope"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("Unknown session"));
    }

    #[tokio::test]
    async fn chat_streams_session_tokens_done() {
        let llm: Arc<dyn LlmClient> =
            Arc::new(StreamLlm::new(vec![vec!["Hel", "lo ", "remote!"]]));
        let (base, _dir) = spawn_server(llm, None).await;

        let remote = RemoteSession::new(RemoteConfig {
            base_url: base.clone(),
            token: None,
            user_id: Some("alice".to_string()),
        });

        let tokens = Arc::new(std::sync::Mutex::new(Vec::new()));
        let collector = {
            let tokens = tokens.clone();
            move |token: &str| tokens.lock().unwrap().push(token.to_string())
        };

        let answer = remote
            .send("hi", Some(&collector), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(answer, "Hello remote!");
        assert_eq!(tokens.lock().unwrap().join(""), "Hello remote!");
        // The session id from the first `session` event is cached.
        let session_id = remote.session_id().await.expect("cached session id");

        // A second send reuses the session: no new registry entry.
        let answer = remote
            .send("again", None, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer, "fallback");
        assert_eq!(remote.session_id().await.as_deref(), Some(session_id.as_str()));
    }

    #[tokio::test]
    async fn concurrent_chat_on_same_session_is_409() {
        let llm: Arc<dyn LlmClient> = Arc::new(StreamLlm::slow(
            vec![vec!["slow"]],
            Duration::from_millis(300),
        ));
        let (base, _dir) = spawn_server(llm, None).await;
        let client = reqwest::Client::new();

        let created: serde_json::Value = client
            .post(format!("{base}/session"))
            .json(&json!({}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let session_id = created["sessionId"].as_str().unwrap().to_string();

        // First turn: hold the stream open while the slow model runs.
        let first = client
            .post(format!("{base}/chat"))
            .json(&json!({"message": "one", "sessionId": session_id}))
            .send()
            .await
            .unwrap();
        assert_eq!(first.status(), 200);

        // Busy was set before the first response's headers were sent.
        let second = client
            .post(format!("{base}/chat"))
            .json(&json!({"message": "two", "sessionId": session_id}))
            .send()
            .await
            .unwrap();
        assert_eq!(second.status(), 409);

        // Drain the first stream; the busy flag clears afterwards.
        let body = first.text().await.unwrap();
        assert!(body.contains("\"type\":\"done\""));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let third = client
            .post(format!("{base}/chat"))
            .json(&json!({"message": "three", "sessionId": session_id}))
            .send()
            .await
            .unwrap();
        assert_eq!(third.status(), 200);
    }

    #[tokio::test]
    async fn empty_message_is_400() {
        let llm: Arc<dyn LlmClient> = Arc::new(StreamLlm::new(vec![]));
        let (base, _dir) = spawn_server(llm, None).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/chat"))
            .json(&json!({"message": "  "}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }
}
