use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    serve, Json, Router,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::chat::{ChatEvent, ChatSession, TurnContext};
use crate::config::{AppConfig, Secrets};
use crate::constants::{EMBEDDING_DIMENSION, EMBEDDING_MODEL};
use crate::embedding::{Embedder, HfEmbedder};
use crate::error::ChatError;
use crate::index::{DiskIndexLoader, IndexLoader};
use crate::llm_interaction::{ChatModel, Generator, GroqClient};
use crate::profile::Profile;
use crate::retriever::{IndexRetriever, Retriever};

/// Builds the remote collaborators for a session. Swapped out in tests.
pub trait ServiceProvider: Send + Sync {
    fn embedder(&self, secrets: &Secrets) -> Arc<dyn Embedder>;
    fn generator(&self, secrets: &Secrets) -> Arc<dyn Generator>;
    fn index_loader(&self) -> Arc<dyn IndexLoader>;
}

/// Hosted embedding + LLM APIs and the on-disk index.
pub struct RemoteServices {
    index_dir: PathBuf,
}

impl RemoteServices {
    pub fn new(index_dir: PathBuf) -> Self {
        Self { index_dir }
    }
}

impl ServiceProvider for RemoteServices {
    fn embedder(&self, secrets: &Secrets) -> Arc<dyn Embedder> {
        Arc::new(HfEmbedder::new(secrets.hf_token.clone()))
    }

    fn generator(&self, secrets: &Secrets) -> Arc<dyn Generator> {
        Arc::new(GroqClient::new(secrets.groq_api_key.clone()))
    }

    fn index_loader(&self) -> Arc<dyn IndexLoader> {
        Arc::new(DiskIndexLoader::new(
            self.index_dir.clone(),
            EMBEDDING_MODEL,
            EMBEDDING_DIMENSION,
        ))
    }
}

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    config: Arc<AppConfig>,
    services: Arc<dyn ServiceProvider>,
}

impl AppState {
    pub fn new(config: AppConfig, services: Arc<dyn ServiceProvider>) -> Self {
        let templates = create_minijinja_env(config.templates.clone());
        Self {
            templates: Arc::new(templates),
            config: Arc::new(config),
            services,
        }
    }
}

/// Frames sent by the page script.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ask {
        question: String,
        #[serde(default)]
        model: Option<String>,
    },
}

/// Collaborators resolved once when a socket connects.
pub struct SessionServices {
    pub persona_name: String,
    pub retriever: Arc<dyn Retriever>,
    pub generator: Arc<dyn Generator>,
}

fn create_minijinja_env(templates_dir: PathBuf) -> AutoReloader {
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&templates_dir));
        notifier.watch_path(&templates_dir, true);
        Ok(env)
    })
}

/// Secrets and profile are checked on every render so fixing either takes
/// effect without a restart.
fn load_render_inputs(config: &AppConfig) -> Result<(Secrets, Profile), ChatError> {
    let secrets = Secrets::load(&config.secrets)?;
    let profile = Profile::load(&config.profile)?;
    Ok((secrets, profile))
}

fn model_ids() -> Vec<&'static str> {
    ChatModel::ALL.iter().map(|m| m.id()).collect()
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, Html<String>> {
    let context = match load_render_inputs(&state.config) {
        Ok((_, profile)) => minijinja::context! {
            title => profile.page_title(),
            heading => profile.chat_title(),
            persona => profile.name,
            models => model_ids(),
            default_model => ChatModel::default().id(),
        },
        Err(e) => {
            error!("Cannot render chat page: {}", e);
            minijinja::context! {
                title => "Chatbot",
                error => e.to_string(),
            }
        }
    };

    state
        .templates
        .acquire_env()
        .and_then(|env| env.get_template("index.html").and_then(|tmpl| tmpl.render(context)))
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            Html(format!("Internal Server Error: {}", e))
        })
}

async fn models_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "models": model_ids(),
        "default": ChatModel::default().id(),
    }))
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Loads everything a session needs. The index is cached on the session
/// only when it loads successfully.
pub async fn prepare_session(
    config: &AppConfig,
    services: &dyn ServiceProvider,
    session: &mut ChatSession,
) -> Result<SessionServices, ChatError> {
    let (secrets, profile) = load_render_inputs(config)?;
    let loader = services.index_loader();
    let index = session.ensure_index(loader.as_ref()).await?;
    let retriever = IndexRetriever::new(index, services.embedder(&secrets));

    Ok(SessionServices {
        persona_name: profile.name,
        retriever: Arc::new(retriever),
        generator: services.generator(&secrets),
    })
}

/// Handles one text frame from the page: parses it and runs a turn.
pub async fn handle_client_text(
    text: &str,
    session: &mut ChatSession,
    services: &SessionServices,
    events: &mpsc::UnboundedSender<ChatEvent>,
) {
    let (question, model) = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ask { question, model }) => (question, model),
        Err(e) => {
            warn!("Malformed client message: {}", e);
            let _ = events.send(ChatEvent::Error(format!("Malformed message: {}", e)));
            return;
        }
    };

    let model = match model.as_deref().map(str::parse::<ChatModel>).transpose() {
        Ok(model) => model.unwrap_or_default(),
        Err(e) => {
            let _ = events.send(ChatEvent::Error(e.to_string()));
            return;
        }
    };

    let ctx = TurnContext {
        persona_name: &services.persona_name,
        retriever: services.retriever.as_ref(),
        generator: services.generator.as_ref(),
        model,
    };
    session.run_turn(&ctx, &question, events).await;
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ChatEvent,
) -> std::result::Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json_msg) => sender.send(Message::Text(json_msg)).await,
        Err(e) => {
            error!("Failed to serialize chat event: {}", e);
            Ok(())
        }
    }
}

/// Pumps events from a session to its socket until the session side hangs
/// up or the client goes away.
async fn forward_events(
    mut sender: SplitSink<WebSocket, Message>,
    mut events: mpsc::UnboundedReceiver<ChatEvent>,
) {
    while let Some(event) = events.recv().await {
        if send_event(&mut sender, &event).await.is_err() {
            warn!("WebSocket client disconnected or send error. Closing connection.");
            return;
        }
    }
    let _ = sender.send(Message::Close(None)).await;
}

// One socket is one UI session; the session is dropped when the socket closes.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let (events, events_rx) = mpsc::unbounded_channel();
    let mut forwarder = tokio::spawn(forward_events(sender, events_rx));

    let mut session = ChatSession::new();
    info!(session = %session.id(), "New chat session");

    let services =
        match prepare_session(&state.config, state.services.as_ref(), &mut session).await {
            Ok(services) => services,
            Err(e) => {
                error!(session = %session.id(), "Session setup failed: {}", e);
                let _ = events.send(ChatEvent::Error(e.to_string()));
                drop(events);
                let _ = forwarder.await;
                return;
            }
        };

    let _ = events.send(ChatEvent::Transcript(session.transcript().to_vec()));

    let mut closed = false;
    while !closed {
        let msg = tokio::select! {
            msg = receiver.next() => msg,
            _ = &mut forwarder => break,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                let turn = handle_client_text(&text, &mut session, &services, &events);
                tokio::pin!(turn);
                // Keep reading the socket while the turn runs so questions
                // sent in the meantime are rejected instead of queued.
                loop {
                    tokio::select! {
                        _ = &mut turn => break,
                        incoming = receiver.next() => match incoming {
                            Some(Ok(Message::Text(_))) => {
                                warn!("Rejected question sent while a turn is in progress");
                                let _ = events.send(ChatEvent::Error(ChatError::Busy.to_string()));
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                                info!("Client left during a turn");
                                closed = true;
                                break;
                            }
                            Some(Ok(_)) => {}
                        },
                    }
                }
            }
            Some(Ok(Message::Binary(_))) => {
                warn!("Received unexpected binary message from client");
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                info!("Client requested WebSocket close");
                closed = true;
            }
            Some(Err(e)) => {
                warn!("WebSocket receive error: {}", e);
                closed = true;
            }
        }
    }

    drop(events);
    forwarder.abort();
    info!(
        session = %session.id(),
        entries = session.transcript().len(),
        "Chat session ended"
    );
}

pub fn build_router(state: AppState) -> Router {
    let static_files_service = ServeDir::new(&state.config.static_dir).not_found_service(
        tower::service_fn(|_req: Request| async {
            Ok::<_, std::convert::Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response())
        }),
    );

    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/api/models", get(models_handler))
        .route("/health", get(health_handler))
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(config: AppConfig, addr: SocketAddr) -> Result<()> {
    let services: Arc<dyn ServiceProvider> = Arc::new(RemoteServices::new(config.index_dir.clone()));
    let app = build_router(AppState::new(config, services));

    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
