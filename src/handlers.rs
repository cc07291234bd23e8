// handlers.rs

use crate::{
    commands, configxml,
    error::AppError,
    models::{AppState, BackendMessage, GatewayMessage},
    utils,
};
use axum::{
    Form, Json,
    extract::{
        State, WebSocketUpgrade,
        rejection::FormRejection,
        ws::{Message, WebSocket},
    },
    http::{Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

pub async fn handle_backend_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("Light server connection attempt");
    ws.on_upgrade(|socket| handle_backend(socket, state))
}

pub async fn handle_client_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("Client connection attempt");
    ws.on_upgrade(|socket| handle_client(socket, state))
}

async fn handle_backend(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<GatewayMessage>();

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let superseded = matches!(msg, GatewayMessage::Superseded { .. });
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode gateway message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
            if superseded {
                let _ = sender.close().await;
                break;
            }
        }
    });

    let mut generation: Option<u64> = None;
    {
        let recv = async {
            while let Some(Ok(msg)) = receiver.next().await {
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                match serde_json::from_str::<BackendMessage>(text.as_str()) {
                    Ok(BackendMessage::Register) => {
                        generation = Some(state.backend.register(tx.clone()).await);
                    }
                    Ok(BackendMessage::Reply { id, data }) => match generation {
                        Some(current) => {
                            state.backend.deliver(current, id, data);
                        }
                        None => warn!(%id, "Reply from an unregistered connection"),
                    },
                    Ok(BackendMessage::UpdateState { state: pushed }) => {
                        let accepted = match generation {
                            Some(current) => state.backend.is_current(current).await,
                            None => false,
                        };
                        if accepted {
                            let receivers = state.hub.publish(pushed);
                            info!(receivers, "Pushed state to clients");
                        } else {
                            warn!("Rejecting state update from a stale connection");
                        }
                    }
                    Err(e) => warn!("Invalid message format: {}", e),
                }
            }
        };

        tokio::select! {
            _ = recv => send_task.abort(),
            _ = &mut send_task => {},
        };
    }

    if let Some(generation) = generation {
        utils::cleanup_backend_connection(generation, &state).await;
    }
}

async fn handle_client(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let client_id = Uuid::new_v4();
    let (mut rx, latest) = state.hub.subscribe(client_id);

    let send_task = tokio::spawn(async move {
        if let Some(msg) = latest {
            if let Ok(text) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
        }
        loop {
            let msg = match rx.recv().await {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%client_id, skipped, "Client fell behind on state pushes");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Ok(text) = serde_json::to_string(&msg) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::pin!(send_task, recv_task);
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    };

    utils::cleanup_client_connection(client_id, &state).await;
}

/// Dispatches a control or query operation named by the `reqtype` field.
#[utoipa::path(
    post,
    path = "/",
    request_body(content = crate::docs::QueryForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Reply of the light server, passed through"),
        (status = 400, description = "Missing request flag or unknown operation"),
        (status = 422, description = "Invalid parameters"),
        (status = 503, description = "No light server attached"),
        (status = 504, description = "Light server did not answer in time"),
    )
)]
pub async fn handle_query(
    State(state): State<Arc<AppState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Response, AppError> {
    run_query(state, form).await
}

/// POSTs to unrouted paths are queries too; older clients post to the page URL.
pub async fn handle_fallback(
    State(state): State<Arc<AppState>>,
    method: Method,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Response {
    if method != Method::POST {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    }
    match form {
        Ok(Form(form)) => run_query(state, form).await.into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn run_query(state: Arc<AppState>, form: HashMap<String, String>) -> Result<Response, AppError> {
    let (reqtype, command) = commands::parse(form).inspect_err(|e| {
        counter!("gateway_query_failures_total", "reason" => e.reason()).increment(1);
        warn!("Rejected query: {}", e);
    })?;
    counter!("gateway_queries_total", "reqtype" => reqtype.clone()).increment(1);
    info!(%reqtype, "Handling query");

    match command.execute(state).await {
        Ok(reply) => Ok(([(header::CONTENT_TYPE, reply.content_type)], reply.body).into_response()),
        Err(e) => {
            counter!("gateway_query_failures_total", "reason" => e.reason()).increment(1);
            warn!(%reqtype, "Query failed: {}", e);
            Err(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ModulePageForm {
    pub module_page: String,
}

pub async fn handle_get_module(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ModulePageForm>,
) -> Result<Html<String>, AppError> {
    render_module(&state, &form.module_page)
}

/// Converts the configurables XML to JSON, translating `tl` text.
#[utoipa::path(
    post,
    path = "/configxml",
    responses(
        (status = 200, description = "Configurables document as JSON"),
        (status = 500, description = "Missing or malformed XML file"),
    )
)]
pub async fn handle_config_xml(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let value = configxml::load_file(&state.settings.server.config_xml, &state.catalog).await?;
    Ok(Json(value))
}

pub async fn render_index(State(state): State<Arc<AppState>>) -> Result<Html<String>, AppError> {
    Ok(Html(state.templates.render("index", &state.catalog)?))
}

pub async fn render_app_script(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let script = state.templates.render("app", &state.catalog)?;
    Ok(([(header::CONTENT_TYPE, "application/javascript")], script).into_response())
}

/// Renders a module fragment through the module side table.
pub fn render_module(state: &AppState, module: &str) -> Result<Html<String>, AppError> {
    let template = state
        .settings
        .modules
        .get(module)
        .ok_or_else(|| AppError::ModuleNotFound(module.to_string()))?;
    Ok(Html(state.templates.render(template, &state.catalog)?))
}
