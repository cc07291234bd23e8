// lib.rs
pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod configxml;
pub mod dashboard;
pub mod devices;
pub mod docs;
pub mod error;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod snapshot;
pub mod templates;
pub mod translate;
pub mod utils;

pub use models::AppState;

use axum::{
    Router,
    extract::State,
    routing::{get, post},
};
use handlers::*;
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/", get(render_index).post(handle_query))
        .route("/query", post(handle_query))
        .route("/js/app.ejs", get(render_app_script))
        .route("/getmodule", post(handle_get_module))
        .route("/configxml", post(handle_config_xml))
        .route("/ws/backend", get(handle_backend_ws_upgrade))
        .route("/ws/client", get(handle_client_ws_upgrade));

    for module in state.settings.modules.keys() {
        if !config::is_module_name(module) {
            tracing::warn!(module = %module, "Skipping module without a routable name");
            continue;
        }
        let name = module.clone();
        app = app.route(
            &format!("/{module}"),
            get(move |State(state): State<Arc<AppState>>| {
                let name = name.clone();
                async move { render_module(&state, &name) }
            }),
        );
    }

    app.merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", docs::ApiDoc::openapi()))
        .nest_service("/static", ServeDir::new(&state.settings.server.static_dir))
        .fallback(handle_fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
