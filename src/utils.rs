// utils.rs
use super::models::AppState;
use uuid::Uuid;
use tracing::info;

pub async fn cleanup_backend_connection(generation: u64, state: &AppState) {
    state.backend.detach(generation).await;
    info!("Light server connection {} closed", generation);
}

pub async fn cleanup_client_connection(client_id: Uuid, state: &AppState) {
    state.hub.unsubscribe(&client_id);
    info!("Client {} disconnected", client_id);
}
