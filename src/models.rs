use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    backend::BackendLink, config::Settings, events::StateHub, templates::Templates,
    translate::Catalog,
};

/// Messages the light server sends on `/ws/backend`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendMessage {
    /// Take over as the one light server the gateway talks to.
    Register,
    Reply { id: Uuid, data: serde_json::Value },
    UpdateState { state: serde_json::Value },
}

/// Messages the gateway sends to the light server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    Registered { generation: u64 },
    Query { id: Uuid, payload: serde_json::Value },
    /// A newer registration replaced this connection.
    Superseded { generation: u64 },
}

/// Messages pushed to browsers on `/ws/client`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    PushState { state: serde_json::Value },
}

pub struct AppState {
    pub settings: Settings,
    pub backend: BackendLink,
    pub hub: StateHub,
    pub templates: Templates,
    pub catalog: Catalog,
}

impl AppState {
    pub fn new(settings: Settings, templates: Templates, catalog: Catalog) -> Self {
        Self {
            backend: BackendLink::new(settings.query_timeout()),
            hub: StateHub::new(),
            settings,
            templates,
            catalog,
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}
