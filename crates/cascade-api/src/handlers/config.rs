//! /config handlers — the chain document clients check `config_hash` against.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use cascade_core::chain::ChainConfig;

use super::ApiState;

// ── /config/current ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ConfigResponse {
    pub hash: String,
    pub config: ChainConfig,
}

pub async fn handle_config_current(State(state): State<ApiState>) -> Json<ConfigResponse> {
    let (config, hash) = state.config.current_config();
    Json(ConfigResponse {
        hash,
        config: (*config).clone(),
    })
}
