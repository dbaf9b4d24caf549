//! /status handler.

use axum::extract::State;
use axum::Json;

use cascade_services::CoordinatorStatus;

use super::ApiState;

pub async fn handle_status(State(state): State<ApiState>) -> Json<CoordinatorStatus> {
    Json(state.coordinator.status())
}
