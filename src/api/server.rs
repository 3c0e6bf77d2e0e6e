use axum::{
    Router,
    routing::{get, patch, post, put},
};
use tower_http::decompression::RequestDecompressionLayer;

use super::{services, state::AppState};

/// All REST routes over the given state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(services::health))
        .route("/api/health", get(services::health))
        .route(
            "/api/schedules",
            get(services::list_schedules).post(services::create_schedule),
        )
        .route(
            "/api/schedules/{id}",
            put(services::update_schedule).delete(services::delete_schedule),
        )
        .route("/api/schedules/{id}/toggle", post(services::toggle_schedule))
        .route("/api/schedules/{id}/active", patch(services::set_schedule_active))
        .route("/api/executions", get(services::list_executions))
        .route(
            "/api/buffer-configs",
            get(services::list_buffer_configs).post(services::create_buffer_config),
        )
        .route(
            "/api/buffer-configs/{id}",
            put(services::update_buffer_config).delete(services::delete_buffer_config),
        )
        .route(
            "/api/forwarding-configs",
            get(services::list_forwarding_configs).post(services::create_forwarding_config),
        )
        .route(
            "/api/forwarding-configs/{id}",
            put(services::update_forwarding_config).delete(services::delete_forwarding_config),
        )
        .route("/api/webhook", post(services::webhook_without_buffer))
        .route("/api/webhook/{buffer_id}", post(services::receive_webhook))
        .route("/api/messages/received", get(services::list_received_messages))
        .route("/api/messages/forwarded", get(services::list_forwarded_messages))
        .route("/api/operators/resync", post(services::resync_triggers))
        .route("/api/operators/triggers", get(services::list_triggers))
        .with_state(state)
        // Automatically decompress gzip request bodies before the size limit applies
        .layer(RequestDecompressionLayer::new())
}
