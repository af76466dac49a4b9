use axum::{
    Router,
    routing::{get, post},
};

use veganbase_core::health::healthz;
use veganbase_core::middleware::{propagate_request_id_layer, request_id_layer, trace_layer};

use crate::handlers::{
    events::list_events,
    health::readyz,
    subscriptions::{
        create_subscription, delete_subscription, get_subscription, list_subscriptions,
        update_subscription,
    },
    test_event::send_test_event,
};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Subscriptions
        .route("/me/subscriptions", get(list_subscriptions))
        .route("/me/subscription", post(create_subscription))
        .route(
            "/me/subscription/{id}",
            get(get_subscription)
                .patch(update_subscription)
                .delete(delete_subscription),
        )
        // Event history
        .route("/me/events", get(list_events))
        // Test events
        .route("/webhooks/send-test-event", post(send_test_event))
        .layer(propagate_request_id_layer())
        .layer(trace_layer())
        .layer(request_id_layer())
        .with_state(state)
}
