use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get},
    Router,
};
use tower_cookies::CookieManagerLayer;

use crate::{handlers, middleware_layer, state::AppState};

/// Builds the session management API with the full session stack.
///
/// Layers run outermost first: cookies, container load/persist, admission,
/// activity tracking, then the handler.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", get(handlers::sessions::list_sessions))
        .route(
            "/api/sessions/{session_id}",
            delete(handlers::sessions::delete_session),
        )
        .route("/api/notices", get(handlers::sessions::list_notices))
        .layer(from_fn_with_state(
            state.clone(),
            middleware_layer::activity::track_activity,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware_layer::admission::enforce_admission,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware_layer::session::load_session,
        ))
        .layer(CookieManagerLayer::new())
        .with_state(state)
}
