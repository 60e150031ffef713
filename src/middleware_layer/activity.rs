use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{
    error::Result,
    session::{container::SessionHandle, identity},
    state::AppState,
};

/// Stamps the current session's record with the time of this request.
pub async fn track_activity(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response> {
    if let Some(handle) = request.extensions().get::<SessionHandle>().cloned() {
        let (user_id, container_id) = {
            let container = handle.lock().await;
            (
                identity::current_user(&container),
                container.identifier().map(str::to_string),
            )
        };

        state.tracker.track(user_id, container_id.as_deref()).await?;
    }

    Ok(next.run(request).await)
}
