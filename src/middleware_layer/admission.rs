use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

use crate::{
    error::{AppError, Result},
    services::enricher::RequestSignals,
    session::{container::SessionHandle, expiring::EXPIRED_NOTICE, identity},
    state::AppState,
};

/// Runs the admission policy for authenticated requests.
///
/// An expired session is logged out and the request ends here with `401`.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an error `AppError`.
pub async fn enforce_admission(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response> {
    let Some(handle) = request.extensions().get::<SessionHandle>().cloned() else {
        return Ok(next.run(request).await);
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let signals = RequestSignals::from_request(request.headers(), peer);

    let outcome = {
        let mut container = handle.lock().await;
        match identity::current_user(&container) {
            Some(user_id) => Some(
                state
                    .admission
                    .evaluate(user_id, &mut container, &signals)
                    .await?,
            ),
            None => None,
        }
    };

    if let Some(outcome) = outcome {
        tracing::debug!("🛂 Admission outcome: {:?}", outcome);
        if outcome.terminates_request() {
            return Err(AppError::SessionExpired(EXPIRED_NOTICE.to_string()));
        }
    }

    Ok(next.run(request).await)
}
