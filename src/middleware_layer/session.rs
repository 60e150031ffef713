use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};

use crate::{
    clock::Clock,
    crypto::token::is_well_formed_session_id,
    error::Result,
    session::container::{SessionContainer, SessionHandle},
    session::store::SessionStore,
    state::AppState,
};

/// Name of the cookie carrying the session identifier.
pub const SESSION_COOKIE: &str = "session_id";

/// Creates the session cookie for `value`.
///
/// # Arguments
///
/// * `value` - The session identifier.
/// * `max_age` - How long the browser keeps the cookie.
///
/// # Returns
///
/// A `Cookie` that is `HttpOnly`, `SameSite=Lax` and `Secure` in production.
fn create_secure_cookie(value: String, max_age: chrono::Duration) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, value);

    let is_production = std::env::var("APP_ENV")
        .unwrap_or_else(|_| "development".to_string()) == "production";

    cookie.set_http_only(true);
    if is_production {
        cookie.set_secure(true);
    }

    cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
    cookie.set_max_age(Duration::seconds(max_age.num_seconds()));
    cookie.set_path("/");

    cookie
}

/// Loads the request's session container and persists it after the response.
///
/// The container is available to inner layers and handlers as a
/// [`SessionHandle`] extension. A missing, malformed or expired cookie yields
/// a fresh container; it is only stored if something writes to it.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an error `AppError`.
pub async fn load_session(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    let cookie_id = cookies
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|id| is_well_formed_session_id(id));

    let loaded = match cookie_id.as_deref() {
        Some(id) => state.sessions.load(id).await?,
        None => None,
    };

    if cookie_id.is_some() && loaded.is_none() {
        tracing::debug!("🔑 Session cookie points to no live container");
    }

    let container = loaded
        .unwrap_or_else(|| SessionContainer::new(state.clock.now() + state.session_lifetime));
    let handle = SessionHandle::new(container);
    request.extensions_mut().insert(handle.clone());

    let response = next.run(request).await;

    let mut container = handle.lock().await;
    if container.is_modified() {
        container.set_expire_date(state.clock.now() + state.session_lifetime);
    }
    state.sessions.persist(&mut container).await?;

    match container.identifier() {
        Some(id) if cookie_id.as_deref() != Some(id) => {
            tracing::debug!("🍪 Issuing session cookie");
            cookies.add(create_secure_cookie(id.to_string(), state.session_lifetime));
        }
        None if cookie_id.is_some() => {
            let mut expired = Cookie::new(SESSION_COOKIE, "");
            expired.set_path("/");
            cookies.remove(expired);
        }
        _ => {}
    }

    Ok(response)
}
