use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;

use crate::{
    error::{AppError, Result},
    models::session_record::SessionRecord,
    session::{
        container::SessionHandle,
        identity,
        notice::{self, Notice},
    },
    state::AppState,
    validation::session::validate_session_id,
};

pub const SESSION_DELETED: &str = "Session successfully deleted.";
pub const SESSION_NOT_FOUND: &str = "Session not found.";

/// The response payload for session actions.
#[derive(Serialize)]
pub struct SessionActionResponse {
    pub success: bool,
    pub message: String,
}

/// One entry of the session list.
#[derive(Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub ip_address: IpAddr,
    pub city: Option<String>,
    pub country: Option<String>,
    pub browser_info: String,
    pub browser_icon: &'static str,
    pub device_info: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_current: bool,
}

#[derive(Serialize)]
struct SessionListResponse {
    sessions: Vec<SessionView>,
}

#[derive(Serialize)]
struct NoticeListResponse {
    notices: Vec<Notice>,
}

/// Icon class for the browser named first in `browser_info`.
pub fn browser_icon(browser_info: &str) -> &'static str {
    let family = browser_info.trim();
    let icons = [
        ("Internet Explorer", "fa-internet-explorer"),
        ("Chrome", "fa-chrome"),
        ("Firefox", "fa-firefox"),
        ("Safari", "fa-safari"),
        ("Edge", "fa-edge"),
        ("Opera", "fa-opera"),
    ];

    icons
        .iter()
        .find(|(name, _)| {
            family
                .strip_prefix(*name)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
        })
        .map(|(_, icon)| *icon)
        .unwrap_or("fa-question-circle")
}

impl SessionView {
    fn from_record(record: SessionRecord, current: Option<&str>) -> Self {
        let is_current = current == Some(record.container_id.as_str());
        Self {
            browser_icon: browser_icon(&record.browser_info),
            session_id: record.container_id,
            ip_address: record.ip_address,
            city: record.city,
            country: record.country,
            browser_info: record.browser_info,
            device_info: record.device_info,
            created_at: record.created_at,
            last_activity: record.last_activity,
            expires_at: record.expires_at,
            is_current,
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response> {
    let body = sonic_rs::to_string(body)?;
    Ok((status, [(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Lists the caller's sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
) -> Result<Response> {
    let (user_id, current) = {
        let container = handle.lock().await;
        let user_id = identity::current_user(&container).ok_or(AppError::Unauthenticated)?;
        (user_id, container.identifier().map(str::to_string))
    };

    let sessions = state
        .manager
        .list(user_id)
        .await?
        .into_iter()
        .map(|record| SessionView::from_record(record, current.as_deref()))
        .collect();

    json_response(StatusCode::OK, &SessionListResponse { sessions })
}

/// Revokes one of the caller's sessions.
///
/// Revoking the current session logs the caller out.
pub async fn delete_session(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
    Path(session_id): Path<String>,
) -> Result<Response> {
    validate_session_id(&session_id)?;

    let mut container = handle.lock().await;
    let user_id = identity::current_user(&container).ok_or(AppError::Unauthenticated)?;

    match state.manager.revoke(user_id, &session_id).await {
        Ok(()) => {
            if container.identifier() == Some(session_id.as_str()) {
                container.flush();
            }
            notice::push(&mut container, Notice::success(SESSION_DELETED))?;

            let response = SessionActionResponse {
                success: true,
                message: SESSION_DELETED.to_string(),
            };
            json_response(StatusCode::OK, &response)
        }
        Err(AppError::NotFound) => {
            notice::push(&mut container, Notice::error(SESSION_NOT_FOUND))?;

            let response = SessionActionResponse {
                success: false,
                message: SESSION_NOT_FOUND.to_string(),
            };
            json_response(StatusCode::NOT_FOUND, &response)
        }
        Err(e) => Err(e),
    }
}

/// Returns and clears the caller's pending notices.
pub async fn list_notices(Extension(handle): Extension<SessionHandle>) -> Result<Response> {
    let notices = notice::drain(&mut *handle.lock().await);
    json_response(StatusCode::OK, &NoticeListResponse { notices })
}
