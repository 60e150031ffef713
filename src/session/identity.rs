use uuid::Uuid;

use crate::error::Result;
use crate::session::container::SessionContainer;

/// Container key where the authentication layer keeps the user id.
pub const AUTH_USER_KEY: &str = "_auth_user_id";

/// The user id the authentication layer stored in this container, if any.
pub fn current_user(container: &SessionContainer) -> Option<Uuid> {
    container
        .get_deserialized::<String>(AUTH_USER_KEY)
        .and_then(|raw| Uuid::parse_str(&raw).ok())
}

/// Binds `user_id` to the container, rotating its id against fixation.
///
/// Called by the authentication layer after it has verified credentials.
pub fn login(container: &mut SessionContainer, user_id: Uuid) -> Result<()> {
    if current_user(container) != Some(user_id) {
        container.cycle_id();
    }
    container.set_serialized(AUTH_USER_KEY, &user_id.to_string())
}

/// Terminates the authenticated identity carried by a container.
///
/// Implementations must be idempotent: logging out an anonymous container
/// is a no-op from the caller's point of view.
pub trait LogoutHandler: Send + Sync {
    fn logout(&self, container: &mut SessionContainer);
}

/// Default logout: flush the whole container.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionLogout;

impl LogoutHandler for SessionLogout {
    fn logout(&self, container: &mut SessionContainer) {
        if let Some(user_id) = current_user(container) {
            tracing::debug!("👋 Logging out user {}", user_id);
        }
        container.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_login_then_logout() {
        let mut container = SessionContainer::new(Utc::now() + Duration::days(1));
        let user = Uuid::new_v4();
        assert_eq!(current_user(&container), None);

        login(&mut container, user).unwrap();
        assert_eq!(current_user(&container), Some(user));

        SessionLogout.logout(&mut container);
        assert_eq!(current_user(&container), None);

        SessionLogout.logout(&mut container);
        assert!(container.is_empty());
    }

    #[test]
    fn test_garbage_user_id_is_anonymous() {
        let mut container = SessionContainer::new(Utc::now() + Duration::days(1));
        container.set_serialized(AUTH_USER_KEY, "not-a-uuid").unwrap();

        assert_eq!(current_user(&container), None);
    }
}
