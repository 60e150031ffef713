use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::container::SessionContainer;

/// Reserved container key holding pending notices.
pub const NOTICES_KEY: &str = "_notices";

/// Severity of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A one-shot message shown to the user on their next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }
}

/// Queues `notice` in the container.
pub fn push(container: &mut SessionContainer, notice: Notice) -> Result<()> {
    let mut pending = peek(container);
    pending.push(notice);
    container.set_serialized(NOTICES_KEY, &pending)
}

/// Pending notices without consuming them.
pub fn peek(container: &SessionContainer) -> Vec<Notice> {
    container
        .get_deserialized::<Vec<Notice>>(NOTICES_KEY)
        .unwrap_or_default()
}

/// Removes and returns all pending notices.
pub fn drain(container: &mut SessionContainer) -> Vec<Notice> {
    let pending = peek(container);
    container.pop(NOTICES_KEY);
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_notices_queue_in_order_and_drain_once() {
        let mut container = SessionContainer::new(Utc::now() + Duration::days(1));
        push(&mut container, Notice::info("first")).unwrap();
        push(&mut container, Notice::error("second")).unwrap();

        let drained = drain(&mut container);

        assert_eq!(drained, vec![Notice::info("first"), Notice::error("second")]);
        assert!(drain(&mut container).is_empty());
        assert!(!container.contains_key(NOTICES_KEY));
    }
}
