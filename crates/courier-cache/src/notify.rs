//! Change-notification channel and message format.

/// Pub/sub channel carrying cache change notifications.
pub const EVENT_LOG_CHANNEL: &str = "EventLogChannel";

/// Build the notification message published after a successful set.
///
/// The serialized value is embedded verbatim, so subscribers can log or
/// parse it without a second cache read.
#[must_use]
pub fn change_notification(key: &str, json: &str) -> String {
    format!("Value of '{}' changed to (json): {}", key, json)
}
