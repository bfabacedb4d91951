// Logical name to broker resource name mapping
//
// Users and groups never collide on the broker because every resource name
// is namespace-prefixed; the name a user types is never used raw.

/// Namespace for per-user text queues.
pub const TEXT_NAMESPACE: &str = "chat.text";
/// Namespace for per-user file queues.
pub const FILE_NAMESPACE: &str = "chat.file";
/// Namespace for group exchanges.
pub const GROUP_NAMESPACE: &str = "chat.group";

/// Queue receiving text messages for `user`. The empty name yields the
/// bare namespace, a sentinel used for self-addressed system notices.
pub fn text_queue(user: &str) -> String {
    if user.is_empty() {
        TEXT_NAMESPACE.to_string()
    } else {
        format!("{TEXT_NAMESPACE}.{user}")
    }
}

/// Queue receiving file messages for `user`; same sentinel rule as
/// [`text_queue`].
pub fn file_queue(user: &str) -> String {
    if user.is_empty() {
        FILE_NAMESPACE.to_string()
    } else {
        format!("{FILE_NAMESPACE}.{user}")
    }
}

/// Exchange fanning out to the members of `group`. The empty name maps to
/// the default exchange, so a publish with no group routes point-to-point.
pub fn group_exchange(group: &str) -> String {
    if group.is_empty() {
        String::new()
    } else {
        format!("{GROUP_NAMESPACE}.{group}")
    }
}
