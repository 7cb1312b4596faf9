//! Push payload parsing and the notification tray.
//!
//! The push provider delivers `{notification: {title, body, icon}, data: {...}}`
//! payloads. Parsing is strict about JSON but forgiving about fields: a
//! payload that is not valid JSON is logged and dropped whole, while missing
//! notification fields fall back to configured defaults. The `data` object is
//! carried onto the shown notification so click routing can read a target URL
//! from it later.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Unique identifier for a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Notification fields of a push payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationFields {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
}

/// A parsed push payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
    /// Notification content; all fields optional.
    #[serde(default)]
    pub notification: NotificationFields,

    /// Opaque data carried onto the notification (click routing reads
    /// `data.url` from here).
    #[serde(default)]
    pub data: JsonValue,
}

impl PushPayload {
    /// Resolve missing fields against the configured defaults.
    pub fn resolve(self, defaults: &NotificationDefaults) -> NotificationOptions {
        NotificationOptions {
            title: self
                .notification
                .title
                .unwrap_or_else(|| defaults.title.clone()),
            body: self
                .notification
                .body
                .unwrap_or_else(|| defaults.body.clone()),
            icon: self
                .notification
                .icon
                .unwrap_or_else(|| defaults.icon.clone()),
            data: self.data,
        }
    }
}

/// Fallback values for absent push payload fields.
#[derive(Debug, Clone)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "Sosika".to_string(),
            body: "You have a new update from Sosika".to_string(),
            icon: "/icons/sosika-192.png".to_string(),
        }
    }
}

/// Fully-resolved content for an OS notification.
#[derive(Debug, Clone)]
pub struct NotificationOptions {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub data: JsonValue,
}

/// A notification currently sitting in the OS tray.
#[derive(Debug, Clone)]
pub struct ShownNotification {
    pub id: NotificationId,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub data: JsonValue,
}

impl ShownNotification {
    /// The click-routing target carried in `data.url`, if any.
    pub fn target_url(&self) -> Option<&str> {
        self.data.get("url").and_then(|v| v.as_str())
    }
}

/// The set of notifications currently shown.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    shown: HashMap<NotificationId, ShownNotification>,
}

impl NotificationCenter {
    /// Create an empty notification center.
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a notification, returning its id.
    pub fn show(&mut self, options: NotificationOptions) -> NotificationId {
        let id = NotificationId::new();
        self.shown.insert(
            id,
            ShownNotification {
                id,
                title: options.title,
                body: options.body,
                icon: options.icon,
                data: options.data,
            },
        );
        id
    }

    /// Close a notification, returning it if it was shown.
    pub fn close(&mut self, id: NotificationId) -> Option<ShownNotification> {
        self.shown.remove(&id)
    }

    /// Get a shown notification.
    pub fn get(&self, id: NotificationId) -> Option<&ShownNotification> {
        self.shown.get(&id)
    }

    /// All currently shown notifications.
    pub fn shown(&self) -> Vec<&ShownNotification> {
        self.shown.values().collect()
    }

    /// Number of shown notifications.
    pub fn len(&self) -> usize {
        self.shown.len()
    }

    /// Whether the tray is empty.
    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_payload() {
        let payload: PushPayload = serde_json::from_str(
            r#"{"notification":{"title":"Order up","body":"Your biryani is on the way","icon":"/rider.png"},"data":{"url":"/orders"}}"#,
        )
        .unwrap();

        let options = payload.resolve(&NotificationDefaults::default());
        assert_eq!(options.title, "Order up");
        assert_eq!(options.body, "Your biryani is on the way");
        assert_eq!(options.icon, "/rider.png");
        assert_eq!(options.data, json!({"url": "/orders"}));
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let payload: PushPayload = serde_json::from_str(r#"{"notification":{}}"#).unwrap();

        let defaults = NotificationDefaults::default();
        let options = payload.resolve(&defaults);
        assert_eq!(options.title, defaults.title);
        assert_eq!(options.body, defaults.body);
        assert_eq!(options.icon, defaults.icon);
        assert!(options.data.is_null());
    }

    #[test]
    fn test_empty_object_parses() {
        let payload: PushPayload = serde_json::from_str("{}").unwrap();
        let options = payload.resolve(&NotificationDefaults::default());
        assert_eq!(options.title, "Sosika");
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(serde_json::from_str::<PushPayload>("not json at all").is_err());
        assert!(serde_json::from_str::<PushPayload>(r#"{"notification": 7}"#).is_err());
    }

    #[test]
    fn test_show_and_close() {
        let mut center = NotificationCenter::new();
        let id = center.show(NotificationOptions {
            title: "t".into(),
            body: "b".into(),
            icon: "i".into(),
            data: json!({"url": "/orders"}),
        });

        assert_eq!(center.len(), 1);
        assert_eq!(center.get(id).unwrap().target_url(), Some("/orders"));

        let closed = center.close(id).unwrap();
        assert_eq!(closed.id, id);
        assert!(center.is_empty());
        assert!(center.close(id).is_none());
    }

    #[test]
    fn test_target_url_absent() {
        let mut center = NotificationCenter::new();
        let id = center.show(NotificationOptions {
            title: "t".into(),
            body: "b".into(),
            icon: "i".into(),
            data: JsonValue::Null,
        });

        assert_eq!(center.get(id).unwrap().target_url(), None);
    }
}
