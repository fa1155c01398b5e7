use crate::types::ObjectKey;
use serde::{Deserialize, Serialize};

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// A change notification for one custom resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub event_type: WatchEventType,
    pub key: ObjectKey,
    /// Resource version observed with the event (absent for deletions)
    pub resource_version: Option<String>,
}

impl ResourceEvent {
    /// Create an ADDED event
    pub fn added(key: ObjectKey, resource_version: impl Into<String>) -> Self {
        Self {
            event_type: WatchEventType::Added,
            key,
            resource_version: Some(resource_version.into()),
        }
    }

    /// Create a MODIFIED event
    pub fn modified(key: ObjectKey, resource_version: impl Into<String>) -> Self {
        Self {
            event_type: WatchEventType::Modified,
            key,
            resource_version: Some(resource_version.into()),
        }
    }

    /// Create a DELETED event
    pub fn deleted(key: ObjectKey) -> Self {
        Self {
            event_type: WatchEventType::Deleted,
            key,
            resource_version: None,
        }
    }

    /// Whether the event should trigger a sync; deletions are driven by
    /// deletionTimestamp and finalizers, never by the delete notification
    pub fn triggers_sync(&self) -> bool {
        !matches!(self.event_type, WatchEventType::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deleted_events_do_not_trigger_sync() {
        let key = ObjectKey::new("default", "build-1");
        assert!(ResourceEvent::added(key.clone(), "1").triggers_sync());
        assert!(ResourceEvent::modified(key.clone(), "2").triggers_sync());
        assert!(!ResourceEvent::deleted(key).triggers_sync());
    }

    #[test]
    fn test_event_serde() {
        let event = ResourceEvent::added(ObjectKey::new("ns", "a"), "7");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "ADDED");
        let back: ResourceEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
