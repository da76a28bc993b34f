use crate::types::Notification;
use serde::Serialize;

/// Message pushed to connected clients
#[derive(Debug, Serialize)]
pub struct PushMessage {
    pub r#type: String,
    pub data: serde_json::Value,
}

impl PushMessage {
    pub fn new(message_type: &str, data: serde_json::Value) -> Self {
        Self {
            r#type: message_type.to_string(),
            data,
        }
    }

    pub fn notification(notification: &Notification) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            "notification",
            serde_json::to_value(notification)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelState, NotificationKind, NotificationStatus};

    #[test]
    fn notification_message_carries_type_tag() {
        let n = Notification {
            notification_id: "n-1".to_string(),
            recipient_id: "u-1".to_string(),
            sender_id: None,
            kind: NotificationKind::TaskAssigned,
            title: "Nova tarefa".to_string(),
            message: "Tem uma nova tarefa.".to_string(),
            project_id: Some("p-1".to_string()),
            status: NotificationStatus::Pending,
            email: ChannelState::enabled(),
            push: ChannelState::enabled(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            expires_at: "2026-01-31T00:00:00Z".to_string(),
        };
        let msg = PushMessage::notification(&n).unwrap();
        assert_eq!(msg.r#type, "notification");
        assert_eq!(msg.data["notification_id"], "n-1");
        assert_eq!(msg.data["kind"], "task_assigned");
    }
}
