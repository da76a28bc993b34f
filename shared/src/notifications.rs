use crate::responses;
use crate::types::{ChannelState, Notification, NotificationKind, NotificationStatus, User};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};
use lambda_http::{Body, Error, Response};
use std::collections::HashMap;

/// Notification documents expire after 30 days (DynamoDB TTL on `ttl`)
pub const DEFAULT_EXPIRY_DAYS: i64 = 30;

pub struct NewNotification {
    pub sender_id: Option<String>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub project_id: Option<String>,
}

fn notification_sk(notification_id: &str) -> String {
    format!("NOTIFICATION#{}", notification_id)
}

/// Persist a notification document for a recipient. Channel flags honor the
/// recipient's preferences; delivery itself is the stream worker's job.
pub async fn create_notification(
    client: &DynamoClient,
    table_name: &str,
    recipient: &User,
    new: NewNotification,
) -> Result<Notification, Error> {
    let notification_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let expires_at = now + chrono::Duration::days(DEFAULT_EXPIRY_DAYS);

    let notification = Notification {
        notification_id: notification_id.clone(),
        recipient_id: recipient.user_id.clone(),
        sender_id: new.sender_id,
        kind: new.kind,
        title: new.title,
        message: new.message,
        project_id: new.project_id,
        status: NotificationStatus::Pending,
        email: if recipient.notify_email {
            ChannelState::enabled()
        } else {
            ChannelState::disabled()
        },
        push: if recipient.notify_push {
            ChannelState::enabled()
        } else {
            ChannelState::disabled()
        },
        created_at: now.to_rfc3339(),
        expires_at: expires_at.to_rfc3339(),
    };

    let mut put = client
        .put_item()
        .table_name(table_name)
        .item(
            "PK",
            AttributeValue::S(crate::users::user_pk(&recipient.user_id)),
        )
        .item("SK", AttributeValue::S(notification_sk(&notification_id)))
        .item("entity_type", AttributeValue::S("notification".to_string()))
        .item("notification_id", AttributeValue::S(notification_id))
        .item(
            "recipient_id",
            AttributeValue::S(notification.recipient_id.clone()),
        )
        .item(
            "kind",
            AttributeValue::S(notification.kind.as_str().to_string()),
        )
        .item("title", AttributeValue::S(notification.title.clone()))
        .item("message", AttributeValue::S(notification.message.clone()))
        .item(
            "status",
            AttributeValue::S(notification.status.as_str().to_string()),
        )
        .item(
            "email_enabled",
            AttributeValue::Bool(notification.email.enabled),
        )
        .item(
            "push_enabled",
            AttributeValue::Bool(notification.push.enabled),
        )
        .item(
            "created_at",
            AttributeValue::S(notification.created_at.clone()),
        )
        .item(
            "expires_at",
            AttributeValue::S(notification.expires_at.clone()),
        )
        .item("ttl", AttributeValue::N(expires_at.timestamp().to_string()));

    if let Some(sender_id) = &notification.sender_id {
        put = put.item("sender_id", AttributeValue::S(sender_id.clone()));
    }
    if let Some(project_id) = &notification.project_id {
        put = put.item("project_id", AttributeValue::S(project_id.clone()));
    }

    put.send().await?;
    Ok(notification)
}

/// Side-effect wrapper: a failed notification write never fails the caller
pub async fn notify_best_effort(
    client: &DynamoClient,
    table_name: &str,
    recipient: &User,
    new: NewNotification,
) {
    let kind = new.kind;
    if let Err(e) = create_notification(client, table_name, recipient, new).await {
        tracing::warn!(
            "Failed to create {} notification for {}: {:?}",
            kind.as_str(),
            recipient.user_id,
            e
        );
    }
}

pub fn notification_from_item(item: &HashMap<String, AttributeValue>) -> Option<Notification> {
    let get_s = |key: &str| {
        item.get(key)
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
    };
    let get_bool = |key: &str| {
        item.get(key)
            .and_then(|v| v.as_bool().ok())
            .copied()
            .unwrap_or(false)
    };

    Some(Notification {
        notification_id: get_s("notification_id")?,
        recipient_id: get_s("recipient_id")?,
        sender_id: get_s("sender_id"),
        kind: NotificationKind::parse(&get_s("kind")?)?,
        title: get_s("title").unwrap_or_default(),
        message: get_s("message").unwrap_or_default(),
        project_id: get_s("project_id"),
        status: NotificationStatus::parse(&get_s("status")?)?,
        email: ChannelState {
            enabled: get_bool("email_enabled"),
            sent_at: get_s("email_sent_at"),
            error: get_s("email_error"),
        },
        push: ChannelState {
            enabled: get_bool("push_enabled"),
            sent_at: get_s("push_sent_at"),
            error: get_s("push_error"),
        },
        created_at: get_s("created_at").unwrap_or_default(),
        expires_at: get_s("expires_at").unwrap_or_default(),
    })
}

/// TTL deletion lags; expired documents are filtered out of reads as well
pub fn is_expired(notification: &Notification, now: DateTime<Utc>) -> bool {
    match DateTime::parse_from_rfc3339(&notification.expires_at) {
        Ok(expires) => expires < now,
        Err(_) => false,
    }
}

pub async fn get_notification(
    client: &DynamoClient,
    table_name: &str,
    recipient_id: &str,
    notification_id: &str,
) -> Result<Option<Notification>, Error> {
    let result = client
        .get_item()
        .table_name(table_name)
        .key(
            "PK",
            AttributeValue::S(crate::users::user_pk(recipient_id)),
        )
        .key("SK", AttributeValue::S(notification_sk(notification_id)))
        .send()
        .await?;

    Ok(result.item().and_then(notification_from_item))
}

async fn query_notifications(
    client: &DynamoClient,
    table_name: &str,
    recipient_id: &str,
) -> Result<Vec<Notification>, Error> {
    let result = client
        .query()
        .table_name(table_name)
        .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
        .expression_attribute_values(
            ":pk",
            AttributeValue::S(crate::users::user_pk(recipient_id)),
        )
        .expression_attribute_values(
            ":sk_prefix",
            AttributeValue::S("NOTIFICATION#".to_string()),
        )
        .send()
        .await?;

    let now = Utc::now();
    let mut notifications: Vec<Notification> = result
        .items()
        .iter()
        .filter_map(notification_from_item)
        .filter(|n| !is_expired(n, now))
        .collect();
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(notifications)
}

/// GET /api/notifications - the caller's notifications, newest first
pub async fn list_notifications(
    client: &DynamoClient,
    table_name: &str,
    recipient_id: &str,
    unread_only: bool,
) -> Result<Response<Body>, Error> {
    let mut notifications = match query_notifications(client, table_name, recipient_id).await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("Failed to list notifications for {}: {:?}", recipient_id, e);
            return responses::service_unavailable();
        }
    };

    if unread_only {
        notifications.retain(|n| n.status != NotificationStatus::Read);
    }

    responses::ok("Notificações carregadas", &notifications)
}

async fn set_status(
    client: &DynamoClient,
    table_name: &str,
    recipient_id: &str,
    notification_id: &str,
    status: NotificationStatus,
) -> Result<(), Error> {
    client
        .update_item()
        .table_name(table_name)
        .key(
            "PK",
            AttributeValue::S(crate::users::user_pk(recipient_id)),
        )
        .key("SK", AttributeValue::S(notification_sk(notification_id)))
        .update_expression("SET #status = :status, read_at = :now")
        .expression_attribute_names("#status", "status")
        .expression_attribute_values(":status", AttributeValue::S(status.as_str().to_string()))
        .expression_attribute_values(":now", AttributeValue::S(Utc::now().to_rfc3339()))
        .send()
        .await?;
    Ok(())
}

/// PATCH /api/notifications/{id}/read
pub async fn mark_read(
    client: &DynamoClient,
    table_name: &str,
    recipient_id: &str,
    notification_id: &str,
) -> Result<Response<Body>, Error> {
    let mut notification =
        match get_notification(client, table_name, recipient_id, notification_id).await {
            Ok(Some(n)) => n,
            Ok(None) => return responses::not_found("Notificação não encontrada"),
            Err(e) => {
                tracing::error!("Failed to fetch notification {}: {:?}", notification_id, e);
                return responses::service_unavailable();
            }
        };

    if notification.status == NotificationStatus::Read {
        return responses::ok("Notificação já estava lida", &notification);
    }
    if !notification.status.can_transition(NotificationStatus::Read) {
        return responses::conflict("A notificação não pode ser marcada como lida");
    }

    if let Err(e) = set_status(
        client,
        table_name,
        recipient_id,
        notification_id,
        NotificationStatus::Read,
    )
    .await
    {
        tracing::error!("Failed to mark notification read: {:?}", e);
        return responses::service_unavailable();
    }
    notification.status = NotificationStatus::Read;

    responses::ok("Notificação marcada como lida", &notification)
}

/// PATCH /api/notifications/read-all
pub async fn mark_all_read(
    client: &DynamoClient,
    table_name: &str,
    recipient_id: &str,
) -> Result<Response<Body>, Error> {
    let notifications = match query_notifications(client, table_name, recipient_id).await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("Failed to list notifications for {}: {:?}", recipient_id, e);
            return responses::service_unavailable();
        }
    };

    let mut updated = 0usize;
    for notification in notifications {
        if notification.status.can_transition(NotificationStatus::Read)
            && notification.status != NotificationStatus::Read
        {
            match set_status(
                client,
                table_name,
                recipient_id,
                &notification.notification_id,
                NotificationStatus::Read,
            )
            .await
            {
                Ok(()) => updated += 1,
                Err(e) => tracing::warn!(
                    "Failed to mark notification {} read: {:?}",
                    notification.notification_id,
                    e
                ),
            }
        }
    }

    responses::ok(
        "Notificações marcadas como lidas",
        &serde_json::json!({ "updated": updated }),
    )
}

/// DELETE /api/notifications/{id}
pub async fn delete_notification(
    client: &DynamoClient,
    table_name: &str,
    recipient_id: &str,
    notification_id: &str,
) -> Result<Response<Body>, Error> {
    match get_notification(client, table_name, recipient_id, notification_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return responses::not_found("Notificação não encontrada"),
        Err(e) => {
            tracing::error!("Failed to fetch notification {}: {:?}", notification_id, e);
            return responses::service_unavailable();
        }
    }

    let result = client
        .delete_item()
        .table_name(table_name)
        .key(
            "PK",
            AttributeValue::S(crate::users::user_pk(recipient_id)),
        )
        .key("SK", AttributeValue::S(notification_sk(notification_id)))
        .send()
        .await;

    if let Err(e) = result {
        tracing::error!("Failed to delete notification {}: {:?}", notification_id, e);
        return responses::service_unavailable();
    }

    responses::no_content()
}

// ========== DELIVERY (stream worker) ==========

/// Outcome of one delivery channel attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Channel disabled by recipient preference or unavailable configuration
    Skipped,
    Sent,
    Failed(String),
}

/// Final document status after a delivery pass: any channel success counts as
/// sent, as does nothing-to-do; failed only when every enabled channel errored.
pub fn final_status(email: &ChannelOutcome, push: &ChannelOutcome) -> NotificationStatus {
    match (email, push) {
        (ChannelOutcome::Failed(_), ChannelOutcome::Failed(_)) => NotificationStatus::Failed,
        (ChannelOutcome::Failed(_), ChannelOutcome::Skipped) => NotificationStatus::Failed,
        (ChannelOutcome::Skipped, ChannelOutcome::Failed(_)) => NotificationStatus::Failed,
        _ => NotificationStatus::Sent,
    }
}

/// Record per-channel outcomes and move the document out of pending
pub async fn record_delivery(
    client: &DynamoClient,
    table_name: &str,
    recipient_id: &str,
    notification_id: &str,
    email: ChannelOutcome,
    push: ChannelOutcome,
) -> Result<NotificationStatus, Error> {
    let status = final_status(&email, &push);
    let now = Utc::now().to_rfc3339();

    let mut update_expr = vec!["#status = :status"];
    let mut builder = client
        .update_item()
        .table_name(table_name)
        .key(
            "PK",
            AttributeValue::S(crate::users::user_pk(recipient_id)),
        )
        .key("SK", AttributeValue::S(notification_sk(notification_id)))
        .expression_attribute_names("#status", "status")
        .expression_attribute_values(":status", AttributeValue::S(status.as_str().to_string()));

    match email {
        ChannelOutcome::Sent => {
            update_expr.push("email_sent_at = :email_at");
            builder = builder.expression_attribute_values(":email_at", AttributeValue::S(now.clone()));
        }
        ChannelOutcome::Failed(err) => {
            update_expr.push("email_error = :email_err");
            builder = builder.expression_attribute_values(":email_err", AttributeValue::S(err));
        }
        ChannelOutcome::Skipped => {}
    }
    match push {
        ChannelOutcome::Sent => {
            update_expr.push("push_sent_at = :push_at");
            builder = builder.expression_attribute_values(":push_at", AttributeValue::S(now));
        }
        ChannelOutcome::Failed(err) => {
            update_expr.push("push_error = :push_err");
            builder = builder.expression_attribute_values(":push_err", AttributeValue::S(err));
        }
        ChannelOutcome::Skipped => {}
    }

    builder
        .update_expression(format!("SET {}", update_expr.join(", ")))
        .send()
        .await?;

    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_status_any_success_is_sent() {
        assert_eq!(
            final_status(&ChannelOutcome::Sent, &ChannelOutcome::Failed("x".into())),
            NotificationStatus::Sent
        );
        assert_eq!(
            final_status(&ChannelOutcome::Sent, &ChannelOutcome::Sent),
            NotificationStatus::Sent
        );
    }

    #[test]
    fn final_status_nothing_enabled_is_sent() {
        assert_eq!(
            final_status(&ChannelOutcome::Skipped, &ChannelOutcome::Skipped),
            NotificationStatus::Sent
        );
    }

    #[test]
    fn final_status_all_enabled_failed_is_failed() {
        assert_eq!(
            final_status(
                &ChannelOutcome::Failed("smtp".into()),
                &ChannelOutcome::Failed("ws".into())
            ),
            NotificationStatus::Failed
        );
        assert_eq!(
            final_status(&ChannelOutcome::Failed("smtp".into()), &ChannelOutcome::Skipped),
            NotificationStatus::Failed
        );
    }

    #[test]
    fn expired_notifications_are_detected() {
        let mut n = Notification {
            notification_id: "n-1".to_string(),
            recipient_id: "u-1".to_string(),
            sender_id: None,
            kind: NotificationKind::UserApproved,
            title: String::new(),
            message: String::new(),
            project_id: None,
            status: NotificationStatus::Pending,
            email: ChannelState::enabled(),
            push: ChannelState::enabled(),
            created_at: "2025-01-01T00:00:00Z".to_string(),
            expires_at: "2025-01-31T00:00:00Z".to_string(),
        };
        let now = "2025-02-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(is_expired(&n, now));

        n.expires_at = "2025-03-01T00:00:00Z".to_string();
        assert!(!is_expired(&n, now));
    }
}
