use aws_lambda_events::event::dynamodb::{Event, EventRecord};
use aws_sdk_apigatewaymanagement::Client as ApiGatewayManagementClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_sesv2::Client as SesClient;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use replanta_shared::notifications::{self, ChannelOutcome};
use replanta_shared::push::broadcast::push_to_user;
use replanta_shared::push::messages::PushMessage;
use replanta_shared::{email, users};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    run(service_fn(function_handler)).await
}

/// Delivery worker: consumes the table stream and fans freshly created
/// notifications out over email and the push channel
async fn function_handler(event: LambdaEvent<Event>) -> Result<(), Error> {
    tracing::info!(
        "DynamoDB Stream event received with {} records",
        event.payload.records.len()
    );

    let config = aws_config::load_from_env().await;
    let dynamo_client = DynamoClient::new(&config);
    let ses_client = SesClient::new(&config);

    // Push delivery is disabled when no WebSocket endpoint is configured
    let api_gateway_client = std::env::var("WS_API_ENDPOINT").ok().map(|endpoint| {
        let api_config = aws_sdk_apigatewaymanagement::config::Builder::from(&config)
            .endpoint_url(endpoint)
            .build();
        ApiGatewayManagementClient::from_conf(api_config)
    });

    let table_name = std::env::var("TABLE_NAME").unwrap_or_else(|_| "replanta".to_string());
    let frontend_url =
        std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());

    for record in event.payload.records {
        if let Err(e) = process_record(
            &record,
            &dynamo_client,
            &ses_client,
            api_gateway_client.as_ref(),
            &table_name,
            &frontend_url,
        )
        .await
        {
            tracing::error!("Failed to process record: {}", e);
        }
    }

    Ok(())
}

/// Stream attributes arrive as DynamoDB JSON; a string key serializes as
/// either a bare string or {"S": "..."} depending on the events crate version
fn stream_attr_s(record: &EventRecord, key: &str) -> Option<String> {
    let attr = record.change.new_image.get(key)?;
    let value = serde_json::to_value(attr).ok()?;
    value.as_str().map(|s| s.to_string()).or_else(|| {
        value
            .get("S")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string())
    })
}

async fn process_record(
    record: &EventRecord,
    dynamo_client: &DynamoClient,
    ses_client: &SesClient,
    api_gateway_client: Option<&ApiGatewayManagementClient>,
    table_name: &str,
    frontend_url: &str,
) -> Result<(), Error> {
    // Delivery runs once, when the notification item first appears
    if record.event_name != "INSERT" {
        return Ok(());
    }

    let pk = stream_attr_s(record, "PK").ok_or("Missing PK")?;
    let sk = stream_attr_s(record, "SK").ok_or("Missing SK")?;

    let Some(recipient_id) = pk.strip_prefix("USER#") else {
        return Ok(());
    };
    let Some(notification_id) = sk.strip_prefix("NOTIFICATION#") else {
        return Ok(());
    };

    tracing::info!(
        "Delivering notification {} to user {}",
        notification_id,
        recipient_id
    );

    // Re-read through the SDK; the stream image shape is not worth parsing twice
    let notification =
        match notifications::get_notification(dynamo_client, table_name, recipient_id, notification_id)
            .await?
        {
            Some(n) => n,
            None => {
                tracing::warn!("Notification {} vanished before delivery", notification_id);
                return Ok(());
            }
        };
    if notification.status != replanta_shared::types::NotificationStatus::Pending {
        return Ok(());
    }

    let recipient = match users::find_user(dynamo_client, table_name, recipient_id).await? {
        Some(u) => u,
        None => {
            tracing::warn!("Recipient {} not found, skipping delivery", recipient_id);
            return Ok(());
        }
    };

    let email_outcome = if notification.email.enabled {
        match email::send_notification_email(
            ses_client,
            &recipient.email,
            &notification,
            frontend_url,
        )
        .await
        {
            Ok(()) => ChannelOutcome::Sent,
            Err(e) => {
                tracing::warn!("Email delivery failed for {}: {}", notification_id, e);
                ChannelOutcome::Failed(e)
            }
        }
    } else {
        ChannelOutcome::Skipped
    };

    let push_outcome = match (notification.push.enabled, api_gateway_client) {
        (true, Some(api_client)) => {
            let message = PushMessage::notification(&notification)?;
            let result = push_to_user(
                dynamo_client,
                api_client,
                table_name,
                recipient_id,
                &message,
            )
            .await;
            push_outcome(result, notification_id)
        }
        _ => ChannelOutcome::Skipped,
    };

    let status = notifications::record_delivery(
        dynamo_client,
        table_name,
        recipient_id,
        notification_id,
        email_outcome,
        push_outcome,
    )
    .await?;

    tracing::info!(
        "Notification {} delivery recorded as {}",
        notification_id,
        status.as_str()
    );

    Ok(())
}

/// The push channel only fails when a post errored. Zero open connections
/// completes cleanly; the notification stays visible in the in-app list.
fn push_outcome(result: Result<usize, Error>, notification_id: &str) -> ChannelOutcome {
    match result {
        Ok(0) => {
            tracing::info!("No open connections for notification {}", notification_id);
            ChannelOutcome::Sent
        }
        Ok(_) => ChannelOutcome::Sent,
        Err(e) => {
            tracing::warn!("Push delivery failed for {}: {}", notification_id, e);
            ChannelOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replanta_shared::notifications::final_status;
    use replanta_shared::types::NotificationStatus;

    #[test]
    fn no_open_connections_is_not_a_failure() {
        assert_eq!(push_outcome(Ok(0), "n-1"), ChannelOutcome::Sent);
        assert_eq!(push_outcome(Ok(3), "n-1"), ChannelOutcome::Sent);

        // Email bounced but the push channel completed: the document is sent
        assert_eq!(
            final_status(
                &ChannelOutcome::Failed("bounce".into()),
                &push_outcome(Ok(0), "n-1")
            ),
            NotificationStatus::Sent
        );
    }

    #[test]
    fn push_error_is_recorded_as_failure() {
        let outcome = push_outcome(Err(Error::from("gone")), "n-1");
        assert!(matches!(outcome, ChannelOutcome::Failed(_)));
    }
}
