use super::connections::{list_user_connections, remove_connection};
use super::messages::PushMessage;
use aws_sdk_apigatewaymanagement::Client as ApiGatewayManagementClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::Error;

/// Push a message to every open connection of one user.
/// Returns the number of connections that accepted the message.
pub async fn push_to_user(
    dynamo_client: &DynamoClient,
    api_gateway_client: &ApiGatewayManagementClient,
    table_name: &str,
    user_id: &str,
    message: &PushMessage,
) -> Result<usize, Error> {
    let connections = list_user_connections(dynamo_client, table_name, user_id).await?;
    let message_json = serde_json::to_string(message)?;

    tracing::info!(
        "Pushing to {} connections for user {}",
        connections.len(),
        user_id
    );

    let mut delivered = 0;
    for conn in connections {
        let result = api_gateway_client
            .post_to_connection()
            .connection_id(&conn.connection_id)
            .data(message_json.as_bytes().to_vec().into())
            .send()
            .await;

        match result {
            Ok(_) => delivered += 1,
            Err(e) => {
                tracing::warn!(
                    "Failed to send to connection {}: {}. Connection may be stale.",
                    conn.connection_id,
                    e
                );
                // A dead connection never comes back; drop the record
                remove_connection(dynamo_client, table_name, &conn.connection_id)
                    .await
                    .ok();
            }
        }
    }

    Ok(delivered)
}
