use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::Error;
use serde::{Deserialize, Serialize};

/// Push channel connection stored in DynamoDB
#[derive(Debug, Serialize, Deserialize)]
pub struct Connection {
    pub connection_id: String,
    pub user_id: String,
    pub connected_at: String,
}

/// Save a push connection to DynamoDB
pub async fn save_connection(
    client: &DynamoClient,
    table_name: &str,
    connection_id: &str,
    user_id: &str,
) -> Result<(), Error> {
    let now = chrono::Utc::now().to_rfc3339();
    let pk = format!("CONNECTION#{}", connection_id);

    client
        .put_item()
        .table_name(table_name)
        .item("PK", AttributeValue::S(pk.clone()))
        .item("SK", AttributeValue::S(pk))
        .item(
            "connection_id",
            AttributeValue::S(connection_id.to_string()),
        )
        .item("user_id", AttributeValue::S(user_id.to_string()))
        .item("connected_at", AttributeValue::S(now))
        .item("entity_type", AttributeValue::S("connection".to_string()))
        .send()
        .await?;

    tracing::info!("Connection saved: {} (user: {})", connection_id, user_id);
    Ok(())
}

/// Remove a push connection from DynamoDB
pub async fn remove_connection(
    client: &DynamoClient,
    table_name: &str,
    connection_id: &str,
) -> Result<(), Error> {
    let pk = format!("CONNECTION#{}", connection_id);

    client
        .delete_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .send()
        .await?;

    tracing::info!("Connection removed: {}", connection_id);
    Ok(())
}

/// All open connections for one user; a user may have several devices
pub async fn list_user_connections(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Vec<Connection>, Error> {
    let mut connections = Vec::new();

    let result = client
        .scan()
        .table_name(table_name)
        .filter_expression("entity_type = :type AND user_id = :user_id")
        .expression_attribute_values(":type", AttributeValue::S("connection".to_string()))
        .expression_attribute_values(":user_id", AttributeValue::S(user_id.to_string()))
        .send()
        .await?;

    if let Some(items) = result.items {
        for item in items {
            if let (Some(conn_id), Some(user_id), Some(connected_at)) = (
                item.get("connection_id").and_then(|v| v.as_s().ok()),
                item.get("user_id").and_then(|v| v.as_s().ok()),
                item.get("connected_at").and_then(|v| v.as_s().ok()),
            ) {
                connections.push(Connection {
                    connection_id: conn_id.clone(),
                    user_id: user_id.clone(),
                    connected_at: connected_at.clone(),
                });
            }
        }
    }

    Ok(connections)
}
