pub mod types;
pub mod responses;
pub mod token;
pub mod auth;
pub mod users;
pub mod projects;
pub mod notifications;
pub mod email;
pub mod push;

use aws_sdk_apigatewaymanagement::Client as ApiGatewayManagementClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_sesv2::Client as SesClient;
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub dynamo_client: DynamoClient,
    pub ses_client: SesClient,
    pub api_gateway_client: Option<ApiGatewayManagementClient>,
}

impl AppState {
    pub fn new(
        dynamo_client: DynamoClient,
        ses_client: SesClient,
        api_gateway_client: Option<ApiGatewayManagementClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            dynamo_client,
            ses_client,
            api_gateway_client,
        })
    }
}
