use aws_sdk_apigatewaymanagement::Client as ApiGatewayManagementClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_sesv2::Client as SesClient;
use lambda_http::{run, service_fn, tracing, Error, Request};
use replanta_shared::AppState;
use std::sync::Arc;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    // Initialize AWS clients once at startup
    let config = aws_config::load_from_env().await;

    // API Gateway Management client for the push channel (optional endpoint)
    let api_gateway_client = std::env::var("WS_API_ENDPOINT").ok().map(|endpoint| {
        let api_config = aws_sdk_apigatewaymanagement::config::Builder::from(&config)
            .endpoint_url(endpoint)
            .build();
        ApiGatewayManagementClient::from_conf(api_config)
    });

    let state = AppState::new(
        DynamoClient::new(&config),
        SesClient::new(&config),
        api_gateway_client,
    );

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move {
            // WebSocket events arrive through the same entry point; API Gateway
            // marks them with a route key header ($connect / $disconnect)
            let is_socket_event = event
                .headers()
                .get("routekey")
                .or_else(|| event.headers().get("routeKey"))
                .is_some();

            if is_socket_event {
                replanta_shared::push::handler::handle_socket_event(event, state).await
            } else {
                http_handler::function_handler(event, state).await
            }
        }
    }))
    .await
}
