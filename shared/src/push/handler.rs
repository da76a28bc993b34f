use super::connections::{remove_connection, save_connection};
use crate::token;
use crate::AppState;
use lambda_http::{http::StatusCode, Body, Error, Request, RequestExt, Response};
use std::{env, sync::Arc};

/// Handle push channel events ($connect, $disconnect)
pub async fn handle_socket_event(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let table_name = env::var("TABLE_NAME").unwrap_or_else(|_| "replanta".to_string());

    // API Gateway puts connection id and route key in headers for WebSocket events
    let connection_id = event
        .headers()
        .get("connectionid")
        .or_else(|| event.headers().get("connectionId"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let route_key = event
        .headers()
        .get("routekey")
        .or_else(|| event.headers().get("routeKey"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or(event.uri().path());

    tracing::info!(
        "Push channel event: {} for connection: {}",
        route_key,
        connection_id
    );

    match route_key {
        "$connect" => handle_connect(event, state, &table_name, &connection_id).await,
        "$disconnect" => handle_disconnect(state, &table_name, &connection_id).await,
        _ => {
            // The channel is server-to-client only; client messages are not routed
            tracing::warn!("Unknown push channel route: {}", route_key);
            Ok(Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Body::Empty)
                .map_err(Box::new)?)
        }
    }
}

/// $connect must present a valid token as a query parameter; browsers
/// cannot set an Authorization header on a WebSocket handshake
async fn handle_connect(
    event: Request,
    state: Arc<AppState>,
    table_name: &str,
    connection_id: &str,
) -> Result<Response<Body>, Error> {
    let Ok(secret) = env::var("JWT_SECRET") else {
        tracing::error!("JWT_SECRET is not configured");
        return Ok(Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::Empty)
            .map_err(Box::new)?);
    };

    let raw_token = event
        .query_string_parameters_ref()
        .and_then(|params| params.first("token"))
        .map(|s| s.to_string());

    let user_id = match raw_token.and_then(|t| token::verify(&secret, &t).ok()) {
        Some(claims) => claims.sub,
        None => {
            tracing::info!("Rejected unauthenticated connect: {}", connection_id);
            return Ok(Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(Body::Empty)
                .map_err(Box::new)?);
        }
    };

    tracing::info!("Push connect: {} (user: {})", connection_id, user_id);
    save_connection(&state.dynamo_client, table_name, connection_id, &user_id).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .body(Body::Empty)
        .map_err(Box::new)?)
}

async fn handle_disconnect(
    state: Arc<AppState>,
    table_name: &str,
    connection_id: &str,
) -> Result<Response<Body>, Error> {
    tracing::info!("Push disconnect: {}", connection_id);
    remove_connection(&state.dynamo_client, table_name, connection_id).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .body(Body::Empty)
        .map_err(Box::new)?)
}
