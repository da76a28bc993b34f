use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use replanta_shared::{auth, notifications, projects, responses, users, AppState};
use std::env;
use std::sync::Arc;

/// Main Lambda handler - routes requests across the API surface
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method().clone();
    let path = event.uri().path().to_string();
    tracing::info!("API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == Method::OPTIONS {
        return responses::preflight();
    }

    let table_name = env::var("TABLE_NAME").unwrap_or_else(|_| "replanta".to_string());
    let Ok(jwt_secret) = env::var("JWT_SECRET") else {
        tracing::error!("JWT_SECRET is not configured");
        return responses::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Erro de configuração do servidor",
        );
    };

    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();

    // Public endpoints, no token required
    match (&method, parts.as_slice()) {
        (&Method::POST, ["api", "auth", "register"]) => {
            return auth::register(
                &state.dynamo_client,
                &state.ses_client,
                &table_name,
                event.body(),
            )
            .await;
        }
        (&Method::POST, ["api", "auth", "login"]) => {
            return auth::login(&state.dynamo_client, &table_name, &jwt_secret, event.body()).await;
        }
        _ => {}
    }

    // Everything else requires a valid token
    let claims = match auth::authenticate(&event, &jwt_secret) {
        Ok(c) => c,
        Err(response) => return Ok(response),
    };
    let is_admin = claims.role == "admin";

    match (&method, parts.as_slice()) {
        (&Method::GET, ["api", "auth", "me"]) => {
            auth::me(&state.dynamo_client, &table_name, &claims).await
        }

        // User administration
        (&Method::GET, ["api", "users"]) => {
            if !is_admin {
                return responses::forbidden("Apenas administradores");
            }
            let status_filter = event
                .query_string_parameters_ref()
                .and_then(|params| params.first("status"))
                .map(|s| s.to_string());
            users::list_users(&state.dynamo_client, &table_name, status_filter.as_deref()).await
        }
        (&Method::PUT, ["api", "users", user_id, "approve"]) => {
            if !is_admin {
                return responses::forbidden("Apenas administradores");
            }
            users::approve_user(&state.dynamo_client, &table_name, &claims.sub, user_id).await
        }
        (&Method::PUT, ["api", "users", user_id, "reject"]) => {
            if !is_admin {
                return responses::forbidden("Apenas administradores");
            }
            users::reject_user(
                &state.dynamo_client,
                &table_name,
                &claims.sub,
                user_id,
                event.body(),
            )
            .await
        }
        (&Method::PUT, ["api", "users", user_id, "toggle-active"]) => {
            if !is_admin {
                return responses::forbidden("Apenas administradores");
            }
            users::toggle_active(&state.dynamo_client, &table_name, user_id).await
        }
        (&Method::PUT, ["api", "users", user_id, "promote"]) => {
            if !is_admin {
                return responses::forbidden("Apenas administradores");
            }
            users::promote_user(
                &state.dynamo_client,
                &table_name,
                &claims.sub,
                user_id,
                event.body(),
            )
            .await
        }

        // Projects
        (&Method::POST, ["api", "projects"]) => {
            projects::create_project(&state.dynamo_client, &table_name, &claims, event.body()).await
        }
        (&Method::GET, ["api", "projects"]) => {
            projects::list_projects(&state.dynamo_client, &table_name, &claims).await
        }
        (&Method::GET, ["api", "projects", project_id]) => {
            projects::get_project(&state.dynamo_client, &table_name, &claims, project_id).await
        }
        (&Method::PATCH, ["api", "projects", project_id]) => {
            projects::update_project(
                &state.dynamo_client,
                &table_name,
                &claims,
                project_id,
                event.body(),
            )
            .await
        }
        (&Method::DELETE, ["api", "projects", project_id]) => {
            projects::delete_project(&state.dynamo_client, &table_name, &claims, project_id).await
        }
        (&Method::POST, ["api", "projects", project_id, "collaborators"]) => {
            projects::add_collaborator(
                &state.dynamo_client,
                &table_name,
                &claims,
                project_id,
                event.body(),
            )
            .await
        }
        (&Method::POST, ["api", "projects", project_id, "tasks"]) => {
            projects::add_task(
                &state.dynamo_client,
                &table_name,
                &claims,
                project_id,
                event.body(),
            )
            .await
        }
        (&Method::PATCH, ["api", "projects", project_id, "tasks", task_id]) => {
            projects::update_task(
                &state.dynamo_client,
                &table_name,
                &claims,
                project_id,
                task_id,
                event.body(),
            )
            .await
        }
        (&Method::POST, ["api", "projects", project_id, "materials"]) => {
            projects::add_material(
                &state.dynamo_client,
                &table_name,
                &claims,
                project_id,
                event.body(),
            )
            .await
        }
        (&Method::POST, ["api", "projects", project_id, "notes"]) => {
            projects::add_note(
                &state.dynamo_client,
                &table_name,
                &claims,
                project_id,
                event.body(),
            )
            .await
        }

        // Notifications, always scoped to the caller
        (&Method::GET, ["api", "notifications"]) => {
            let unread_only = event
                .query_string_parameters_ref()
                .and_then(|params| params.first("unread"))
                .map(|v| v == "true")
                .unwrap_or(false);
            notifications::list_notifications(
                &state.dynamo_client,
                &table_name,
                &claims.sub,
                unread_only,
            )
            .await
        }
        (&Method::PATCH, ["api", "notifications", notification_id, "read"]) => {
            notifications::mark_read(
                &state.dynamo_client,
                &table_name,
                &claims.sub,
                notification_id,
            )
            .await
        }
        (&Method::PATCH, ["api", "notifications", "read-all"]) => {
            notifications::mark_all_read(&state.dynamo_client, &table_name, &claims.sub).await
        }
        (&Method::DELETE, ["api", "notifications", notification_id]) => {
            notifications::delete_notification(
                &state.dynamo_client,
                &table_name,
                &claims.sub,
                notification_id,
            )
            .await
        }

        (&Method::GET, _)
        | (&Method::POST, _)
        | (&Method::PUT, _)
        | (&Method::PATCH, _)
        | (&Method::DELETE, _) => responses::not_found("Rota não encontrada"),
        _ => responses::method_not_allowed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::Client as DynamoClient;
    use aws_sdk_sesv2::Client as SesClient;

    async fn test_state() -> Arc<AppState> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new("eu-west-1"))
            .load()
            .await;
        AppState::new(DynamoClient::new(&config), SesClient::new(&config), None)
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        std::env::set_var("JWT_SECRET", "segredo-de-teste");
        let mut request = Request::new(Body::Empty);
        *request.uri_mut() = "https://example.com/api/projects".parse().unwrap();

        let response = function_handler(request, test_state().await).await.unwrap();
        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn preflight_carries_cors_headers() {
        std::env::set_var("JWT_SECRET", "segredo-de-teste");
        let mut request = Request::new(Body::Empty);
        *request.method_mut() = Method::OPTIONS;
        *request.uri_mut() = "https://example.com/api/projects".parse().unwrap();

        let response = function_handler(request, test_state().await).await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(response
            .headers()
            .contains_key("Access-Control-Allow-Origin"));
    }
}
