use crate::notifications::{self, NewNotification};
use crate::responses;
use crate::types::{ApprovalStatus, NotificationKind, PromoteRequest, RejectRequest, Role, User};
use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{Body, Error, Response};
use std::collections::HashMap;

pub fn user_pk(user_id: &str) -> String {
    format!("USER#{}", user_id)
}

fn email_pk(email: &str) -> String {
    format!("EMAIL#{}", email.to_lowercase())
}

/// Map a DynamoDB item to a User
pub fn user_from_item(item: &HashMap<String, AttributeValue>) -> Option<User> {
    let user_id = item
        .get("PK")
        .and_then(|v| v.as_s().ok())
        .and_then(|s| s.strip_prefix("USER#"))?
        .to_string();
    let get_s = |key: &str| {
        item.get(key)
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
    };
    let get_bool = |key: &str, default: bool| {
        item.get(key)
            .and_then(|v| v.as_bool().ok())
            .copied()
            .unwrap_or(default)
    };

    Some(User {
        user_id,
        name: get_s("name").unwrap_or_default(),
        email: get_s("email").unwrap_or_default(),
        password_hash: get_s("password_hash").unwrap_or_default(),
        role: Role::parse(&get_s("role").unwrap_or_default())?,
        approval_status: ApprovalStatus::parse(&get_s("approval_status").unwrap_or_default())?,
        is_active: get_bool("is_active", true),
        phone: get_s("phone"),
        address: get_s("address"),
        notify_email: get_bool("notify_email", true),
        notify_push: get_bool("notify_push", true),
        created_at: get_s("created_at").unwrap_or_default(),
        last_login: get_s("last_login"),
    })
}

/// Fetch a user by id
pub async fn find_user(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Option<User>, Error> {
    let pk = user_pk(user_id);
    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .send()
        .await?;

    Ok(result.item().and_then(user_from_item))
}

/// Fetch a user through the email lookup item
pub async fn find_user_by_email(
    client: &DynamoClient,
    table_name: &str,
    email: &str,
) -> Result<Option<User>, Error> {
    let pk = email_pk(email);
    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .send()
        .await?;

    let user_id = match result
        .item()
        .and_then(|item| item.get("user_id"))
        .and_then(|v| v.as_s().ok())
    {
        Some(id) => id.to_string(),
        None => return Ok(None),
    };

    find_user(client, table_name, &user_id).await
}

/// Write the user document plus its email lookup item in one batch
pub async fn put_user(client: &DynamoClient, table_name: &str, user: &User) -> Result<(), Error> {
    let pk = user_pk(&user.user_id);
    let mut user_item = HashMap::new();
    user_item.insert("PK".to_string(), AttributeValue::S(pk.clone()));
    user_item.insert("SK".to_string(), AttributeValue::S(pk));
    user_item.insert("entity_type".to_string(), AttributeValue::S("user".to_string()));
    user_item.insert("name".to_string(), AttributeValue::S(user.name.clone()));
    user_item.insert("email".to_string(), AttributeValue::S(user.email.clone()));
    user_item.insert(
        "password_hash".to_string(),
        AttributeValue::S(user.password_hash.clone()),
    );
    user_item.insert(
        "role".to_string(),
        AttributeValue::S(user.role.as_str().to_string()),
    );
    user_item.insert(
        "approval_status".to_string(),
        AttributeValue::S(user.approval_status.as_str().to_string()),
    );
    user_item.insert("is_active".to_string(), AttributeValue::Bool(user.is_active));
    user_item.insert(
        "notify_email".to_string(),
        AttributeValue::Bool(user.notify_email),
    );
    user_item.insert(
        "notify_push".to_string(),
        AttributeValue::Bool(user.notify_push),
    );
    user_item.insert(
        "created_at".to_string(),
        AttributeValue::S(user.created_at.clone()),
    );
    if let Some(phone) = &user.phone {
        user_item.insert("phone".to_string(), AttributeValue::S(phone.clone()));
    }
    if let Some(address) = &user.address {
        user_item.insert("address".to_string(), AttributeValue::S(address.clone()));
    }
    if let Some(last_login) = &user.last_login {
        user_item.insert(
            "last_login".to_string(),
            AttributeValue::S(last_login.clone()),
        );
    }

    let epk = email_pk(&user.email);
    let mut email_item = HashMap::new();
    email_item.insert("PK".to_string(), AttributeValue::S(epk.clone()));
    email_item.insert("SK".to_string(), AttributeValue::S(epk));
    email_item.insert(
        "user_id".to_string(),
        AttributeValue::S(user.user_id.clone()),
    );

    client
        .batch_write_item()
        .request_items(
            table_name,
            vec![
                WriteRequest::builder()
                    .put_request(
                        PutRequest::builder()
                            .set_item(Some(user_item))
                            .build()
                            .map_err(Box::new)?,
                    )
                    .build(),
                WriteRequest::builder()
                    .put_request(
                        PutRequest::builder()
                            .set_item(Some(email_item))
                            .build()
                            .map_err(Box::new)?,
                    )
                    .build(),
            ],
        )
        .send()
        .await?;

    Ok(())
}

/// All admin users; used to fan out registration notifications
pub async fn list_admins(client: &DynamoClient, table_name: &str) -> Result<Vec<User>, Error> {
    let result = client
        .scan()
        .table_name(table_name)
        .filter_expression("entity_type = :type AND #role = :role")
        .expression_attribute_names("#role", "role")
        .expression_attribute_values(":type", AttributeValue::S("user".to_string()))
        .expression_attribute_values(":role", AttributeValue::S("admin".to_string()))
        .send()
        .await?;

    Ok(result.items().iter().filter_map(user_from_item).collect())
}

/// GET /api/users - list all users, optionally filtered by approval status
pub async fn list_users(
    client: &DynamoClient,
    table_name: &str,
    status_filter: Option<&str>,
) -> Result<Response<Body>, Error> {
    let result = client
        .scan()
        .table_name(table_name)
        .filter_expression("entity_type = :type")
        .expression_attribute_values(":type", AttributeValue::S("user".to_string()))
        .send()
        .await;

    let result = match result {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to list users: {:?}", e);
            return responses::service_unavailable();
        }
    };

    let mut users: Vec<User> = result.items().iter().filter_map(user_from_item).collect();
    if let Some(status) = status_filter {
        users.retain(|u| u.approval_status.as_str() == status);
    }
    users.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    responses::ok("Utilizadores carregados", &users)
}

async fn set_approval_status(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    status: ApprovalStatus,
) -> Result<(), Error> {
    let pk = user_pk(user_id);
    client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .update_expression("SET approval_status = :status, reviewed_at = :now")
        .expression_attribute_values(":status", AttributeValue::S(status.as_str().to_string()))
        .expression_attribute_values(
            ":now",
            AttributeValue::S(chrono::Utc::now().to_rfc3339()),
        )
        .send()
        .await?;
    Ok(())
}

/// PUT /api/users/{id}/approve - approve a pending registration
pub async fn approve_user(
    client: &DynamoClient,
    table_name: &str,
    admin_id: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    let mut user = match find_user(client, table_name, user_id).await {
        Ok(Some(u)) => u,
        Ok(None) => return responses::not_found("Utilizador não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch user {}: {:?}", user_id, e);
            return responses::service_unavailable();
        }
    };

    if user.approval_status != ApprovalStatus::Pending {
        return responses::conflict("Registo já foi processado");
    }

    if let Err(e) = set_approval_status(client, table_name, user_id, ApprovalStatus::Approved).await
    {
        tracing::error!("Failed to approve user {}: {:?}", user_id, e);
        return responses::service_unavailable();
    }
    user.approval_status = ApprovalStatus::Approved;

    // Delivery happens in the stream worker; failure here never fails the approval
    notifications::notify_best_effort(
        client,
        table_name,
        &user,
        NewNotification {
            sender_id: Some(admin_id.to_string()),
            kind: NotificationKind::UserApproved,
            title: "Conta aprovada".to_string(),
            message: format!(
                "Olá {}, a sua conta ReplantaSystem foi aprovada. Já pode iniciar sessão.",
                user.name
            ),
            project_id: None,
        },
    )
    .await;

    tracing::info!("User {} approved by {}", user_id, admin_id);
    responses::ok("Utilizador aprovado", &user)
}

/// PUT /api/users/{id}/reject - reject a pending registration
pub async fn reject_user(
    client: &DynamoClient,
    table_name: &str,
    admin_id: &str,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: RejectRequest = if body.is_empty() {
        RejectRequest::default()
    } else {
        match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(e) => return responses::bad_request(&format!("Pedido inválido: {}", e)),
        }
    };

    let mut user = match find_user(client, table_name, user_id).await {
        Ok(Some(u)) => u,
        Ok(None) => return responses::not_found("Utilizador não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch user {}: {:?}", user_id, e);
            return responses::service_unavailable();
        }
    };

    if user.approval_status != ApprovalStatus::Pending {
        return responses::conflict("Registo já foi processado");
    }

    if let Err(e) = set_approval_status(client, table_name, user_id, ApprovalStatus::Rejected).await
    {
        tracing::error!("Failed to reject user {}: {:?}", user_id, e);
        return responses::service_unavailable();
    }
    user.approval_status = ApprovalStatus::Rejected;

    let message = match &req.reason {
        Some(reason) => format!(
            "O seu registo no ReplantaSystem não foi aprovado. Motivo: {}",
            reason
        ),
        None => "O seu registo no ReplantaSystem não foi aprovado.".to_string(),
    };
    notifications::notify_best_effort(
        client,
        table_name,
        &user,
        NewNotification {
            sender_id: Some(admin_id.to_string()),
            kind: NotificationKind::UserRejected,
            title: "Registo não aprovado".to_string(),
            message,
            project_id: None,
        },
    )
    .await;

    tracing::info!("User {} rejected by {}", user_id, admin_id);
    responses::ok("Utilizador rejeitado", &user)
}

/// PUT /api/users/{id}/toggle-active - soft delete / restore
pub async fn toggle_active(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    let mut user = match find_user(client, table_name, user_id).await {
        Ok(Some(u)) => u,
        Ok(None) => return responses::not_found("Utilizador não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch user {}: {:?}", user_id, e);
            return responses::service_unavailable();
        }
    };

    user.is_active = !user.is_active;
    let pk = user_pk(user_id);
    let result = client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .update_expression("SET is_active = :active")
        .expression_attribute_values(":active", AttributeValue::Bool(user.is_active))
        .send()
        .await;

    if let Err(e) = result {
        tracing::error!("Failed to toggle user {}: {:?}", user_id, e);
        return responses::service_unavailable();
    }

    let message = if user.is_active {
        "Utilizador reativado"
    } else {
        "Utilizador desativado"
    };
    responses::ok(message, &user)
}

/// PUT /api/users/{id}/promote - change a user's role
pub async fn promote_user(
    client: &DynamoClient,
    table_name: &str,
    admin_id: &str,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: PromoteRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return responses::bad_request(&format!("Pedido inválido: {}", e)),
    };
    let new_role = match Role::parse(&req.role) {
        Some(r) => r,
        None => return responses::bad_request("Papel inválido"),
    };

    let mut user = match find_user(client, table_name, user_id).await {
        Ok(Some(u)) => u,
        Ok(None) => return responses::not_found("Utilizador não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch user {}: {:?}", user_id, e);
            return responses::service_unavailable();
        }
    };

    let pk = user_pk(user_id);
    let mut builder = client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .expression_attribute_names("#role", "role")
        .expression_attribute_values(":role", AttributeValue::S(new_role.as_str().to_string()));

    // Admins are auto-approved, on promotion as on registration
    if new_role == Role::Admin && user.approval_status != ApprovalStatus::Approved {
        builder = builder
            .update_expression("SET #role = :role, approval_status = :approved")
            .expression_attribute_values(
                ":approved",
                AttributeValue::S(ApprovalStatus::Approved.as_str().to_string()),
            );
        user.approval_status = ApprovalStatus::Approved;
    } else {
        builder = builder.update_expression("SET #role = :role");
    }

    if let Err(e) = builder.send().await {
        tracing::error!("Failed to promote user {}: {:?}", user_id, e);
        return responses::service_unavailable();
    }
    user.role = new_role;

    notifications::notify_best_effort(
        client,
        table_name,
        &user,
        NewNotification {
            sender_id: Some(admin_id.to_string()),
            kind: NotificationKind::RoleChanged,
            title: "Papel atualizado".to_string(),
            message: format!(
                "O seu papel no ReplantaSystem passou a ser '{}'.",
                new_role.as_str()
            ),
            project_id: None,
        },
    )
    .await;

    responses::ok("Papel atualizado", &user)
}
