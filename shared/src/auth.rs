use crate::notifications::{self, NewNotification};
use crate::responses;
use crate::token::{self, Claims, TokenError};
use crate::types::{
    ApprovalStatus, LoginRequest, NotificationKind, RegisterRequest, Role, User,
};
use crate::users;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_sesv2::Client as SesClient;
use lambda_http::{Body, Error, Request, Response};

const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::from(format!("password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Account-level gate applied at login and on every /me call.
/// Returns the Portuguese message to surface when access is denied.
pub fn account_gate(user: &User) -> Result<(), &'static str> {
    if !user.is_active {
        return Err("Conta desativada");
    }
    match user.approval_status {
        ApprovalStatus::Approved => Ok(()),
        ApprovalStatus::Pending => Err("Conta a aguardar aprovação"),
        ApprovalStatus::Rejected => Err("Registo não aprovado"),
    }
}

/// Extract the Bearer token from the Authorization header
pub fn bearer_token(event: &Request) -> Option<String> {
    event
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Authenticate a request; on failure returns the response to send back
pub fn authenticate(event: &Request, secret: &str) -> Result<Claims, Response<Body>> {
    let token = match bearer_token(event) {
        Some(t) => t,
        None => {
            return Err(responses::unauthorized("Token de autenticação em falta")
                .expect("static response"))
        }
    };

    match token::verify(secret, &token) {
        Ok(claims) => Ok(claims),
        Err(TokenError::Expired) => {
            Err(responses::unauthorized("Sessão expirada").expect("static response"))
        }
        Err(_) => {
            Err(responses::unauthorized("Token inválido").expect("static response"))
        }
    }
}

fn valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

/// POST /api/auth/register
pub async fn register(
    dynamo_client: &DynamoClient,
    ses_client: &SesClient,
    table_name: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: RegisterRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return responses::bad_request(&format!("Pedido inválido: {}", e)),
    };

    if req.name.trim().is_empty() {
        return responses::bad_request("O nome é obrigatório");
    }
    if !valid_email(&req.email) {
        return responses::bad_request("Endereço de email inválido");
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return responses::bad_request("A palavra-passe deve ter pelo menos 8 caracteres");
    }
    let role = match Role::parse(&req.role) {
        Some(r) => r,
        None => return responses::bad_request("Papel inválido"),
    };

    // Duplicate email is allowed only when re-submitting a rejected registration
    let existing = match users::find_user_by_email(dynamo_client, table_name, &req.email).await {
        Ok(u) => u,
        Err(e) => {
            tracing::error!("Email lookup failed: {:?}", e);
            return responses::service_unavailable();
        }
    };
    let user_id = match existing {
        Some(u) if u.approval_status == ApprovalStatus::Rejected => {
            tracing::info!("Rejected account {} re-submitting registration", u.user_id);
            u.user_id
        }
        Some(_) => return responses::bad_request("Já existe uma conta com este email"),
        None => uuid::Uuid::new_v4().to_string(),
    };

    // Admins are auto-approved; clients and collaborators wait for review
    let approval_status = match role {
        Role::Admin => ApprovalStatus::Approved,
        _ => ApprovalStatus::Pending,
    };

    let user = User {
        user_id,
        name: req.name.trim().to_string(),
        email: req.email.to_lowercase(),
        password_hash: hash_password(&req.password)?,
        role,
        approval_status,
        is_active: true,
        phone: req.phone,
        address: req.address,
        notify_email: true,
        notify_push: true,
        created_at: chrono::Utc::now().to_rfc3339(),
        last_login: None,
    };

    if let Err(e) = users::put_user(dynamo_client, table_name, &user).await {
        tracing::error!("Failed to store user: {:?}", e);
        return responses::service_unavailable();
    }
    tracing::info!("User registered: {} ({})", user.user_id, user.role.as_str());

    // Best-effort side effects: confirmation email and admin notifications
    if let Err(e) =
        crate::email::send_registration_received_email(ses_client, &user.email, &user.name).await
    {
        tracing::warn!("Failed to send registration email: {}", e);
    }

    if approval_status == ApprovalStatus::Pending {
        match users::list_admins(dynamo_client, table_name).await {
            Ok(admins) => {
                for admin in admins {
                    notifications::notify_best_effort(
                        dynamo_client,
                        table_name,
                        &admin,
                        NewNotification {
                            sender_id: Some(user.user_id.clone()),
                            kind: NotificationKind::UserRegistered,
                            title: "Novo registo pendente".to_string(),
                            message: format!(
                                "{} registou-se como {} e aguarda aprovação.",
                                user.name,
                                user.role.as_str()
                            ),
                            project_id: None,
                        },
                    )
                    .await;
                }
            }
            Err(e) => tracing::warn!("Failed to list admins for notification: {:?}", e),
        }
    }

    responses::created("Registo efetuado com sucesso", &user)
}

/// POST /api/auth/login
pub async fn login(
    client: &DynamoClient,
    table_name: &str,
    jwt_secret: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: LoginRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return responses::bad_request(&format!("Pedido inválido: {}", e)),
    };

    let user = match users::find_user_by_email(client, table_name, &req.email).await {
        Ok(Some(u)) => u,
        // Same message for unknown email and wrong password
        Ok(None) => return responses::unauthorized("Credenciais inválidas"),
        Err(e) => {
            tracing::error!("Login lookup failed: {:?}", e);
            return responses::service_unavailable();
        }
    };

    if !verify_password(&req.password, &user.password_hash) {
        tracing::info!("Failed login attempt for {}", user.user_id);
        return responses::unauthorized("Credenciais inválidas");
    }

    if let Err(message) = account_gate(&user) {
        return responses::forbidden(message);
    }

    // Best-effort; a failed timestamp write never blocks the login
    let now = chrono::Utc::now().to_rfc3339();
    let pk = users::user_pk(&user.user_id);
    if let Err(e) = client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .update_expression("SET last_login = :login")
        .expression_attribute_values(":login", AttributeValue::S(now))
        .send()
        .await
    {
        tracing::warn!("Failed to record last_login for {}: {:?}", user.user_id, e);
    }

    let jwt = token::issue(jwt_secret, &user.user_id, &user.email, user.role.as_str())?;
    tracing::info!("User {} logged in", user.user_id);

    responses::ok(
        "Sessão iniciada",
        &serde_json::json!({
            "token": jwt,
            "expires_in": token::TOKEN_TTL_SECS,
            "user": user,
        }),
    )
}

/// GET /api/auth/me
pub async fn me(
    client: &DynamoClient,
    table_name: &str,
    claims: &Claims,
) -> Result<Response<Body>, Error> {
    let user = match users::find_user(client, table_name, &claims.sub).await {
        Ok(Some(u)) => u,
        Ok(None) => return responses::not_found("Utilizador não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch user {}: {:?}", claims.sub, e);
            return responses::service_unavailable();
        }
    };

    // A live token does not outlast deactivation or a revoked approval
    if let Err(message) = account_gate(&user) {
        return responses::forbidden(message);
    }

    responses::ok("Perfil carregado", &user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(approval: ApprovalStatus, active: bool) -> User {
        User {
            user_id: "u-1".to_string(),
            name: "Ana".to_string(),
            email: "ana@replanta.pt".to_string(),
            password_hash: String::new(),
            role: Role::Client,
            approval_status: approval,
            is_active: active,
            phone: None,
            address: None,
            notify_email: true,
            notify_push: true,
            created_at: "2025-01-01T00:00:00Z".to_string(),
            last_login: None,
        }
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("correcthorse").unwrap();
        assert!(verify_password("correcthorse", &hash));
        assert!(!verify_password("wronghorse", &hash));
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn pending_account_is_gated() {
        assert!(account_gate(&user(ApprovalStatus::Pending, true)).is_err());
        assert!(account_gate(&user(ApprovalStatus::Rejected, true)).is_err());
        assert!(account_gate(&user(ApprovalStatus::Approved, true)).is_ok());
    }

    #[test]
    fn deactivated_account_is_gated_even_when_approved() {
        assert!(account_gate(&user(ApprovalStatus::Approved, false)).is_err());
    }

    #[test]
    fn email_shape_validation() {
        assert!(valid_email("ana@replanta.pt"));
        assert!(!valid_email("ana"));
        assert!(!valid_email("ana@replanta"));
        assert!(!valid_email("@replanta.pt"));
    }
}
