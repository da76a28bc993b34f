use crate::notifications::{self, NewNotification};
use crate::responses;
use crate::token::Claims;
use crate::types::{
    compute_progress, AddCollaboratorRequest, AddMaterialRequest, AddNoteRequest, ApprovalStatus,
    CollaboratorRef, CreateProjectRequest, CreateTaskRequest, Material, NoteEntry,
    NotificationKind, Project, ProjectStatus, Role, Task, TaskStatus, UpdateProjectRequest,
    UpdateTaskRequest,
};
use crate::users;
use aws_sdk_dynamodb::types::{AttributeValue, DeleteRequest, PutRequest, WriteRequest};
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{Body, Error, Response};
use std::collections::HashMap;

fn project_pk(project_id: &str) -> String {
    format!("PROJECT#{}", project_id)
}

fn is_admin(claims: &Claims) -> bool {
    claims.role == Role::Admin.as_str()
}

fn parse_json_list<T: serde::de::DeserializeOwned>(
    item: &HashMap<String, AttributeValue>,
    key: &str,
) -> Vec<T> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .map(|s| serde_json::from_str(s).unwrap_or_default())
        .unwrap_or_default()
}

pub fn project_from_item(item: &HashMap<String, AttributeValue>) -> Option<Project> {
    let project_id = item
        .get("PK")
        .and_then(|v| v.as_s().ok())
        .and_then(|s| s.strip_prefix("PROJECT#"))?
        .to_string();
    let get_s = |key: &str| {
        item.get(key)
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
    };
    let get_n = |key: &str| {
        item.get(key)
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse::<f64>().ok())
    };

    Some(Project {
        project_id,
        title: get_s("title").unwrap_or_default(),
        description: get_s("description").unwrap_or_default(),
        client_id: get_s("client_id")?,
        address: get_s("address"),
        lat: get_n("lat"),
        lng: get_n("lng"),
        status: ProjectStatus::parse(&get_s("status").unwrap_or_default())?,
        collaborators: parse_json_list(item, "collaborators"),
        tasks: parse_json_list(item, "tasks"),
        materials: parse_json_list(item, "materials"),
        notes: parse_json_list(item, "notes"),
        progress: item
            .get("progress")
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse::<u8>().ok())
            .unwrap_or(0),
        created_at: get_s("created_at").unwrap_or_default(),
        updated_at: get_s("updated_at").unwrap_or_default(),
    })
}

pub async fn load_project(
    client: &DynamoClient,
    table_name: &str,
    project_id: &str,
) -> Result<Option<Project>, Error> {
    let pk = project_pk(project_id);
    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .send()
        .await?;

    Ok(result.item().and_then(project_from_item))
}

/// Persist the embedded collections and derived progress after a mutation
async fn save_collections(
    client: &DynamoClient,
    table_name: &str,
    project: &Project,
) -> Result<(), Error> {
    let pk = project_pk(&project.project_id);
    client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .update_expression(
            "SET collaborators = :collaborators, tasks = :tasks, materials = :materials, \
             notes = :notes, progress = :progress, updated_at = :now",
        )
        .expression_attribute_values(
            ":collaborators",
            AttributeValue::S(serde_json::to_string(&project.collaborators)?),
        )
        .expression_attribute_values(
            ":tasks",
            AttributeValue::S(serde_json::to_string(&project.tasks)?),
        )
        .expression_attribute_values(
            ":materials",
            AttributeValue::S(serde_json::to_string(&project.materials)?),
        )
        .expression_attribute_values(
            ":notes",
            AttributeValue::S(serde_json::to_string(&project.notes)?),
        )
        .expression_attribute_values(":progress", AttributeValue::N(project.progress.to_string()))
        .expression_attribute_values(":now", AttributeValue::S(chrono::Utc::now().to_rfc3339()))
        .send()
        .await?;
    Ok(())
}

async fn notify_client_best_effort(
    client: &DynamoClient,
    table_name: &str,
    project: &Project,
    sender_id: &str,
    kind: NotificationKind,
    title: String,
    message: String,
) {
    // Actors never notify themselves about their own change
    if project.client_id == sender_id {
        return;
    }
    let recipient = match users::find_user(client, table_name, &project.client_id).await {
        Ok(Some(u)) => u,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("Failed to load project client for notification: {:?}", e);
            return;
        }
    };
    notifications::notify_best_effort(
        client,
        table_name,
        &recipient,
        NewNotification {
            sender_id: Some(sender_id.to_string()),
            kind,
            title,
            message,
            project_id: Some(project.project_id.clone()),
        },
    )
    .await;
}

/// POST /api/projects - clients create their own; admins may create for a client
pub async fn create_project(
    client: &DynamoClient,
    table_name: &str,
    claims: &Claims,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateProjectRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return responses::bad_request(&format!("Pedido inválido: {}", e)),
    };

    if req.title.trim().is_empty() {
        return responses::bad_request("O título é obrigatório");
    }

    // Clients create their own projects; admins always act on behalf of a client
    let client_id = match (&req.client_id, is_admin(claims)) {
        (Some(id), true) => id.clone(),
        (Some(_), false) => {
            return responses::forbidden("Apenas administradores criam projetos para terceiros")
        }
        (None, true) => return responses::bad_request("Indique o cliente do projeto"),
        (None, false) => {
            if claims.role != Role::Client.as_str() {
                return responses::forbidden("Apenas clientes podem pedir projetos");
            }
            claims.sub.clone()
        }
    };

    // When an admin creates on behalf of a client, the client must exist
    if client_id != claims.sub {
        match users::find_user(client, table_name, &client_id).await {
            Ok(Some(u)) if u.role == Role::Client => {}
            Ok(_) => return responses::bad_request("Cliente inválido"),
            Err(e) => {
                tracing::error!("Failed to fetch client {}: {:?}", client_id, e);
                return responses::service_unavailable();
            }
        }
    }

    let project_id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let project = Project {
        project_id: project_id.clone(),
        title: req.title.trim().to_string(),
        description: req.description,
        client_id: client_id.clone(),
        address: req.address,
        lat: req.lat,
        lng: req.lng,
        status: ProjectStatus::Planning,
        collaborators: Vec::new(),
        tasks: Vec::new(),
        materials: Vec::new(),
        notes: Vec::new(),
        progress: 0,
        created_at: now.clone(),
        updated_at: now.clone(),
    };

    let pk = project_pk(&project_id);
    let mut project_item = HashMap::new();
    project_item.insert("PK".to_string(), AttributeValue::S(pk.clone()));
    project_item.insert("SK".to_string(), AttributeValue::S(pk.clone()));
    project_item.insert(
        "entity_type".to_string(),
        AttributeValue::S("project".to_string()),
    );
    project_item.insert("title".to_string(), AttributeValue::S(project.title.clone()));
    project_item.insert(
        "description".to_string(),
        AttributeValue::S(project.description.clone()),
    );
    project_item.insert("client_id".to_string(), AttributeValue::S(client_id.clone()));
    project_item.insert(
        "status".to_string(),
        AttributeValue::S(project.status.as_str().to_string()),
    );
    project_item.insert(
        "collaborators".to_string(),
        AttributeValue::S(serde_json::to_string(&project.collaborators)?),
    );
    project_item.insert(
        "tasks".to_string(),
        AttributeValue::S(serde_json::to_string(&project.tasks)?),
    );
    project_item.insert(
        "materials".to_string(),
        AttributeValue::S(serde_json::to_string(&project.materials)?),
    );
    project_item.insert(
        "notes".to_string(),
        AttributeValue::S(serde_json::to_string(&project.notes)?),
    );
    project_item.insert("progress".to_string(), AttributeValue::N("0".to_string()));
    project_item.insert("created_at".to_string(), AttributeValue::S(now.clone()));
    project_item.insert("updated_at".to_string(), AttributeValue::S(now.clone()));
    if let Some(address) = &project.address {
        project_item.insert("address".to_string(), AttributeValue::S(address.clone()));
    }
    if let Some(lat) = project.lat {
        project_item.insert("lat".to_string(), AttributeValue::N(lat.to_string()));
    }
    if let Some(lng) = project.lng {
        project_item.insert("lng".to_string(), AttributeValue::N(lng.to_string()));
    }

    // Owner membership links, both directions
    let user_pk = users::user_pk(&client_id);
    let mut user_to_project = HashMap::new();
    user_to_project.insert("PK".to_string(), AttributeValue::S(user_pk.clone()));
    user_to_project.insert("SK".to_string(), AttributeValue::S(pk.clone()));
    user_to_project.insert("joined_at".to_string(), AttributeValue::S(now.clone()));

    let mut project_to_user = HashMap::new();
    project_to_user.insert("PK".to_string(), AttributeValue::S(pk));
    project_to_user.insert("SK".to_string(), AttributeValue::S(user_pk));
    project_to_user.insert("joined_at".to_string(), AttributeValue::S(now));

    let writes = vec![project_item, user_to_project, project_to_user]
        .into_iter()
        .map(|item| {
            Ok(WriteRequest::builder()
                .put_request(
                    PutRequest::builder()
                        .set_item(Some(item))
                        .build()
                        .map_err(Box::new)?,
                )
                .build())
        })
        .collect::<Result<Vec<_>, Error>>()?;

    let result = client
        .batch_write_item()
        .request_items(table_name, writes)
        .send()
        .await;
    if let Err(e) = result {
        tracing::error!("Failed to create project: {:?}", e);
        return responses::service_unavailable();
    }
    tracing::info!("Project {} created for client {}", project_id, client_id);

    notify_client_best_effort(
        client,
        table_name,
        &project,
        &claims.sub,
        NotificationKind::ProjectCreated,
        "Novo projeto criado".to_string(),
        format!("O projeto '{}' foi criado em seu nome.", project.title),
    )
    .await;

    responses::created("Projeto criado com sucesso", &project)
}

/// GET /api/projects - admin sees all, others see their memberships
pub async fn list_projects(
    client: &DynamoClient,
    table_name: &str,
    claims: &Claims,
) -> Result<Response<Body>, Error> {
    if is_admin(claims) {
        let result = client
            .scan()
            .table_name(table_name)
            .filter_expression("entity_type = :type")
            .expression_attribute_values(":type", AttributeValue::S("project".to_string()))
            .send()
            .await;
        let result = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Failed to scan projects: {:?}", e);
                return responses::service_unavailable();
            }
        };
        let mut projects: Vec<Project> =
            result.items().iter().filter_map(project_from_item).collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        return responses::ok("Projetos carregados", &projects);
    }

    // Membership links: PK=USER#{id}, SK=PROJECT#{id}
    let result = client
        .query()
        .table_name(table_name)
        .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
        .expression_attribute_values(":pk", AttributeValue::S(users::user_pk(&claims.sub)))
        .expression_attribute_values(":sk_prefix", AttributeValue::S("PROJECT#".to_string()))
        .send()
        .await;
    let result = match result {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to query memberships for {}: {:?}", claims.sub, e);
            return responses::service_unavailable();
        }
    };

    let mut project_ids = Vec::new();
    for item in result.items() {
        if let Some(sk) = item.get("SK").and_then(|v| v.as_s().ok()) {
            if let Some(project_id) = sk.strip_prefix("PROJECT#") {
                project_ids.push(project_id.to_string());
            }
        }
    }

    let mut projects = Vec::new();
    // DynamoDB allows up to 100 keys per batch get
    for chunk in project_ids.chunks(100) {
        let mut keys = Vec::new();
        for project_id in chunk {
            let pk = project_pk(project_id);
            let mut key = HashMap::new();
            key.insert("PK".to_string(), AttributeValue::S(pk.clone()));
            key.insert("SK".to_string(), AttributeValue::S(pk));
            keys.push(key);
        }

        let batch_result = client
            .batch_get_item()
            .request_items(
                table_name,
                aws_sdk_dynamodb::types::KeysAndAttributes::builder()
                    .set_keys(Some(keys))
                    .build()
                    .map_err(Box::new)?,
            )
            .send()
            .await;
        let batch_result = match batch_result {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Failed to batch get projects: {:?}", e);
                return responses::service_unavailable();
            }
        };

        if let Some(responses_map) = batch_result.responses() {
            if let Some(items) = responses_map.get(table_name) {
                projects.extend(items.iter().filter_map(project_from_item));
            }
        }
    }

    projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    responses::ok("Projetos carregados", &projects)
}

/// GET /api/projects/{id}
pub async fn get_project(
    client: &DynamoClient,
    table_name: &str,
    claims: &Claims,
    project_id: &str,
) -> Result<Response<Body>, Error> {
    let project = match load_project(client, table_name, project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return responses::not_found("Projeto não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch project {}: {:?}", project_id, e);
            return responses::service_unavailable();
        }
    };

    if !is_admin(claims) && !project.is_member(&claims.sub) {
        return responses::forbidden("Sem acesso a este projeto");
    }

    responses::ok("Projeto carregado", &project)
}

/// PATCH /api/projects/{id} - descriptive fields owner/admin; status also collaborators
pub async fn update_project(
    client: &DynamoClient,
    table_name: &str,
    claims: &Claims,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: UpdateProjectRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return responses::bad_request(&format!("Pedido inválido: {}", e)),
    };

    let project = match load_project(client, table_name, project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return responses::not_found("Projeto não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch project {}: {:?}", project_id, e);
            return responses::service_unavailable();
        }
    };

    let owner_or_admin = is_admin(claims) || project.client_id == claims.sub;
    let member = owner_or_admin || project.is_collaborator(&claims.sub);
    if !member {
        return responses::forbidden("Sem acesso a este projeto");
    }

    let editing_fields = req.title.is_some()
        || req.description.is_some()
        || req.address.is_some()
        || req.lat.is_some()
        || req.lng.is_some();
    if editing_fields && !owner_or_admin {
        return responses::forbidden("Colaboradores apenas atualizam o estado do projeto");
    }

    let new_status = match &req.status {
        Some(s) => match ProjectStatus::parse(s) {
            Some(status) => Some(status),
            None => return responses::bad_request("Estado de projeto inválido"),
        },
        None => None,
    };

    let mut update_expr = vec!["updated_at = :now"];
    let mut expr_names = HashMap::new();
    let mut expr_values: HashMap<String, AttributeValue> = HashMap::new();
    expr_values.insert(
        ":now".to_string(),
        AttributeValue::S(chrono::Utc::now().to_rfc3339()),
    );

    if let Some(title) = &req.title {
        if title.trim().is_empty() {
            return responses::bad_request("O título é obrigatório");
        }
        update_expr.push("title = :title");
        expr_values.insert(":title".to_string(), AttributeValue::S(title.trim().to_string()));
    }
    if let Some(description) = &req.description {
        update_expr.push("description = :description");
        expr_values.insert(
            ":description".to_string(),
            AttributeValue::S(description.clone()),
        );
    }
    if let Some(address) = &req.address {
        update_expr.push("address = :address");
        expr_values.insert(":address".to_string(), AttributeValue::S(address.clone()));
    }
    if let Some(lat) = req.lat {
        update_expr.push("lat = :lat");
        expr_values.insert(":lat".to_string(), AttributeValue::N(lat.to_string()));
    }
    if let Some(lng) = req.lng {
        update_expr.push("lng = :lng");
        expr_values.insert(":lng".to_string(), AttributeValue::N(lng.to_string()));
    }
    if let Some(status) = new_status {
        update_expr.push("#status = :status");
        expr_names.insert("#status".to_string(), "status".to_string());
        expr_values.insert(
            ":status".to_string(),
            AttributeValue::S(status.as_str().to_string()),
        );
    }

    let pk = project_pk(project_id);
    let mut builder = client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .update_expression(format!("SET {}", update_expr.join(", ")));
    for (k, v) in expr_names {
        builder = builder.expression_attribute_names(k, v);
    }
    for (k, v) in expr_values {
        builder = builder.expression_attribute_values(k, v);
    }

    if let Err(e) = builder.send().await {
        tracing::error!("Failed to update project {}: {:?}", project_id, e);
        return responses::service_unavailable();
    }

    if let Some(status) = new_status {
        if status != project.status {
            notify_client_best_effort(
                client,
                table_name,
                &project,
                &claims.sub,
                NotificationKind::ProjectStatusChanged,
                "Estado do projeto atualizado".to_string(),
                format!(
                    "O projeto '{}' passou para o estado '{}'.",
                    project.title,
                    status.as_str()
                ),
            )
            .await;
        }
    }

    match load_project(client, table_name, project_id).await {
        Ok(Some(p)) => responses::ok("Projeto atualizado", &p),
        Ok(None) => responses::not_found("Projeto não encontrado"),
        Err(e) => {
            tracing::error!("Failed to reload project {}: {:?}", project_id, e);
            responses::service_unavailable()
        }
    }
}

/// DELETE /api/projects/{id} - owner or admin; removes membership links too
pub async fn delete_project(
    client: &DynamoClient,
    table_name: &str,
    claims: &Claims,
    project_id: &str,
) -> Result<Response<Body>, Error> {
    let project = match load_project(client, table_name, project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return responses::not_found("Projeto não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch project {}: {:?}", project_id, e);
            return responses::service_unavailable();
        }
    };

    if !is_admin(claims) && project.client_id != claims.sub {
        return responses::forbidden("Sem permissão para eliminar este projeto");
    }

    let pk = project_pk(project_id);
    let mut member_ids = vec![project.client_id.clone()];
    member_ids.extend(project.collaborators.iter().map(|c| c.user_id.clone()));

    let mut all_delete_keys = Vec::new();
    let mut project_key = HashMap::new();
    project_key.insert("PK".to_string(), AttributeValue::S(pk.clone()));
    project_key.insert("SK".to_string(), AttributeValue::S(pk.clone()));
    all_delete_keys.push(project_key);

    for member_id in member_ids {
        let user_pk = users::user_pk(&member_id);

        let mut user_to_project = HashMap::new();
        user_to_project.insert("PK".to_string(), AttributeValue::S(user_pk.clone()));
        user_to_project.insert("SK".to_string(), AttributeValue::S(pk.clone()));
        all_delete_keys.push(user_to_project);

        let mut project_to_user = HashMap::new();
        project_to_user.insert("PK".to_string(), AttributeValue::S(pk.clone()));
        project_to_user.insert("SK".to_string(), AttributeValue::S(user_pk));
        all_delete_keys.push(project_to_user);
    }

    // DynamoDB allows max 25 writes per batch; retry unprocessed items
    for chunk in all_delete_keys.chunks(25) {
        let delete_requests: Vec<_> = chunk
            .iter()
            .cloned()
            .map(|key| {
                Ok(WriteRequest::builder()
                    .delete_request(
                        DeleteRequest::builder()
                            .set_key(Some(key))
                            .build()
                            .map_err(Box::new)?,
                    )
                    .build())
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let mut attempts = 0;
        let mut unprocessed = Some(delete_requests);
        while let Some(requests) = unprocessed {
            attempts += 1;
            if attempts > 5 {
                tracing::warn!(
                    "Max retry attempts reached, {} link records may remain",
                    requests.len()
                );
                break;
            }

            let result = match client
                .batch_write_item()
                .request_items(table_name, requests)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("Failed to delete project {}: {:?}", project_id, e);
                    return responses::service_unavailable();
                }
            };

            unprocessed = result
                .unprocessed_items()
                .and_then(|items| items.get(table_name))
                .filter(|items| !items.is_empty())
                .cloned();

            if unprocessed.is_some() {
                tokio::time::sleep(tokio::time::Duration::from_millis(100 * attempts as u64))
                    .await;
            }
        }
    }

    tracing::info!("Project {} deleted by {}", project_id, claims.sub);
    responses::no_content()
}

/// POST /api/projects/{id}/collaborators - admin assigns an approved collaborator
pub async fn add_collaborator(
    client: &DynamoClient,
    table_name: &str,
    claims: &Claims,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    if !is_admin(claims) {
        return responses::forbidden("Apenas administradores atribuem colaboradores");
    }

    let req: AddCollaboratorRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return responses::bad_request(&format!("Pedido inválido: {}", e)),
    };

    let mut project = match load_project(client, table_name, project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return responses::not_found("Projeto não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch project {}: {:?}", project_id, e);
            return responses::service_unavailable();
        }
    };

    if project.is_collaborator(&req.user_id) {
        return responses::conflict("Colaborador já atribuído ao projeto");
    }

    let collaborator = match users::find_user(client, table_name, &req.user_id).await {
        Ok(Some(u)) => u,
        Ok(None) => return responses::not_found("Colaborador não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch collaborator {}: {:?}", req.user_id, e);
            return responses::service_unavailable();
        }
    };
    if collaborator.role != Role::Collaborator {
        return responses::bad_request("O utilizador não é um colaborador");
    }
    if collaborator.approval_status != ApprovalStatus::Approved || !collaborator.is_active {
        return responses::bad_request("O colaborador não está aprovado e ativo");
    }

    let now = chrono::Utc::now().to_rfc3339();
    project.collaborators.push(CollaboratorRef {
        user_id: req.user_id.clone(),
        role: req.role.unwrap_or_else(|| "jardineiro".to_string()),
        added_at: now.clone(),
    });

    if let Err(e) = save_collections(client, table_name, &project).await {
        tracing::error!("Failed to save collaborators: {:?}", e);
        return responses::service_unavailable();
    }

    // Membership links so the collaborator's project list picks this up
    let pk = project_pk(project_id);
    let user_pk = users::user_pk(&req.user_id);
    let link = client
        .batch_write_item()
        .request_items(
            table_name,
            vec![
                WriteRequest::builder()
                    .put_request(
                        PutRequest::builder()
                            .item("PK", AttributeValue::S(user_pk.clone()))
                            .item("SK", AttributeValue::S(pk.clone()))
                            .item("joined_at", AttributeValue::S(now.clone()))
                            .item(
                                "member_role",
                                AttributeValue::S("collaborator".to_string()),
                            )
                            .build()
                            .map_err(Box::new)?,
                    )
                    .build(),
                WriteRequest::builder()
                    .put_request(
                        PutRequest::builder()
                            .item("PK", AttributeValue::S(pk))
                            .item("SK", AttributeValue::S(user_pk))
                            .item("joined_at", AttributeValue::S(now))
                            .item(
                                "member_role",
                                AttributeValue::S("collaborator".to_string()),
                            )
                            .build()
                            .map_err(Box::new)?,
                    )
                    .build(),
            ],
        )
        .send()
        .await;
    if let Err(e) = link {
        tracing::error!("Failed to write membership links: {:?}", e);
        return responses::service_unavailable();
    }

    notifications::notify_best_effort(
        client,
        table_name,
        &collaborator,
        NewNotification {
            sender_id: Some(claims.sub.clone()),
            kind: NotificationKind::CollaboratorAdded,
            title: "Novo projeto atribuído".to_string(),
            message: format!("Foi atribuído ao projeto '{}'.", project.title),
            project_id: Some(project.project_id.clone()),
        },
    )
    .await;

    responses::ok("Colaborador adicionado", &project)
}

fn can_manage_tasks(project: &Project, claims: &Claims) -> bool {
    is_admin(claims) || project.is_collaborator(&claims.sub)
}

/// POST /api/projects/{id}/tasks
pub async fn add_task(
    client: &DynamoClient,
    table_name: &str,
    claims: &Claims,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateTaskRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return responses::bad_request(&format!("Pedido inválido: {}", e)),
    };
    if req.title.trim().is_empty() {
        return responses::bad_request("O título da tarefa é obrigatório");
    }

    let mut project = match load_project(client, table_name, project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return responses::not_found("Projeto não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch project {}: {:?}", project_id, e);
            return responses::service_unavailable();
        }
    };
    if !can_manage_tasks(&project, claims) {
        return responses::forbidden("Sem permissão para gerir tarefas");
    }

    let task = Task {
        task_id: uuid::Uuid::new_v4().to_string(),
        title: req.title.trim().to_string(),
        description: req.description,
        status: TaskStatus::Pending,
        assigned_to: req.assigned_to.clone(),
        due_date: req.due_date,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    project.tasks.push(task);
    project.progress = compute_progress(&project.tasks);

    if let Err(e) = save_collections(client, table_name, &project).await {
        tracing::error!("Failed to save tasks: {:?}", e);
        return responses::service_unavailable();
    }

    if let Some(assignee_id) = &req.assigned_to {
        if assignee_id != &claims.sub {
            if let Ok(Some(assignee)) = users::find_user(client, table_name, assignee_id).await {
                notifications::notify_best_effort(
                    client,
                    table_name,
                    &assignee,
                    NewNotification {
                        sender_id: Some(claims.sub.clone()),
                        kind: NotificationKind::TaskAssigned,
                        title: "Nova tarefa atribuída".to_string(),
                        message: format!(
                            "Tem uma nova tarefa no projeto '{}'.",
                            project.title
                        ),
                        project_id: Some(project.project_id.clone()),
                    },
                )
                .await;
            }
        }
    }

    responses::created("Tarefa adicionada", &project)
}

/// PATCH /api/projects/{id}/tasks/{task_id} - progress recomputed on every save
pub async fn update_task(
    client: &DynamoClient,
    table_name: &str,
    claims: &Claims,
    project_id: &str,
    task_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: UpdateTaskRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return responses::bad_request(&format!("Pedido inválido: {}", e)),
    };

    let new_status = match &req.status {
        Some(s) => match s.as_str() {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            _ => return responses::bad_request("Estado de tarefa inválido"),
        },
        None => None,
    };

    let mut project = match load_project(client, table_name, project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return responses::not_found("Projeto não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch project {}: {:?}", project_id, e);
            return responses::service_unavailable();
        }
    };
    if !can_manage_tasks(&project, claims) {
        return responses::forbidden("Sem permissão para gerir tarefas");
    }

    let Some(task) = project.tasks.iter_mut().find(|t| t.task_id == task_id) else {
        return responses::not_found("Tarefa não encontrada");
    };
    if let Some(title) = req.title {
        task.title = title;
    }
    if let Some(description) = req.description {
        task.description = Some(description);
    }
    if let Some(assigned_to) = req.assigned_to {
        task.assigned_to = Some(assigned_to);
    }
    if let Some(due_date) = req.due_date {
        task.due_date = Some(due_date);
    }
    if let Some(status) = new_status {
        task.status = status;
    }

    project.progress = compute_progress(&project.tasks);
    if let Err(e) = save_collections(client, table_name, &project).await {
        tracing::error!("Failed to save tasks: {:?}", e);
        return responses::service_unavailable();
    }

    responses::ok("Tarefa atualizada", &project)
}

/// POST /api/projects/{id}/materials
pub async fn add_material(
    client: &DynamoClient,
    table_name: &str,
    claims: &Claims,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: AddMaterialRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return responses::bad_request(&format!("Pedido inválido: {}", e)),
    };
    if req.name.trim().is_empty() || req.quantity <= 0.0 {
        return responses::bad_request("Material inválido");
    }

    let mut project = match load_project(client, table_name, project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return responses::not_found("Projeto não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch project {}: {:?}", project_id, e);
            return responses::service_unavailable();
        }
    };
    if !can_manage_tasks(&project, claims) {
        return responses::forbidden("Sem permissão para gerir materiais");
    }

    project.materials.push(Material {
        material_id: uuid::Uuid::new_v4().to_string(),
        name: req.name.trim().to_string(),
        quantity: req.quantity,
        unit: req.unit,
        cost: req.cost,
    });

    if let Err(e) = save_collections(client, table_name, &project).await {
        tracing::error!("Failed to save materials: {:?}", e);
        return responses::service_unavailable();
    }

    responses::created("Material adicionado", &project)
}

/// POST /api/projects/{id}/notes - any member; the client hears about others' notes
pub async fn add_note(
    client: &DynamoClient,
    table_name: &str,
    claims: &Claims,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: AddNoteRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return responses::bad_request(&format!("Pedido inválido: {}", e)),
    };
    if req.text.trim().is_empty() {
        return responses::bad_request("A nota não pode estar vazia");
    }

    let mut project = match load_project(client, table_name, project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return responses::not_found("Projeto não encontrado"),
        Err(e) => {
            tracing::error!("Failed to fetch project {}: {:?}", project_id, e);
            return responses::service_unavailable();
        }
    };
    if !is_admin(claims) && !project.is_member(&claims.sub) {
        return responses::forbidden("Sem acesso a este projeto");
    }

    project.notes.push(NoteEntry {
        note_id: uuid::Uuid::new_v4().to_string(),
        author_id: claims.sub.clone(),
        text: req.text.trim().to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
    });

    if let Err(e) = save_collections(client, table_name, &project).await {
        tracing::error!("Failed to save notes: {:?}", e);
        return responses::service_unavailable();
    }

    notify_client_best_effort(
        client,
        table_name,
        &project,
        &claims.sub,
        NotificationKind::NoteAdded,
        "Nova nota no projeto".to_string(),
        format!("O projeto '{}' tem uma nova nota.", project.title),
    )
    .await;

    responses::created("Nota adicionada", &project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::config::{BehaviorVersion, Region};

    fn item_with(pairs: Vec<(&str, AttributeValue)>) -> HashMap<String, AttributeValue> {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    // Validation runs before any table access, so a bare client is enough
    fn offline_client() -> DynamoClient {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("eu-west-1"))
            .build();
        DynamoClient::from_conf(config)
    }

    fn claims(sub: &str, role: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            email: format!("{}@replanta.pt", sub),
            role: role.to_string(),
            iat: 0,
            exp: i64::MAX,
        }
    }

    #[tokio::test]
    async fn admin_create_requires_a_client() {
        let body = br#"{"title":"Jardim da frente","description":""}"#;
        let response = create_project(&offline_client(), "replanta", &claims("a-1", "admin"), body)
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn collaborator_cannot_request_a_project() {
        let body = br#"{"title":"Jardim da frente","description":""}"#;
        let response = create_project(
            &offline_client(),
            "replanta",
            &claims("c-1", "collaborator"),
            body,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 403);
    }

    #[test]
    fn project_from_item_parses_embedded_collections() {
        let item = item_with(vec![
            ("PK", AttributeValue::S("PROJECT#p-1".to_string())),
            ("SK", AttributeValue::S("PROJECT#p-1".to_string())),
            ("title", AttributeValue::S("Jardim da frente".to_string())),
            ("description", AttributeValue::S(String::new())),
            ("client_id", AttributeValue::S("u-1".to_string())),
            ("status", AttributeValue::S("in_progress".to_string())),
            (
                "collaborators",
                AttributeValue::S(
                    r#"[{"user_id":"u-2","role":"jardineiro","added_at":"2025-01-01T00:00:00Z"}]"#
                        .to_string(),
                ),
            ),
            (
                "tasks",
                AttributeValue::S(
                    r#"[{"task_id":"t-1","title":"Podar","description":null,"status":"completed","assigned_to":null,"due_date":null,"created_at":"2025-01-01T00:00:00Z"}]"#
                        .to_string(),
                ),
            ),
            ("progress", AttributeValue::N("100".to_string())),
        ]);

        let project = project_from_item(&item).unwrap();
        assert_eq!(project.project_id, "p-1");
        assert_eq!(project.status, ProjectStatus::InProgress);
        assert_eq!(project.collaborators.len(), 1);
        assert_eq!(project.tasks.len(), 1);
        assert_eq!(project.tasks[0].status, TaskStatus::Completed);
        assert_eq!(project.progress, 100);
        assert!(project.materials.is_empty());
    }

    #[test]
    fn project_from_item_requires_client_and_status() {
        let item = item_with(vec![
            ("PK", AttributeValue::S("PROJECT#p-1".to_string())),
            ("client_id", AttributeValue::S("u-1".to_string())),
            ("status", AttributeValue::S("not-a-status".to_string())),
        ]);
        assert!(project_from_item(&item).is_none());
    }

    #[test]
    fn membership_covers_owner_and_collaborators() {
        let item = item_with(vec![
            ("PK", AttributeValue::S("PROJECT#p-1".to_string())),
            ("client_id", AttributeValue::S("u-1".to_string())),
            ("status", AttributeValue::S("planning".to_string())),
            (
                "collaborators",
                AttributeValue::S(
                    r#"[{"user_id":"u-2","role":"jardineiro","added_at":"2025-01-01T00:00:00Z"}]"#
                        .to_string(),
                ),
            ),
        ]);
        let project = project_from_item(&item).unwrap();

        assert!(project.is_member("u-1"));
        assert!(project.is_member("u-2"));
        assert!(project.is_collaborator("u-2"));
        assert!(!project.is_collaborator("u-1"));
        assert!(!project.is_member("u-3"));
    }
}
