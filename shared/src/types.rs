use serde::{Deserialize, Serialize};

// ========== USER ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Client,
    Collaborator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Client => "client",
            Role::Collaborator => "collaborator",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "client" => Some(Role::Client),
            "collaborator" => Some(Role::Collaborator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<ApprovalStatus> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub approval_status: ApprovalStatus,
    pub is_active: bool,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notify_email: bool,
    pub notify_push: bool,
    pub created_at: String,
    pub last_login: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    pub role: String,
}

// ========== PROJECT ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    InProgress,
    Completed,
    OnHold,
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planning => "planning",
            ProjectStatus::InProgress => "in_progress",
            ProjectStatus::Completed => "completed",
            ProjectStatus::OnHold => "on_hold",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<ProjectStatus> {
        match s {
            "planning" => Some(ProjectStatus::Planning),
            "in_progress" => Some(ProjectStatus::InProgress),
            "completed" => Some(ProjectStatus::Completed),
            "on_hold" => Some(ProjectStatus::OnHold),
            "cancelled" => Some(ProjectStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    pub due_date: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    pub material_id: String,
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteEntry {
    pub note_id: String,
    pub author_id: String,
    pub text: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorRef {
    pub user_id: String,
    /// Free-text role sub-tag, e.g. "jardineiro"
    pub role: String,
    pub added_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub client_id: String,
    pub address: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub status: ProjectStatus,
    pub collaborators: Vec<CollaboratorRef>,
    pub tasks: Vec<Task>,
    pub materials: Vec<Material>,
    pub notes: Vec<NoteEntry>,
    /// Percentage of completed tasks, recomputed on every task mutation
    pub progress: u8,
    pub created_at: String,
    pub updated_at: String,
}

impl Project {
    pub fn is_collaborator(&self, user_id: &str) -> bool {
        self.collaborators.iter().any(|c| c.user_id == user_id)
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.client_id == user_id || self.is_collaborator(user_id)
    }
}

/// progress = round(100 * completed / total); 0 when there are no tasks
pub fn compute_progress(tasks: &[Task]) -> u8 {
    if tasks.is_empty() {
        return 0;
    }
    let completed = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    ((completed as f64 / tasks.len() as f64) * 100.0).round() as u8
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub title: String,
    pub description: String,
    /// Admins may create a project on behalf of a client
    pub client_id: Option<String>,
    pub address: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddCollaboratorRequest {
    pub user_id: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub assigned_to: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMaterialRequest {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct AddNoteRequest {
    pub text: String,
}

// ========== NOTIFICATION ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    UserRegistered,
    UserApproved,
    UserRejected,
    RoleChanged,
    ProjectCreated,
    ProjectStatusChanged,
    CollaboratorAdded,
    TaskAssigned,
    NoteAdded,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::UserRegistered => "user_registered",
            NotificationKind::UserApproved => "user_approved",
            NotificationKind::UserRejected => "user_rejected",
            NotificationKind::RoleChanged => "role_changed",
            NotificationKind::ProjectCreated => "project_created",
            NotificationKind::ProjectStatusChanged => "project_status_changed",
            NotificationKind::CollaboratorAdded => "collaborator_added",
            NotificationKind::TaskAssigned => "task_assigned",
            NotificationKind::NoteAdded => "note_added",
        }
    }

    pub fn parse(s: &str) -> Option<NotificationKind> {
        match s {
            "user_registered" => Some(NotificationKind::UserRegistered),
            "user_approved" => Some(NotificationKind::UserApproved),
            "user_rejected" => Some(NotificationKind::UserRejected),
            "role_changed" => Some(NotificationKind::RoleChanged),
            "project_created" => Some(NotificationKind::ProjectCreated),
            "project_status_changed" => Some(NotificationKind::ProjectStatusChanged),
            "collaborator_added" => Some(NotificationKind::CollaboratorAdded),
            "task_assigned" => Some(NotificationKind::TaskAssigned),
            "note_added" => Some(NotificationKind::NoteAdded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Read => "read",
            NotificationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<NotificationStatus> {
        match s {
            "pending" => Some(NotificationStatus::Pending),
            "sent" => Some(NotificationStatus::Sent),
            "delivered" => Some(NotificationStatus::Delivered),
            "read" => Some(NotificationStatus::Read),
            "failed" => Some(NotificationStatus::Failed),
            _ => None,
        }
    }

    /// pending -> sent -> delivered -> read; failed reachable until delivery.
    /// A recipient may read before the delivery worker reports back, so read
    /// is legal from pending and sent as well, and idempotent on itself.
    pub fn can_transition(self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;
        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Failed)
                | (Pending, Read)
                | (Sent, Delivered)
                | (Sent, Read)
                | (Sent, Failed)
                | (Delivered, Read)
                | (Read, Read)
        )
    }
}

/// Delivery state of a single notification channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelState {
    pub enabled: bool,
    pub sent_at: Option<String>,
    pub error: Option<String>,
}

impl ChannelState {
    pub fn enabled() -> Self {
        ChannelState {
            enabled: true,
            sent_at: None,
            error: None,
        }
    }

    pub fn disabled() -> Self {
        ChannelState {
            enabled: false,
            sent_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub notification_id: String,
    pub recipient_id: String,
    pub sender_id: Option<String>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub project_id: Option<String>,
    pub status: NotificationStatus,
    pub email: ChannelState,
    pub push: ChannelState,
    pub created_at: String,
    pub expires_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: TaskStatus) -> Task {
        Task {
            task_id: "t".to_string(),
            title: "Podar sebes".to_string(),
            description: None,
            status,
            assigned_to: None,
            due_date: None,
            created_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn progress_is_zero_without_tasks() {
        assert_eq!(compute_progress(&[]), 0);
    }

    #[test]
    fn progress_rounds_to_nearest_percent() {
        // 1 of 3 completed -> 33.33 -> 33
        let tasks = vec![
            task(TaskStatus::Completed),
            task(TaskStatus::Pending),
            task(TaskStatus::InProgress),
        ];
        assert_eq!(compute_progress(&tasks), 33);

        // 2 of 3 completed -> 66.67 -> 67
        let tasks = vec![
            task(TaskStatus::Completed),
            task(TaskStatus::Completed),
            task(TaskStatus::Pending),
        ];
        assert_eq!(compute_progress(&tasks), 67);
    }

    #[test]
    fn progress_all_completed_is_100() {
        let tasks = vec![task(TaskStatus::Completed), task(TaskStatus::Completed)];
        assert_eq!(compute_progress(&tasks), 100);
    }

    #[test]
    fn role_parse_rejects_unknown() {
        assert_eq!(Role::parse("client"), Some(Role::Client));
        assert_eq!(Role::parse("gardener"), None);
    }

    #[test]
    fn notification_status_transitions() {
        use NotificationStatus::*;
        assert!(Pending.can_transition(Sent));
        assert!(Sent.can_transition(Delivered));
        assert!(Delivered.can_transition(Read));
        assert!(Pending.can_transition(Read));
        assert!(Read.can_transition(Read));

        assert!(!Read.can_transition(Sent));
        assert!(!Failed.can_transition(Sent));
        assert!(!Delivered.can_transition(Pending));
    }

    #[test]
    fn task_status_serializes_snake_case() {
        let t = task(TaskStatus::InProgress);
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"in_progress\""));
    }
}
