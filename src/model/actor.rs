use super::role::Role;

/// Who is performing an operation. Threaded into every mutation so audit rows
/// never depend on process-wide state.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub user_id: u64,
    pub user_name: String,
    pub role: Role,
    /// Projects a non-admin actor may see. Ignored for Admin and System.
    pub project_ids: Vec<i64>,
}

impl Actor {
    pub fn new(user_id: u64, user_name: impl Into<String>, role: Role) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            role,
            project_ids: Vec::new(),
        }
    }

    /// Identity used by the scheduled passes.
    pub fn scheduler() -> Self {
        Self::new(0, "Scheduled", Role::System)
    }

    pub fn with_projects(mut self, project_ids: Vec<i64>) -> Self {
        self.project_ids = project_ids;
        self
    }
}
