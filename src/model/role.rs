use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub enum Role {
    Admin = 1,
    SiteManager = 2,
    Viewer = 3,
    System = 4,
}

impl Role {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::SiteManager),
            3 => Some(Role::Viewer),
            4 => Some(Role::System),
            _ => None,
        }
    }

    /// Admin and System rows are never narrowed to assigned projects.
    pub fn sees_all_projects(&self) -> bool {
        matches!(self, Role::Admin | Role::System)
    }

    /// System is excluded; it only acts through the scheduler.
    pub fn can_mutate(&self) -> bool {
        matches!(self, Role::Admin | Role::SiteManager)
    }
}
