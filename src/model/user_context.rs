use serde::{Deserialize, Serialize};

/// User context extracted from request headers for permission checks and
/// the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub user_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserContext {
    /// Create a new UserContext with just a user ID
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            user_name: None,
            roles: Vec::new(),
        }
    }

    /// Create a UserContext with full user information
    pub fn with_details(user_id: String, name: Option<String>, roles: Vec<String>) -> Self {
        Self {
            user_id,
            user_name: name,
            roles,
        }
    }

    /// Create a system user context for internal operations
    pub fn system() -> Self {
        Self {
            user_id: "system".to_string(),
            user_name: Some("System".to_string()),
            roles: vec!["admin".to_string()],
        }
    }

    /// Create a default user context for development/testing
    pub fn default_user() -> Self {
        Self {
            user_id: "dev-user".to_string(),
            user_name: Some("Development User".to_string()),
            roles: vec!["admin".to_string()],
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::default_user()
    }
}
