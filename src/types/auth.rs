use serde::{Deserialize, Serialize};

/// Response of `POST /auth/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Bearer token.
    pub access_token: String,
    /// Token type; always `bearer` in practice.
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Response of `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Numeric user id.
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Login name.
    pub username: String,
    /// Role, e.g. `admin` or `user`.
    #[serde(default)]
    pub role: String,
    /// Account status.
    #[serde(default)]
    pub status: Option<i64>,
}

impl UserProfile {
    /// Returns true for administrators.
    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case("admin")
    }
}
