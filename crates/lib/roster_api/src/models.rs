//! Request and response bodies.

use serde::{Deserialize, Serialize};

use roster_core::metrics::{MetricsSnapshot, Point};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub status: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusResponse {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.into(),
            message: None,
        }
    }

    pub fn with_message(status: &str, message: &str) -> Self {
        Self {
            status: status.into(),
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetRolesRequest {
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetricsResponse {
    pub total_users: u64,
    pub total_roles: std::collections::BTreeMap<String, u64>,
    pub users_over_time: Vec<Point>,
    pub message: String,
}

impl From<MetricsSnapshot> for UserMetricsResponse {
    fn from(snapshot: MetricsSnapshot) -> Self {
        let message = if snapshot.total_users == 0 {
            "no users found"
        } else {
            "user metrics retrieved successfully"
        };
        Self {
            users_over_time: snapshot.points(),
            total_users: snapshot.total_users,
            total_roles: snapshot.total_roles,
            message: message.into(),
        }
    }
}
