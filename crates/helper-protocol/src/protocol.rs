//! Helper protocol types and constants.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Helper protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame size (1MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Resource caps applied to a service account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceLimits {
    /// Memory ceiling in MiB (0 = unlimited)
    pub max_memory_mb: u64,
    /// CPU quota in percent of one core (0 = unlimited)
    pub max_cpu_percent: u32,
    /// Maximum process count (0 = unlimited)
    pub max_processes: u32,
}

/// Commands the helper understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum HelperCommand {
    /// Create the account if missing and make sure it belongs to `groups`
    EnsureServiceAccount {
        username: String,
        #[serde(default)]
        groups: Vec<String>,
    },
    /// Write cgroup limits for the account
    SetResourceLimits {
        username: String,
        limits: ResourceLimits,
    },
    /// Check a system password
    VerifyPassword { username: String, password: String },
}

impl HelperCommand {
    pub fn method(&self) -> &'static str {
        match self {
            HelperCommand::EnsureServiceAccount { .. } => "ensure_service_account",
            HelperCommand::SetResourceLimits { .. } => "set_resource_limits",
            HelperCommand::VerifyPassword { .. } => "verify_password",
        }
    }
}

/// A framed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperRequest {
    pub version: u32,
    pub id: String,
    #[serde(flatten)]
    pub command: HelperCommand,
}

impl HelperRequest {
    pub fn new(command: HelperCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id: Uuid::new_v4().to_string(),
            command,
        }
    }
}

/// Result of a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HelperOutcome {
    Ok {
        #[serde(default)]
        result: serde_json::Value,
    },
    Error {
        message: String,
    },
}

/// A framed response, echoing the request id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperResponse {
    pub version: u32,
    pub id: String,
    #[serde(flatten)]
    pub outcome: HelperOutcome,
}

impl HelperResponse {
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id: id.into(),
            outcome: HelperOutcome::Ok { result },
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id: id.into(),
            outcome: HelperOutcome::Error {
                message: message.into(),
            },
        }
    }
}

/// Result payload of `ensure_service_account`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    /// False when the account already existed
    pub created: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = HelperRequest {
            version: 1,
            id: "r1".into(),
            command: HelperCommand::EnsureServiceAccount {
                username: "keel".into(),
                groups: vec!["www-data".into()],
            },
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "version": 1,
                "id": "r1",
                "method": "ensure_service_account",
                "params": { "username": "keel", "groups": ["www-data"] }
            })
        );
    }

    #[test]
    fn test_error_response_wire_shape() {
        let response = HelperResponse::error("r2", "no such user");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "no such user");

        let back: HelperResponse = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, "r2");
    }

    #[test]
    fn test_method_names_match_serde_tags() {
        let command = HelperCommand::VerifyPassword {
            username: "a".into(),
            password: "b".into(),
        };
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["method"], command.method());
    }
}
