use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One entry in a booking's append-only audit trail. Entries are only ever
/// appended, never updated, reordered or deleted, and they are stored keyed
/// by booking reference so the trail outlives the booking row itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: NaiveDateTime,
    pub action: String,
    pub actor: AuditActor,
    pub actor_details: String,
    pub method: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(action: &str, actor: AuditActor, actor_details: &str, method: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().naive_utc(),
            action: action.to_string(),
            actor,
            actor_details: actor_details.to_string(),
            method: method.to_string(),
            ip_address: None,
            user_agent: None,
            details: serde_json::json!({}),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_request_meta(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditActor {
    Admin,
    Customer,
    System,
}

impl AuditActor {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditActor::Admin => "admin",
            AuditActor::Customer => "customer",
            AuditActor::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "admin" => AuditActor::Admin,
            "customer" => AuditActor::Customer,
            _ => AuditActor::System,
        }
    }
}
