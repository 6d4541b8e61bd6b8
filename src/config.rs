use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub business_name: String,
    pub calendar_api_url: String,
    pub calendar_id: String,
    pub calendar_api_key: String,
    pub payment_webhook_secret: String,
    pub mail_api_url: String,
    pub mail_api_key: String,
    pub mail_from_address: String,
    pub admin_directory: AdminDirectory,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "castledesk.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            business_name: env::var("BUSINESS_NAME")
                .unwrap_or_else(|_| "Towering Castles".to_string()),
            calendar_api_url: env::var("CALENDAR_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            calendar_id: env::var("CALENDAR_ID").unwrap_or_else(|_| "primary".to_string()),
            calendar_api_key: env::var("CALENDAR_API_KEY").unwrap_or_default(),
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            mail_api_url: env::var("MAIL_API_URL").unwrap_or_default(),
            mail_api_key: env::var("MAIL_API_KEY").unwrap_or_default(),
            mail_from_address: env::var("MAIL_FROM_ADDRESS")
                .unwrap_or_else(|_| "bookings@example.com".to_string()),
            admin_directory: AdminDirectory::from_env(),
        }
    }
}

/// Who counts as an admin, resolved once at startup from a comma-separated
/// env list. The auth layer owns enforcement; this core only consults it for
/// the actor-details field of audit entries.
#[derive(Clone, Debug, Default)]
pub struct AdminDirectory {
    emails: Vec<String>,
}

impl AdminDirectory {
    pub fn from_env() -> Self {
        Self::from_list(&env::var("ADMIN_EMAILS").unwrap_or_default())
    }

    pub fn from_list(raw: &str) -> Self {
        Self {
            emails: raw
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn is_admin(&self, identity: &str) -> bool {
        self.emails.iter().any(|e| e == &identity.to_lowercase())
    }
}
