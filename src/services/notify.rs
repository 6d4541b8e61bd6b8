use anyhow::Context;
use async_trait::async_trait;

/// Outbound customer email. Composition and templating live outside this
/// core; the reconciliation service only needs a best-effort send.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// HTTP mail API provider (Mailgun-style form post with basic auth).
pub struct MailApiNotifier {
    api_url: String,
    api_key: String,
    from_address: String,
    client: reqwest::Client,
}

impl MailApiNotifier {
    pub fn new(api_url: String, api_key: String, from_address: String) -> Self {
        Self {
            api_url,
            api_key,
            from_address,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for MailApiNotifier {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.api_url)
            .basic_auth("api", Some(&self.api_key))
            .form(&[
                ("from", self.from_address.as_str()),
                ("to", to),
                ("subject", subject),
                ("text", body),
            ])
            .send()
            .await
            .context("failed to send email")?
            .error_for_status()
            .context("mail API returned error")?;

        Ok(())
    }
}
