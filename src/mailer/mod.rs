//! Outbound email. The transport is picked once at startup and injected
//! through `AppState`, so flows only ever see the `Mailer` trait.

use async_trait::async_trait;
use tracing::info;

mod smtp;
pub mod templates;

pub use smtp::SmtpMailer;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Development mailer: logs instead of sending.
#[derive(Clone, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        info!(to = %to, subject = %subject, body_len = body.len(), "email send stub");
        Ok(())
    }
}
