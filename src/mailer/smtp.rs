use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::debug;

use super::Mailer;
use crate::config::SmtpConfig;

/// STARTTLS relay with username/password auth.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .with_context(|| format!("smtp relay {}", cfg.host))?
            .port(cfg.port)
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .build();
        let from = cfg
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("parse MAIL_FROM {}", cfg.from))?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let to = to
            .parse::<Mailbox>()
            .with_context(|| format!("parse recipient {to}"))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("build email")?;
        self.transport.send(message).await.context("smtp send")?;
        debug!(subject = %subject, "email delivered");
        Ok(())
    }
}
