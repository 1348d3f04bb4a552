use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub environment: Environment,
    /// Base URL of the web client; verification and reset links point here.
    pub frontend_url: String,
    pub google_client_id: Option<String>,
    /// `None` selects the logging mailer.
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "sawab".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "sawab-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 7),
        };
        let environment = std::env::var("APP_ENV")
            .map(|v| Environment::parse(&v))
            .unwrap_or(Environment::Development);
        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".into());
        let google_client_id = std::env::var("GOOGLE_CLIENT_ID")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpConfig {
                host,
                port: std::env::var("SMTP_PORT")
                    .ok()
                    .and_then(|v| v.parse::<u16>().ok())
                    .unwrap_or(587),
                username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
                password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
                from: std::env::var("MAIL_FROM")
                    .unwrap_or_else(|_| "Sawab <no-reply@sawab.app>".into()),
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            jwt,
            environment,
            frontend_url,
            google_client_id,
            smtp,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn verify_email_link(&self, token: &str) -> String {
        format!(
            "{}/verify-email/{}",
            self.frontend_url.trim_end_matches('/'),
            token
        )
    }

    pub fn reset_password_link(&self, token: &str) -> String {
        format!(
            "{}/reset-password/{}",
            self.frontend_url.trim_end_matches('/'),
            token
        )
    }

    pub fn referral_link(&self, code: &str) -> String {
        format!(
            "{}/register?ref={}",
            self.frontend_url.trim_end_matches('/'),
            code
        )
    }
}
