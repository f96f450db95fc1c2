use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_SERVER_PORT: u16 = 8000;
const DEFAULT_ORIGINS_COUNT: usize = 8;
const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} env var must be set")]
    Missing(&'static str),
    #[error("{name} env var is not a valid number: {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

/// How the SMTP connection is secured, derived from the configured port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// TLS handshake before the first SMTP byte (port 465).
    ImplicitTls,
    /// Plaintext greeting upgraded with STARTTLS before login (port 587).
    StartTls,
}

impl SmtpSecurity {
    pub fn from_port(port: u16) -> Option<SmtpSecurity> {
        match port {
            465 => Some(SmtpSecurity::ImplicitTls),
            587 => Some(SmtpSecurity::StartTls),
            _ => None,
        }
    }
}

/// A display name paired with a mailbox address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: String,
    pub address: String,
}

impl Mailbox {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Mailbox {
        Mailbox {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.address)
    }
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub domain: String,
    pub user: String,
    pub pass: String,
}

impl SmtpConfig {
    pub fn security(&self) -> Option<SmtpSecurity> {
        SmtpSecurity::from_port(self.port)
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("domain", &self.domain)
            .field("user", &self.user)
            .field("pass", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: String,
    pub webhook_url: String,
    pub smtp: SmtpConfig,
    pub sender: Mailbox,
    pub rcpt: Mailbox,
    pub subject: String,
    pub allowed_origins: Vec<String>,
    pub notify_timeout: Duration,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("database_url", &"[REDACTED]")
            .field("webhook_url", &"[REDACTED]")
            .field("smtp", &self.smtp)
            .field("sender", &self.sender)
            .field("rcpt", &self.rcpt)
            .field("subject", &self.subject)
            .field("allowed_origins", &self.allowed_origins)
            .field("notify_timeout", &self.notify_timeout)
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<ServerConfig, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    /// Blank values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Result<ServerConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let database_url = get("POSTGRES_URL")
            .or_else(|| get("DATABASE_URL"))
            .ok_or(ConfigError::Missing("POSTGRES_URL"))?;
        let webhook_url = required("DISCORD_WEBHOOK_URL")?;

        let sender_name = required("SENDER_NAME")?;
        let sender = Mailbox::new(sender_name.clone(), required("SENDER_EMAIL")?);
        let rcpt = Mailbox::new(required("RECIPIENT_NAME")?, required("RECIPIENT_EMAIL")?);

        let server = required("SMTP_SERVER")?;
        let smtp = SmtpConfig {
            port: parse_number("SMTP_PORT", &required("SMTP_PORT")?)?,
            domain: get("SMTP_DOMAIN").unwrap_or_else(|| server.clone()),
            user: required("SMTP_USERNAME")?,
            pass: required("SMTP_PASSWORD")?,
            server,
        };

        let subject = get("EMAIL_SUBJECT")
            .unwrap_or_else(|| format!("[{sender_name}] New Contact Form Submission"));

        let origins_count: usize = optional_number(&get, "ORIGINS_URL_COUNT")?.unwrap_or(DEFAULT_ORIGINS_COUNT);
        let allowed_origins = (1..=origins_count)
            .filter_map(|i| get(&format!("ORIGINS_URL_{i}")))
            .collect();

        Ok(ServerConfig {
            port: optional_number(&get, "SERVER_PORT")?.unwrap_or(DEFAULT_SERVER_PORT),
            database_url,
            webhook_url,
            smtp,
            sender,
            rcpt,
            subject,
            allowed_origins,
            notify_timeout: Duration::from_secs(
                optional_number(&get, "NOTIFY_TIMEOUT_SECS")?.unwrap_or(DEFAULT_NOTIFY_TIMEOUT_SECS),
            ),
        })
    }
}

fn parse_number<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: value.to_string(),
    })
}

fn optional_number<T, F>(get: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    get(name).map(|v| parse_number(name, &v)).transpose()
}
