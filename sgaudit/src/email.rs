//! SMTP delivery of CSV reports
use crate::credentials::SmtpCredentials;
use crate::error::{ReportError, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{debug, info};
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_SUBJECT: &str = "CSV File Attachment";
pub const DEFAULT_BODY: &str = "Please find the attached CSV file.";

pub const ENV_SMTP_HOST: &str = "SGAUDIT_SMTP_HOST";
pub const ENV_SMTP_PORT: &str = "SGAUDIT_SMTP_PORT";
pub const ENV_SMTP_FROM: &str = "SGAUDIT_SMTP_FROM";
pub const ENV_SMTP_TO: &str = "SGAUDIT_SMTP_TO";

/// Everything needed to send one report email
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl EmailConfig {
    /// Config with default relay, subject and body
    #[must_use]
    pub fn new(credentials: SmtpCredentials, to: Vec<String>) -> Self {
        Self {
            host: DEFAULT_SMTP_HOST.to_string(),
            port: DEFAULT_SMTP_PORT,
            from: credentials.username.clone(),
            username: credentials.username,
            password: credentials.password,
            to,
            subject: DEFAULT_SUBJECT.to_string(),
            body: DEFAULT_BODY.to_string(),
        }
    }

    /// Read relay settings from `SGAUDIT_SMTP_*` variables
    ///
    /// The sender defaults to the SMTP username. `SGAUDIT_SMTP_TO` is a
    /// comma-separated recipient list and is required.
    ///
    /// # Errors
    ///
    /// Returns error if no recipient is configured or the port is invalid
    pub fn from_env(credentials: SmtpCredentials) -> Result<Self> {
        let to: Vec<String> = std::env::var(ENV_SMTP_TO)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if to.is_empty() {
            return Err(ReportError::InvalidConfig(format!(
                "{ENV_SMTP_TO} must list at least one recipient"
            )));
        }

        let mut config = Self::new(credentials, to);

        if let Ok(host) = std::env::var(ENV_SMTP_HOST)
            && !host.trim().is_empty()
        {
            config.host = host.trim().to_string();
        }

        if let Ok(port) = std::env::var(ENV_SMTP_PORT) {
            config.port = port.trim().parse().map_err(|_| {
                ReportError::InvalidConfig(format!("{ENV_SMTP_PORT} is not a valid port: '{port}'"))
            })?;
        }

        if let Ok(from) = std::env::var(ENV_SMTP_FROM)
            && !from.trim().is_empty()
        {
            config.from = from.trim().to_string();
        }

        debug!(
            "SMTP relay {}:{} from {} to {:?}",
            config.host, config.port, config.from, config.to
        );
        Ok(config)
    }
}

/// Build a multipart message with the body text and the file attached as CSV
///
/// # Errors
///
/// Returns error if the attachment is missing or an address is invalid
pub fn build_message(config: &EmailConfig, attachment: &Path) -> Result<Message> {
    if !attachment.is_file() {
        return Err(ReportError::Email(format!(
            "Attachment not found or path is invalid: {}",
            attachment.display()
        )));
    }

    let content = std::fs::read(attachment)?;
    let filename = attachment
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("report.csv")
        .to_string();
    let csv_type = ContentType::parse("text/csv")
        .map_err(|e| ReportError::Email(format!("invalid content type: {e}")))?;

    let mut builder = Message::builder()
        .from(config.from.parse::<Mailbox>()?)
        .subject(config.subject.clone());
    for recipient in &config.to {
        builder = builder.to(recipient.parse::<Mailbox>()?);
    }

    let message = builder.multipart(
        MultiPart::mixed()
            .singlepart(SinglePart::plain(config.body.clone()))
            .singlepart(Attachment::new(filename).body(content, csv_type)),
    )?;

    Ok(message)
}

/// Send `attachment` through the configured relay using STARTTLS and login
///
/// # Errors
///
/// Returns error if the message cannot be built or delivery fails
pub async fn send_report(config: &EmailConfig, attachment: &Path) -> Result<()> {
    let message = build_message(config, attachment)?;

    let credentials = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        .port(config.port)
        .credentials(credentials)
        .build();

    info!("Sending {} to {}", attachment.display(), config.to.join(", "));
    mailer.send(message).await?;
    info!("Email sent successfully!");

    Ok(())
}
