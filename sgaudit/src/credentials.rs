//! SMTP credential types and environment loading
use log::{debug, info};
use secrecy::SecretString;

/// Environment variable holding the SMTP login name
pub const ENV_SMTP_USERNAME: &str = "SGAUDIT_SMTP_USERNAME";

/// Environment variable holding the SMTP password
pub const ENV_SMTP_PASSWORD: &str = "SGAUDIT_SMTP_PASSWORD";

const MAX_USERNAME_LENGTH: usize = 320;
const MAX_PASSWORD_LENGTH: usize = 1024;

/// Vault configuration for credential retrieval
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub addr: String,
    pub jwt: String,
    pub role: String,
    pub secret_path: String,
    pub namespace: Option<String>,
    pub auth_path: String,
}

/// Custom error types for credential operations
#[derive(thiserror::Error, Debug)]
pub enum CredentialError {
    #[error("Environment variable validation failed: {field}: {message}")]
    ValidationError { field: String, message: String },

    #[error("Vault authentication failed: {context}")]
    VaultAuthError { context: String },

    #[error("Vault secret retrieval failed: {path}: {context}")]
    VaultSecretError { path: String, context: String },

    #[error("Missing required credentials: {missing}")]
    MissingCredentials { missing: String },

    #[error("Vault configuration error: {message}")]
    VaultConfigError { message: String },
}

/// Login for the SMTP relay
#[derive(Debug, Clone)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: SecretString,
}

/// Validate an SMTP username (usually the sender mailbox)
pub fn validate_smtp_username(value: &str, field_name: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field_name} cannot be empty"));
    }
    if value.len() > MAX_USERNAME_LENGTH {
        return Err(format!(
            "{field_name} must not exceed {MAX_USERNAME_LENGTH} characters"
        ));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!(
            "{field_name} must not contain whitespace or control characters"
        ));
    }
    Ok(())
}

/// Validate an SMTP password without echoing it
pub fn validate_smtp_password(value: &str, field_name: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field_name} cannot be empty"));
    }
    if value.len() > MAX_PASSWORD_LENGTH {
        return Err(format!(
            "{field_name} must not exceed {MAX_PASSWORD_LENGTH} characters"
        ));
    }
    if value.contains('\0') {
        return Err(format!("{field_name} contains null bytes"));
    }
    Ok(())
}

/// Load SMTP credentials from `SGAUDIT_SMTP_USERNAME` / `SGAUDIT_SMTP_PASSWORD`
///
/// # Errors
///
/// Returns error if either variable is missing or invalid
pub fn load_smtp_credentials_from_env() -> Result<SmtpCredentials, CredentialError> {
    debug!("Loading SMTP credentials from environment variables");

    let username =
        std::env::var(ENV_SMTP_USERNAME).map_err(|_| CredentialError::MissingCredentials {
            missing: format!("{ENV_SMTP_USERNAME} environment variable"),
        })?;

    let password =
        std::env::var(ENV_SMTP_PASSWORD).map_err(|_| CredentialError::MissingCredentials {
            missing: format!("{ENV_SMTP_PASSWORD} environment variable"),
        })?;

    credentials_from_parts(username, password, ENV_SMTP_USERNAME, ENV_SMTP_PASSWORD)
        .inspect(|_| info!("Successfully loaded SMTP credentials from environment"))
}

/// Validate raw values and wrap the password as a secret
pub(crate) fn credentials_from_parts(
    username: String,
    password: String,
    username_field: &str,
    password_field: &str,
) -> Result<SmtpCredentials, CredentialError> {
    validate_smtp_username(&username, username_field).map_err(|message| {
        CredentialError::ValidationError {
            field: username_field.to_string(),
            message,
        }
    })?;

    validate_smtp_password(&password, password_field).map_err(|message| {
        CredentialError::ValidationError {
            field: password_field.to_string(),
            message,
        }
    })?;

    Ok(SmtpCredentials {
        username,
        password: SecretString::new(password.into()),
    })
}
