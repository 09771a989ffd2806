//! Vault retrieval of SMTP credentials with environment fallback
use crate::credentials::{CredentialError, SmtpCredentials, VaultConfig, credentials_from_parts};
use backon::{ExponentialBuilder, Retryable};
use log::{debug, error, info, warn};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;
use vaultrs::{
    auth::oidc,
    client::{Client, VaultClient, VaultClientSettingsBuilder},
    error::ClientError,
    kv2, token,
};

/// Keys read from the Vault secret
const SECRET_KEY_USERNAME: &str = "smtp_username";
const SECRET_KEY_PASSWORD: &str = "smtp_password";

/// Disables TLS certificate verification towards Vault when set to `true`
const ENV_DISABLE_CERT_VALIDATION: &str = "SGAUDIT_DISABLE_CERT_VALIDATION";

// Character sets for validation
const SPECIAL_CHARS: &[char] = &[
    '!', '#', '$', '%', '&', '\'', '*', '+', '-', '/', '=', '?', '^', '_', '`', '{', '}', '|', '~',
    '.',
];
const JWT_CHARS: &[char] = &['-', '_', '.'];

// Secret data validation limits
const MAX_SECRET_KEYS: usize = 100;
const MAX_KEY_LENGTH: usize = 256;
const MAX_VALUE_LENGTH: usize = 64 * 1024;

/// Secret map that deserializes string values directly into `SecretString`
#[derive(Debug)]
pub struct SecureSecretMap(HashMap<String, SecretString>);

impl SecureSecretMap {
    /// Get a secret by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&SecretString> {
        self.0.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SecretString)> {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for SecureSecretMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let plain_map: HashMap<String, String> = HashMap::deserialize(deserializer)?;
        Ok(SecureSecretMap(
            plain_map
                .into_iter()
                .map(|(k, v)| (k, SecretString::new(v.into())))
                .collect(),
        ))
    }
}

/// Authenticated Vault client
pub struct VaultCredentialClient {
    client: VaultClient,
}

impl VaultCredentialClient {
    /// Create a client and log in with the configured JWT
    ///
    /// # Errors
    ///
    /// Returns error if client creation or authentication fails
    pub async fn new(config: &VaultConfig) -> Result<Self, CredentialError> {
        let mut client = create_vault_client(config)?;
        authenticate_vault(&mut client, config).await?;
        Ok(Self { client })
    }

    /// Read SMTP credentials from the secret at `secret_path` (`path[@engine]`)
    ///
    /// # Errors
    ///
    /// Returns error if the secret cannot be read or lacks the SMTP keys
    pub async fn get_smtp_credentials(
        &self,
        secret_path: &str,
    ) -> Result<SmtpCredentials, CredentialError> {
        let (parsed_secret_path, secret_engine) = parse_secret_path(secret_path);
        let secret_data =
            retrieve_vault_secret(&self.client, &parsed_secret_path, &secret_engine).await?;

        validate_secret_data(&secret_data)?;

        let username = secret_data.get(SECRET_KEY_USERNAME).ok_or_else(|| {
            CredentialError::MissingCredentials {
                missing: format!("{SECRET_KEY_USERNAME} not found in vault secret"),
            }
        })?;
        let password = secret_data.get(SECRET_KEY_PASSWORD).ok_or_else(|| {
            CredentialError::MissingCredentials {
                missing: format!("{SECRET_KEY_PASSWORD} not found in vault secret"),
            }
        })?;

        let credentials = credentials_from_parts(
            username.expose_secret().to_string(),
            password.expose_secret().to_string(),
            SECRET_KEY_USERNAME,
            SECRET_KEY_PASSWORD,
        )?;

        info!("Successfully loaded and validated SMTP credentials from vault");
        Ok(credentials)
    }

    /// Revoke the vault token after use
    ///
    /// # Errors
    ///
    /// Returns error if revocation fails after retries
    pub async fn revoke_token(&self) -> Result<(), CredentialError> {
        revoke_vault_token(&self.client).await
    }
}

/// Load vault configuration from `VAULT_CLI_*` environment variables
///
/// # Errors
///
/// Returns error if required variables are missing or fail validation
pub fn load_vault_config_from_env() -> Result<VaultConfig, CredentialError> {
    debug!("Attempting to load vault configuration from environment");

    let required = |name: &str| {
        std::env::var(name).map_err(|_| CredentialError::VaultConfigError {
            message: format!("{name} not found"),
        })
    };

    let addr = required("VAULT_CLI_ADDR")?;
    let jwt = required("VAULT_CLI_JWT")?;
    let role = required("VAULT_CLI_ROLE")?;
    let secret_path = required("VAULT_CLI_SECRET_PATH")?;
    let namespace = std::env::var("VAULT_CLI_NAMESPACE").ok();
    let auth_path =
        std::env::var("VAULT_CLI_AUTH_PATH").unwrap_or_else(|_| "auth/jwt".to_string());

    validate_vault_config(&addr, &jwt, &role, &secret_path, &auth_path)?;

    info!("Vault configuration loaded successfully from environment");

    Ok(VaultConfig {
        addr,
        jwt,
        role,
        secret_path,
        namespace,
        auth_path,
    })
}

/// Load SMTP credentials from Vault, falling back to environment variables
///
/// # Errors
///
/// Returns error if Vault is configured but fails, or if neither source
/// provides credentials
pub async fn load_smtp_credentials() -> Result<SmtpCredentials, CredentialError> {
    match load_vault_config_from_env() {
        Ok(vault_config) => {
            info!("Vault configuration found, attempting SMTP credential retrieval");

            let vault_client = VaultCredentialClient::new(&vault_config).await?;
            let credentials = vault_client
                .get_smtp_credentials(&vault_config.secret_path)
                .await?;

            if let Err(e) = vault_client.revoke_token().await {
                warn!("Token revocation failed, but credential retrieval was successful: {e}");
            } else {
                debug!("Vault token revoked successfully after credential retrieval");
            }

            return Ok(credentials);
        }
        Err(e) => {
            info!("Vault configuration not available: {e}");
            debug!("Using environment variable fallback");
        }
    }

    crate::credentials::load_smtp_credentials_from_env()
}

fn validation_error(field: &str, message: impl Into<String>) -> CredentialError {
    CredentialError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

fn validate_vault_config(
    addr: &str,
    jwt: &str,
    role: &str,
    secret_path: &str,
    auth_path: &str,
) -> Result<(), CredentialError> {
    validate_vault_addr(addr)?;
    validate_jwt_token(jwt)?;
    validate_role(role)?;
    validate_secret_path(secret_path)?;
    validate_auth_path(auth_path)?;

    debug!("Vault configuration validation passed");
    Ok(())
}

fn validate_vault_addr(addr: &str) -> Result<(), CredentialError> {
    if addr.len() > 150 {
        return Err(validation_error(
            "VAULT_CLI_ADDR",
            "VAULT_CLI_ADDR must not exceed 150 characters.",
        ));
    }
    let url = Url::parse(addr)
        .map_err(|_| validation_error("VAULT_CLI_ADDR", "VAULT_CLI_ADDR must be a valid URL"))?;
    if url.scheme() != "https" {
        return Err(validation_error(
            "VAULT_CLI_ADDR",
            "VAULT_CLI_ADDR must use HTTPS protocol",
        ));
    }
    Ok(())
}

fn validate_jwt_token(token: &str) -> Result<(), CredentialError> {
    if token.len() > 20000 {
        return Err(validation_error(
            "VAULT_CLI_JWT",
            "VAULT_CLI_JWT must not exceed 20000 characters.",
        ));
    }
    if !token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || JWT_CHARS.contains(&c))
    {
        return Err(validation_error(
            "VAULT_CLI_JWT",
            "VAULT_CLI_JWT contains invalid characters. Allowed: a-z, A-Z, 0-9, '-', '_', '.'",
        ));
    }
    Ok(())
}

fn validate_role(role: &str) -> Result<(), CredentialError> {
    if role.len() > 100 {
        return Err(validation_error(
            "VAULT_CLI_ROLE",
            "VAULT_CLI_ROLE must not exceed 100 characters.",
        ));
    }
    if !role
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || SPECIAL_CHARS.contains(&c))
    {
        return Err(validation_error(
            "VAULT_CLI_ROLE",
            "VAULT_CLI_ROLE contains invalid characters",
        ));
    }
    Ok(())
}

fn validate_secret_path(path: &str) -> Result<(), CredentialError> {
    if path.len() > 200 {
        return Err(validation_error(
            "VAULT_CLI_SECRET_PATH",
            "VAULT_CLI_SECRET_PATH must not exceed 200 characters.",
        ));
    }
    if !path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || SPECIAL_CHARS.contains(&c) || c == '@')
    {
        return Err(validation_error(
            "VAULT_CLI_SECRET_PATH",
            "VAULT_CLI_SECRET_PATH contains invalid characters",
        ));
    }
    Ok(())
}

fn validate_auth_path(auth_path: &str) -> Result<(), CredentialError> {
    if auth_path.len() > 100 {
        return Err(validation_error(
            "VAULT_CLI_AUTH_PATH",
            "VAULT_CLI_AUTH_PATH must not exceed 100 characters.",
        ));
    }
    if !auth_path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '-' || c == '_')
    {
        return Err(validation_error(
            "VAULT_CLI_AUTH_PATH",
            "VAULT_CLI_AUTH_PATH contains invalid characters. Allowed: alphanumeric and / - _",
        ));
    }
    Ok(())
}

fn create_vault_client(config: &VaultConfig) -> Result<VaultClient, CredentialError> {
    debug!("Creating vault client for addr: {}", config.addr);

    let verify_certs = std::env::var(ENV_DISABLE_CERT_VALIDATION)
        .map(|v| v != "true")
        .unwrap_or(true);
    if !verify_certs {
        warn!("Vault TLS certificate validation is disabled");
    }

    let mut settings_builder = VaultClientSettingsBuilder::default();
    settings_builder.address(&config.addr).verify(verify_certs);

    if let Some(ref namespace) = config.namespace {
        settings_builder.namespace(Some(namespace.clone()));
    }

    let settings = settings_builder
        .build()
        .map_err(|e| CredentialError::VaultConfigError {
            message: format!("Failed to build vault client settings: {e}"),
        })?;

    VaultClient::new(settings).map_err(|e| CredentialError::VaultAuthError {
        context: format!("Failed to create vault client: {e}"),
    })
}

async fn authenticate_vault(
    client: &mut VaultClient,
    config: &VaultConfig,
) -> Result<(), CredentialError> {
    info!("Authenticating with vault using OIDC");

    let mount_point = config
        .auth_path
        .strip_prefix("auth/")
        .unwrap_or(&config.auth_path);
    debug!("Using mount_point='{mount_point}', role='{}'", config.role);

    let auth_info = (|| async {
        oidc::login(client, mount_point, &config.jwt, Some(config.role.clone())).await
    })
    .retry(
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(10))
            .with_max_times(10)
            .with_factor(2.0),
    )
    .when(is_retryable_vault_error)
    .await
    .map_err(|e| CredentialError::VaultAuthError {
        context: describe_vault_error(&e, "Authentication"),
    })?;

    info!("JWT authentication successful");
    client.set_token(&auth_info.client_token);
    Ok(())
}

async fn retrieve_vault_secret(
    client: &VaultClient,
    secret_path: &str,
    secret_engine: &str,
) -> Result<SecureSecretMap, CredentialError> {
    debug!("Retrieving secret from vault path: {secret_path} using engine: {secret_engine}");

    (|| async { kv2::read::<SecureSecretMap>(client, secret_engine, secret_path).await })
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(8))
                .with_max_times(8)
                .with_factor(2.0),
        )
        .when(is_retryable_vault_error)
        .await
        .map_err(|e| CredentialError::VaultSecretError {
            path: secret_path.to_string(),
            context: describe_vault_error(&e, "Secret retrieval"),
        })
        .inspect(|_| info!("Successfully retrieved secret from path: {secret_path}"))
}

async fn revoke_vault_token(client: &VaultClient) -> Result<(), CredentialError> {
    debug!("Attempting to revoke Vault token");

    (|| async { token::revoke_self(client).await })
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(250))
                .with_max_delay(Duration::from_secs(5))
                .with_max_times(7)
                .with_factor(2.0),
        )
        .when(is_retryable_vault_error)
        .await
        .map(|_| info!("Successfully revoked Vault token"))
        .map_err(|e| CredentialError::VaultAuthError {
            context: describe_vault_error(&e, "Token revocation"),
        })
}

/// Split `path@engine`, defaulting the engine to `kvv2`
fn parse_secret_path(full_path: &str) -> (String, String) {
    match full_path.rsplit_once('@') {
        Some((path, engine)) if !engine.is_empty() => (path.to_string(), engine.to_string()),
        Some((path, _)) => (path.to_string(), "kvv2".to_string()),
        None => (full_path.to_string(), "kvv2".to_string()),
    }
}

fn validate_secret_data(secret: &SecureSecretMap) -> Result<(), CredentialError> {
    if secret.is_empty() {
        return Err(validation_error("secret_data", "Secret data is empty"));
    }

    if secret.len() > MAX_SECRET_KEYS {
        return Err(validation_error(
            "secret_data",
            format!(
                "Secret contains too many keys: {} (max: {MAX_SECRET_KEYS})",
                secret.len()
            ),
        ));
    }

    for (key, value) in secret.iter() {
        if key.trim().is_empty() || key.len() > MAX_KEY_LENGTH {
            return Err(validation_error(
                "secret_key",
                format!("Secret key length must be 1-{MAX_KEY_LENGTH} characters"),
            ));
        }

        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-/.".contains(c))
        {
            return Err(validation_error(
                "secret_key",
                format!("Secret key '{key}' contains invalid characters"),
            ));
        }

        if value.expose_secret().len() > MAX_VALUE_LENGTH {
            return Err(validation_error(
                "secret_value",
                format!("Secret value for key '{key}' exceeds {MAX_VALUE_LENGTH} bytes"),
            ));
        }
    }

    Ok(())
}

/// Walk an error chain looking for a transient I/O failure
fn is_network_error(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);

    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            #[allow(clippy::wildcard_enum_match_arm)]
            match io_err.kind() {
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::TimedOut => return true,
                _ => {}
            }
        }
        current = err.source();
    }

    false
}

/// Transient Vault errors worth retrying
fn is_retryable_vault_error(error: &ClientError) -> bool {
    match error {
        ClientError::APIError { code, .. } => match *code {
            412 | 429 | 472 | 473 => true,
            501 => false,
            500..=599 => true,
            _ => false,
        },
        ClientError::RestClientError { source } => is_network_error(source),
        _ => false,
    }
}

fn describe_vault_error(error: &ClientError, operation: &str) -> String {
    let context = match error {
        ClientError::APIError { code, errors } => {
            let details = if errors.is_empty() {
                String::new()
            } else {
                format!(": {}", errors.join(", "))
            };
            match *code {
                401 => format!("Unauthorized (HTTP 401){details}"),
                403 => format!("Forbidden/Access denied (HTTP 403){details}"),
                404 => format!("Not found (HTTP 404){details}"),
                503 => format!("Vault sealed or maintenance (HTTP 503){details}"),
                code => format!("HTTP {code}{details}"),
            }
        }
        other => other.to_string(),
    };
    error!("{operation} failed: {context}");
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_map(entries: &[(&str, &str)]) -> SecureSecretMap {
        SecureSecretMap(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), SecretString::new((*v).into())))
                .collect(),
        )
    }

    #[test]
    fn test_vault_config_validation_success() {
        assert!(
            validate_vault_config(
                "https://vault.example.com",
                "header.payload.signature",
                "sgaudit-role",
                "secret/sgaudit/smtp@kvv2",
                "auth/jwt",
            )
            .is_ok()
        );
    }

    #[test]
    fn test_vault_config_validation_non_https() {
        let result = validate_vault_config(
            "http://vault.example.com",
            "jwt",
            "role",
            "secret/path",
            "auth/jwt",
        );
        assert!(result.unwrap_err().to_string().contains("HTTPS"));
    }

    #[test]
    fn test_jwt_with_invalid_chars() {
        assert!(validate_jwt_token("abc def").is_err());
        assert!(validate_jwt_token("abc.def-ghi_jkl").is_ok());
    }

    #[test]
    fn test_parse_secret_path() {
        assert_eq!(
            parse_secret_path("sgaudit/smtp@secret"),
            ("sgaudit/smtp".to_string(), "secret".to_string())
        );
        assert_eq!(
            parse_secret_path("sgaudit/smtp"),
            ("sgaudit/smtp".to_string(), "kvv2".to_string())
        );
        assert_eq!(
            parse_secret_path("sgaudit/smtp@"),
            ("sgaudit/smtp".to_string(), "kvv2".to_string())
        );
    }

    #[test]
    fn test_validate_secret_data() {
        assert!(
            validate_secret_data(&secret_map(&[
                ("smtp_username", "reports@example.com"),
                ("smtp_password", "s3cret"),
            ]))
            .is_ok()
        );
        assert!(validate_secret_data(&secret_map(&[])).is_err());
        assert!(validate_secret_data(&secret_map(&[("bad key", "v")])).is_err());
    }

    #[test]
    fn test_secure_secret_map_deserialize() {
        let map: SecureSecretMap =
            serde_json::from_str(r#"{"smtp_username":"u@example.com","smtp_password":"pw"}"#)
                .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("smtp_password").unwrap().expose_secret(), "pw");
    }

    #[test]
    fn test_retryable_classification() {
        let forbidden = ClientError::APIError {
            code: 403,
            errors: vec!["permission denied".to_string()],
        };
        assert!(!is_retryable_vault_error(&forbidden));

        let unavailable = ClientError::APIError {
            code: 503,
            errors: vec![],
        };
        assert!(is_retryable_vault_error(&unavailable));

        let not_initialised = ClientError::APIError {
            code: 501,
            errors: vec![],
        };
        assert!(!is_retryable_vault_error(&not_initialised));
        assert!(!is_retryable_vault_error(&ClientError::ResponseEmptyError));
    }

    #[test]
    fn test_describe_vault_error() {
        let error = ClientError::APIError {
            code: 403,
            errors: vec!["permission denied".to_string()],
        };
        assert_eq!(
            describe_vault_error(&error, "Secret retrieval"),
            "Forbidden/Access denied (HTTP 403): permission denied"
        );
    }
}
