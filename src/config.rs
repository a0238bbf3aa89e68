use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const EMERGENCY_ENABLED_ENV: &str = "CENTERGATE_EMERGENCY_ACCESS_ENABLED";
pub const EMERGENCY_CODE_ENV: &str = "CENTERGATE_EMERGENCY_ACCESS_CODE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub security: SecurityConfig,

    pub session: SessionConfig,

    pub observability: ObservabilityConfig,

    /// Break-glass access. Only ever populated from the process environment.
    #[serde(skip)]
    pub emergency: EmergencyAccess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// Number of tokio worker threads.
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    pub max_db_connections: u32,

    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:centergate.db".to_string(),
            log_level: "info".to_string(),
            worker_threads: 0,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub port: u16,

    pub cors_allowed_origins: Vec<String>,

    /// Whether to set the Secure flag on session cookies.
    /// Set to true whenever the service sits behind HTTPS.
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
            cors_allowed_origins: vec!["*".to_string()],
            secure_cookies: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB (default: 8192 = 8MB)
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_time_cost: u32,

    pub argon2_parallelism: u32,

    /// Upper bound on concurrent password hash operations.
    pub hash_workers: usize,

    /// Hex encoded 32 byte key used to encrypt second-factor secrets at rest.
    /// When empty a random key is generated for the lifetime of the process.
    pub secret_key: String,

    pub lockout: LockoutConfig,

    pub second_factor: LockoutConfig,

    /// Passwords older than this are treated as expired (0 disables expiry).
    pub password_expiry_days: u32,

    pub reset_token_hours: u32,

    pub pending_ticket_minutes: u32,

    pub totp_issuer: String,

    /// Peers allowed to supply `X-Forwarded-For`.
    pub trusted_proxy_ips: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
            hash_workers: 4,
            secret_key: String::new(),
            lockout: LockoutConfig::default(),
            second_factor: LockoutConfig {
                max_attempts: 3,
                lockout_minutes: 15,
            },
            password_expiry_days: 90,
            reset_token_hours: 24,
            pending_ticket_minutes: 10,
            totp_issuer: "centergate".to_string(),
            trusted_proxy_ips: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockoutConfig {
    /// Failed attempts before the account is locked.
    pub max_attempts: u32,

    pub lockout_minutes: u32,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintPolicy {
    /// Audit and log a changed IP or user agent, keep the session.
    #[default]
    Record,

    /// Drop the session when the fingerprint changes.
    Invalidate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_timeout_minutes: u32,

    pub fingerprint_policy: FingerprintPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 60,
            fingerprint_policy: FingerprintPolicy::Record,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: std::collections::HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = std::collections::HashMap::new();
        labels.insert("app".to_string(), "centergate".to_string());

        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

/// Operator-controlled bypass of lockout and second factor.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EmergencyAccess {
    pub enabled: bool,

    pub code: String,
}

impl std::fmt::Debug for EmergencyAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyAccess")
            .field("enabled", &self.enabled)
            .field("code", &"<redacted>")
            .finish()
    }
}

impl EmergencyAccess {
    /// Reads the enable flag and shared code from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let enabled = std::env::var(EMERGENCY_ENABLED_ENV)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let code = std::env::var(EMERGENCY_CODE_ENV).unwrap_or_default();

        Self { enabled, code }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            warn!("Failed to read .env file: {e}");
        }

        let paths = Self::config_paths();

        let mut config = None;
        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                config = Some(Self::load_from_path(path)?);
                break;
            }
        }

        let mut config = config.unwrap_or_else(|| {
            info!("No config file found, using defaults");
            Self::default()
        });
        config.emergency = EmergencyAccess::from_env();

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("centergate").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".centergate").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, lockout) in [
            ("security.lockout", &self.security.lockout),
            ("security.second_factor", &self.security.second_factor),
        ] {
            if lockout.max_attempts == 0 {
                anyhow::bail!("{name}.max_attempts must be > 0");
            }
            if lockout.lockout_minutes == 0 {
                anyhow::bail!("{name}.lockout_minutes must be > 0");
            }
        }

        if self.session.idle_timeout_minutes == 0 {
            anyhow::bail!("session.idle_timeout_minutes must be > 0");
        }

        if self.security.hash_workers == 0 {
            anyhow::bail!("security.hash_workers must be > 0");
        }

        if self.emergency.enabled && self.emergency.code.trim().is_empty() {
            anyhow::bail!(
                "Emergency access is enabled but {EMERGENCY_CODE_ENV} is empty"
            );
        }

        if !self.security.secret_key.is_empty() {
            let key = hex::decode(&self.security.secret_key)
                .context("security.secret_key must be hex encoded")?;
            if key.len() != 32 {
                anyhow::bail!("security.secret_key must decode to 32 bytes");
            }
        }

        Ok(())
    }
}
