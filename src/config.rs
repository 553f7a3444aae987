use base64::{Engine as _, engine::general_purpose};
use rocket::figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_PATH: &str = "/api/v1";

/// Development-only AES-256 key for TOTP secrets. Override `two_factor.encryption_key` in any real deployment.
const DEV_TWO_FACTOR_KEY: &str = "Y29sbGFiaHViLWRldi10b3RwLWtleS1ub3QtcHJvZCE=";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub cors: CorsConfig,
    pub session: SessionConfig,
    pub email: EmailConfig,
    pub app: AppConfig,
    pub two_factor: TwoFactorConfig,
    pub tokens: TokenConfig,
    pub rate_limit: RateLimitConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    pub base_path: String,
    pub additional_base_paths: Vec<String>,
    pub enable_swagger: bool,
    /// Mounts the unauthenticated demo-data endpoint. Development only.
    pub enable_seed: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    pub cookie_secure: bool,
    pub max_age_seconds: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MailTransport {
    #[default]
    Smtp,
    /// Keeps sent messages in memory instead of delivering them.
    Outbox,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmailConfig {
    pub transport: MailTransport,
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_address: String,
    pub from_name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub name: String,
    /// Public URL of the web client, used to build links in outgoing email.
    pub public_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TwoFactorConfig {
    pub issuer_name: String,
    /// Base64 encoded 32-byte AES-256-GCM key protecting stored TOTP secrets.
    pub encryption_key: String,
    pub max_failed_attempts: u32,
    pub lockout_minutes: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TokenConfig {
    pub verification_ttl_seconds: i64,
    pub password_reset_ttl_seconds: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    pub read_limit: u32,
    pub mutation_limit: u32,
    pub auth_limit: u32,
    pub window_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub require_client_ip: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceScope {
    /// Status changes reach users sharing a workspace or an accepted friendship.
    #[default]
    Contacts,
    /// Status changes reach every connected client.
    Global,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RealtimeConfig {
    pub presence_scope: PresenceScope,
    /// Reject `authenticate` unless the socket carries a session cookie for the same user.
    pub require_session: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_API_BASE_PATH.to_string(),
            additional_base_paths: Vec::new(),
            enable_swagger: true,
            enable_seed: false,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            allow_credentials: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_secure: true,
            max_age_seconds: 7 * 24 * 60 * 60,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: MailTransport::Smtp,
            enabled: false,
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            from_address: "noreply@collabhub.local".to_string(),
            from_name: "CollabHub".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "CollabHub".to_string(),
            public_url: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            issuer_name: "CollabHub".to_string(),
            encryption_key: DEV_TWO_FACTOR_KEY.to_string(),
            max_failed_attempts: 5,
            lockout_minutes: 15,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            verification_ttl_seconds: 24 * 60 * 60,
            password_reset_ttl_seconds: 60 * 60,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            read_limit: 300,
            mutation_limit: 120,
            auth_limit: 20,
            window_seconds: 60,
            cleanup_interval_seconds: 120,
            require_client_ip: false,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            presence_scope: PresenceScope::Contacts,
            require_session: true,
        }
    }
}

impl TwoFactorConfig {
    pub fn parse_encryption_key(&self) -> Result<[u8; 32], String> {
        let bytes = general_purpose::STANDARD
            .decode(self.encryption_key.trim())
            .map_err(|e| format!("Invalid two-factor encryption key: {}", e))?;

        bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| format!("Two-factor encryption key must be 32 bytes, got {}", bytes.len()))
    }
}

impl AppConfig {
    pub fn link(&self, path: &str) -> String {
        format!("{}/{}", self.public_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

impl Config {
    /// Load configuration from multiple sources in priority order:
    /// 1. Built-in defaults
    /// 2. CollabHub.toml (if present)
    /// 3. Environment variables prefixed with COLLABHUB_ (nested keys separated by `__`,
    ///    e.g. COLLABHUB_STORE__REDIS_URL)
    /// 4. REDIS_URL as a shortcut for `store.redis_url`
    pub fn load() -> Result<Self, figment::Error> {
        let defaults = toml::to_string(&Config::default()).map_err(|e| figment::Error::from(e.to_string()))?;

        let figment = Figment::new()
            .merge(Toml::string(&defaults))
            .merge(Toml::file("CollabHub.toml"))
            .merge(Env::prefixed("COLLABHUB_").split("__"))
            .merge(Env::raw().only(&["REDIS_URL"]).map(|_| "store.redis_url".into()));

        figment.extract()
    }
}
