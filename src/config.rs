use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub auth: AuthConfig,
    pub webhooks: WebhookConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_ttl: Duration,
    pub issuer: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub bcrypt_cost: u32,
}

/// Shared secrets for the inbound webhooks. A `None` secret turns signature
/// checking off for that source.
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    pub meta_app_secret: Option<String>,
    pub meta_verify_token: Option<String>,
    pub whatsapp_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub default_country_code: String,
    pub max_batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_country_code: "27".to_string(),
            max_batch_size: 500,
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let ingest_defaults = IngestConfig::default();

        Config {
            server: ServerConfig {
                host: var_or("SERVER_HOST", "0.0.0.0"),
                port: parsed_or("SERVER_PORT", 8080),
                environment: var_or("ENVIRONMENT", "development"),
            },
            database: DatabaseConfig {
                host: var_or("DB_HOST", "localhost"),
                port: parsed_or("DB_PORT", 5432),
                user: var_or("DB_USER", "postgres"),
                password: var_or("DB_PASSWORD", "postgres"),
                database: var_or("DB_NAME", "mets_leads"),
                ssl_mode: var_or("DB_SSL_MODE", "disable"),
                max_connections: parsed_or("DB_MAX_CONNS", 25),
            },
            redis: RedisConfig {
                host: var_or("REDIS_HOST", "localhost"),
                port: parsed_or("REDIS_PORT", 6379),
                password: non_empty("REDIS_PASSWORD"),
                db: parsed_or("REDIS_DB", 0),
            },
            jwt: JwtConfig {
                secret: var_or("JWT_SECRET", "super-secret-jwt-key-change-in-production"),
                access_token_ttl: Duration::from_secs(
                    parsed_or("JWT_ACCESS_TOKEN_TTL", 12 * 60 * 60), // 12 hours
                ),
                issuer: var_or("JWT_ISSUER", "mets-leads"),
            },
            auth: AuthConfig {
                bcrypt_cost: parsed_or("BCRYPT_COST", bcrypt::DEFAULT_COST),
            },
            webhooks: WebhookConfig {
                meta_app_secret: non_empty("META_APP_SECRET"),
                meta_verify_token: non_empty("META_VERIFY_TOKEN"),
                whatsapp_secret: non_empty("WHATSAPP_WEBHOOK_SECRET"),
            },
            ingest: IngestConfig {
                default_country_code: var_or(
                    "DEFAULT_COUNTRY_CODE",
                    &ingest_defaults.default_country_code,
                ),
                max_batch_size: parsed_or("INGEST_MAX_BATCH", ingest_defaults.max_batch_size),
            },
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.database,
            self.database.ssl_mode
        )
    }

    pub fn redis_url(&self) -> String {
        match &self.redis.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.redis.host, self.redis.port, self.redis.db
            ),
            None => format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.db
            ),
        }
    }

    /// Logs which webhook sources accept unsigned payloads.
    pub fn warn_on_unsigned_webhooks(&self) {
        if self.webhooks.meta_app_secret.is_none() {
            tracing::warn!("META_APP_SECRET not set; Meta webhook signatures are not checked");
        }
        if self.webhooks.whatsapp_secret.is_none() {
            tracing::warn!(
                "WHATSAPP_WEBHOOK_SECRET not set; WhatsApp webhook signatures are not checked"
            );
        }
    }
}
