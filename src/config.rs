use std::str::FromStr;
use std::time::Duration;

use crate::notification::NotifierConfig;

const INSECURE_JWT_SECRET: &str = "CHANGE_ME_DEV_ONLY_SECRET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("unknown store backend '{}': expected postgres or memory", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub store: StoreBackend,
    /// Admin routes reject every request while this is unset.
    pub admin_key: Option<String>,
    /// HS256 secret used to verify session tokens issued by the auth service.
    pub jwt_secret: String,
    pub push_timeout: Duration,
    /// Outbound queue capacity per live session.
    pub session_queue: usize,
    pub broadcast_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        let notifier = NotifierConfig::default();
        Self {
            port: 8080,
            database_url: "postgres://localhost/photobooth".to_string(),
            store: StoreBackend::Postgres,
            admin_key: None,
            jwt_secret: INSECURE_JWT_SECRET.to_string(),
            push_timeout: notifier.push_timeout,
            session_queue: 64,
            broadcast_concurrency: notifier.broadcast_concurrency,
        }
    }
}

impl Config {
    pub fn notifier(&self) -> NotifierConfig {
        NotifierConfig {
            push_timeout: self.push_timeout,
            broadcast_concurrency: self.broadcast_concurrency,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    let defaults = Config::default();

    let jwt_secret = std::env::var("BOOTH_JWT_SECRET").unwrap_or_else(|_| INSECURE_JWT_SECRET.into());
    if jwt_secret == INSECURE_JWT_SECRET {
        let env_mode = std::env::var("BOOTH_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "BOOTH_JWT_SECRET is still the insecure placeholder. \
                 Set the auth service's signing secret before running in production."
            );
        }
        tracing::warn!("BOOTH_JWT_SECRET is not set, using insecure placeholder");
    }

    let store = match std::env::var("BOOTH_STORE") {
        Ok(v) => v.parse()?,
        Err(_) => defaults.store,
    };

    Ok(Config {
        port: env_or("BOOTH_PORT", defaults.port),
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        store,
        admin_key: std::env::var("BOOTH_ADMIN_KEY").ok().filter(|k| !k.is_empty()),
        jwt_secret,
        push_timeout: Duration::from_millis(env_or(
            "BOOTH_PUSH_TIMEOUT_MS",
            defaults.push_timeout.as_millis() as u64,
        )),
        session_queue: env_or("BOOTH_SESSION_QUEUE", defaults.session_queue),
        broadcast_concurrency: env_or("BOOTH_BROADCAST_CONCURRENCY", defaults.broadcast_concurrency),
    })
}

/// Parse an env var, falling back to `default` when unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("postgres".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert_eq!(" Memory ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("BOOTH_TEST_ENV_OR", "not-a-number");
        assert_eq!(env_or("BOOTH_TEST_ENV_OR", 42u16), 42);
        std::env::set_var("BOOTH_TEST_ENV_OR", " 7 ");
        assert_eq!(env_or("BOOTH_TEST_ENV_OR", 42u16), 7);
        assert_eq!(env_or("BOOTH_TEST_ENV_OR_UNSET", 5usize), 5);
    }

    #[test]
    fn test_notifier_config_mirrors_fields() {
        let cfg = Config {
            push_timeout: Duration::from_millis(250),
            broadcast_concurrency: 4,
            ..Config::default()
        };
        let n = cfg.notifier();
        assert_eq!(n.push_timeout, Duration::from_millis(250));
        assert_eq!(n.broadcast_concurrency, 4);
    }
}
