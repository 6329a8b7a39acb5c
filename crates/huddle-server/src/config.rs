use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use huddle_gateway::dispatcher::DEFAULT_OUTBOUND_QUEUE;

const PLACEHOLDER_SECRET: &str = "dev-secret-change-me";

/// Server settings, read from `HUDDLE_*` environment variables (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub store_timeout: Duration,
    pub outbound_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jwt_secret: PLACEHOLDER_SECRET.into(),
            db_path: PathBuf::from("huddle.db"),
            host: "0.0.0.0".into(),
            port: 3000,
            upload_dir: PathBuf::from("./uploads"),
            store_timeout: Duration::from_millis(5000),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            jwt_secret: var("HUDDLE_JWT_SECRET").unwrap_or(defaults.jwt_secret),
            db_path: var("HUDDLE_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            host: var("HUDDLE_HOST").unwrap_or(defaults.host),
            port: parse(&var, "HUDDLE_PORT")?.unwrap_or(defaults.port),
            upload_dir: var("HUDDLE_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            store_timeout: parse(&var, "HUDDLE_STORE_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            outbound_queue: parse(&var, "HUDDLE_OUTBOUND_QUEUE")?.unwrap_or(defaults.outbound_queue),
        };

        if config.jwt_secret == PLACEHOLDER_SECRET {
            warn!("HUDDLE_JWT_SECRET is not set; using the development placeholder");
        }
        Ok(config)
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|raw| raw.trim().parse::<T>().with_context(|| format!("{} = {:?}", key, raw)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("huddle.db"));
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert_eq!(config.outbound_queue, DEFAULT_OUTBOUND_QUEUE);
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn env_overrides_and_rejects_garbage() {
        let config = Config::from_lookup(lookup(&[
            ("HUDDLE_PORT", "8080"),
            ("HUDDLE_STORE_TIMEOUT_MS", "250"),
            ("HUDDLE_JWT_SECRET", "s3cret"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.store_timeout, Duration::from_millis(250));
        assert_eq!(config.jwt_secret, "s3cret");

        assert!(Config::from_lookup(lookup(&[("HUDDLE_PORT", "lots")])).is_err());
    }
}
