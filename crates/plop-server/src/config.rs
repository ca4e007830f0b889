//! Server configuration loaded from environment variables.
//!
//! Every setting has a default, so the relay starts with zero configuration
//! for local development. Push stays disabled until both FCM variables are set.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use plop_gateway::fcm::{DEFAULT_ENDPOINT, FcmConfig};

#[derive(Debug, Clone)]
pub struct Config {
    /// Env: `PLOP_HOST`, default `0.0.0.0`
    pub host: String,
    /// Env: `PLOP_PORT`, default `8080`
    pub port: u16,
    /// Env: `PLOP_DB_PATH`, default `plop.db`
    pub db_path: PathBuf,
    /// Minimum spacing between accepted plops from one sender.
    /// Env: `PLOP_MESSAGE_COOLDOWN_SECS`, default `0`
    pub message_cooldown: Duration,
    /// Env: `PLOP_INVITATION_TTL_MINUTES`, default `5`
    pub invitation_ttl: Duration,
    /// Env: `PLOP_SYNC_CODE_TTL_MINUTES`, default `5`
    pub sync_code_ttl: Duration,
    /// Env: `PLOP_CLEANUP_INTERVAL_SECS`, default `60`
    pub cleanup_interval: Duration,
    /// Upper bound on in-flight push escalations.
    /// Env: `PLOP_MAX_CONCURRENT_PUSHES`, default `64`
    pub max_concurrent_pushes: usize,
    /// Env: `PLOP_FCM_PROJECT_ID`, `PLOP_FCM_ACCESS_TOKEN`, `PLOP_FCM_ENDPOINT`
    pub fcm: Option<FcmConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            db_path: PathBuf::from("plop.db"),
            message_cooldown: Duration::ZERO,
            invitation_ttl: Duration::from_secs(5 * 60),
            sync_code_ttl: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60),
            max_concurrent_pushes: 64,
            fcm: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset or empty variables keep
    /// their default; malformed numbers are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = var("PLOP_HOST") {
            config.host = host;
        }
        if let Some(port) = var("PLOP_PORT") {
            config.port = parse("PLOP_PORT", &port)?;
        }
        if let Some(path) = var("PLOP_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(secs) = var("PLOP_MESSAGE_COOLDOWN_SECS") {
            config.message_cooldown = Duration::from_secs(parse("PLOP_MESSAGE_COOLDOWN_SECS", &secs)?);
        }
        if let Some(mins) = var("PLOP_INVITATION_TTL_MINUTES") {
            let n = parse("PLOP_INVITATION_TTL_MINUTES", &mins)?;
            config.invitation_ttl = minutes("PLOP_INVITATION_TTL_MINUTES", n)?;
        }
        if let Some(mins) = var("PLOP_SYNC_CODE_TTL_MINUTES") {
            let n = parse("PLOP_SYNC_CODE_TTL_MINUTES", &mins)?;
            config.sync_code_ttl = minutes("PLOP_SYNC_CODE_TTL_MINUTES", n)?;
        }
        if let Some(secs) = var("PLOP_CLEANUP_INTERVAL_SECS") {
            let secs: u64 = parse("PLOP_CLEANUP_INTERVAL_SECS", &secs)?;
            if secs == 0 {
                bail!("PLOP_CLEANUP_INTERVAL_SECS must be greater than zero");
            }
            config.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(n) = var("PLOP_MAX_CONCURRENT_PUSHES") {
            config.max_concurrent_pushes = parse("PLOP_MAX_CONCURRENT_PUSHES", &n)?;
        }

        match (var("PLOP_FCM_PROJECT_ID"), var("PLOP_FCM_ACCESS_TOKEN")) {
            (Some(project_id), Some(access_token)) => {
                config.fcm = Some(FcmConfig {
                    endpoint: var("PLOP_FCM_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                    project_id,
                    access_token,
                });
            }
            (None, None) => {}
            _ => tracing::warn!(
                "Only one of PLOP_FCM_PROJECT_ID / PLOP_FCM_ACCESS_TOKEN is set, push disabled"
            ),
        }

        Ok(config)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", key, raw, e))
}

fn minutes(key: &str, n: u64) -> Result<Duration> {
    n.checked_mul(60)
        .map(Duration::from_secs)
        .with_context(|| format!("{}={} is too large", key, n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.listen_addr().unwrap(), ([0, 0, 0, 0], 8080).into());
        assert_eq!(c.message_cooldown, Duration::ZERO);
        assert_eq!(c.invitation_ttl, Duration::from_secs(300));
        assert_eq!(c.max_concurrent_pushes, 64);
        assert!(c.fcm.is_none());
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("PLOP_PORT", "9000"),
            ("PLOP_MESSAGE_COOLDOWN_SECS", "5"),
            ("PLOP_SYNC_CODE_TTL_MINUTES", "2"),
            ("PLOP_DB_PATH", "/tmp/x.db"),
        ])
        .unwrap();
        assert_eq!(c.port, 9000);
        assert_eq!(c.message_cooldown, Duration::from_secs(5));
        assert_eq!(c.sync_code_ttl, Duration::from_secs(120));
        assert_eq!(c.db_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn malformed_numbers_are_errors() {
        assert!(config(&[("PLOP_PORT", "eighty")]).is_err());
        assert!(config(&[("PLOP_MESSAGE_COOLDOWN_SECS", "-1")]).is_err());
        assert!(config(&[("PLOP_CLEANUP_INTERVAL_SECS", "0")]).is_err());
    }

    #[test]
    fn ttl_minutes_that_overflow_are_errors() {
        let huge = u64::MAX.to_string();
        let err = config(&[("PLOP_INVITATION_TTL_MINUTES", huge.as_str())]).unwrap_err();
        assert!(err.to_string().contains("PLOP_INVITATION_TTL_MINUTES"));
        assert!(config(&[("PLOP_SYNC_CODE_TTL_MINUTES", huge.as_str())]).is_err());

        let max_ok = (u64::MAX / 60).to_string();
        let c = config(&[("PLOP_SYNC_CODE_TTL_MINUTES", max_ok.as_str())]).unwrap();
        assert_eq!(c.sync_code_ttl, Duration::from_secs(u64::MAX / 60 * 60));
    }

    #[test]
    fn push_needs_project_and_token() {
        assert!(config(&[("PLOP_FCM_PROJECT_ID", "p")]).unwrap().fcm.is_none());

        let fcm = config(&[("PLOP_FCM_PROJECT_ID", "p"), ("PLOP_FCM_ACCESS_TOKEN", "t")])
            .unwrap()
            .fcm
            .unwrap();
        assert_eq!(fcm.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(fcm.project_id, "p");
    }
}
