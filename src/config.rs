use crate::error::{Result, SluiceError};
use crate::models::{Credentials, ProxyEndpoint, ProxyTier, StrategyBudget};
use crate::proxy::{tor_endpoints, ProxyPool, Vendor, PREMIUM_VENDORS};
use crate::strategy::{AUDIO, DIRECT, PROXIED};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy identities and rotation
    pub proxy: ProxyPoolConfig,
    /// External commands and default per-strategy budgets
    pub strategies: StrategyConfig,
    /// Extra classification rules
    pub detector: DetectorConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Passive rotation interval in seconds (default: 300, 0 disables)
    pub rotation_interval_secs: u64,
    /// One endpoint per vendor with both credentials set, in catalog order
    pub premium: Vec<ProxyEndpoint>,
    /// Endpoints from SLUICE_FREE_PROXIES, plus Tor when enabled
    pub free: Vec<ProxyEndpoint>,
}

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    /// Structured-extraction command line
    pub transcript_command: String,
    /// Audio download + transcription command line
    pub audio_command: String,
    pub direct: StrategyBudget,
    pub proxied: StrategyBudget,
    pub audio: StrategyBudget,
}

#[derive(Debug, Clone, Default)]
pub struct DetectorConfig {
    /// Regexes classified as blocked, after the built-in ones
    pub block_patterns: Vec<String>,
    /// Regexes classified as permanently unavailable, after the built-in ones
    pub unavailable_patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            proxy: ProxyPoolConfig {
                rotation_interval_secs: parse_env("SLUICE_ROTATION_INTERVAL_SECS", "300")?,
                premium: parse_premium_vendors()?,
                free: parse_free_proxies()?,
            },
            strategies: StrategyConfig {
                transcript_command: get_env_or(
                    "SLUICE_TRANSCRIPT_CMD",
                    "python3 scripts/transcript.py",
                ),
                audio_command: get_env_or("SLUICE_AUDIO_CMD", "python3 scripts/audio_transcribe.py"),
                direct: parse_budget(DIRECT, "DIRECT", "3000", "0")?,
                proxied: parse_budget(PROXIED, "PROXIED", "5000", "2")?,
                audio: parse_budget(AUDIO, "AUDIO", "180000", "1")?,
            },
            detector: DetectorConfig {
                block_patterns: split_patterns(&get_env_or("SLUICE_BLOCK_PATTERNS", "")),
                unavailable_patterns: split_patterns(&get_env_or(
                    "SLUICE_UNAVAILABLE_PATTERNS",
                    "",
                )),
            },
            log: LogConfig::from_env(),
        })
    }

    /// Passive rotation interval, `None` when disabled
    pub fn rotation_interval(&self) -> Option<Duration> {
        match self.proxy.rotation_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Cheapest strategy first
    pub fn default_chain(&self) -> Vec<StrategyBudget> {
        vec![
            self.strategies.direct.clone(),
            self.strategies.proxied.clone(),
            self.strategies.audio.clone(),
        ]
    }

    /// Premium entries first, free entries last
    pub fn build_pool(&self) -> ProxyPool {
        let endpoints = self
            .proxy
            .premium
            .iter()
            .chain(self.proxy.free.iter())
            .cloned()
            .collect();
        ProxyPool::new(endpoints, self.rotation_interval())
    }
}

impl LogConfig {
    /// Readable before the rest of the configuration so startup problems get logged
    pub fn from_env() -> Self {
        LogConfig {
            level: get_env_or("LOG_LEVEL", "info"),
            format: get_env_or("LOG_FORMAT", "pretty"),
        }
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

fn parse_premium_vendors() -> Result<Vec<ProxyEndpoint>> {
    let mut endpoints = Vec::new();
    for vendor in PREMIUM_VENDORS {
        if let Some(endpoint) = parse_vendor(vendor)? {
            endpoints.push(endpoint);
        }
    }
    Ok(endpoints)
}

fn parse_vendor(vendor: &Vendor) -> Result<Option<ProxyEndpoint>> {
    let username = get_env_or(&vendor.username_var(), "");
    let password = get_env_or(&vendor.password_var(), "");

    match (username.trim().is_empty(), password.trim().is_empty()) {
        (true, true) => return Ok(None),
        (false, false) => {}
        _ => {
            warn!(
                "Ignoring {}: both {} and {} must be set",
                vendor.name,
                vendor.username_var(),
                vendor.password_var()
            );
            return Ok(None);
        }
    }

    let mut endpoint = vendor.endpoint(Credentials::new(username.trim(), password.trim()));

    let host = get_env_or(&vendor.host_var(), "");
    if !host.trim().is_empty() {
        endpoint.host = host.trim().to_string();
    }
    let port_var = vendor.port_var();
    if let Ok(port) = env::var(&port_var) {
        endpoint.port = port.trim().parse().map_err(|_| {
            SluiceError::InvalidConfig(format!("{} must be a valid port number", port_var))
        })?;
    }

    Ok(Some(endpoint))
}

fn parse_free_proxies() -> Result<Vec<ProxyEndpoint>> {
    let mut endpoints = get_env_or("SLUICE_FREE_PROXIES", "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, raw)| {
            ProxyEndpoint::from_url(raw, &format!("free-{}", i + 1), ProxyTier::Free).map_err(
                |e| SluiceError::InvalidConfig(format!("SLUICE_FREE_PROXIES entry {}: {}", raw, e)),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let tor_enabled = matches!(
        get_env_or("TOR_ENABLED", "false").trim().to_lowercase().as_str(),
        "true" | "1" | "yes"
    );
    if tor_enabled {
        endpoints.extend(tor_endpoints());
    }

    Ok(endpoints)
}

fn parse_budget(name: &str, key: &str, timeout_ms: &str, retries: &str) -> Result<StrategyBudget> {
    let timeout_key = format!("SLUICE_{}_TIMEOUT_MS", key);
    let retries_key = format!("SLUICE_{}_RETRIES", key);

    let timeout_ms: u64 = parse_env(&timeout_key, timeout_ms)?;
    if timeout_ms == 0 {
        return Err(SluiceError::InvalidConfig(format!(
            "{} must be greater than zero",
            timeout_key
        )));
    }

    Ok(StrategyBudget::new(
        name,
        Duration::from_millis(timeout_ms),
        parse_env(&retries_key, retries)?,
    ))
}

fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| SluiceError::InvalidConfig(format!("{} must be a valid number", key)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::test_env::{EnvGuard, ENV_LOCK};
    use crate::models::ProxyProtocol;
    use std::env;

    const CONFIG_ENV_KEYS: &[&str] = &[
        "SLUICE_ROTATION_INTERVAL_SECS",
        "BRIGHTDATA_USERNAME",
        "BRIGHTDATA_PASSWORD",
        "BRIGHTDATA_HOST",
        "BRIGHTDATA_PORT",
        "SMARTPROXY_USERNAME",
        "SMARTPROXY_PASSWORD",
        "SMARTPROXY_HOST",
        "SMARTPROXY_PORT",
        "PROXYEMPIRE_USERNAME",
        "PROXYEMPIRE_PASSWORD",
        "PROXYEMPIRE_HOST",
        "PROXYEMPIRE_PORT",
        "OXYLABS_USERNAME",
        "OXYLABS_PASSWORD",
        "OXYLABS_HOST",
        "OXYLABS_PORT",
        "SLUICE_FREE_PROXIES",
        "TOR_ENABLED",
        "SLUICE_TRANSCRIPT_CMD",
        "SLUICE_AUDIO_CMD",
        "SLUICE_DIRECT_TIMEOUT_MS",
        "SLUICE_DIRECT_RETRIES",
        "SLUICE_PROXIED_TIMEOUT_MS",
        "SLUICE_PROXIED_RETRIES",
        "SLUICE_AUDIO_TIMEOUT_MS",
        "SLUICE_AUDIO_RETRIES",
        "SLUICE_BLOCK_PATTERNS",
        "SLUICE_UNAVAILABLE_PATTERNS",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.proxy.rotation_interval_secs, 300);
        assert_eq!(config.rotation_interval(), Some(Duration::from_secs(300)));
        assert!(config.proxy.premium.is_empty());
        assert!(config.proxy.free.is_empty());

        assert_eq!(config.strategies.transcript_command, "python3 scripts/transcript.py");
        assert_eq!(
            config.default_chain(),
            vec![
                StrategyBudget::new("direct", Duration::from_millis(3000), 0),
                StrategyBudget::new("proxied", Duration::from_millis(5000), 2),
                StrategyBudget::new("audio", Duration::from_millis(180_000), 1),
            ]
        );

        assert!(config.detector.block_patterns.is_empty());
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "pretty");
        assert!(config.build_pool().is_empty());
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SLUICE_ROTATION_INTERVAL_SECS", "0");
        env::set_var("OXYLABS_USERNAME", "oxy-user");
        env::set_var("OXYLABS_PASSWORD", "oxy-pass");
        env::set_var("BRIGHTDATA_USERNAME", "bd-user");
        env::set_var("BRIGHTDATA_PASSWORD", "bd-pass");
        env::set_var("BRIGHTDATA_HOST", "brd.superproxy.io");
        env::set_var("BRIGHTDATA_PORT", "33335");
        env::set_var("SLUICE_FREE_PROXIES", "http://1.2.3.4:8080, socks5://u:p@5.6.7.8:1080");
        env::set_var("TOR_ENABLED", "true");
        env::set_var("SLUICE_PROXIED_TIMEOUT_MS", "7000");
        env::set_var("SLUICE_AUDIO_RETRIES", "0");
        env::set_var("SLUICE_BLOCK_PATTERNS", "cloudflare; ;challenge page");
        env::set_var("LOG_FORMAT", "json");

        let config = Config::from_env().unwrap();

        assert_eq!(config.rotation_interval(), None);

        let premium: Vec<_> = config.proxy.premium.iter().map(|e| e.provider.as_str()).collect();
        assert_eq!(premium, vec!["brightdata", "oxylabs"]);
        assert_eq!(config.proxy.premium[0].host, "brd.superproxy.io");
        assert_eq!(config.proxy.premium[0].port, 33335);
        assert_eq!(config.proxy.premium[1].host, "pr.oxylabs.io");

        let free: Vec<_> = config.proxy.free.iter().map(|e| e.provider.as_str()).collect();
        assert_eq!(free, vec!["free-1", "free-2", "tor", "tor-http"]);
        assert_eq!(config.proxy.free[1].protocol, ProxyProtocol::Socks5);

        assert_eq!(config.strategies.proxied.timeout, Duration::from_millis(7000));
        assert_eq!(config.strategies.audio.max_retries, 0);
        assert_eq!(
            config.detector.block_patterns,
            vec!["cloudflare".to_string(), "challenge page".to_string()]
        );
        assert_eq!(config.log.format, "json");
        assert!(config.log.is_json());

        let pool = config.build_pool();
        assert_eq!(pool.len(), 6);
        assert_eq!(pool.stats().premium_count, 2);
        assert_eq!(pool.get_current().unwrap().provider, "brightdata");
    }

    #[test]
    fn test_config_from_env_half_configured_vendor_is_skipped() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SMARTPROXY_USERNAME", "only-user");

        let config = Config::from_env().unwrap();
        assert!(config.proxy.premium.is_empty());
    }

    #[test]
    fn test_config_from_env_invalid_numbers() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SLUICE_DIRECT_TIMEOUT_MS", "soon");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, SluiceError::InvalidConfig(_)));

        env::set_var("SLUICE_DIRECT_TIMEOUT_MS", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, SluiceError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_invalid_vendor_port() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("OXYLABS_USERNAME", "u");
        env::set_var("OXYLABS_PASSWORD", "p");
        env::set_var("OXYLABS_PORT", "70000");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, SluiceError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_invalid_free_proxy() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SLUICE_FREE_PROXIES", "ftp://1.2.3.4:21");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, SluiceError::InvalidConfig(_)));
    }
}
