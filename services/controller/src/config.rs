use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use grafops_api::ClientConfig;
use grafops_reconcile::DEFAULT_RECONCILE_INTERVAL;

#[derive(Debug, Clone)]
pub struct Config {
    pub grafana_url: String,
    pub username: String,
    pub password: String,
    pub manifest_dir: PathBuf,
    pub secrets_dir: PathBuf,
    pub state_file: PathBuf,
    pub reconcile_interval: Duration,
    pub request_timeout: Duration,
    pub once: bool,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let grafana_url = get("GRAFOPS_GRAFANA_URL", "http://localhost:3000");

        let (username, password) = match var("GRAFOPS_CREDENTIALS") {
            Some(encoded) => decode_credentials(&encoded)?,
            None => (
                var("GRAFOPS_USERNAME").context("GRAFOPS_USERNAME or GRAFOPS_CREDENTIALS must be set")?,
                var("GRAFOPS_PASSWORD").context("GRAFOPS_PASSWORD must be set with GRAFOPS_USERNAME")?,
            ),
        };

        let reconcile_interval = match var("GRAFOPS_RECONCILE_INTERVAL_SECS") {
            Some(secs) => Duration::from_secs(
                secs.parse()
                    .with_context(|| format!("invalid GRAFOPS_RECONCILE_INTERVAL_SECS '{secs}'"))?,
            ),
            None => DEFAULT_RECONCILE_INTERVAL,
        };

        let request_timeout = Duration::from_secs(
            get("GRAFOPS_REQUEST_TIMEOUT_SECS", "30")
                .parse()
                .context("invalid GRAFOPS_REQUEST_TIMEOUT_SECS")?,
        );

        let once = var("GRAFOPS_ONCE")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            grafana_url,
            username,
            password,
            manifest_dir: get("GRAFOPS_MANIFEST_DIR", "./manifests").into(),
            secrets_dir: get("GRAFOPS_SECRETS_DIR", "./secrets").into(),
            state_file: get("GRAFOPS_STATE_FILE", "./grafops-state.json").into(),
            reconcile_interval,
            request_timeout,
            once,
            log_level: get("GRAFOPS_LOG_LEVEL", "info"),
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.grafana_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            timeout: self.request_timeout,
        }
    }
}

/// Decodes base64 `username:password`.
fn decode_credentials(encoded: &str) -> Result<(String, String)> {
    let decoded = STANDARD
        .decode(encoded.trim())
        .context("GRAFOPS_CREDENTIALS is not valid base64")?;
    let decoded = String::from_utf8(decoded).context("GRAFOPS_CREDENTIALS is not valid UTF-8")?;

    let parts: Vec<&str> = decoded.split(':').collect();
    let [username, password] = parts.as_slice() else {
        bail!("GRAFOPS_CREDENTIALS must decode to exactly 'username:password'");
    };
    Ok((username.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("GRAFOPS_USERNAME", "admin"), ("GRAFOPS_PASSWORD", "pw")])).unwrap();

        assert_eq!(config.grafana_url, "http://localhost:3000");
        assert_eq!(config.reconcile_interval, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.state_file, PathBuf::from("./grafops-state.json"));
        assert!(!config.once);
    }

    #[test]
    fn test_credentials_secret() {
        let encoded = STANDARD.encode("admin:s3cret");
        let config =
            Config::from_lookup(lookup(&[("GRAFOPS_CREDENTIALS", &encoded), ("GRAFOPS_ONCE", "true")])).unwrap();

        assert_eq!(config.username, "admin");
        assert_eq!(config.password, "s3cret");
        assert!(config.once);
    }

    #[test]
    fn test_credentials_need_exactly_two_parts() {
        let encoded = STANDARD.encode("admin:pass:word");
        assert!(Config::from_lookup(lookup(&[("GRAFOPS_CREDENTIALS", &encoded)])).is_err());

        let encoded = STANDARD.encode("admin");
        assert!(Config::from_lookup(lookup(&[("GRAFOPS_CREDENTIALS", &encoded)])).is_err());
    }

    #[test]
    fn test_missing_credentials() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
    }

    #[test]
    fn test_invalid_interval() {
        let result = Config::from_lookup(lookup(&[
            ("GRAFOPS_USERNAME", "a"),
            ("GRAFOPS_PASSWORD", "b"),
            ("GRAFOPS_RECONCILE_INTERVAL_SECS", "soon"),
        ]));
        assert!(result.is_err());
    }
}
