use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::sfx::DEFAULT_BEEP_BOOP_PROBABILITY;
use crate::token::Credentials;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_DIST_DIR: &str = "dist";
const DEFAULT_MEMORY_API_URL: &str = "http://127.0.0.1:8484";
const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:3002/bridge";

/// BMO configuration loaded from ~/.config/bmo/config.toml + env vars
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct BmoConfig {
    pub livekit_url: Option<String>,
    pub livekit_api_key: Option<String>,
    pub livekit_api_secret: Option<String>,
    pub port: Option<u16>,
    pub dist_dir: Option<PathBuf>,
    pub memory_api_url: Option<String>,
    pub bridge_url: Option<String>,
    pub beep_boop_probability: Option<f64>,
}

impl BmoConfig {
    /// Load config from file, then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path(), |key| std::env::var(key).ok())
    }

    pub fn load_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str::<BmoConfig>(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            BmoConfig::default()
        };

        let env = |key: &str| env(key).filter(|v| !v.is_empty());
        if let Some(val) = env("LIVEKIT_URL") {
            config.livekit_url = Some(val);
        }
        if let Some(val) = env("LIVEKIT_API_KEY") {
            config.livekit_api_key = Some(val);
        }
        if let Some(val) = env("LIVEKIT_API_SECRET") {
            config.livekit_api_secret = Some(val);
        }
        if let Some(val) = env("PORT") {
            config.port = Some(val.parse().with_context(|| format!("PORT is not a port number: {}", val))?);
        }
        if let Some(val) = env("BMO_DIST_DIR") {
            config.dist_dir = Some(PathBuf::from(val));
        }
        if let Some(val) = env("MEMORY_API_URL") {
            config.memory_api_url = Some(val);
        }
        if let Some(val) = env("BMO_BRIDGE_URL") {
            config.bridge_url = Some(val);
        }
        if let Some(val) = env("BMO_BEEP_BOOP_PROBABILITY") {
            let p: f64 = val
                .parse()
                .with_context(|| format!("BMO_BEEP_BOOP_PROBABILITY is not a number: {}", val))?;
            config.beep_boop_probability = Some(p);
        }
        if let Some(p) = config.beep_boop_probability {
            if !p.is_finite() {
                bail!("beep_boop_probability must be a finite number, got {}", p);
            }
        }

        Ok(config)
    }

    /// Get the config directory path: ~/.config/bmo/
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bmo")
    }

    /// Get the config file path: ~/.config/bmo/config.toml
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn log_path() -> PathBuf {
        Self::config_dir().join("bmo.log")
    }

    /// Media server URL and signing keys; all three must be set.
    pub fn credentials(&self) -> Result<Credentials> {
        match (&self.livekit_url, &self.livekit_api_key, &self.livekit_api_secret) {
            (Some(url), Some(key), Some(secret)) => Ok(Credentials {
                url: url.clone(),
                api_key: key.clone(),
                api_secret: secret.clone(),
            }),
            _ => {
                let missing: Vec<&str> = [
                    ("LIVEKIT_URL", self.livekit_url.is_none()),
                    ("LIVEKIT_API_KEY", self.livekit_api_key.is_none()),
                    ("LIVEKIT_API_SECRET", self.livekit_api_secret.is_none()),
                ]
                .into_iter()
                .filter(|(_, m)| *m)
                .map(|(k, _)| k)
                .collect();
                bail!("Missing required settings: {}", missing.join(", "))
            }
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.dist_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DIST_DIR))
    }

    pub fn memory_api_url(&self) -> &str {
        self.memory_api_url.as_deref().unwrap_or(DEFAULT_MEMORY_API_URL)
    }

    pub fn bridge_url(&self) -> &str {
        self.bridge_url.as_deref().unwrap_or(DEFAULT_BRIDGE_URL)
    }

    pub fn beep_boop_probability(&self) -> f64 {
        self.beep_boop_probability
            .filter(|p| p.is_finite())
            .unwrap_or(DEFAULT_BEEP_BOOP_PROBABILITY)
            .clamp(0.0, 1.0)
    }

    /// Display config with secrets masked
    pub fn display_masked(&self) -> String {
        let mask = |opt: &Option<String>| -> String {
            match opt {
                Some(s) if s.len() > 4 => format!("{}...{}", &s[..2], &s[s.len() - 2..]),
                Some(s) if !s.is_empty() => "****".to_string(),
                _ => "(not set)".to_string(),
            }
        };

        let lines = [
            format!("Config file: {}", Self::config_path().display()),
            format!("livekit_url: {}", self.livekit_url.as_deref().unwrap_or("(not set)")),
            format!("livekit_api_key: {}", mask(&self.livekit_api_key)),
            format!("livekit_api_secret: {}", mask(&self.livekit_api_secret)),
            format!("port: {}", self.port()),
            format!("dist_dir: {}", self.dist_dir().display()),
            format!("memory_api_url: {}", self.memory_api_url()),
            format!("bridge_url: {}", self.bridge_url()),
            format!("beep_boop_probability: {}", self.beep_boop_probability()),
        ];
        lines.join("\n")
    }
}
