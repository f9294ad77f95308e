//! Configuration system for Pipescope.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/pipescope/config.toml` and/or `.pipescope/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Upper bound for `animation.max_simulated_increment`.
pub const MAX_SIMULATED_INCREMENT: u64 = 1_000;

/// Top-level configuration for a Pipescope engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipescopeConfig {
    pub snapshot: SnapshotConfig,
    pub stream: StreamConfig,
    pub animation: AnimationConfig,
    pub auth: AuthConfig,
}

/// Full-snapshot fetching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Dashboard endpoint returning `{ nodes, edges, metrics, activities, chartData }`.
    pub url: String,
    /// Seconds between periodic refreshes.
    pub poll_interval_secs: u64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000/api/v1/dashboard".to_string(),
            poll_interval_secs: 30,
            timeout_secs: 10,
        }
    }
}

/// Streaming push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// Topic subscribed to after every connect.
    pub topic: String,
    /// First reconnect delay ceiling in milliseconds.
    pub backoff_base_ms: u64,
    /// Largest reconnect delay ceiling in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws/dashboard".to_string(),
            topic: "dashboard".to_string(),
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
        }
    }
}

/// Animation clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationConfig {
    /// Milliseconds between ticks.
    pub tick_ms: u64,
    /// Flow coordinate advance per tick, in `(0, 1)`.
    pub flow_step: f64,
    /// Whether running nodes get cosmetic progress between real updates.
    pub simulate_progress: bool,
    /// Largest simulated increment per tick.
    pub max_simulated_increment: u64,
    /// Start with the clock paused.
    #[serde(default)]
    pub start_paused: bool,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            flow_step: 0.02,
            simulate_progress: true,
            max_simulated_increment: 2,
            start_paused: false,
        }
    }
}

/// Bearer authentication for both endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the API token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: Some("PIPESCOPE_API_TOKEN".to_string()),
        }
    }
}

impl AuthConfig {
    /// Read the token from the configured environment variable, if set and non-empty.
    pub fn resolve_token(&self) -> Option<String> {
        let var = self.token_env.as_deref()?;
        std::env::var(var).ok().filter(|token| !token.trim().is_empty())
    }
}

impl PipescopeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot.timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.animation.tick_ms)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        if self.animation.tick_ms == 0 {
            return invalid("animation.tick_ms must be positive".into());
        }
        let step = self.animation.flow_step;
        if !(step > 0.0 && step < 1.0) {
            return invalid(format!("animation.flow_step must be in (0, 1), got {step}"));
        }
        let increment = self.animation.max_simulated_increment;
        if self.animation.simulate_progress
            && !(1..=MAX_SIMULATED_INCREMENT).contains(&increment)
        {
            return invalid(format!(
                "animation.max_simulated_increment must be in 1..={MAX_SIMULATED_INCREMENT}, got {increment}"
            ));
        }
        if self.snapshot.poll_interval_secs == 0 {
            return invalid("snapshot.poll_interval_secs must be positive".into());
        }
        if self.snapshot.timeout_secs == 0 {
            return invalid("snapshot.timeout_secs must be positive".into());
        }
        if self.stream.backoff_base_ms == 0 {
            return invalid("stream.backoff_base_ms must be positive".into());
        }
        if self.stream.backoff_base_ms > self.stream.backoff_max_ms {
            return invalid(format!(
                "stream.backoff_base_ms ({}) exceeds stream.backoff_max_ms ({})",
                self.stream.backoff_base_ms, self.stream.backoff_max_ms
            ));
        }
        check_url("snapshot.url", &self.snapshot.url, &["http", "https"])?;
        check_url("stream.url", &self.stream.url, &["ws", "wss"])?;
        Ok(())
    }
}

fn check_url(field: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value).map_err(|e| ConfigError::Invalid {
        message: format!("{field} is not a valid URL ({value}): {e}"),
    })?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(ConfigError::Invalid {
            message: format!(
                "{field} must use one of {} (got {})",
                schemes.join("/"),
                parsed.scheme()
            ),
        });
    }
    Ok(())
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "pipescope", "pipescope")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".pipescope").join("config.toml")
}

/// Every location a config file is read from, in merge order.
pub fn config_paths(workspace: Option<&Path>) -> Vec<PathBuf> {
    user_config_path()
        .into_iter()
        .chain(workspace.map(workspace_config_path))
        .collect()
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `PIPESCOPE_`)
/// 3. Workspace-local config (`.pipescope/config.toml`)
/// 4. User config (`~/.config/pipescope/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&PipescopeConfig>,
) -> Result<PipescopeConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(PipescopeConfig::default()));

    for path in config_paths(workspace) {
        if path.exists() {
            figment = figment.merge(Toml::file(&path));
        }
    }

    // Environment variables (PIPESCOPE_SNAPSHOT__URL, PIPESCOPE_ANIMATION__TICK_MS, etc.)
    figment = figment.merge(Env::prefixed("PIPESCOPE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: PipescopeConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
