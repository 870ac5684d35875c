//! Configuration management.

use crate::gst::frame::MAX_BUFFER_SIZE;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vidlink_types::{OversizePolicy, RenderTopologyKind, SourceTopologyKind, ThreadPriority};

/// Local config file looked up in the current directory.
pub const LOCAL_CONFIG_FILE: &str = ".vidlink.toml";

/// Frame source settings (`[source]`).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SourceConfig {
    /// Largest frame payload handed to a handler, in bytes.
    #[garde(range(min = 1))]
    pub max_buffer_size: usize,
    #[garde(skip)]
    pub oversize_policy: OversizePolicy,
    /// How long one pull waits before the worker checks for cancellation.
    #[garde(range(min = 1, max = 10000))]
    pub pull_timeout_ms: u64,
    #[garde(skip)]
    pub topology: SourceTopologyKind,
    #[garde(skip)]
    pub worker_priority: ThreadPriority,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: MAX_BUFFER_SIZE,
            oversize_policy: OversizePolicy::default(),
            pull_timeout_ms: 100,
            topology: SourceTopologyKind::default(),
            worker_priority: ThreadPriority::default(),
        }
    }
}

impl SourceConfig {
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }
}

/// Display sink settings (`[display]`).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DisplayConfig {
    #[garde(skip)]
    pub topology: RenderTopologyKind,
    /// Caps set on the render pipeline's appsrc. Topology default when unset.
    #[garde(length(min = 1))]
    pub caps: Option<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            topology: RenderTopologyKind::Auto,
            caps: None,
        }
    }
}

/// Trace sink settings (`[trace]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TraceConfig {
    /// File receiving one timing line per frame.
    #[garde(skip)]
    pub path: Option<PathBuf>,
}

/// Logging settings (`[logging]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    #[garde(skip)]
    pub log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    #[garde(skip)]
    pub log_level: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[garde(dive)]
    pub source: SourceConfig,
    #[garde(dive)]
    pub display: DisplayConfig,
    #[garde(dive)]
    pub trace: TraceConfig,
    #[garde(dive)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are merged in this order:
    /// 1. `config.toml` in user config directory (~/.config/vidlink/ on Linux)
    /// 2. `.vidlink.toml` in current directory
    /// 3. `config_file`, if given
    ///
    /// Environment variables use the `VIDLINK_` prefix and `__` between
    /// section and key, e.g. `VIDLINK_SOURCE__PULL_TIMEOUT_MS=50`.
    pub fn from_figment(
        config_file: Option<&Path>,
        trace_path: Option<PathBuf>,
        log_level: Option<String>,
    ) -> anyhow::Result<Self> {
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(LOCAL_CONFIG_FILE));
        let user_config = directories::ProjectDirs::from("", "", "vidlink")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        for path in [user_config, local_config].into_iter().flatten() {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(path) = config_file {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("VIDLINK_").split("__"));

        if let Some(ref path) = trace_path {
            figment = figment.merge(Serialized::default("trace.path", path));
        }
        if let Some(ref level) = log_level {
            figment = figment.merge(Serialized::default("logging.log_level", level));
        }

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const VARS: [&str; 4] = [
        "VIDLINK_SOURCE__PULL_TIMEOUT_MS",
        "VIDLINK_SOURCE__OVERSIZE_POLICY",
        "VIDLINK_DISPLAY__TOPOLOGY",
        "VIDLINK_LOGGING__LOG_LEVEL",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    fn load_in(dir: &TempDir, config_file: Option<&Path>, log_level: Option<&str>) -> Config {
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();

        let config = Config::from_figment(config_file, None, log_level.map(str::to_string));

        // Restore (ignore errors)
        let _ = std::env::set_current_dir(original_dir);
        config.unwrap()
    }

    #[test]
    #[serial]
    fn test_from_figment_defaults() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();

        let config = load_in(&temp_dir, None, None);

        assert_eq!(config.source.max_buffer_size, MAX_BUFFER_SIZE);
        assert_eq!(config.source.oversize_policy, OversizePolicy::Reject);
        assert_eq!(config.source.pull_timeout(), Duration::from_millis(100));
        assert_eq!(config.source.topology, SourceTopologyKind::Direct);
        assert_eq!(config.display.topology, RenderTopologyKind::Auto);
        assert!(config.display.caps.is_none());
        assert!(config.trace.path.is_none());
        assert!(config.logging.log_level.is_none());
    }

    #[test]
    #[serial]
    fn test_from_figment_local_config_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(LOCAL_CONFIG_FILE),
            r#"
[source]
oversize_policy = "truncate"
topology = "remux"
worker_priority = "high"

[display]
topology = "directdraw"
caps = "video/x-vp8"

[trace]
path = "/tmp/trace.log"
"#,
        )
        .unwrap();

        let config = load_in(&temp_dir, None, None);

        assert_eq!(config.source.oversize_policy, OversizePolicy::Truncate);
        assert_eq!(config.source.topology, SourceTopologyKind::Remux);
        assert_eq!(config.source.worker_priority, ThreadPriority::High);
        assert_eq!(config.display.topology, RenderTopologyKind::DirectDraw);
        assert_eq!(config.display.caps.as_deref(), Some("video/x-vp8"));
        assert_eq!(config.trace.path, Some(PathBuf::from("/tmp/trace.log")));
    }

    #[test]
    #[serial]
    fn test_explicit_file_overrides_local_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(LOCAL_CONFIG_FILE),
            "[source]\npull_timeout_ms = 20",
        )
        .unwrap();
        let explicit = temp_dir.path().join("explicit.toml");
        fs::write(&explicit, "[source]\npull_timeout_ms = 40").unwrap();

        let config = load_in(&temp_dir, Some(&explicit), None);
        assert_eq!(config.source.pull_timeout_ms, 40);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_error() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.toml");

        let result = Config::from_figment(Some(&missing), None, None);
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_env_vars_override_config_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(LOCAL_CONFIG_FILE),
            "[source]\npull_timeout_ms = 20\noversize_policy = \"truncate\"",
        )
        .unwrap();

        std::env::set_var("VIDLINK_SOURCE__PULL_TIMEOUT_MS", "250");
        std::env::set_var("VIDLINK_DISPLAY__TOPOLOGY", "xwindow");

        let config = load_in(&temp_dir, None, None);
        clear_env();

        assert_eq!(config.source.pull_timeout_ms, 250);
        assert_eq!(config.source.oversize_policy, OversizePolicy::Truncate);
        assert_eq!(config.display.topology, RenderTopologyKind::XWindow);
    }

    #[test]
    #[serial]
    fn test_cli_overrides_env_and_config() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(LOCAL_CONFIG_FILE),
            "[logging]\nlog_level = \"warn\"",
        )
        .unwrap();
        std::env::set_var("VIDLINK_LOGGING__LOG_LEVEL", "error");

        let config = load_in(&temp_dir, None, Some("debug"));
        clear_env();

        assert_eq!(config.logging.log_level.as_deref(), Some("debug"));
    }

    #[test]
    #[serial]
    fn test_validation_rejects_zero_capacity() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(LOCAL_CONFIG_FILE),
            "[source]\nmax_buffer_size = 0",
        )
        .unwrap();

        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();
        let result = Config::from_figment(None, None, None);
        let _ = std::env::set_current_dir(original_dir);

        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_timeout_out_of_range() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.source.pull_timeout_ms = 0;
        assert!(config.validate().is_err());

        config.source.pull_timeout_ms = 10_001;
        assert!(config.validate().is_err());
    }
}
