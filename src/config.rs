//! Configuration: TOML settings file, CLI overrides, and the `init` writer.
//!
//! Settings live at `~/.config/hydraping/settings.toml` (XDG config dir),
//! overridable with `--config`. The file schema mirrors the sections below;
//! every section is optional except `endpoints.targets`.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::{self, CheckKind, Endpoint, RawTarget};
use crate::error::ConfigError;

/// Floor for `checks.interval_seconds`.
pub const MIN_INTERVAL_SECONDS: f64 = 0.25;
/// Floor for `checks.timeout_seconds`.
pub const MIN_TIMEOUT_SECONDS: f64 = 0.1;

/// Raw on-disk settings, exactly as deserialized.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub endpoints: EndpointsSection,
    #[serde(default)]
    pub dns: DnsSection,
    #[serde(default)]
    pub checks: ChecksSection,
    #[serde(default)]
    pub ui: UiSection,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointsSection {
    #[serde(default)]
    pub targets: Vec<RawTarget>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DnsSection {
    /// Extra DNS servers to race against each other. Empty means the system
    /// resolver only.
    #[serde(default)]
    pub custom_servers: Vec<IpAddr>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChecksSection {
    #[serde(default = "default_interval")]
    pub interval_seconds: f64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
}

impl Default for ChecksSection {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_interval() -> f64 {
    5.0
}

fn default_timeout() -> f64 {
    5.0
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UiSection {
    /// Sparkline width in cells; 0 sizes from the terminal and follows
    /// resizes.
    #[serde(default)]
    pub graph_width: u16,
}

/// Runtime-only overrides from the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Positional targets; replaces the config file's list for this run.
    pub targets: Vec<String>,
    pub interval: Option<f64>,
    pub timeout: Option<f64>,
    pub no_dns: bool,
    pub no_icmp: bool,
}

/// Validated, resolved configuration the runtime consumes.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: Vec<Endpoint>,
    pub custom_dns_servers: Vec<IpAddr>,
    pub interval: Duration,
    /// Per-probe deadline; already capped at `interval`.
    pub timeout: Duration,
    pub graph_width: u16,
    /// Check kinds disabled for the whole run (`--no-dns`, `--no-icmp`).
    pub disabled_checks: HashSet<CheckKind>,
}

impl Settings {
    /// Read and parse the settings file.
    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply CLI overrides and validate into a runtime [`Config`].
    pub fn resolve(mut self, overrides: &Overrides) -> Result<Config, ConfigError> {
        if !overrides.targets.is_empty() {
            self.endpoints.targets = overrides
                .targets
                .iter()
                .map(|t| RawTarget::Url(t.clone()))
                .collect();
        }
        if let Some(interval) = overrides.interval {
            self.checks.interval_seconds = interval;
        }
        if let Some(timeout) = overrides.timeout {
            self.checks.timeout_seconds = timeout;
        }

        let interval = self.checks.interval_seconds;
        if !interval.is_finite() || interval < MIN_INTERVAL_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "checks.interval_seconds must be at least {MIN_INTERVAL_SECONDS}, got {interval}"
            )));
        }
        let timeout = self.checks.timeout_seconds;
        if !timeout.is_finite() || timeout < MIN_TIMEOUT_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "checks.timeout_seconds must be at least {MIN_TIMEOUT_SECONDS}, got {timeout}"
            )));
        }

        let endpoints = endpoint::parse_targets(&self.endpoints.targets)?;

        let mut disabled_checks = HashSet::new();
        if overrides.no_dns {
            disabled_checks.insert(CheckKind::Dns);
        }
        if overrides.no_icmp {
            disabled_checks.insert(CheckKind::Icmp);
        }

        Ok(Config {
            endpoints,
            custom_dns_servers: self.dns.custom_servers,
            interval: Duration::from_secs_f64(interval),
            // The per-probe deadline never exceeds the tick period.
            timeout: Duration::from_secs_f64(timeout.min(interval)),
            graph_width: self.ui.graph_width,
            disabled_checks,
        })
    }
}

/// Default settings path: `$XDG_CONFIG_HOME/hydraping/settings.toml`.
pub fn default_path() -> PathBuf {
    config_home().join("hydraping").join("settings.toml")
}

fn config_home() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// State directory for logs: `$XDG_STATE_HOME/hydraping`.
pub fn state_dir() -> PathBuf {
    std::env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(dirs::state_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hydraping")
}

/// Outcome of `hydraping init`.
#[derive(Debug, PartialEq, Eq)]
pub enum InitOutcome {
    Created(PathBuf),
    AlreadyExists(PathBuf),
}

const DEFAULT_SETTINGS: &str = r#"# HydraPing configuration

[endpoints]
# Targets to monitor. Supported forms:
#   "8.8.8.8"                       bare IP (ICMP only)
#   "1.1.1.1:53"                    IP and port (ICMP + TCP)
#   "google.com"                    hostname (DNS + ICMP + TCP 80/443)
#   "https://example.com/health"    URL (DNS + ICMP + TCP + HTTP)
# Entries may also be tables:
#   { url = "1.1.1.1:53", protocol = "udp", name = "cf-dns" }
targets = [
    "8.8.8.8",
    "1.1.1.1",
    "google.com",
]

[dns]
# Extra DNS servers to query concurrently; fastest answer wins.
# Empty means the system resolver only.
custom_servers = []

[checks]
# Seconds between probe rounds (minimum 0.25).
interval_seconds = 5.0
# Per-probe deadline in seconds (minimum 0.1, capped at the interval).
timeout_seconds = 5.0

[ui]
# Sparkline width in cells; 0 sizes from the terminal and follows resizes.
graph_width = 0
"#;

/// Write the default settings file. Refuses to clobber an existing file
/// unless `force` is set; a second invocation is a no-op.
pub fn write_default(path: &Path, force: bool) -> Result<InitOutcome, ConfigError> {
    if path.exists() && !force {
        return Ok(InitOutcome::AlreadyExists(path.to_path_buf()));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, DEFAULT_SETTINGS).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(InitOutcome::Created(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointKind;

    fn resolve(text: &str) -> Result<Config, ConfigError> {
        let settings: Settings = toml::from_str(text).unwrap();
        settings.resolve(&Overrides::default())
    }

    #[test]
    fn defaults_applied_to_missing_sections() {
        let cfg = resolve(
            r#"
            [endpoints]
            targets = ["8.8.8.8"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(5));
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(cfg.graph_width, 0);
        assert!(cfg.custom_dns_servers.is_empty());
    }

    #[test]
    fn structured_targets_parse() {
        let cfg = resolve(
            r#"
            [endpoints]
            targets = [
                "8.8.8.8",
                { url = "1.1.1.1:53", protocol = "udp", name = "cf" },
                { url = "example.com", primary_check_type = "tcp" },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.endpoints.len(), 3);
        assert_eq!(cfg.endpoints[1].label, "cf");
        assert_eq!(cfg.endpoints[2].primary_override, Some(CheckKind::Tcp));
    }

    #[test]
    fn timeout_capped_at_interval() {
        let cfg = resolve(
            r#"
            [endpoints]
            targets = ["8.8.8.8"]
            [checks]
            interval_seconds = 1.0
            timeout_seconds = 30.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.timeout, Duration::from_secs(1));
    }

    #[test]
    fn interval_floor_enforced() {
        let err = resolve(
            r#"
            [endpoints]
            targets = ["8.8.8.8"]
            [checks]
            interval_seconds = 0.01
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("interval_seconds"), "{err}");
    }

    #[test]
    fn empty_targets_rejected() {
        assert!(resolve("[endpoints]\ntargets = []").is_err());
    }

    #[test]
    fn unknown_keys_rejected() {
        let res: Result<Settings, _> = toml::from_str(
            r#"
            [endpoints]
            targets = ["8.8.8.8"]
            [checks]
            intervall_seconds = 1.0
            "#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn cli_targets_replace_config_targets() {
        let settings: Settings = toml::from_str(
            r#"
            [endpoints]
            targets = ["8.8.8.8"]
            "#,
        )
        .unwrap();
        let overrides = Overrides {
            targets: vec!["https://example.com".into()],
            ..Overrides::default()
        };
        let cfg = settings.resolve(&overrides).unwrap();
        assert_eq!(cfg.endpoints.len(), 1);
        assert!(matches!(cfg.endpoints[0].kind, EndpointKind::Http { .. }));
    }

    #[test]
    fn no_icmp_flag_disables_check() {
        let settings: Settings = toml::from_str(
            r#"
            [endpoints]
            targets = ["8.8.8.8"]
            "#,
        )
        .unwrap();
        let overrides = Overrides {
            no_icmp: true,
            ..Overrides::default()
        };
        let cfg = settings.resolve(&overrides).unwrap();
        assert!(cfg.disabled_checks.contains(&CheckKind::Icmp));
    }

    #[test]
    fn default_settings_text_parses_and_round_trips() {
        let settings: Settings = toml::from_str(DEFAULT_SETTINGS).unwrap();
        assert_eq!(settings.endpoints.targets.len(), 3);

        // Serialize and re-parse; semantically equal regardless of key order.
        let text = toml::to_string(&settings).unwrap();
        let reparsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(
            reparsed.checks.interval_seconds,
            settings.checks.interval_seconds
        );
        assert_eq!(reparsed.ui.graph_width, settings.ui.graph_width);
        assert_eq!(
            reparsed.endpoints.targets.len(),
            settings.endpoints.targets.len()
        );
    }

    #[test]
    fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let first = write_default(&path, false).unwrap();
        assert_eq!(first, InitOutcome::Created(path.clone()));
        let written = std::fs::read_to_string(&path).unwrap();

        let second = write_default(&path, false).unwrap();
        assert_eq!(second, InitOutcome::AlreadyExists(path.clone()));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), written);
    }

    #[test]
    fn init_force_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "# stale").unwrap();

        let outcome = write_default(&path, true).unwrap();
        assert_eq!(outcome, InitOutcome::Created(path.clone()));
        assert!(std::fs::read_to_string(&path).unwrap().contains("[endpoints]"));
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
