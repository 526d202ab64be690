//! datachatd.toml settings parser.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use datachat_pool::{ConnectionConfig, ManagerConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub manager: ManagerSettings,
    pub logging: LoggingSettings,
    /// Seconds between pool statistics log lines in `serve`.
    pub stats_interval_secs: u64,
    pub connections: Vec<ConnectionConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            manager: ManagerSettings::default(),
            logging: LoggingSettings::default(),
            stats_interval_secs: 60,
            connections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    pub health_check_interval_secs: u64,
    pub idle_reap_interval_secs: u64,
    pub idle_threshold_secs: u64,
    pub ping_timeout_secs: u64,
    pub close_timeout_secs: u64,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        let defaults = ManagerConfig::default();
        Self {
            health_check_interval_secs: defaults.health_check_interval.as_secs(),
            idle_reap_interval_secs: defaults.idle_reap_interval.as_secs(),
            idle_threshold_secs: defaults.idle_threshold.as_secs(),
            ping_timeout_secs: defaults.ping_timeout.as_secs(),
            close_timeout_secs: defaults.close_timeout.as_secs(),
        }
    }
}

impl ManagerSettings {
    pub fn to_manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            idle_reap_interval: Duration::from_secs(self.idle_reap_interval_secs),
            idle_threshold: Duration::from_secs(self.idle_threshold_secs),
            ping_timeout: Duration::from_secs(self.ping_timeout_secs),
            close_timeout: Duration::from_secs(self.close_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info,datachat_pool=debug".to_string(),
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("loading {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let m = &self.manager;
        for (name, value) in [
            ("manager.health_check_interval_secs", m.health_check_interval_secs),
            ("manager.idle_reap_interval_secs", m.idle_reap_interval_secs),
            ("manager.ping_timeout_secs", m.ping_timeout_secs),
            ("manager.close_timeout_secs", m.close_timeout_secs),
            ("stats_interval_secs", self.stats_interval_secs),
        ] {
            if value == 0 {
                bail!("{name} must be at least 1");
            }
        }

        let mut seen = HashSet::new();
        for connection in &self.connections {
            connection.validate()?;
            if !seen.insert(connection.key()) {
                bail!("duplicate connection {}", connection.key());
            }
        }
        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datachat_pool::BackendKind;
    use std::io::Write;

    const SAMPLE: &str = r#"
stats_interval_secs = 30

[manager]
health_check_interval_secs = 120
idle_threshold_secs = 900

[logging]
format = "json"
filter = "warn"

[[connections]]
tenant_id = "acme"
connection_id = "warehouse"
kind = "postgres"
uri = "postgres://reader@db.acme.internal/warehouse"
max_connections = 4

[[connections]]
tenant_id = "acme"
connection_id = "events"
kind = "mongodb"
uri = "mongodb://docs.acme.internal:27017"
"#;

    #[test]
    fn empty_file_uses_defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings.manager.to_manager_config(), ManagerConfig::default());
        assert_eq!(settings.logging.format, LogFormat::Pretty);
        assert_eq!(settings.stats_interval(), Duration::from_secs(60));
        assert!(settings.connections.is_empty());
    }

    #[test]
    fn parses_full_file() {
        let settings = Settings::parse(SAMPLE).unwrap();
        let config = settings.manager.to_manager_config();
        assert_eq!(config.health_check_interval, Duration::from_secs(120));
        assert_eq!(config.idle_reap_interval, Duration::from_secs(600));
        assert_eq!(config.idle_threshold, Duration::from_secs(900));
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.logging.filter, "warn");
        assert_eq!(settings.stats_interval_secs, 30);

        assert_eq!(settings.connections.len(), 2);
        let pg = &settings.connections[0];
        assert_eq!(pg.kind, BackendKind::Postgres);
        assert_eq!(pg.max_connections, 4);
        let mongo = &settings.connections[1];
        assert_eq!(mongo.kind, BackendKind::MongoDb);
        assert_eq!(mongo.max_connections, 10);
        assert_eq!(mongo.connection_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_zero_intervals() {
        let err = Settings::parse("[manager]\nidle_reap_interval_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("idle_reap_interval_secs"));
        assert!(Settings::parse("stats_interval_secs = 0\n").is_err());
    }

    #[test]
    fn rejects_duplicate_connections() {
        let content = r#"
[[connections]]
tenant_id = "acme"
connection_id = "uploads"
kind = "file"
uri = "/srv/a.csv"

[[connections]]
tenant_id = "acme"
connection_id = "uploads"
kind = "file"
uri = "/srv/b.csv"
"#;
        let err = Settings::parse(content).unwrap_err();
        assert!(err.to_string().contains("duplicate connection acme/uploads"));
    }

    #[test]
    fn rejects_unknown_kind() {
        let content = r#"
[[connections]]
tenant_id = "acme"
connection_id = "cache"
kind = "redis"
uri = "redis://cache"
"#;
        assert!(Settings::parse(content).is_err());
    }

    #[test]
    fn from_file_reads_and_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.connections.len(), 2);

        let missing = file.path().with_extension("missing");
        let err = Settings::from_file(&missing).unwrap_err();
        assert!(format!("{err:#}").contains("missing"));
    }
}
