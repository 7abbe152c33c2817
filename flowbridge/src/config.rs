use serde::Deserialize;
use sheet_sync::config::Config as BridgeConfig;
use std::fs::File;
use std::path::Path;

fn default_metrics_prefix() -> String {
    "flowbridge".into()
}

#[derive(Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

#[derive(Deserialize)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub bridge: BridgeConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheet_sync::config::{BackendConfig, IntakeMode};
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn bridge_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://key@sentry.example.com/1
            bridge:
                listener:
                    host: 0.0.0.0
                    port: 3000
                admin_listener:
                    host: 127.0.0.1
                    port: 3001
                spreadsheet:
                    sheet_name: Shopify_Order_Data
                    backend:
                        type: google_sheets
                        spreadsheet_id: 1AbC
                intake:
                    mode: direct
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        let metrics = config.common.metrics.expect("metrics config");
        assert_eq!(metrics.statsd_port, 8125);
        assert_eq!(metrics.prefix, "flowbridge");
        assert!(config.common.logging.is_some());

        let bridge = config.bridge;
        bridge.validate().expect("valid config");
        assert_eq!(bridge.listener.port, 3000);
        assert_eq!(bridge.intake.mode, IntakeMode::Direct);
        assert!(matches!(
            bridge.spreadsheet.backend,
            BackendConfig::GoogleSheets { ref spreadsheet_id, .. } if spreadsheet_id == "1AbC"
        ));
    }

    #[test]
    fn common_sections_are_optional() {
        let yaml = r#"
            bridge:
                listener: {host: 0.0.0.0, port: 3000}
                admin_listener: {host: 127.0.0.1, port: 3001}
                spreadsheet:
                    sheet_name: Orders
                    backend: {type: memory}
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(config.common.metrics.is_none());
        assert!(config.common.logging.is_none());
    }

    #[test]
    fn missing_file() {
        let result = Config::from_file(Path::new("/nonexistent/flowbridge.yaml"));
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }
}
