use crate::a1::{Column, MAX_COLUMN};
use crate::applier::WriteMode;
use crate::columns::ColumnStrategy;
use crate::mapping::{FieldMapping, MappingError};
use crate::normalize::KeyPolicy;
use crate::planner::RowMissPolicy;
use crate::queue::{QueueOptions, Retention};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Sheet name cannot be empty")]
    EmptySheetName,

    #[error("Spreadsheet id cannot be empty")]
    EmptySpreadsheetId,

    #[error("Access token variable name cannot be empty")]
    EmptyAccessTokenEnv,

    #[error("{0} must be greater than 0")]
    Zero(&'static str),

    #[error("Invalid field mapping: {0}")]
    Mapping(#[from] MappingError),

    #[error("{fields} fields starting at column {start} run past column ZZZ")]
    ColumnsOutOfRange { start: Column, fields: usize },
}

/// Sheet bridge configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for Jira webhooks and job status
    pub listener: Listener,
    /// Listener for health and readiness probes
    pub admin_listener: Listener,
    pub spreadsheet: SpreadsheetConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    /// Jira field id to sheet column label. Defaults to the Flow B table.
    #[serde(default)]
    pub field_mapping: FieldMapping,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.spreadsheet.validate()?;
        self.field_mapping.validate()?;

        if let ColumnStrategy::FixedOffset { start_column } = self.reconcile.columns {
            let fields = self.field_mapping.len();
            let last = u64::from(start_column.position()) + fields as u64 - 1;
            if last > u64::from(MAX_COLUMN) {
                return Err(ValidationError::ColumnsOutOfRange {
                    start: start_column,
                    fields,
                });
            }
        }

        if self.timeouts.backend_call_secs == 0 {
            return Err(ValidationError::Zero("timeouts.backend_call_secs"));
        }
        self.intake.validate()
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SpreadsheetConfig {
    /// Tab the rows live in
    pub sheet_name: String,
    pub backend: BackendConfig,
}

impl SpreadsheetConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.sheet_name.is_empty() {
            return Err(ValidationError::EmptySheetName);
        }
        match &self.backend {
            BackendConfig::GoogleSheets {
                spreadsheet_id,
                access_token_env,
                ..
            } => {
                if spreadsheet_id.is_empty() {
                    return Err(ValidationError::EmptySpreadsheetId);
                }
                if access_token_env.is_empty() {
                    return Err(ValidationError::EmptyAccessTokenEnv);
                }
            }
            BackendConfig::Memory { .. } => {}
        }
        Ok(())
    }
}

fn default_access_token_env() -> String {
    "GOOGLE_SHEETS_ACCESS_TOKEN".into()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    GoogleSheets {
        spreadsheet_id: String,
        /// Defaults to the public Sheets API
        api_url: Option<Url>,
        /// Environment variable holding the OAuth bearer token
        #[serde(default = "default_access_token_env")]
        access_token_env: String,
    },
    /// Process-local sheet, for dry runs. Starts with the given header row.
    Memory {
        #[serde(default)]
        headers: Vec<String>,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Timeouts {
    #[serde(default = "default_backend_call_secs")]
    pub backend_call_secs: u64,
}

fn default_backend_call_secs() -> u64 {
    10
}

impl Timeouts {
    pub fn backend_call(&self) -> Duration {
        Duration::from_secs(self.backend_call_secs)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            backend_call_secs: default_backend_call_secs(),
        }
    }
}

/// Matching and writing policies, fixed for the lifetime of the process.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    pub key_policy: KeyPolicy,
    pub columns: ColumnStrategy,
    pub on_missing_row: RowMissPolicy,
    pub write_mode: WriteMode,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntakeMode {
    /// Accept, enqueue and process in background workers
    #[default]
    Queue,
    /// Reconcile inside the request
    Direct,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntakeConfig {
    pub mode: IntakeMode,
    pub workers: usize,
    /// Total attempts per job, first one included
    pub attempts: u32,
    pub backoff_ms: u64,
    pub remove_on_complete: RetentionConfig,
    pub remove_on_fail: RetentionConfig,
    pub prune_interval_secs: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            mode: IntakeMode::Queue,
            workers: 2,
            attempts: 5,
            backoff_ms: 2000,
            remove_on_complete: RetentionConfig {
                age_secs: 3600,
                count: 1000,
            },
            remove_on_fail: RetentionConfig {
                age_secs: 7 * 24 * 3600,
                count: 5000,
            },
            prune_interval_secs: 60,
        }
    }
}

impl IntakeConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.mode == IntakeMode::Direct {
            return Ok(());
        }
        if self.workers == 0 {
            return Err(ValidationError::Zero("intake.workers"));
        }
        if self.attempts == 0 {
            return Err(ValidationError::Zero("intake.attempts"));
        }
        if self.prune_interval_secs == 0 {
            return Err(ValidationError::Zero("intake.prune_interval_secs"));
        }
        Ok(())
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            attempts: self.attempts,
            backoff: Duration::from_millis(self.backoff_ms),
            remove_on_complete: self.remove_on_complete.into(),
            remove_on_fail: self.remove_on_fail.into(),
        }
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

/// Finished jobs are kept until they are older than `age_secs` or more than
/// `count` newer ones exist.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct RetentionConfig {
    pub age_secs: u64,
    pub count: usize,
}

impl From<RetentionConfig> for Retention {
    fn from(value: RetentionConfig) -> Self {
        Retention {
            max_age: Duration::from_secs(value.age_secs),
            max_count: value.count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{CasePolicy, WhitespacePolicy};

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 3000
admin_listener:
    host: "127.0.0.1"
    port: 3001
spreadsheet:
    sheet_name: Shopify_Order_Data
    backend:
        type: google_sheets
        spreadsheet_id: 1AbC
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(
            config.spreadsheet.backend,
            BackendConfig::GoogleSheets {
                spreadsheet_id: "1AbC".into(),
                api_url: None,
                access_token_env: "GOOGLE_SHEETS_ACCESS_TOKEN".into(),
            }
        );
        assert_eq!(config.timeouts.backend_call(), Duration::from_secs(10));
        assert_eq!(config.reconcile, ReconcileConfig::default());
        assert_eq!(config.intake, IntakeConfig::default());
        assert_eq!(config.field_mapping, FieldMapping::flow_b());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 3000
admin_listener:
    host: "127.0.0.1"
    port: 3001
spreadsheet:
    sheet_name: Orders
    backend:
        type: memory
        headers: [OrderID, Vendor]
timeouts:
    backend_call_secs: 3
reconcile:
    key_policy:
        whitespace: strip
        case: upper
    columns:
        strategy: fixed_offset
        start_column: X
    on_missing_row: skip
    write_mode: per_cell
intake:
    mode: direct
    workers: 0
    remove_on_fail:
        age_secs: 60
        count: 10
field_mapping:
    customfield_1: Vendor
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(
            config.reconcile,
            ReconcileConfig {
                key_policy: KeyPolicy::new(WhitespacePolicy::Strip, CasePolicy::Upper),
                columns: ColumnStrategy::FixedOffset {
                    start_column: Column::new(24).unwrap()
                },
                on_missing_row: RowMissPolicy::Skip,
                write_mode: WriteMode::PerCell,
            }
        );
        assert_eq!(config.intake.mode, IntakeMode::Direct);
        assert_eq!(config.intake.attempts, 5);

        let options = config.intake.queue_options();
        assert_eq!(options.remove_on_fail.max_age, Duration::from_secs(60));
        assert_eq!(options.remove_on_fail.max_count, 10);
        assert_eq!(config.field_mapping.label("customfield_1"), Some("Vendor"));
    }

    #[test]
    fn test_validation_errors() {
        let base = r#"
listener:
    host: "0.0.0.0"
    port: 3000
admin_listener:
    host: "127.0.0.1"
    port: 3001
spreadsheet:
    sheet_name: Orders
    backend:
        type: memory
"#;
        let config: Config = serde_yaml::from_str(base).unwrap();
        config.validate().unwrap();

        let mut bad = config.clone();
        bad.listener.port = 0;
        assert_eq!(bad.validate(), Err(ValidationError::InvalidPort));

        let mut bad = config.clone();
        bad.spreadsheet.sheet_name.clear();
        assert_eq!(bad.validate(), Err(ValidationError::EmptySheetName));

        let mut bad = config.clone();
        bad.intake.workers = 0;
        assert_eq!(bad.validate(), Err(ValidationError::Zero("intake.workers")));

        let mut bad = config.clone();
        bad.timeouts.backend_call_secs = 0;
        assert_eq!(
            bad.validate(),
            Err(ValidationError::Zero("timeouts.backend_call_secs"))
        );

        let mut fits = config.clone();
        fits.reconcile.columns = ColumnStrategy::FixedOffset {
            start_column: Column::new(MAX_COLUMN - 16).unwrap(),
        };
        assert_eq!(fits.field_mapping.len(), 17);
        fits.validate().unwrap();

        let mut bad = config.clone();
        bad.reconcile.columns = ColumnStrategy::FixedOffset {
            start_column: Column::try_from("FXSHRXW".to_string()).unwrap(),
        };
        assert!(matches!(
            bad.validate(),
            Err(ValidationError::ColumnsOutOfRange { fields: 17, .. })
        ));

        let mut bad = config;
        bad.field_mapping = FieldMapping::new(Default::default());
        assert_eq!(
            bad.validate(),
            Err(ValidationError::Mapping(MappingError::Empty))
        );
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let yaml = r#"
sheet_name: Orders
backend:
    type: excel
"#;
        assert!(serde_yaml::from_str::<SpreadsheetConfig>(yaml).is_err());
    }
}
