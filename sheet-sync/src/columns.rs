use crate::a1::Column;
use crate::mapping::FieldMapping;
use serde::Deserialize;

/// First column written by the fixed-offset strategy when none is configured.
const DEFAULT_START_COLUMN: u32 = 22; // V

fn default_start_column() -> Column {
    Column(DEFAULT_START_COLUMN)
}

/// How mapped fields are placed into columns. Chosen once per deployment.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ColumnStrategy {
    /// Find the mapped label in the live header row
    #[default]
    HeaderLookup,
    /// Field `n` of the mapping goes to `start_column + n`; headers are not read
    FixedOffset {
        #[serde(default = "default_start_column")]
        start_column: Column,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnLookup {
    /// 1-based column position
    Found(u32),
    NotFound,
}

impl ColumnStrategy {
    pub fn needs_headers(&self) -> bool {
        matches!(self, ColumnStrategy::HeaderLookup)
    }

    /// Resolves the column for `field_id`. Unknown fields and labels missing
    /// from `headers` resolve to `NotFound`.
    pub fn resolve_column(
        &self,
        mapping: &FieldMapping,
        field_id: &str,
        headers: &[String],
    ) -> ColumnLookup {
        let found = match self {
            ColumnStrategy::HeaderLookup => mapping
                .label(field_id)
                .and_then(|label| {
                    let label = label.trim();
                    headers.iter().position(|header| header.trim() == label)
                })
                .map(|index| index as u32 + 1),
            ColumnStrategy::FixedOffset { start_column } => mapping
                .index_of(field_id)
                .map(|index| start_column.position() + index as u32),
        };

        match found {
            Some(position) => ColumnLookup::Found(position),
            None => ColumnLookup::NotFound,
        }
    }
}
