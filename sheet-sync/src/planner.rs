use crate::a1::CellAddress;
use crate::backend::KEY_COLUMN;
use crate::columns::{ColumnLookup, ColumnStrategy};
use crate::event::IssueEvent;
use crate::mapping::FieldMapping;
use crate::normalize::clean_value;
use serde::Deserialize;

/// What to do with an event whose summary has no row yet.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RowMissPolicy {
    /// Append a row keyed by the summary and fill it
    #[default]
    Create,
    /// Drop the event without touching the sheet
    Skip,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellWrite {
    pub address: CellAddress,
    pub value: String,
}

/// Cells to overwrite in one row, in mapping order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdatePlan {
    pub row: u32,
    pub writes: Vec<CellWrite>,
}

impl UpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

pub struct UpdatePlanner {
    mapping: FieldMapping,
    strategy: ColumnStrategy,
}

impl UpdatePlanner {
    pub fn new(mapping: FieldMapping, strategy: ColumnStrategy) -> Self {
        Self { mapping, strategy }
    }

    pub fn strategy(&self) -> &ColumnStrategy {
        &self.strategy
    }

    /// Builds the writes for `row`. Fields whose column cannot be resolved
    /// are left out.
    pub fn plan(&self, event: &IssueEvent, headers: &[String], row: u32) -> UpdatePlan {
        let mut writes = Vec::with_capacity(self.mapping.len());

        for (field_id, label) in self.mapping.iter() {
            let column = match self
                .strategy
                .resolve_column(&self.mapping, field_id, headers)
            {
                ColumnLookup::Found(column) => column,
                ColumnLookup::NotFound => {
                    tracing::debug!(field_id, label, "No column for field");
                    continue;
                }
            };

            // Column 1 holds the join key and is never overwritten
            if column == KEY_COLUMN {
                tracing::warn!(field_id, label, "Field resolves to the key column, skipped");
                continue;
            }

            writes.push(CellWrite {
                address: CellAddress::new(column, row),
                value: clean_value(event.raw_field(field_id)),
            });
        }

        UpdatePlan { row, writes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a1::Column;
    use crate::normalize::KeyPolicy;
    use serde_json::json;

    fn event(fields: serde_json::Value) -> IssueEvent {
        let body = json!({"issue": {"key": "FLOWB-1", "fields": fields}});
        IssueEvent::from_slice(body.to_string().as_bytes(), &KeyPolicy::default()).unwrap()
    }

    fn headers(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    fn write(column: u32, row: u32, value: &str) -> CellWrite {
        CellWrite {
            address: CellAddress::new(column, row),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_plan_header_lookup() {
        let planner = UpdatePlanner::new(FieldMapping::flow_b(), ColumnStrategy::HeaderLookup);
        let event = event(json!({
            "summary": "ORD-100",
            "customfield_10093": {"value": "Acme"},
            "customfield_10094": 250,
        }));

        let plan = planner.plan(&event, &headers(&["OrderID", "Vendor", "Cost Price"]), 2);
        assert_eq!(plan.row, 2);
        assert_eq!(plan.writes, vec![write(2, 2, "Acme"), write(3, 2, "250")]);
    }

    #[test]
    fn test_missing_fields_blank_their_cells() {
        let planner = UpdatePlanner::new(FieldMapping::flow_b(), ColumnStrategy::HeaderLookup);
        let event = event(json!({"summary": "ORD-1", "customfield_10095": null}));

        let plan = planner.plan(&event, &headers(&["OrderID", "Sport", "Vendor"]), 9);
        assert_eq!(plan.writes, vec![write(2, 9, ""), write(3, 9, "")]);
    }

    #[test]
    fn test_no_matching_headers_gives_empty_plan() {
        let planner = UpdatePlanner::new(FieldMapping::flow_b(), ColumnStrategy::HeaderLookup);
        let event = event(json!({"summary": "ORD-1", "customfield_10093": "Acme"}));

        assert!(planner.plan(&event, &headers(&["OrderID", "Notes"]), 2).is_empty());
        assert!(planner.plan(&event, &[], 2).is_empty());
    }

    #[test]
    fn test_key_column_is_never_planned() {
        let planner = UpdatePlanner::new(FieldMapping::flow_b(), ColumnStrategy::HeaderLookup);
        let event = event(json!({"summary": "ORD-1", "customfield_10093": "Acme"}));

        let plan = planner.plan(&event, &headers(&["Vendor", "Vendor"]), 4);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_fixed_offset() {
        let planner = UpdatePlanner::new(
            FieldMapping::flow_b(),
            ColumnStrategy::FixedOffset {
                start_column: Column::new(22).unwrap(),
            },
        );
        let event = event(json!({
            "summary": "ORD-1",
            "customfield_10091": "2024-05-01",
            "customfield_10156": "https://invoices/1",
        }));

        let plan = planner.plan(&event, &[], 5);
        assert_eq!(plan.writes.len(), 17);
        assert_eq!(plan.writes[0], write(22, 5, "2024-05-01"));
        assert_eq!(plan.writes[16], write(38, 5, "https://invoices/1"));
    }

    #[test]
    fn test_row_miss_policy_config() {
        let policy: RowMissPolicy = serde_yaml::from_str("skip").unwrap();
        assert_eq!(policy, RowMissPolicy::Skip);
        assert_eq!(RowMissPolicy::default(), RowMissPolicy::Create);
    }
}
