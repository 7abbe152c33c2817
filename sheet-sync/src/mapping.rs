use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;

/// Jira custom fields of a Flow B issue and the sheet header each one feeds.
const FLOW_B_FIELDS: &[(&str, &str)] = &[
    ("customfield_10091", "Calling Date"),
    ("customfield_10095", "Sport"),
    ("customfield_10089", "Product Category"),
    ("customfield_10093", "Vendor"),
    ("customfield_10094", "Cost Price"),
    ("customfield_10085", "Date of Procurement"),
    ("customfield_10084", "Courier Partner"),
    ("customfield_10080", "Shipping Tracking Details"),
    ("customfield_10086", "Pickup Schedule Date"),
    ("customfield_10087", "Dispatch Date"),
    ("customfield_10088", "Delivery Date"),
    ("customfield_10106", "Delhivery Escalation Ticket Number"),
    ("customfield_10119", "RTO Delivered Date"),
    ("customfield_10120", "Replacement Procured Date"),
    ("customfield_10121", "Replacement Dispatch Date"),
    ("customfield_10123", "Return Delivery Date"),
    ("customfield_10156", "Purchase Invoice Link"),
];

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum MappingError {
    #[error("field mapping is empty")]
    Empty,
    #[error("field mapping contains an empty field id")]
    EmptyFieldId,
    #[error("field {0} maps to an empty column label")]
    EmptyLabel(String),
    #[error("column label {0:?} is mapped more than once")]
    DuplicateLabel(String),
}

/// Ordered table from Jira field id to sheet column label.
///
/// Loaded once at startup. Fields absent from the table are ignored; the
/// order only matters for the fixed-offset column strategy and batching.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping(IndexMap<String, String>);

impl FieldMapping {
    pub fn new(entries: IndexMap<String, String>) -> Self {
        Self(entries)
    }

    pub fn flow_b() -> Self {
        FLOW_B_FIELDS
            .iter()
            .map(|(id, label)| (id.to_string(), label.to_string()))
            .collect()
    }

    pub fn label(&self, field_id: &str) -> Option<&str> {
        self.0.get(field_id).map(String::as_str)
    }

    /// Zero-based position of the field in the table.
    pub fn index_of(&self, field_id: &str) -> Option<usize> {
        self.0.get_index_of(field_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(id, label)| (id.as_str(), label.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        if self.0.is_empty() {
            return Err(MappingError::Empty);
        }

        let mut labels = HashSet::new();
        for (id, label) in self.iter() {
            if id.trim().is_empty() {
                return Err(MappingError::EmptyFieldId);
            }
            if label.trim().is_empty() {
                return Err(MappingError::EmptyLabel(id.to_string()));
            }
            if !labels.insert(label.trim()) {
                return Err(MappingError::DuplicateLabel(label.to_string()));
            }
        }
        Ok(())
    }
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self::flow_b()
    }
}

impl FromIterator<(String, String)> for FieldMapping {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_b_mapping() {
        let mapping = FieldMapping::flow_b();
        assert_eq!(mapping.len(), 17);
        assert!(mapping.validate().is_ok());
        assert_eq!(mapping.label("customfield_10093"), Some("Vendor"));
        assert_eq!(mapping.index_of("customfield_10091"), Some(0));
        assert_eq!(mapping.index_of("customfield_10156"), Some(16));
        assert_eq!(mapping.label("summary"), None);
    }

    #[test]
    fn test_validation_errors() {
        let mapping = |entries: &[(&str, &str)]| -> FieldMapping {
            entries
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect()
        };

        assert_eq!(mapping(&[]).validate(), Err(MappingError::Empty));
        assert_eq!(
            mapping(&[(" ", "Vendor")]).validate(),
            Err(MappingError::EmptyFieldId)
        );
        assert_eq!(
            mapping(&[("customfield_1", "")]).validate(),
            Err(MappingError::EmptyLabel("customfield_1".into()))
        );
        assert_eq!(
            mapping(&[("customfield_1", "Vendor"), ("customfield_2", "Vendor ")]).validate(),
            Err(MappingError::DuplicateLabel("Vendor ".into()))
        );
    }

    #[test]
    fn test_deserialize_keeps_order() {
        let mapping: FieldMapping =
            serde_json::from_str(r#"{"cf_b": "Second", "cf_a": "First"}"#).unwrap();
        let ids: Vec<_> = mapping.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["cf_b", "cf_a"]);
    }
}
