use crate::normalize::KeyPolicy;

/// Row 1 holds the headers, data starts right below.
pub const FIRST_DATA_ROW: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowLookup {
    /// 1-based sheet row number
    Found(u32),
    NotFound,
}

/// Canonical keys of the data rows, in sheet order.
///
/// `column` holds the raw column-1 values of rows 2..N as read from the sheet;
/// blank cells become empty keys so positions stay aligned with row numbers.
pub fn canonical_keys(policy: &KeyPolicy, column: &[String]) -> Vec<String> {
    column.iter().map(|raw| policy.canonicalize(raw)).collect()
}

/// Returns the row of the first data row whose key equals `key`.
///
/// Scans the whole slice on every call, there is no index to go stale.
pub fn locate_row(key: &str, existing_keys: &[String]) -> RowLookup {
    if key.is_empty() {
        return RowLookup::NotFound;
    }

    existing_keys
        .iter()
        .position(|existing| existing == key)
        .map_or(RowLookup::NotFound, |index| {
            RowLookup::Found(index as u32 + FIRST_DATA_ROW)
        })
}
