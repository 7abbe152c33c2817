//! Value and key normalization.
//!
//! Jira custom fields arrive as plain scalars, option objects carrying a
//! `value` label, or arrays of option objects. [`clean_value`] flattens all of
//! them into the single string written to a cell.
//!
//! Order summaries are the join key between issues and sheet rows. They are
//! typed by hand and routinely carry doubled spaces, non-breaking spaces or
//! zero-width characters pasted from other tools. [`KeyPolicy::canonicalize`]
//! reduces a summary to the key used for row matching. Exactly one policy is
//! configured per deployment and applied to both sides of every comparison.

use serde::Deserialize;
use serde_json::Value;

/// Characters removed outright before whitespace handling.
const ZERO_WIDTH: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

/// Flattens a raw Jira field value into the string written to the sheet.
///
/// Never fails. Falsy inputs (`null`, `false`, `0`, `""`) become `""`.
pub fn clean_value(raw: &Value) -> String {
    if is_falsy(raw) {
        return String::new();
    }

    match raw {
        Value::Array(options) => options
            .iter()
            .map(option_label)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => option_label(raw),
        scalar => render_scalar(scalar),
    }
}

fn option_label(option: &Value) -> String {
    match option.get("value") {
        Some(label) if !is_falsy(label) => render_scalar(label),
        _ => String::new(),
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        // Nested structures inside an option label are kept as compact JSON
        other => other.to_string(),
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(_) | Value::Object(_) => false,
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WhitespacePolicy {
    /// Runs of whitespace become a single space
    #[default]
    Collapse,
    /// All whitespace is removed
    Strip,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CasePolicy {
    #[default]
    Preserve,
    Upper,
}

/// The single canonicalization policy used for every row-matching comparison.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct KeyPolicy {
    #[serde(default)]
    pub whitespace: WhitespacePolicy,
    #[serde(default)]
    pub case: CasePolicy,
}

impl KeyPolicy {
    pub fn new(whitespace: WhitespacePolicy, case: CasePolicy) -> Self {
        Self { whitespace, case }
    }

    /// Reduces a summary to its comparison key.
    ///
    /// Zero-width characters are dropped. Every Unicode whitespace character,
    /// non-breaking spaces included, is handled by the whitespace policy, and
    /// the result is trimmed. Idempotent for every policy.
    pub fn canonicalize(&self, text: &str) -> String {
        let mut key = String::with_capacity(text.len());
        let mut pending_space = false;

        for c in text.chars().filter(|c| !ZERO_WIDTH.contains(c)) {
            if c.is_whitespace() {
                pending_space = true;
                continue;
            }
            if pending_space && !key.is_empty() && self.whitespace == WhitespacePolicy::Collapse {
                key.push(' ');
            }
            pending_space = false;
            key.push(c);
        }

        match self.case {
            CasePolicy::Preserve => key,
            CasePolicy::Upper => key.to_uppercase(),
        }
    }
}
