//! A1 notation: column letters, cell addresses and sheet ranges.
//!
//! Columns are 1-based and named in bijective base 26: `1 -> A`, `26 -> Z`,
//! `27 -> AA`, `702 -> ZZ`, `703 -> AAA`.

use serde::Deserialize;
use std::fmt;

/// Last column a Google sheet can have (`ZZZ`).
pub const MAX_COLUMN: u32 = 18_278;

/// Converts a 1-based column position to its letter name. Position 0 has no
/// name and yields an empty string.
pub fn position_to_letter(position: u32) -> String {
    let mut remaining = position;
    let mut letters = Vec::new();

    while remaining > 0 {
        remaining -= 1;
        letters.push(b'A' + (remaining % 26) as u8);
        remaining /= 26;
    }

    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Converts a column name (case-insensitive) to its 1-based position.
pub fn letter_to_position(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }

    letters.chars().try_fold(0u32, |acc, c| {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as u32 + 1;
        acc.checked_mul(26)?.checked_add(digit)
    })
}

/// A validated column name as it appears in configuration, e.g. `V`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Column(pub(crate) u32);

impl Column {
    pub fn new(position: u32) -> Option<Self> {
        (position > 0).then_some(Self(position))
    }

    pub fn position(&self) -> u32 {
        self.0
    }
}

impl TryFrom<String> for Column {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        letter_to_position(value.trim())
            .map(Column)
            .ok_or_else(|| format!("invalid column name: {value:?}"))
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&position_to_letter(self.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellAddress {
    pub column: u32,
    pub row: u32,
}

impl CellAddress {
    pub fn new(column: u32, row: u32) -> Self {
        Self { column, row }
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", position_to_letter(self.column), self.row)
    }
}

/// The part of a range reference after the `!`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Span {
    /// `B2`
    Cell(CellAddress),
    /// `B2:D9`
    Area { start: CellAddress, end: CellAddress },
    /// `1:1`, whole rows
    Rows { first: u32, last: u32 },
    /// `A2:A`, from a cell down to the last row
    Columns { start: CellAddress, last_column: u32 },
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Span::Cell(cell) => write!(f, "{cell}"),
            Span::Area { start, end } => write!(f, "{start}:{end}"),
            Span::Rows { first, last } => write!(f, "{first}:{last}"),
            Span::Columns { start, last_column } => {
                write!(f, "{start}:{}", position_to_letter(*last_column))
            }
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("invalid A1 range {0:?}")]
pub struct RangeParseError(pub String);

/// A sheet-qualified range such as `'Shopify_Order_Data'!A2:A`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeRef {
    pub sheet: String,
    pub span: Span,
}

impl RangeRef {
    pub fn cell(sheet: &str, address: CellAddress) -> Self {
        Self {
            sheet: sheet.to_string(),
            span: Span::Cell(address),
        }
    }

    pub fn row(sheet: &str, row: u32) -> Self {
        Self {
            sheet: sheet.to_string(),
            span: Span::Rows {
                first: row,
                last: row,
            },
        }
    }

    /// Column `column` from `first_row` down to the end of the sheet.
    pub fn column_from(sheet: &str, column: u32, first_row: u32) -> Self {
        Self {
            sheet: sheet.to_string(),
            span: Span::Columns {
                start: CellAddress::new(column, first_row),
                last_column: column,
            },
        }
    }

    /// First row covered by the range.
    pub fn first_row(&self) -> u32 {
        match &self.span {
            Span::Cell(cell) => cell.row,
            Span::Area { start, .. } | Span::Columns { start, .. } => start.row,
            Span::Rows { first, .. } => *first,
        }
    }

    pub fn parse(s: &str) -> Result<Self, RangeParseError> {
        let err = || RangeParseError(s.to_string());

        let (sheet, span) = match s.strip_prefix('\'') {
            Some(quoted) => {
                let (name, rest) = split_quoted(quoted).ok_or_else(err)?;
                let span = rest.strip_prefix('!').ok_or_else(err)?;
                (name, span)
            }
            None => {
                let (name, span) = s.rsplit_once('!').ok_or_else(err)?;
                (name.to_string(), span)
            }
        };

        if sheet.is_empty() {
            return Err(err());
        }

        Ok(RangeRef {
            sheet,
            span: parse_span(span).ok_or_else(err)?,
        })
    }
}

impl fmt::Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'!{}", self.sheet.replace('\'', "''"), self.span)
    }
}

// Splits `name'!rest` honouring doubled quotes inside the name.
fn split_quoted(s: &str) -> Option<(String, &str)> {
    let mut name = String::new();
    let mut chars = s.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '\'' {
            name.push(c);
            continue;
        }
        match chars.peek() {
            Some((_, '\'')) => {
                name.push('\'');
                chars.next();
            }
            _ => return Some((name, &s[i + 1..])),
        }
    }
    None
}

// A single endpoint: letters, digits, or letters followed by digits.
fn parse_endpoint(s: &str) -> Option<(Option<u32>, Option<u32>)> {
    let split = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
    let (letters, digits) = s.split_at(split);

    let column = match letters {
        "" => None,
        l => Some(letter_to_position(l)?),
    };
    let row = match digits {
        "" => None,
        d => Some(d.parse::<u32>().ok().filter(|r| *r > 0)?),
    };

    if column.is_none() && row.is_none() {
        return None;
    }
    Some((column, row))
}

fn parse_span(s: &str) -> Option<Span> {
    let (first, second) = match s.split_once(':') {
        Some((a, b)) => (parse_endpoint(a)?, Some(parse_endpoint(b)?)),
        None => (parse_endpoint(s)?, None),
    };

    match (first, second) {
        ((Some(column), Some(row)), None) => Some(Span::Cell(CellAddress::new(column, row))),
        ((Some(c1), Some(r1)), Some((Some(c2), Some(r2)))) => Some(Span::Area {
            start: CellAddress::new(c1, r1),
            end: CellAddress::new(c2, r2),
        }),
        ((None, Some(first)), Some((None, Some(last)))) if first <= last => {
            Some(Span::Rows { first, last })
        }
        ((Some(c1), r1), Some((Some(c2), None))) => Some(Span::Columns {
            start: CellAddress::new(c1, r1.unwrap_or(1)),
            last_column: c2,
        }),
        _ => None,
    }
}
