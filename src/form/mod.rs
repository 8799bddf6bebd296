//! The coding form: a reviewer-defined table whose header row doubles as the
//! list of LLM prompts and whose body accumulates one row per document.
//!
//! ## Shape
//!
//! Columns are decided at import time, so a row cannot be a Rust struct.
//! Instead every row is a `Vec<String>` index-aligned with [`CodingForm::headers`].
//! That makes the key-set invariant structural: a row always has exactly one
//! value per header, missing cells are `""`, and an unknown column can never
//! be introduced because writes go through a header lookup first.
//!
//! ## Purity
//!
//! Mutations ([`CodingForm::append_blank_row`], [`CodingForm::write_cell`])
//! return a new form instead of editing in place. Callers swap the value in
//! only after the write is known to be good, so a failed persist never
//! leaves a half-updated form behind.

pub mod export;
pub mod import;

use crate::error::AideError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// The tabular extraction dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "StoredForm", try_from = "StoredForm")]
pub struct CodingForm {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    file_name: Option<String>,
}

impl CodingForm {
    /// Build a form from raw table cells; the first row is the header row.
    ///
    /// Header cells are trimmed, trailing blanks dropped, interior blanks
    /// named `Column N`, duplicates suffixed `_1`, `_2`, … Body rows that are
    /// entirely empty are skipped. Short rows are padded, long rows truncated.
    pub fn from_table(
        table: Vec<Vec<String>>,
        source_name: impl Into<String>,
    ) -> Result<Self, AideError> {
        let source_name = source_name.into();
        let mut iter = table.into_iter();
        let raw_headers = iter.next().unwrap_or_default();
        let headers = normalise_headers(raw_headers);
        if headers.is_empty() {
            return Err(AideError::EmptyHeaderRow { source_name });
        }

        let width = headers.len();
        // Blank rows are kept: they are documents with nothing recorded yet.
        let rows = iter
            .map(|mut r| {
                r.resize(width, String::new());
                r
            })
            .collect();

        Ok(Self {
            headers,
            rows,
            file_name: Some(source_name),
        })
    }

    /// A form with the given prompts and no rows.
    pub fn with_headers<I, S>(headers: I) -> Result<Self, AideError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let row: Vec<String> = headers.into_iter().map(Into::into).collect();
        Self::from_table(vec![row], "untitled")
            .map(|form| Self {
                file_name: None,
                ..form
            })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// The prompts sent to the model; identical to the headers.
    pub fn prompts(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Index of the row that recordings go into: the last one.
    pub fn current_row_index(&self) -> Option<usize> {
        self.rows.len().checked_sub(1)
    }

    /// Column index for `header`.
    pub fn column(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    /// Cell value, or `None` when the row or header does not exist.
    pub fn cell(&self, row: usize, header: &str) -> Option<&str> {
        let col = self.column(header)?;
        self.rows.get(row).map(|r| r[col].as_str())
    }

    /// A copy with one additional all-empty row.
    pub fn append_blank_row(&self) -> CodingForm {
        let mut next = self.clone();
        next.rows.push(vec![String::new(); self.headers.len()]);
        next
    }

    /// A copy with a single cell overwritten.
    ///
    /// When `row_index` is past the end, blank rows are appended up to and
    /// including it before the write.
    pub fn write_cell(
        &self,
        row_index: usize,
        header: &str,
        value: impl Into<String>,
    ) -> Result<CodingForm, AideError> {
        let col = self.column(header).ok_or_else(|| AideError::UnknownHeader {
            header: header.to_string(),
        })?;
        let mut next = self.clone();
        while next.rows.len() <= row_index {
            next.rows.push(vec![String::new(); next.headers.len()]);
        }
        next.rows[row_index][col] = value.into();
        Ok(next)
    }

    /// Header row followed by every body row, for export.
    pub fn to_table(&self) -> Vec<Vec<String>> {
        std::iter::once(self.headers.clone())
            .chain(self.rows.iter().cloned())
            .collect()
    }
}

fn normalise_headers(raw: Vec<String>) -> Vec<String> {
    let mut cells: Vec<String> = raw.into_iter().map(|c| c.trim().to_string()).collect();
    while cells.last().is_some_and(|c| c.is_empty()) {
        cells.pop();
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut headers = Vec::with_capacity(cells.len());
    for (i, cell) in cells.into_iter().enumerate() {
        let base = if cell.is_empty() {
            format!("Column {}", i + 1)
        } else {
            cell
        };
        let mut name = base.clone();
        let mut n = 1;
        while seen.contains(&name) {
            name = format!("{base}_{n}");
            n += 1;
        }
        seen.insert(name.clone());
        headers.push(name);
    }
    headers
}

// ── Session wire shape ───────────────────────────────────────────────────

/// The persisted JSON shape: rows are objects keyed by header.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredForm {
    headers: Vec<String>,
    #[serde(default)]
    rows: Vec<Map<String, Value>>,
    #[serde(rename = "fileName", default, skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
}

impl From<CodingForm> for StoredForm {
    fn from(form: CodingForm) -> Self {
        let rows = form
            .rows
            .into_iter()
            .map(|row| {
                form.headers
                    .iter()
                    .cloned()
                    .zip(row.into_iter().map(Value::String))
                    .collect()
            })
            .collect();
        StoredForm {
            headers: form.headers,
            rows,
            file_name: form.file_name,
        }
    }
}

impl TryFrom<StoredForm> for CodingForm {
    type Error = AideError;

    fn try_from(stored: StoredForm) -> Result<Self, Self::Error> {
        let source_name = stored
            .file_name
            .clone()
            .unwrap_or_else(|| "session".to_string());
        let headers = normalise_headers(stored.headers);
        if headers.is_empty() {
            return Err(AideError::EmptyHeaderRow { source_name });
        }
        let rows = stored
            .rows
            .iter()
            .map(|obj| {
                headers
                    .iter()
                    .map(|h| obj.get(h).map(value_to_cell).unwrap_or_default())
                    .collect()
            })
            .collect();
        Ok(CodingForm {
            headers,
            rows,
            file_name: stored.file_name,
        })
    }
}

/// Coerce a JSON cell to text: strings verbatim, null → "", others as JSON.
pub(crate) fn value_to_cell(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn from_table_uses_first_row_as_headers() {
        let form = CodingForm::from_table(
            table(&[&["Sample size", "Country"], &["120", "Kenya"]]),
            "form.csv",
        )
        .unwrap();
        assert_eq!(form.headers(), ["Sample size", "Country"]);
        assert_eq!(form.row_count(), 1);
        assert_eq!(form.cell(0, "Country"), Some("Kenya"));
        assert_eq!(form.file_name(), Some("form.csv"));
    }

    #[test]
    fn from_table_rejects_empty_header_row() {
        let err = CodingForm::from_table(table(&[&["", "  "]]), "blank.csv").unwrap_err();
        assert!(matches!(err, AideError::EmptyHeaderRow { .. }));
        let err = CodingForm::from_table(vec![], "nothing.csv").unwrap_err();
        assert!(matches!(err, AideError::EmptyHeaderRow { .. }));
    }

    #[test]
    fn headers_are_unique_and_named() {
        let form =
            CodingForm::from_table(table(&[&["Year", "", "Year", "Year", ""]]), "f").unwrap();
        assert_eq!(form.headers(), ["Year", "Column 2", "Year_1", "Year_2"]);
        let distinct: HashSet<_> = form.headers().iter().collect();
        assert_eq!(distinct.len(), form.headers().len());
    }

    #[test]
    fn ragged_rows_are_padded_and_truncated() {
        let form = CodingForm::from_table(
            table(&[&["a", "b"], &["1"], &["1", "2", "3"]]),
            "f",
        )
        .unwrap();
        assert_eq!(form.row_count(), 2);
        assert!(form.rows().iter().all(|r| r.len() == 2));
        assert_eq!(form.cell(0, "b"), Some(""));
        assert_eq!(form.cell(1, "b"), Some("2"));
    }

    #[test]
    fn blank_rows_keep_their_place() {
        let form = CodingForm::from_table(
            table(&[&["a", "b"], &["", ""], &["", "Kenya"], &["", ""]]),
            "f",
        )
        .unwrap();
        assert_eq!(form.row_count(), 3);
        assert_eq!(form.cell(1, "b"), Some("Kenya"));
        assert_eq!(form.current_row_index(), Some(2));
    }

    #[test]
    fn append_blank_row_is_pure() {
        let form = CodingForm::with_headers(["a", "b"]).unwrap();
        let next = form.append_blank_row();
        assert_eq!(form.row_count(), 0);
        assert_eq!(next.row_count(), 1);
        assert_eq!(next.rows()[0], vec![String::new(), String::new()]);
    }

    #[test]
    fn write_cell_creates_missing_rows() {
        let form = CodingForm::with_headers(["a", "b"]).unwrap();
        let next = form.write_cell(2, "b", "x").unwrap();
        assert_eq!(next.row_count(), 3);
        assert_eq!(next.cell(2, "b"), Some("x"));
        assert_eq!(next.cell(0, "a"), Some(""));
        assert_eq!(form.row_count(), 0);
    }

    #[test]
    fn write_cell_refuses_unknown_header() {
        let form = CodingForm::with_headers(["a"]).unwrap();
        let err = form.write_cell(0, "zzz", "x").unwrap_err();
        assert!(matches!(err, AideError::UnknownHeader { .. }));
    }

    #[test]
    fn stored_shape_round_trips() {
        let form = CodingForm::from_table(table(&[&["a", "b"], &["1", "2"]]), "f.csv").unwrap();
        let json = serde_json::to_value(&form).unwrap();
        assert_eq!(json["rows"][0]["b"], "2");
        assert_eq!(json["fileName"], "f.csv");
        let back: CodingForm = serde_json::from_value(json).unwrap();
        assert_eq!(back, form);
    }

    #[test]
    fn stored_shape_tolerates_missing_unknown_and_numeric_cells() {
        let json = serde_json::json!({
            "headers": ["n", "country"],
            "rows": [{ "n": 120, "stray": "x" }, { "country": null }]
        });
        let form: CodingForm = serde_json::from_value(json).unwrap();
        assert_eq!(form.rows()[0], vec!["120".to_string(), String::new()]);
        assert_eq!(form.rows()[1], vec![String::new(), String::new()]);
        assert_eq!(form.file_name(), None);
    }
}
