//! Per-prompt response state for the document under review.
//!
//! Each prompt has a draft [`ResponseEntry`] (filled by analysis, editable by
//! the reviewer) and a [`PromptState`]:
//!
//! ```text
//!            record(i)
//!   Draft ─────────────▶ Recorded
//!     ▲                     │
//!     └─────────────────────┘
//!           re_record(i)
//! ```
//!
//! Recording is the trust boundary: only a recorded value reaches the
//! coding form. Re-recording reopens the prompt for editing but leaves the
//! already-written cell alone until the next record overwrites it.

use crate::error::AideError;
use crate::form::CodingForm;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// One model answer for one prompt on the current document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEntry {
    /// The suggested value; editable before recording.
    pub response: String,
    /// Verbatim excerpt the model cites for the value. May be empty.
    #[serde(default)]
    pub source: String,
    /// Page identifier of the excerpt, or `"N/A"`.
    #[serde(default)]
    pub page: String,
}

impl ResponseEntry {
    pub fn new(
        response: impl Into<String>,
        source: impl Into<String>,
        page: impl Into<String>,
    ) -> Self {
        Self {
            response: response.into(),
            source: source.into(),
            page: page.into(),
        }
    }

    pub fn has_source(&self) -> bool {
        !self.source.trim().is_empty()
    }

    /// The cited page as a 1-based number, when it is one.
    ///
    /// Accepts `"3"`, `"p. 3"`, `"Page 3"`, and takes the first page of a
    /// range such as `"3-4"`.
    pub fn page_number(&self) -> Option<usize> {
        let digits: String = self
            .page
            .trim()
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok().filter(|&n| n >= 1)
    }
}

/// Review state of a single prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptState {
    Draft,
    Recorded,
}

/// Draft entries plus the recorded set for the current document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLifecycle {
    entries: Vec<ResponseEntry>,
    recorded: BTreeSet<usize>,
}

impl ResponseLifecycle {
    /// Fresh state for `prompt_count` prompts: empty drafts, nothing recorded.
    pub fn new(prompt_count: usize) -> Self {
        Self {
            entries: vec![ResponseEntry::default(); prompt_count],
            recorded: BTreeSet::new(),
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[ResponseEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Result<&ResponseEntry, AideError> {
        self.check_index(index)?;
        Ok(&self.entries[index])
    }

    pub fn state(&self, index: usize) -> Result<PromptState, AideError> {
        self.check_index(index)?;
        Ok(if self.recorded.contains(&index) {
            PromptState::Recorded
        } else {
            PromptState::Draft
        })
    }

    pub fn is_recorded(&self, index: usize) -> bool {
        self.recorded.contains(&index)
    }

    /// Recorded prompt indices in ascending order.
    pub fn recorded_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.recorded.iter().copied()
    }

    pub fn recorded_count(&self) -> usize {
        self.recorded.len()
    }

    /// Replace a draft response with the reviewer's edit.
    pub fn edit_response(&mut self, index: usize, value: impl Into<String>) -> Result<(), AideError> {
        self.check_index(index)?;
        if self.recorded.contains(&index) {
            return Err(AideError::PromptLocked { index });
        }
        self.entries[index].response = value.into();
        Ok(())
    }

    /// Commit the draft at `index` into the form's current row.
    ///
    /// Returns the updated form; `form` itself is not modified. When the
    /// form has no rows yet the first row is created.
    pub fn record(&mut self, index: usize, form: &CodingForm) -> Result<CodingForm, AideError> {
        self.check_index(index)?;
        if self.recorded.contains(&index) {
            return Err(AideError::AlreadyRecorded { index });
        }
        let value = &self.entries[index].response;
        if value.trim().is_empty() {
            return Err(AideError::EmptyResponse { index });
        }
        let header = form
            .headers()
            .get(index)
            .ok_or(AideError::PromptOutOfRange {
                index,
                count: form.headers().len(),
            })?;
        let row = form.current_row_index().unwrap_or(0);
        let updated = form.write_cell(row, header, value.clone())?;

        self.recorded.insert(index);
        debug!("Recorded prompt {} into row {}", index + 1, row + 1);
        Ok(updated)
    }

    /// Reopen a recorded prompt for editing. Reopening a draft is a no-op.
    pub fn re_record(&mut self, index: usize) -> Result<(), AideError> {
        self.check_index(index)?;
        if self.recorded.remove(&index) {
            debug!("Reopened prompt {}", index + 1);
        }
        Ok(())
    }

    /// Clear every prompt back to an empty draft.
    pub fn reset_all(&mut self) {
        self.recorded.clear();
        self.clear_entries();
    }

    /// Overwrite drafts with a new analysis result, aligned by index.
    ///
    /// Prompts past the end of `entries` become empty drafts; surplus
    /// entries are ignored. The recorded set is left as is.
    pub fn apply_responses(&mut self, entries: &[ResponseEntry]) {
        self.clear_entries();
        for (slot, entry) in self.entries.iter_mut().zip(entries) {
            *slot = entry.clone();
        }
    }

    fn clear_entries(&mut self) {
        for e in &mut self.entries {
            *e = ResponseEntry::default();
        }
    }

    fn check_index(&self, index: usize) -> Result<(), AideError> {
        if index < self.entries.len() {
            Ok(())
        } else {
            Err(AideError::PromptOutOfRange {
                index,
                count: self.entries.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> CodingForm {
        CodingForm::with_headers(["Sample size", "Country"]).unwrap()
    }

    fn drafted() -> ResponseLifecycle {
        let mut lc = ResponseLifecycle::new(2);
        lc.apply_responses(&[
            ResponseEntry::new("120", "N=120", "3"),
            ResponseEntry::new("Not found", "", "N/A"),
        ]);
        lc
    }

    #[test]
    fn record_writes_current_row_and_creates_first_row() {
        let mut lc = drafted();
        let updated = lc.record(0, &form()).unwrap();
        assert_eq!(updated.row_count(), 1);
        assert_eq!(updated.cell(0, "Sample size"), Some("120"));
        assert_eq!(lc.state(0).unwrap(), PromptState::Recorded);
        assert_eq!(lc.state(1).unwrap(), PromptState::Draft);
    }

    #[test]
    fn record_targets_last_row() {
        let mut lc = drafted();
        let base = form().append_blank_row().append_blank_row();
        let updated = lc.record(1, &base).unwrap();
        assert_eq!(updated.cell(1, "Country"), Some("Not found"));
        assert_eq!(updated.cell(0, "Country"), Some(""));
    }

    #[test]
    fn record_requires_non_empty_value() {
        let mut lc = ResponseLifecycle::new(2);
        let err = lc.record(0, &form()).unwrap_err();
        assert!(matches!(err, AideError::EmptyResponse { index: 0 }));
        lc.edit_response(0, "   ").unwrap();
        assert!(lc.record(0, &form()).is_err());
        assert_eq!(lc.recorded_count(), 0);
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let mut lc = drafted();
        assert!(matches!(
            lc.record(2, &form()),
            Err(AideError::PromptOutOfRange { index: 2, count: 2 })
        ));
        assert!(lc.re_record(9).is_err());
        assert!(lc.edit_response(2, "x").is_err());
        assert!(lc.recorded_indices().all(|i| i < lc.prompt_count()));
    }

    #[test]
    fn re_record_then_record_overwrites() {
        let mut lc = drafted();
        let f1 = lc.record(0, &form()).unwrap();
        assert!(matches!(
            lc.record(0, &f1),
            Err(AideError::AlreadyRecorded { .. })
        ));
        assert!(matches!(
            lc.edit_response(0, "130"),
            Err(AideError::PromptLocked { .. })
        ));

        lc.re_record(0).unwrap();
        assert_eq!(lc.state(0).unwrap(), PromptState::Draft);
        // Reopening keeps the written cell.
        assert_eq!(f1.cell(0, "Sample size"), Some("120"));

        lc.edit_response(0, "130").unwrap();
        let f2 = lc.record(0, &f1).unwrap();
        assert_eq!(f2.cell(0, "Sample size"), Some("130"));
        assert_eq!(f2.row_count(), 1);
    }

    #[test]
    fn reset_all_clears_everything() {
        let mut lc = drafted();
        lc.record(0, &form()).unwrap();
        lc.reset_all();
        assert_eq!(lc.recorded_count(), 0);
        assert!(lc.entries().iter().all(|e| *e == ResponseEntry::default()));
    }

    #[test]
    fn apply_responses_pads_short_results() {
        let mut lc = drafted();
        lc.apply_responses(&[ResponseEntry::new("99", "", "")]);
        assert_eq!(lc.entry(0).unwrap().response, "99");
        assert_eq!(lc.entry(1).unwrap(), &ResponseEntry::default());
    }

    #[test]
    fn page_number_parses_common_forms() {
        let page = |p: &str| ResponseEntry::new("", "", p).page_number();
        assert_eq!(page("3"), Some(3));
        assert_eq!(page("p. 12"), Some(12));
        assert_eq!(page("Page 4-5"), Some(4));
        assert_eq!(page("N/A"), None);
        assert_eq!(page("0"), None);
    }
}
