//! Processing-mode resolution: send the PDF itself, or only its text?
//!
//! The decision is driven by the model listing's capability map
//! (`model id → input modalities`). A model gets the document directly only
//! when its modalities include [`DOCUMENT_FILE_MODALITY`]; unknown models and
//! missing capability data fall back to text, since sending a file to a model
//! that cannot read it fails far less gracefully than sending text.
//!
//! The resolved mode is a pre-selection. [`ModeSelector`] remembers a manual
//! choice and keeps it for as long as the same document/model pairing is
//! active.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Modality tag marking a model that accepts document files.
pub const DOCUMENT_FILE_MODALITY: &str = "file";

/// `model id → supported input modalities`, as published by the model listing.
pub type CapabilityMap = HashMap<String, Vec<String>>;

/// How the document reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// The raw PDF is attached to the request.
    RichContent,
    /// Only the extracted plain text is sent.
    TextOnly,
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingMode::RichContent => write!(f, "Send PDF file"),
            ProcessingMode::TextOnly => write!(f, "Send text only"),
        }
    }
}

/// Resolve the mode for `model` from the capability map.
pub fn resolve_mode(model: &str, capabilities: Option<&CapabilityMap>) -> ProcessingMode {
    let supports_file = capabilities
        .and_then(|caps| caps.get(model))
        .is_some_and(|mods| mods.iter().any(|m| m == DOCUMENT_FILE_MODALITY));
    if supports_file {
        ProcessingMode::RichContent
    } else {
        ProcessingMode::TextOnly
    }
}

/// Where the current mode came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeOrigin {
    /// Nothing resolved yet.
    Default,
    /// Set by [`resolve_mode`].
    Resolved,
    /// Picked by the reviewer; sticky for the current pairing.
    User,
}

/// Holds the active processing mode and protects manual overrides.
#[derive(Debug, Clone)]
pub struct ModeSelector {
    mode: ProcessingMode,
    origin: ModeOrigin,
    /// Document and model the current mode applies to. The model is `None`
    /// for a manual choice made before any model was resolved.
    pairing: Option<(String, Option<String>)>,
}

impl Default for ModeSelector {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::TextOnly,
            origin: ModeOrigin::Default,
            pairing: None,
        }
    }
}

impl ModeSelector {
    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    pub fn origin(&self) -> ModeOrigin {
        self.origin
    }

    /// Apply the resolver for a document/model pairing.
    ///
    /// A manual choice made for this same pairing is kept; a new pairing
    /// always gets a fresh resolution.
    pub fn resolve_for(
        &mut self,
        document: &str,
        model: &str,
        capabilities: Option<&CapabilityMap>,
    ) -> ProcessingMode {
        if self.origin == ModeOrigin::User {
            if let Some((d, m)) = self.pairing.as_mut() {
                if d.as_str() == document && m.as_deref().is_none_or(|m| m == model) {
                    *m = Some(model.to_string());
                    debug!("Keeping manual mode '{}' for {}", self.mode, document);
                    return self.mode;
                }
            }
        }

        self.mode = resolve_mode(model, capabilities);
        self.origin = ModeOrigin::Resolved;
        self.pairing = Some((document.to_string(), Some(model.to_string())));
        debug!("Resolved mode '{}' for model {}", self.mode, model);
        self.mode
    }

    /// Manual override by the reviewer for `document`.
    ///
    /// The choice binds to the model already resolved for this document, or
    /// to the next model resolved for it.
    pub fn select(&mut self, document: &str, mode: ProcessingMode) {
        let model = match &self.pairing {
            Some((d, m)) if d == document => m.clone(),
            _ => None,
        };
        self.mode = mode;
        self.origin = ModeOrigin::User;
        self.pairing = Some((document.to_string(), model));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> CapabilityMap {
        let mut m = CapabilityMap::new();
        m.insert(
            "anthropic/claude-sonnet-4".into(),
            vec!["text".into(), "image".into(), "file".into()],
        );
        m.insert("meta/llama-3-8b".into(), vec!["text".into()]);
        m
    }

    #[test]
    fn file_modality_enables_rich_content() {
        assert_eq!(
            resolve_mode("anthropic/claude-sonnet-4", Some(&caps())),
            ProcessingMode::RichContent
        );
        assert_eq!(
            resolve_mode("meta/llama-3-8b", Some(&caps())),
            ProcessingMode::TextOnly
        );
    }

    #[test]
    fn missing_data_fails_closed() {
        assert_eq!(resolve_mode("unknown/model", Some(&caps())), ProcessingMode::TextOnly);
        assert_eq!(
            resolve_mode("anthropic/claude-sonnet-4", None),
            ProcessingMode::TextOnly
        );
    }

    #[test]
    fn manual_choice_sticks_for_same_pairing() {
        let caps = caps();
        let mut sel = ModeSelector::default();
        assert_eq!(
            sel.resolve_for("a.pdf", "anthropic/claude-sonnet-4", Some(&caps)),
            ProcessingMode::RichContent
        );
        sel.select("a.pdf", ProcessingMode::TextOnly);
        assert_eq!(
            sel.resolve_for("a.pdf", "anthropic/claude-sonnet-4", Some(&caps)),
            ProcessingMode::TextOnly
        );
        assert_eq!(sel.origin(), ModeOrigin::User);
    }

    #[test]
    fn new_pairing_resolves_again() {
        let caps = caps();
        let mut sel = ModeSelector::default();
        sel.resolve_for("a.pdf", "anthropic/claude-sonnet-4", Some(&caps));
        sel.select("a.pdf", ProcessingMode::TextOnly);
        assert_eq!(
            sel.resolve_for("b.pdf", "anthropic/claude-sonnet-4", Some(&caps)),
            ProcessingMode::RichContent
        );
        assert_eq!(sel.origin(), ModeOrigin::Resolved);
    }

    #[test]
    fn manual_choice_before_resolution_binds_to_first_model() {
        let caps = caps();
        let mut sel = ModeSelector::default();
        sel.select("a.pdf", ProcessingMode::RichContent);
        assert_eq!(
            sel.resolve_for("a.pdf", "meta/llama-3-8b", Some(&caps)),
            ProcessingMode::RichContent
        );
        assert_eq!(
            sel.resolve_for("a.pdf", "meta/llama-3-8b", Some(&caps)),
            ProcessingMode::RichContent
        );
        // Another model is a new pairing.
        assert_eq!(
            sel.resolve_for("a.pdf", "anthropic/claude-sonnet-4", Some(&caps)),
            ProcessingMode::RichContent
        );
        assert_eq!(sel.origin(), ModeOrigin::Resolved);
        assert_eq!(
            sel.resolve_for("a.pdf", "meta/llama-3-8b", Some(&caps)),
            ProcessingMode::TextOnly
        );
    }

    #[test]
    fn manual_choice_for_other_document_is_dropped() {
        let caps = caps();
        let mut sel = ModeSelector::default();
        sel.resolve_for("a.pdf", "meta/llama-3-8b", Some(&caps));
        sel.select("b.pdf", ProcessingMode::RichContent);
        assert_eq!(
            sel.resolve_for("c.pdf", "meta/llama-3-8b", Some(&caps)),
            ProcessingMode::TextOnly
        );
    }
}
