//! Outbound request construction for one "analyze" action.
//!
//! The wire shape is the OpenAI-compatible chat-completions body:
//!
//! ```json
//! {
//!   "model": "...",
//!   "messages": [ {"role": "system", ...}, {"role": "user", ...} ],
//!   "temperature": 0.1,
//!   "response_format": {"type": "json_object"},
//!   "max_tokens": 4096
//! }
//! ```
//!
//! `max_tokens` is present only when the caller supplied a bound, and it is
//! forwarded verbatim. Clamping is left to the remote API.

use crate::pipeline::encode::{encode_pdf, pdf_data_url};
use crate::pipeline::input::DocumentSource;
use crate::prompts::{
    document_reference_marker, numbered_prompts, CLOSING_INSTRUCTION, DOCUMENT_TEXT_HEADING,
    EXTRACTION_SYSTEM_PROMPT, PROMPTS_HEADING,
};
use serde::{Deserialize, Serialize};

/// Sampling temperature for extraction requests.
pub const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// What the model gets to read.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentContent {
    /// Plain text extracted from the PDF, inlined into the user message.
    Text(String),
    /// The PDF itself, attached as a file part.
    Document { data_base64: String, file_name: String },
}

impl DocumentContent {
    /// Attach a loaded document as base64.
    pub fn attach(source: &DocumentSource) -> Self {
        DocumentContent::Document {
            data_base64: encode_pdf(source.bytes()),
            file_name: source.name().to_string(),
        }
    }
}

/// Full request body for the chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub response_format: ResponseFormat,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            kind: "json_object".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(content: MessageContent) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

/// Either a bare string or an array of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::File { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    File { file: FileData },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileData {
    pub filename: String,
    pub file_data: String,
}

/// Builder for [`ExtractionRequest`].
///
/// Building cannot fail. An empty prompt list or missing content produces a
/// request anyway; checking those preconditions is the caller's job.
#[derive(Debug, Clone)]
pub struct ExtractionRequestBuilder {
    model: String,
    prompts: Vec<String>,
    content: DocumentContent,
    max_tokens: Option<u32>,
}

impl ExtractionRequestBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompts: Vec::new(),
            content: DocumentContent::Text(String::new()),
            max_tokens: None,
        }
    }

    pub fn prompts(mut self, prompts: &[String]) -> Self {
        self.prompts = prompts.to_vec();
        self
    }

    pub fn content(mut self, content: DocumentContent) -> Self {
        self.content = content;
        self
    }

    pub fn max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn build(self) -> ExtractionRequest {
        let prompt_block = format!(
            "{PROMPTS_HEADING}\n{}\n{CLOSING_INSTRUCTION}",
            numbered_prompts(&self.prompts)
        );

        let user = match self.content {
            DocumentContent::Text(text) => MessageContent::Text(format!(
                "{DOCUMENT_TEXT_HEADING}\n{text}\n\n{prompt_block}"
            )),
            DocumentContent::Document {
                data_base64,
                file_name,
            } => MessageContent::Parts(vec![
                ContentPart::Text {
                    text: format!("{}\n\n{prompt_block}", document_reference_marker(&file_name)),
                },
                ContentPart::File {
                    file: FileData {
                        filename: file_name,
                        file_data: pdf_data_url(&data_base64),
                    },
                },
            ]),
        };

        ExtractionRequest {
            model: self.model,
            messages: vec![
                ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
                ChatMessage::user(user),
            ],
            temperature: EXTRACTION_TEMPERATURE,
            response_format: ResponseFormat::json_object(),
            max_tokens: self.max_tokens,
        }
    }
}
