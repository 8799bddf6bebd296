//! Prompt text for structured extraction requests.
//!
//! The system instruction states the JSON shape that
//! [`crate::pipeline::validate`] checks. Unit tests inspect the prompts
//! directly, without a live model.

/// System instruction: assistant role plus the mandatory JSON response shape.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a data extraction assistant for systematic reviews and meta-analyses.
You receive one document and a numbered list of prompts. Answer every prompt using only the document.

You MUST reply with a single JSON object of exactly this shape:
{
  "responses": [
    {
      "prompt": "<the prompt text>",
      "response": "<the extracted answer>",
      "source": "<verbatim text from the document that supports the answer>",
      "page": "<page number where the source appears, or 'N/A'>"
    }
  ]
}

Rules:
- Return ONLY the JSON object, with no commentary and no code fences
- Include one entry per prompt, in the same order as the prompts
- If the document does not contain the answer, use "Not found" as the response
- Copy source text verbatim whenever possible
- Be accurate and concise"#;

/// Marker used in place of the document text when the PDF is attached.
pub fn document_reference_marker(file_name: &str) -> String {
    format!("[PDF Document: {file_name}]")
}

/// Heading that introduces inline document text.
pub const DOCUMENT_TEXT_HEADING: &str = "Document Text:";

/// Heading that introduces the numbered prompts.
pub const PROMPTS_HEADING: &str = "Prompts to answer:";

/// Closing reminder appended after the prompt list.
pub const CLOSING_INSTRUCTION: &str =
    "Please extract the requested information and return it as a JSON object with the format specified.";

/// Render the prompts as a 1-based numbered list, one per line.
pub fn numbered_prompts(prompts: &[String]) -> String {
    prompts
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}. {}\n", i + 1, p))
        .collect()
}

/// Minimal message used to check that endpoint, key and model work.
pub const CONNECTION_TEST_MESSAGE: &str = "test";
