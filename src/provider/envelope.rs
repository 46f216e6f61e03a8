//! Response envelopes returned by the generation service.
//!
//! Services answer in one of a few known JSON shapes. Extraction tries them in
//! precedence order (`text`, then `candidates`, then `choices`) and falls through
//! any shape that carries no text.

use crate::error::UpstreamErrorKind;
use serde::de::DeserializeOwned;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Candidate {
    pub content: CandidateContent,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptFeedback {
    pub block_reason: String,
}

/// A service response with every known shape parsed on its own.
///
/// A field that is missing or malformed is `None`; it never hides the others.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseEnvelope {
    /// `{ "text": "..." }`
    pub text: Option<String>,
    /// `{ "candidates": [ { "content": { "parts": [ { "text": "..." } ] } } ] }`
    pub candidates: Option<Vec<Candidate>>,
    /// `{ "choices": [ { "message": { "content": "..." } } ] }`
    pub choices: Option<Vec<Choice>>,
    /// `{ "prompt_feedback": { "block_reason": "..." } }`
    pub prompt_feedback: Option<PromptFeedback>,
}

/// Outcome of reading an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    Text(String),
    Blocked(UpstreamErrorKind),
    Empty,
}

fn field<T: DeserializeOwned>(value: &serde_json::Value, name: &str) -> Option<T> {
    value
        .get(name)
        .and_then(|raw| serde_json::from_value(raw.clone()).ok())
}

fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

impl ResponseEnvelope {
    pub fn from_json(value: serde_json::Value) -> Self {
        Self {
            text: field(&value, "text"),
            candidates: field(&value, "candidates"),
            choices: field(&value, "choices"),
            prompt_feedback: field(&value, "prompt_feedback"),
        }
    }

    /// Names of the shapes present, in precedence order.
    pub fn shape(&self) -> String {
        let mut present = Vec::new();
        if self.text.is_some() {
            present.push("text");
        }
        if self.candidates.is_some() {
            present.push("candidates");
        }
        if self.choices.is_some() {
            present.push("choices");
        }
        if self.prompt_feedback.is_some() {
            present.push("blocked");
        }
        if present.is_empty() {
            "unrecognized".to_string()
        } else {
            present.join("+")
        }
    }

    fn primary(&self) -> Option<String> {
        self.text.clone().and_then(non_blank)
    }

    fn secondary(&self) -> Option<String> {
        self.candidates.as_ref()?.iter().find_map(|candidate| {
            non_blank(
                candidate
                    .content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<String>(),
            )
        })
    }

    fn tertiary(&self) -> Option<String> {
        self.choices
            .as_ref()?
            .iter()
            .find_map(|choice| choice.message.content.clone().and_then(non_blank))
    }

    /// First shape that yields non-blank text. A block marker only counts when no
    /// shape carried text.
    pub fn extract(&self) -> Extracted {
        if let Some(text) = self
            .primary()
            .or_else(|| self.secondary())
            .or_else(|| self.tertiary())
        {
            return Extracted::Text(text);
        }
        match &self.prompt_feedback {
            Some(feedback) => Extracted::Blocked(UpstreamErrorKind::SafetyBlocked(
                feedback.block_reason.clone(),
            )),
            None => Extracted::Empty,
        }
    }
}

/// Remove one enclosing code fence (```` ``` ```` or ```` ```markdown ````) if the
/// whole text is wrapped in it.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") || !trimmed.ends_with("```") || trimmed.len() < 6 {
        return trimmed.to_string();
    }
    let without_close = &trimmed[..trimmed.len() - 3];
    match without_close.find('\n') {
        Some(newline) => without_close[newline + 1..].trim().to_string(),
        None => trimmed.to_string(),
    }
}
