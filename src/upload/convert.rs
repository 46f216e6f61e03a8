//! Document format detection and conversion.

use crate::provider::PreparedDocument;

/// A document as the user submitted it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub name: String,
    pub content: Vec<u8>,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// How a document reaches the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Uploaded as-is
    Native { mime_type: &'static str },
    /// Converted to text before upload
    Markup,
    Unsupported,
}

impl DocumentFormat {
    pub fn from_name(name: &str) -> Self {
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" => DocumentFormat::Native {
                mime_type: "application/pdf",
            },
            "txt" => DocumentFormat::Native {
                mime_type: "text/plain",
            },
            "md" | "markdown" => DocumentFormat::Native {
                mime_type: "text/markdown",
            },
            "csv" => DocumentFormat::Native {
                mime_type: "text/csv",
            },
            "html" | "htm" => DocumentFormat::Markup,
            _ => DocumentFormat::Unsupported,
        }
    }

    pub fn needs_conversion(&self) -> bool {
        matches!(self, DocumentFormat::Markup)
    }
}

/// Converts documents the service cannot take directly
pub trait DocumentConverter: Send + Sync {
    fn convert(&self, document: &SourceDocument) -> Result<PreparedDocument, String>;
}

/// Strips HTML markup down to readable text
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkupConverter;

impl DocumentConverter for MarkupConverter {
    fn convert(&self, document: &SourceDocument) -> Result<PreparedDocument, String> {
        let html = std::str::from_utf8(&document.content)
            .map_err(|e| format!("{} is not valid UTF-8: {}", document.name, e))?;
        let text = html_to_text(html);
        if text.trim().is_empty() {
            return Err(format!("{} contains no readable text", document.name));
        }
        let stem = document
            .name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&document.name);
        Ok(PreparedDocument {
            name: format!("{}.txt", stem),
            mime_type: "text/plain".to_string(),
            content: text.into_bytes(),
        })
    }
}

const BLOCK_TAGS: &[&str] = &["p", "br", "div", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6"];

fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    let mut skip_until: Option<&'static str> = None;

    while let Some(open) = rest.find('<') {
        if skip_until.is_none() {
            out.push_str(&decode_entities(&rest[..open]));
        }
        let Some(close) = rest[open..].find('>') else {
            rest = "";
            break;
        };
        let tag = rest[open + 1..open + close].trim().to_ascii_lowercase();
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("");

        match skip_until {
            Some(end) if tag.starts_with('/') && name == end => skip_until = None,
            Some(_) => {}
            None if name == "script" && !tag.starts_with('/') => skip_until = Some("script"),
            None if name == "style" && !tag.starts_with('/') => skip_until = Some("style"),
            None if BLOCK_TAGS.contains(&name) => out.push('\n'),
            None => {}
        }
        rest = &rest[open + close + 1..];
    }
    if skip_until.is_none() {
        out.push_str(&decode_entities(rest));
    }

    out.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
