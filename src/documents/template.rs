//! `${key}` placeholder templates.

use std::collections::BTreeMap;
use std::path::Path;

use crate::contracts::DocumentError;

const DEFAULT_CONTRACT_TEMPLATE: &str = include_str!("../../templates/contract.html");

/// How placeholder values are written into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFormat {
    /// Values are inserted verbatim.
    Text,
    /// Values are HTML-escaped.
    Html,
}

impl TemplateFormat {
    /// Picks the format from a file extension; anything but `.html`/`.htm` is text.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("html") | Some("htm") => Self::Html,
            _ => Self::Text,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Html => "html",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Text => "text/plain; charset=utf-8",
            Self::Html => "text/html; charset=utf-8",
        }
    }
}

/// A loaded contract template.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    format: TemplateFormat,
}

impl Template {
    pub fn new(source: impl Into<String>, format: TemplateFormat) -> Self {
        Self {
            source: source.into(),
            format,
        }
    }

    /// Built-in HTML contract template.
    pub fn default_contract() -> Self {
        Self::new(DEFAULT_CONTRACT_TEMPLATE, TemplateFormat::Html)
    }

    /// Loads a template file; the format follows the extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| DocumentError::Template(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(source, TemplateFormat::from_path(path)))
    }

    pub fn format(&self) -> TemplateFormat {
        self.format
    }

    /// Replaces every `${key}` with its value.
    ///
    /// Placeholders without a value are left as written.
    pub fn render(&self, values: &BTreeMap<&str, String>) -> String {
        let mut out = String::with_capacity(self.source.len() + 256);
        let mut rest = self.source.as_str();

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                // Unterminated placeholder: copy the remainder as-is
                out.push_str(&rest[start..]);
                return out;
            };

            let key = &after[..end];
            match values.get(key) {
                Some(value) => match self.format {
                    TemplateFormat::Html => escape_html_into(&mut out, value),
                    TemplateFormat::Text => out.push_str(value),
                },
                None => {
                    tracing::debug!(placeholder = key, "Template placeholder has no value");
                    out.push_str(&rest[start..start + 2 + end + 1]);
                }
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }
}

fn escape_html_into(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}
