//! Content inspectors for the structured formats a snapshot understands.

pub mod ini;
pub mod properties;
pub mod text;
pub mod xml;
pub mod xpath;

use crate::rules::ContentRules;
use fssnap_common::{ContentType, SnapshotConfig, StructuredContent};
use thiserror::Error;

pub(crate) const PRESENT: &str = "YES";
pub(crate) const ABSENT: &str = "NO";

/// Property and INI values compare trimmed and case-insensitively
pub(crate) fn same_value(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("content is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("XML error: {0}")]
    Xml(String),
}

/// One described difference between two structured contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDifference {
    pub description: String,
    pub first: String,
    pub second: String,
}

impl ContentDifference {
    pub fn new(description: String, first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            description,
            first: first.into(),
            second: second.into(),
        }
    }
}

/// The closed set of content inspectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inspector {
    Properties,
    Ini,
    Xml,
    Text,
}

impl Inspector {
    pub fn for_type(content_type: ContentType) -> Option<Self> {
        match content_type {
            ContentType::Properties => Some(Inspector::Properties),
            ContentType::Ini => Some(Inspector::Ini),
            ContentType::Xml => Some(Inspector::Xml),
            ContentType::Text => Some(Inspector::Text),
            ContentType::Regular => None,
        }
    }

    pub fn parse(self, bytes: &[u8], config: &SnapshotConfig) -> Result<StructuredContent, ParseError> {
        match self {
            Inspector::Properties => Ok(StructuredContent::Properties(properties::parse_properties(
                &properties::decode(bytes),
            ))),
            Inspector::Ini => {
                let text = std::str::from_utf8(bytes)?;
                Ok(StructuredContent::Ini(ini::parse_ini(text, config)))
            }
            Inspector::Xml => {
                let text = std::str::from_utf8(bytes)?;
                Ok(StructuredContent::Xml(xml::parse_xml(text)?))
            }
            Inspector::Text => {
                let text = std::str::from_utf8(bytes)?;
                Ok(StructuredContent::Text(text::parse_lines(text)))
            }
        }
    }
}

/// Diff two contents under the union of the given rule sets.
/// Returns `None` when the contents come from different inspectors.
pub fn diff(
    first: &StructuredContent,
    second: &StructuredContent,
    rules: &[&ContentRules],
) -> Option<Vec<ContentDifference>> {
    match (first, second) {
        (StructuredContent::Properties(a), StructuredContent::Properties(b)) => {
            let rules: Vec<_> = rules.iter().flat_map(|r| r.properties.iter()).collect();
            Some(properties::diff(a, b, &rules))
        }
        (StructuredContent::Ini(a), StructuredContent::Ini(b)) => {
            let rules: Vec<_> = rules.iter().flat_map(|r| r.ini.iter()).collect();
            Some(ini::diff(a, b, &rules))
        }
        (StructuredContent::Xml(a), StructuredContent::Xml(b)) => {
            let rules: Vec<_> = rules.iter().flat_map(|r| r.xml.iter()).collect();
            Some(xml::diff(a, b, &rules))
        }
        (StructuredContent::Text(a), StructuredContent::Text(b)) => {
            let rules: Vec<_> = rules.iter().flat_map(|r| r.text.iter()).collect();
            Some(text::diff(a, b, &rules))
        }
        _ => None,
    }
}
