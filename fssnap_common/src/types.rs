use crate::error::SnapshotError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A per-file attribute that can be recorded at capture and checked at compare
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAttribute {
    Size,
    ModificationTime,
    Md5,
    Permissions,
}

impl FileAttribute {
    pub const ALL: [FileAttribute; 4] = [
        FileAttribute::Size,
        FileAttribute::ModificationTime,
        FileAttribute::Md5,
        FileAttribute::Permissions,
    ];

    /// Key used for this attribute in comparison reports
    pub fn description(self) -> &'static str {
        match self {
            FileAttribute::Size => "Size",
            FileAttribute::ModificationTime => "Modification time",
            FileAttribute::Md5 => "MD5 checksum",
            FileAttribute::Permissions => "Permissions",
        }
    }
}

impl fmt::Display for FileAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl FromStr for FileAttribute {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "size" => Ok(FileAttribute::Size),
            "mtime" | "modification-time" | "modification_time" => {
                Ok(FileAttribute::ModificationTime)
            }
            "md5" => Ok(FileAttribute::Md5),
            "permissions" | "perms" => Ok(FileAttribute::Permissions),
            _ => Err(SnapshotError::Config(format!(
                "Invalid file attribute '{}'. Please use one of: size, mtime, md5, permissions",
                s
            ))),
        }
    }
}

/// How a rule's text is matched against a candidate value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Trimmed, case-insensitive equality
    Equals,
    /// Case-insensitive substring
    Contains,
    /// Full-string regular expression match
    Regex,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Equals => f.write_str("equals"),
            MatchType::Contains => f.write_str("contains"),
            MatchType::Regex => f.write_str("regex"),
        }
    }
}

impl FromStr for MatchType {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equals" => Ok(MatchType::Equals),
            "contains" | "containing" => Ok(MatchType::Contains),
            "regex" | "matching" => Ok(MatchType::Regex),
            _ => Err(SnapshotError::Config(format!(
                "Invalid match type '{}'. Please use one of: equals, contains, regex",
                s
            ))),
        }
    }
}

/// Recognized file formats, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Regular,
    Properties,
    Xml,
    Ini,
    Text,
}

/// One captured filesystem node, keyed by its relative path in the capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entry {
    Directory {
        #[serde(default)]
        hidden: bool,
    },
    File(FileEntry),
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        matches!(self, Entry::Directory { .. })
    }

    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            Entry::File(file) => Some(file),
            Entry::Directory { .. } => None,
        }
    }
}

/// Attributes recorded for a file. Each is present only if it was enabled at capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<StructuredContent>,
}

impl FileEntry {
    /// The recorded value of an attribute, rendered for reports
    pub fn attribute(&self, attribute: FileAttribute) -> Option<String> {
        match attribute {
            FileAttribute::Size => self.size.map(|size| size.to_string()),
            FileAttribute::ModificationTime => self.modified.map(|millis| millis.to_string()),
            FileAttribute::Md5 => self.md5.clone(),
            FileAttribute::Permissions => self.permissions.clone(),
        }
    }
}

/// Comparison-only view of a recognized file's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StructuredContent {
    Properties(BTreeMap<String, String>),
    Ini(Vec<IniSection>),
    Xml(XmlDocument),
    Text(Vec<String>),
}

impl StructuredContent {
    pub fn content_type(&self) -> ContentType {
        match self {
            StructuredContent::Properties(_) => ContentType::Properties,
            StructuredContent::Ini(_) => ContentType::Ini,
            StructuredContent::Xml(_) => ContentType::Xml,
            StructuredContent::Text(_) => ContentType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IniSection {
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

/// Element tree of an XML file, stored as an arena in document order.
/// The root element, when present, is node 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XmlDocument {
    pub nodes: Vec<XmlNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XmlNode {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub parent: Option<usize>,
    #[serde(default)]
    pub children: Vec<usize>,
}

impl XmlNode {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// `<name a="v" ...>`, followed by the text when the node has no attributes
    pub fn signature(&self) -> String {
        let mut signature = format!("<{}", self.name);
        for (key, value) in &self.attributes {
            signature.push_str(&format!(" {}=\"{}\"", key, value));
        }
        signature.push('>');
        if self.attributes.is_empty() && !self.text.is_empty() {
            signature.push_str(&self.text);
        }
        signature
    }
}

impl XmlDocument {
    pub fn root(&self) -> Option<usize> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    /// Nodes must be in document order: a parent precedes its children and
    /// every child names its parent back
    pub fn check_arena(&self) -> Result<(), String> {
        for (index, node) in self.nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                if parent >= index {
                    return Err(format!("XML node {} has invalid parent {}", index, parent));
                }
            }
            for &child in &node.children {
                let linked = self.nodes.get(child).and_then(|c| c.parent) == Some(index);
                if child <= index || !linked {
                    return Err(format!("XML node {} has invalid child {}", index, child));
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, index: usize) -> &XmlNode {
        &self.nodes[index]
    }

    /// Signatures of all ancestors followed by the node's own
    pub fn full_signature(&self, index: usize) -> String {
        let mut chain = Vec::new();
        let mut current = Some(index);
        while let Some(i) = current {
            chain.push(self.nodes[i].signature());
            current = self.nodes[i].parent;
        }
        chain.reverse();
        chain.concat()
    }
}

/// Process-wide defaults for what a capture records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub check_size: bool,
    pub check_modification_time: bool,
    pub check_md5: bool,
    pub check_permissions: bool,

    /// Capture hidden files and directories
    pub support_hidden: bool,

    pub check_properties_content: bool,
    pub check_xml_content: bool,
    pub check_ini_content: bool,
    pub check_text_content: bool,

    pub properties_extensions: Vec<String>,
    pub xml_extensions: Vec<String>,
    pub ini_extensions: Vec<String>,
    pub text_extensions: Vec<String>,

    pub ini_comment_char: char,
    pub ini_section_start_char: char,
    pub ini_delimiter: char,

    pub follow_symlinks: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            check_size: true,
            check_modification_time: true,
            check_md5: true,
            check_permissions: true,
            support_hidden: false,
            check_properties_content: true,
            check_xml_content: true,
            check_ini_content: true,
            check_text_content: true,
            properties_extensions: vec![".properties".to_string()],
            xml_extensions: vec![".xml".to_string()],
            ini_extensions: vec![".ini".to_string()],
            text_extensions: vec![".txt".to_string()],
            ini_comment_char: '#',
            ini_section_start_char: '[',
            ini_delimiter: '=',
            follow_symlinks: false,
        }
    }
}

impl SnapshotConfig {
    pub fn is_enabled(&self, attribute: FileAttribute) -> bool {
        match attribute {
            FileAttribute::Size => self.check_size,
            FileAttribute::ModificationTime => self.check_modification_time,
            FileAttribute::Md5 => self.check_md5,
            FileAttribute::Permissions => self.check_permissions,
        }
    }

    pub fn set_enabled(&mut self, attribute: FileAttribute, enabled: bool) {
        match attribute {
            FileAttribute::Size => self.check_size = enabled,
            FileAttribute::ModificationTime => self.check_modification_time = enabled,
            FileAttribute::Md5 => self.check_md5 = enabled,
            FileAttribute::Permissions => self.check_permissions = enabled,
        }
    }

    /// Turn every content inspector on or off at once
    pub fn set_content_checks(&mut self, enabled: bool) {
        self.check_properties_content = enabled;
        self.check_xml_content = enabled;
        self.check_ini_content = enabled;
        self.check_text_content = enabled;
    }

    /// The inspector to use for a file name, honoring the content flags.
    /// Extensions are tried in the order XML, properties, INI, text.
    pub fn content_type_for(&self, file_name: &str) -> ContentType {
        let name = file_name.to_lowercase();
        let has_ext = |extensions: &[String]| {
            extensions
                .iter()
                .any(|ext| name.ends_with(&ext.to_lowercase()))
        };

        if has_ext(&self.xml_extensions) {
            return if self.check_xml_content { ContentType::Xml } else { ContentType::Regular };
        }
        if has_ext(&self.properties_extensions) {
            return if self.check_properties_content {
                ContentType::Properties
            } else {
                ContentType::Regular
            };
        }
        if has_ext(&self.ini_extensions) {
            return if self.check_ini_content { ContentType::Ini } else { ContentType::Regular };
        }
        if has_ext(&self.text_extensions) {
            return if self.check_text_content { ContentType::Text } else { ContentType::Regular };
        }
        ContentType::Regular
    }

    pub fn with_overrides(&self, overrides: &CheckOverrides) -> SnapshotConfig {
        let mut config = self.clone();
        let pairs = [
            (overrides.check_size, &mut config.check_size),
            (overrides.check_modification_time, &mut config.check_modification_time),
            (overrides.check_md5, &mut config.check_md5),
            (overrides.check_permissions, &mut config.check_permissions),
            (overrides.support_hidden, &mut config.support_hidden),
            (overrides.check_properties_content, &mut config.check_properties_content),
            (overrides.check_xml_content, &mut config.check_xml_content),
            (overrides.check_ini_content, &mut config.check_ini_content),
            (overrides.check_text_content, &mut config.check_text_content),
        ];
        for (value, slot) in pairs {
            if let Some(value) = value {
                *slot = value;
            }
        }
        config
    }
}

/// Call-site overrides layered on top of a [`SnapshotConfig`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckOverrides {
    pub check_size: Option<bool>,
    pub check_modification_time: Option<bool>,
    pub check_md5: Option<bool>,
    pub check_permissions: Option<bool>,
    pub support_hidden: Option<bool>,
    pub check_properties_content: Option<bool>,
    pub check_xml_content: Option<bool>,
    pub check_ini_content: Option<bool>,
    pub check_text_content: Option<bool>,
}

impl CheckOverrides {
    pub fn attribute(mut self, attribute: FileAttribute, enabled: bool) -> Self {
        match attribute {
            FileAttribute::Size => self.check_size = Some(enabled),
            FileAttribute::ModificationTime => self.check_modification_time = Some(enabled),
            FileAttribute::Md5 => self.check_md5 = Some(enabled),
            FileAttribute::Permissions => self.check_permissions = Some(enabled),
        }
        self
    }

    pub fn hidden(mut self, enabled: bool) -> Self {
        self.support_hidden = Some(enabled);
        self
    }

    pub fn content(mut self, enabled: bool) -> Self {
        self.check_properties_content = Some(enabled);
        self.check_xml_content = Some(enabled);
        self.check_ini_content = Some(enabled);
        self.check_text_content = Some(enabled);
        self
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Enable portable mode (config alongside binary)
    #[serde(default)]
    pub portable_mode: bool,

    /// Defaults applied to every capture
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}
