use crate::inspectors::xpath::XPath;
use crate::matcher::{compile_full_match, compile_search, TextMatcher};
use fssnap_common::{FileAttribute, SnapshotError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Skip,
    Check,
}

/// Entity and attribute rules for one file (or file-name pattern)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRule {
    #[serde(default)]
    pub skip_entity: bool,
    #[serde(default)]
    pub attributes: BTreeMap<FileAttribute, RuleAction>,
}

impl FileRule {
    pub fn action(&self, attribute: FileAttribute) -> Option<RuleAction> {
        self.attributes.get(&attribute).copied()
    }

    fn set(&mut self, target: &str, attribute: FileAttribute, action: RuleAction) {
        if let Some(previous) = self.attributes.insert(attribute, action) {
            if previous != action {
                warn!(
                    "Rule for {} of '{}' changed from {:?} to {:?}",
                    attribute, target, previous, action
                );
            }
        }
    }

    fn skip(&mut self, target: &str, attributes: &[FileAttribute]) {
        if attributes.is_empty() {
            self.skip_entity = true;
            return;
        }

        let unique: BTreeSet<FileAttribute> = attributes.iter().copied().collect();
        for attribute in unique {
            self.set(target, attribute, RuleAction::Skip);
            // a skipped size makes the checksum meaningless
            if attribute == FileAttribute::Size && self.action(FileAttribute::Md5) != Some(RuleAction::Check) {
                self.attributes.insert(FileAttribute::Md5, RuleAction::Skip);
            }
        }
    }

    fn check(&mut self, target: &str, attributes: &[FileAttribute]) {
        let unique: BTreeSet<FileAttribute> = if attributes.is_empty() {
            FileAttribute::ALL.iter().copied().collect()
        } else {
            attributes.iter().copied().collect()
        };
        self.skip_entity = false;
        for attribute in unique {
            self.set(target, attribute, RuleAction::Check);
        }
    }

    /// The action for `attribute`, treating a skipped entity as skipping everything
    pub fn effective_action(&self, attribute: FileAttribute) -> Option<RuleAction> {
        if self.skip_entity {
            Some(RuleAction::Skip)
        } else {
            self.action(attribute)
        }
    }

    pub fn has_check(&self) -> bool {
        self.attributes.values().any(|action| *action == RuleAction::Check)
    }

    /// Overlay `other` on top of this rule. Explicit checks in `other` lift an
    /// inherited entity skip; the attributes they do not name stay skipped.
    fn merge(&mut self, other: &FileRule) {
        if self.skip_entity && !other.skip_entity && other.has_check() {
            self.skip_entity = false;
            for attribute in FileAttribute::ALL {
                self.attributes.insert(attribute, RuleAction::Skip);
            }
        } else {
            self.skip_entity |= other.skip_entity;
        }
        for (attribute, action) in &other.attributes {
            self.attributes.insert(*attribute, *action);
        }
    }
}

/// A literal parent directory plus a regex applied to the last path token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "NamePatternRepr", into = "NamePatternRepr")]
pub struct NamePattern {
    parent: String,
    pattern: String,
    full_match: bool,
    regex: Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NamePatternRepr {
    parent: String,
    pattern: String,
    full_match: bool,
}

impl NamePattern {
    /// `full_match` anchors the regex to the whole name, otherwise it may match anywhere
    pub fn new(path: &str, full_match: bool) -> Result<Self, SnapshotError> {
        let (parent, pattern) = split_parent(path);
        let regex = if full_match {
            compile_full_match(pattern)?
        } else {
            compile_search(pattern)?
        };
        Ok(Self {
            parent: parent.to_string(),
            pattern: pattern.to_string(),
            full_match,
            regex,
        })
    }

    pub fn matches(&self, relative_path: &str) -> bool {
        let (parent, name) = split_parent(relative_path);
        parent == self.parent && self.regex.is_match(name)
    }
}

impl TryFrom<NamePatternRepr> for NamePattern {
    type Error = SnapshotError;

    fn try_from(repr: NamePatternRepr) -> Result<Self, Self::Error> {
        let path = if repr.parent.is_empty() {
            repr.pattern
        } else {
            format!("{}/{}", repr.parent, repr.pattern)
        };
        NamePattern::new(&path, repr.full_match)
    }
}

impl From<NamePattern> for NamePatternRepr {
    fn from(pattern: NamePattern) -> Self {
        NamePatternRepr {
            parent: pattern.parent,
            pattern: pattern.pattern,
            full_match: pattern.full_match,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternFileRule {
    pub pattern: NamePattern,
    pub rule: FileRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyTarget {
    Key,
    Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRule {
    pub target: PropertyTarget,
    pub matcher: TextMatcher,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IniRule {
    Section(TextMatcher),
    Key { section: String, matcher: TextMatcher },
    Value { section: String, matcher: TextMatcher },
}

impl IniRule {
    fn locator(&self) -> (u8, &str, &str) {
        match self {
            IniRule::Section(matcher) => (0, "", matcher.text()),
            IniRule::Key { section, matcher } => (1, section, matcher.text()),
            IniRule::Value { section, matcher } => (2, section, matcher.text()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XmlNodeRule {
    pub xpath: XPath,
    /// Attribute whose value is matched; `None` matches the node text
    pub attribute: Option<String>,
    pub matcher: TextMatcher,
}

/// Content skip rules registered for one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentRules {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ini: Vec<IniRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xml: Vec<XmlNodeRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub text: Vec<TextMatcher>,
}

/// Insert a rule, replacing one with the same locator
fn upsert<T: fmt::Debug>(rules: &mut Vec<T>, rule: T, same_locator: impl Fn(&T, &T) -> bool) {
    match rules.iter_mut().find(|existing| same_locator(existing, &rule)) {
        Some(existing) => {
            warn!("Replacing content rule {:?} with {:?}", existing, rule);
            *existing = rule;
        }
        None => rules.push(rule),
    }
}

impl ContentRules {
    pub fn add_property_rule(&mut self, rule: PropertyRule) {
        upsert(&mut self.properties, rule, |a, b| {
            a.target == b.target && a.matcher.text() == b.matcher.text()
        });
    }

    pub fn add_ini_rule(&mut self, rule: IniRule) {
        upsert(&mut self.ini, rule, |a, b| a.locator() == b.locator());
    }

    pub fn add_xml_rule(&mut self, rule: XmlNodeRule) {
        upsert(&mut self.xml, rule, |a, b| {
            a.xpath == b.xpath && a.attribute == b.attribute && a.matcher.text() == b.matcher.text()
        });
    }

    pub fn add_text_rule(&mut self, matcher: TextMatcher) {
        upsert(&mut self.text, matcher, |a, b| a.text() == b.text());
    }

    pub fn len(&self) -> usize {
        self.properties.len() + self.ini.len() + self.xml.len() + self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All rules registered for one directory alias
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryRules {
    #[serde(default)]
    skipped_directories: BTreeSet<String>,
    #[serde(default)]
    skipped_directory_patterns: BTreeMap<String, NamePattern>,
    #[serde(default)]
    files: BTreeMap<String, FileRule>,
    #[serde(default)]
    file_patterns: BTreeMap<String, PatternFileRule>,
    #[serde(default)]
    content: BTreeMap<String, ContentRules>,
}

impl DirectoryRules {
    pub fn skip_directory(&mut self, relative_path: &str) {
        debug!("Skip directory '{}'", relative_path);
        self.skipped_directories.insert(relative_path.to_string());
    }

    pub fn skip_directory_by_regex(&mut self, relative_path: &str) -> Result<(), SnapshotError> {
        let pattern = NamePattern::new(relative_path, false)?;
        debug!("Skip directories matching '{}'", relative_path);
        self.skipped_directory_patterns
            .insert(relative_path.to_string(), pattern);
        Ok(())
    }

    pub fn skip_file(&mut self, relative_path: &str, attributes: &[FileAttribute]) {
        self.files
            .entry(relative_path.to_string())
            .or_default()
            .skip(relative_path, attributes);
    }

    pub fn skip_file_by_regex(
        &mut self,
        relative_path: &str,
        attributes: &[FileAttribute],
    ) -> Result<(), SnapshotError> {
        if !self.file_patterns.contains_key(relative_path) {
            let pattern = NamePattern::new(relative_path, true)?;
            self.file_patterns.insert(
                relative_path.to_string(),
                PatternFileRule {
                    pattern,
                    rule: FileRule::default(),
                },
            );
        }
        if let Some(entry) = self.file_patterns.get_mut(relative_path) {
            entry.rule.skip(relative_path, attributes);
        }
        Ok(())
    }

    pub fn check_file(&mut self, relative_path: &str, attributes: &[FileAttribute]) {
        self.files
            .entry(relative_path.to_string())
            .or_default()
            .check(relative_path, attributes);
    }

    pub fn content_mut(&mut self, relative_path: &str) -> &mut ContentRules {
        self.content.entry(relative_path.to_string()).or_default()
    }

    pub fn content_rules(&self, relative_path: &str) -> Option<&ContentRules> {
        self.content.get(relative_path)
    }

    /// Whether the directory, or one of its ancestors, is skipped
    pub fn is_directory_skipped(&self, relative_path: &str) -> bool {
        if relative_path.is_empty() {
            return false;
        }
        std::iter::once(relative_path)
            .chain(ancestors(relative_path))
            .any(|path| {
                self.skipped_directories.contains(path)
                    || self.skipped_directory_patterns.values().any(|p| p.matches(path))
            })
    }

    pub fn is_entity_skipped(&self, relative_path: &str, is_dir: bool) -> bool {
        if is_dir {
            return self.is_directory_skipped(relative_path);
        }
        let (parent, _) = split_parent(relative_path);
        self.is_directory_skipped(parent) || self.file_rule(relative_path).skip_entity
    }

    /// Pattern rules first, then the exact-path rule on top
    pub fn file_rule(&self, relative_path: &str) -> FileRule {
        let mut rule = FileRule::default();
        for pattern_rule in self.file_patterns.values() {
            if pattern_rule.pattern.matches(relative_path) {
                rule.merge(&pattern_rule.rule);
            }
        }
        if let Some(exact) = self.files.get(relative_path) {
            rule.merge(exact);
        }
        rule
    }

    pub fn attribute_action(&self, relative_path: &str, attribute: FileAttribute) -> Option<RuleAction> {
        self.file_rule(relative_path).action(attribute)
    }

    /// Attributes this snapshot explicitly asks to check for a file
    pub fn forced_attributes(&self, relative_path: &str) -> Vec<FileAttribute> {
        let rule = self.file_rule(relative_path);
        FileAttribute::ALL
            .iter()
            .copied()
            .filter(|a| rule.action(*a) == Some(RuleAction::Check))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.skipped_directories.is_empty()
            && self.skipped_directory_patterns.is_empty()
            && self.files.is_empty()
            && self.file_patterns.is_empty()
            && self.content.is_empty()
    }

    /// Human-readable rule listing, one rule per line
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for dir in &self.skipped_directories {
            lines.push(format!("skip directory '{}'", dir));
        }
        for pattern in self.skipped_directory_patterns.keys() {
            lines.push(format!("skip directories matching '{}'", pattern));
        }
        let describe_rule = |target: String, rule: &FileRule| {
            if rule.skip_entity {
                return format!("skip {}", target);
            }
            let parts: Vec<String> = rule
                .attributes
                .iter()
                .map(|(a, action)| format!("{:?} {}", action, a).to_lowercase())
                .collect();
            format!("{}: {}", target, parts.join(", "))
        };
        for (path, rule) in &self.files {
            lines.push(describe_rule(format!("file '{}'", path), rule));
        }
        for (path, pattern_rule) in &self.file_patterns {
            lines.push(describe_rule(format!("files matching '{}'", path), &pattern_rule.rule));
        }
        for (path, rules) in &self.content {
            lines.push(format!("file '{}': {} content rule(s)", path, rules.len()));
        }
        lines
    }
}

/// Split `a/b/c` into (`a/b`, `c`); a bare name has an empty parent
pub fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

/// Parent paths of a relative path, nearest first
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(split_parent_opt(path), |parent| split_parent_opt(*parent))
}

fn split_parent_opt(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Normalize a caller-supplied path to a root-relative, forward-slash form.
/// An absolute path under `root` has the root stripped.
pub fn normalize_relative(root: &Path, raw: &str, what: &str) -> Result<String, SnapshotError> {
    let relative = strip_root(root, raw);
    if relative.is_empty() {
        return Err(SnapshotError::Config(format!("Invalid {} path '{}'", what, raw)));
    }
    Ok(relative)
}

/// Normalize a `parent/regex` rule: only the literal parent is treated as a path.
/// The regex after the last '/' keeps its backslashes.
pub fn normalize_pattern(root: &Path, raw: &str, what: &str) -> Result<String, SnapshotError> {
    let trimmed = raw.trim();
    let (parent, pattern) = match trimmed.rsplit_once('/') {
        Some((parent, pattern)) => (strip_root(root, parent), pattern),
        None => (String::new(), trimmed),
    };
    if pattern.is_empty() {
        return Err(SnapshotError::Config(format!("Invalid {} pattern '{}'", what, raw)));
    }
    if parent.is_empty() {
        Ok(pattern.to_string())
    } else {
        Ok(format!("{}/{}", parent, pattern))
    }
}

/// Forward slashes, root prefix and outer separators removed; may be empty
fn strip_root(root: &Path, raw: &str) -> String {
    let trimmed = raw.trim().replace('\\', "/");
    let root_text = root.to_string_lossy().replace('\\', "/");
    let root_text = root_text.trim_end_matches('/');

    let relative = match trimmed.strip_prefix(root_text) {
        Some(rest) if !root_text.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
        _ => trimmed.as_str(),
    };
    relative.trim_matches('/').to_string()
}
