use crate::comparison::{ComparisonEngine, SnapshotSide};
use crate::directory::DirectoryCapture;
use crate::inspectors::xpath::XPath;
use crate::matcher::TextMatcher;
use crate::persistence::{self, StoredSnapshot};
use crate::rules::{ContentRules, IniRule, PropertyRule, PropertyTarget, XmlNodeRule};
use crate::scanner::FolderScanner;
use chrono::{DateTime, Utc};
use fssnap_common::{
    CheckOverrides, ComparisonReport, FileAttribute, MatchType, SnapshotConfig, SnapshotError,
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    New,
    Captured,
    Loaded,
}

/// A named file system snapshot: registered directories, their rules and captured entries
#[derive(Debug, Clone)]
pub struct Snapshot {
    name: String,
    config: SnapshotConfig,
    directories: BTreeMap<String, DirectoryCapture>,
    captured_at: Option<DateTime<Utc>>,
    state: SnapshotState,
}

impl Snapshot {
    pub fn new(name: &str) -> Result<Self> {
        Self::with_config(name, SnapshotConfig::default())
    }

    /// A snapshot using `config` instead of the built-in defaults
    pub fn with_config(name: &str, config: SnapshotConfig) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SnapshotError::Config("Invalid snapshot name ''".to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            config,
            directories: BTreeMap::new(),
            captured_at: None,
            state: SnapshotState::New,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        self.captured_at
    }

    pub fn state(&self) -> SnapshotState {
        self.state
    }

    pub fn directories(&self) -> &BTreeMap<String, DirectoryCapture> {
        &self.directories
    }

    pub fn directory(&self, alias: &str) -> Option<&DirectoryCapture> {
        self.directories.get(alias)
    }

    /// A fresh, uncaptured snapshot with the same directories, rules and configuration
    pub fn new_snapshot(&self, name: &str) -> Result<Snapshot> {
        let mut snapshot = Snapshot::with_config(name, self.config.clone())?;
        snapshot.directories = self
            .directories
            .iter()
            .map(|(alias, directory)| {
                let mut copy = DirectoryCapture::new(alias, &directory.root);
                copy.rules = directory.rules.clone();
                (alias.clone(), copy)
            })
            .collect();
        Ok(snapshot)
    }

    pub fn add_directory(&mut self, alias: &str, path: impl AsRef<Path>) -> Result<()> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Err(SnapshotError::Config("Invalid directory alias ''".to_string()));
        }
        let raw = path.as_ref();
        if raw.as_os_str().is_empty() || raw.to_string_lossy().trim().is_empty() {
            return Err(SnapshotError::Config(format!(
                "Invalid directory path '{}' for alias '{}'",
                raw.display(),
                alias
            )));
        }
        if self.directories.contains_key(alias) {
            return Err(SnapshotError::DuplicateAlias {
                alias: alias.to_string(),
                snapshot: self.name.clone(),
            });
        }

        let root = absolute(raw)?;
        info!("[{}] Added directory {} as {}", self.name, root.display(), alias);
        self.directories
            .insert(alias.to_string(), DirectoryCapture::new(alias, &root));
        Ok(())
    }

    fn directory_mut(&mut self, alias: &str) -> Result<&mut DirectoryCapture> {
        let name = &self.name;
        self.directories
            .get_mut(alias.trim())
            .ok_or_else(|| SnapshotError::NoSuchDirectoryAlias {
                alias: alias.to_string(),
                snapshot: name.clone(),
            })
    }

    /// Skip a directory, and everything below it, during comparison
    pub fn skip_directory(&mut self, alias: &str, path: &str) -> Result<()> {
        let directory = self.directory_mut(alias)?;
        let relative = directory.normalize(path, "directory")?;
        directory.rules.skip_directory(&relative);
        Ok(())
    }

    /// `parent/regex`: the parent is literal, the regex is searched in the directory name
    pub fn skip_directory_by_regex(&mut self, alias: &str, path: &str) -> Result<()> {
        let directory = self.directory_mut(alias)?;
        let relative = directory.normalize_pattern(path, "directory")?;
        directory.rules.skip_directory_by_regex(&relative)
    }

    /// With no attributes the whole file is skipped
    pub fn skip_file(&mut self, alias: &str, path: &str, attributes: &[FileAttribute]) -> Result<()> {
        let directory = self.directory_mut(alias)?;
        let relative = directory.normalize(path, "file")?;
        directory.rules.skip_file(&relative, attributes);
        Ok(())
    }

    /// `parent/regex`: the parent is literal, the regex must match the whole file name
    pub fn skip_file_by_regex(
        &mut self,
        alias: &str,
        path: &str,
        attributes: &[FileAttribute],
    ) -> Result<()> {
        let directory = self.directory_mut(alias)?;
        let relative = directory.normalize_pattern(path, "file")?;
        directory.rules.skip_file_by_regex(&relative, attributes)
    }

    /// Always compare these attributes (all four when none are given), overriding any skip
    pub fn check_file(&mut self, alias: &str, path: &str, attributes: &[FileAttribute]) -> Result<()> {
        let directory = self.directory_mut(alias)?;
        let relative = directory.normalize(path, "file")?;
        directory.rules.check_file(&relative, attributes);
        Ok(())
    }

    fn content_rules(&mut self, alias: &str, file: &str) -> Result<&mut ContentRules> {
        let directory = self.directory_mut(alias)?;
        let relative = directory.normalize(file, "file")?;
        Ok(directory.rules.content_mut(&relative))
    }

    pub fn properties(&mut self) -> PropertiesRules<'_> {
        PropertiesRules { snapshot: self }
    }

    pub fn ini(&mut self) -> IniRules<'_> {
        IniRules { snapshot: self }
    }

    pub fn xml(&mut self) -> XmlRules<'_> {
        XmlRules { snapshot: self }
    }

    pub fn text(&mut self) -> TextRules<'_> {
        TextRules { snapshot: self }
    }

    pub fn capture(&mut self) -> Result<()> {
        self.capture_with(&CheckOverrides::default())
    }

    /// Capture every registered directory. Either all of them are captured or none is.
    pub fn capture_with(&mut self, overrides: &CheckOverrides) -> Result<()> {
        if self.state == SnapshotState::Loaded {
            info!("[{}] Snapshot was loaded from a file, nothing to capture", self.name);
            return Ok(());
        }

        if let Some(missing) = self.directories.values().find(|d| !d.root.is_dir()) {
            return Err(SnapshotError::DirectoryNotFound(missing.root.clone()));
        }

        let config = self.config.with_overrides(overrides);
        let scanner = FolderScanner::new(config.clone());
        info!("[{}] Capturing {} directories", self.name, self.directories.len());

        let captured = self
            .directories
            .iter()
            .map(|(alias, directory)| {
                scanner
                    .scan(&directory.root, &directory.rules)
                    .map(|entries| (alias.clone(), entries))
            })
            .collect::<Result<Vec<_>>>()?;

        for (alias, entries) in captured {
            if let Some(directory) = self.directories.get_mut(&alias) {
                directory.entries = entries;
            }
        }

        self.config = config;
        self.captured_at = Some(Utc::now());
        self.state = SnapshotState::Captured;
        info!("[{}] Capture finished", self.name);
        Ok(())
    }

    /// Compare with `other` and return every discrepancy found
    pub fn diff(&self, other: &Snapshot) -> Result<ComparisonReport> {
        if self.name == other.name {
            return Err(SnapshotError::SameSnapshotName(self.name.clone()));
        }
        for snapshot in [self, other] {
            if snapshot.state == SnapshotState::New {
                return Err(SnapshotError::NotCaptured(snapshot.name.clone()));
            }
        }

        info!("Comparing snapshots [{}] and [{}]", self.name, other.name);
        let engine = ComparisonEngine::new(
            SnapshotSide {
                name: &self.name,
                directories: &self.directories,
            },
            SnapshotSide {
                name: &other.name,
                directories: &other.directories,
            },
        );
        Ok(engine.compare())
    }

    /// Fails with [`SnapshotError::Differences`] carrying the report when anything differs
    pub fn compare(&self, other: &Snapshot) -> Result<()> {
        let report = self.diff(other)?;
        if report.is_empty() {
            info!("Snapshots [{}] and [{}] are the same", self.name, other.name);
            Ok(())
        } else {
            Err(SnapshotError::Differences(Box::new(report)))
        }
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        if self.state == SnapshotState::New {
            return Err(SnapshotError::NotCaptured(self.name.clone()));
        }
        persistence::save(
            path.as_ref(),
            &self.name,
            self.captured_at,
            &self.config,
            &self.directories,
        )
    }

    /// Replace this snapshot's contents with a saved one. A non-empty `new_name`
    /// renames this snapshot; otherwise it keeps its current name.
    pub fn load_from_file(&mut self, new_name: Option<&str>, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let stored = persistence::load(path)?;
        self.restore(stored, path)?;
        if let Some(name) = new_name.map(str::trim).filter(|n| !n.is_empty()) {
            self.name = name.to_string();
        }
        Ok(())
    }

    /// Load a saved snapshot under the name it was saved with
    pub fn from_file(path: impl AsRef<Path>) -> Result<Snapshot> {
        let path = path.as_ref();
        let stored = persistence::load(path)?;
        let mut snapshot = Snapshot::new(&stored.name)?;
        snapshot.restore(stored, path)?;
        Ok(snapshot)
    }

    fn restore(&mut self, stored: StoredSnapshot, path: &Path) -> Result<()> {
        let stored_name = stored.name.clone();
        let captured_at = stored.captured_at;
        let config = stored.config.clone();
        let directories = stored.into_directories(path)?;
        info!(
            "[{}] Loaded snapshot '{}' with {} directories",
            self.name,
            stored_name,
            directories.len()
        );

        self.directories = directories;
        self.config = config;
        self.captured_at = captured_at;
        self.state = SnapshotState::Loaded;
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Snapshot '{}'", self.name)?;
        match (self.state, self.captured_at) {
            (SnapshotState::New, _) | (_, None) => write!(f, " (not captured)")?,
            (SnapshotState::Captured, Some(at)) => write!(f, " captured at {}", at.to_rfc3339())?,
            (SnapshotState::Loaded, Some(at)) => {
                write!(f, " loaded, originally captured at {}", at.to_rfc3339())?
            }
        }

        for (alias, directory) in &self.directories {
            write!(
                f,
                "\n  [{}] {}: {} entries, {} files",
                alias,
                directory.root_display(),
                directory.entries.len(),
                directory.file_count()
            )?;
            for rule in directory.rules.describe() {
                write!(f, "\n    {}", rule)?;
            }
        }
        Ok(())
    }
}

/// Content rules for `.properties` files
pub struct PropertiesRules<'a> {
    snapshot: &'a mut Snapshot,
}

impl PropertiesRules<'_> {
    pub fn skip_property_by_key(
        &mut self,
        alias: &str,
        file: &str,
        key: &str,
        match_type: MatchType,
    ) -> Result<()> {
        self.add(alias, file, PropertyTarget::Key, key, match_type)
    }

    pub fn skip_property_by_value(
        &mut self,
        alias: &str,
        file: &str,
        value: &str,
        match_type: MatchType,
    ) -> Result<()> {
        self.add(alias, file, PropertyTarget::Value, value, match_type)
    }

    fn add(
        &mut self,
        alias: &str,
        file: &str,
        target: PropertyTarget,
        text: &str,
        match_type: MatchType,
    ) -> Result<()> {
        let matcher = TextMatcher::new(text, match_type)?;
        self.snapshot
            .content_rules(alias, file)?
            .add_property_rule(PropertyRule { target, matcher });
        Ok(())
    }
}

/// Content rules for INI files. Sections are named by their header line, e.g. `[Mail]`.
pub struct IniRules<'a> {
    snapshot: &'a mut Snapshot,
}

impl IniRules<'_> {
    pub fn skip_section(
        &mut self,
        alias: &str,
        file: &str,
        section: &str,
        match_type: MatchType,
    ) -> Result<()> {
        let matcher = TextMatcher::new(section, match_type)?;
        self.snapshot
            .content_rules(alias, file)?
            .add_ini_rule(IniRule::Section(matcher));
        Ok(())
    }

    pub fn skip_property_by_key(
        &mut self,
        alias: &str,
        file: &str,
        section: &str,
        key: &str,
        match_type: MatchType,
    ) -> Result<()> {
        let section = section_name(section)?;
        let matcher = TextMatcher::new(key, match_type)?;
        self.snapshot
            .content_rules(alias, file)?
            .add_ini_rule(IniRule::Key { section, matcher });
        Ok(())
    }

    pub fn skip_property_by_value(
        &mut self,
        alias: &str,
        file: &str,
        section: &str,
        value: &str,
        match_type: MatchType,
    ) -> Result<()> {
        let section = section_name(section)?;
        let matcher = TextMatcher::new(value, match_type)?;
        self.snapshot
            .content_rules(alias, file)?
            .add_ini_rule(IniRule::Value { section, matcher });
        Ok(())
    }
}

fn section_name(section: &str) -> Result<String> {
    let section = section.trim();
    if section.is_empty() {
        return Err(SnapshotError::Config("Invalid INI section ''".to_string()));
    }
    Ok(section.to_string())
}

/// Content rules for XML files
pub struct XmlRules<'a> {
    snapshot: &'a mut Snapshot,
}

impl XmlRules<'_> {
    /// Skip nodes selected by `xpath` whose `attribute` value matches
    pub fn skip_node_by_attribute(
        &mut self,
        alias: &str,
        file: &str,
        xpath: &str,
        attribute: &str,
        value: &str,
        match_type: MatchType,
    ) -> Result<()> {
        let attribute = attribute.trim();
        if attribute.is_empty() {
            return Err(SnapshotError::Config(format!(
                "Invalid XML attribute '' for XPath '{}'",
                xpath
            )));
        }
        self.add(alias, file, xpath, Some(attribute.to_string()), value, match_type)
    }

    /// Skip nodes selected by `xpath` whose text matches
    pub fn skip_node_by_value(
        &mut self,
        alias: &str,
        file: &str,
        xpath: &str,
        value: &str,
        match_type: MatchType,
    ) -> Result<()> {
        self.add(alias, file, xpath, None, value, match_type)
    }

    fn add(
        &mut self,
        alias: &str,
        file: &str,
        xpath: &str,
        attribute: Option<String>,
        value: &str,
        match_type: MatchType,
    ) -> Result<()> {
        let xpath = XPath::parse(xpath)?;
        let matcher = TextMatcher::new(value, match_type)?;
        self.snapshot
            .content_rules(alias, file)?
            .add_xml_rule(XmlNodeRule {
                xpath,
                attribute,
                matcher,
            });
        Ok(())
    }
}

/// Content rules for plain text files
pub struct TextRules<'a> {
    snapshot: &'a mut Snapshot,
}

impl TextRules<'_> {
    pub fn skip_line(&mut self, alias: &str, file: &str, line: &str, match_type: MatchType) -> Result<()> {
        let matcher = TextMatcher::new(line, match_type)?;
        self.snapshot.content_rules(alias, file)?.add_text_rule(matcher);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn snapshot_of(name: &str, dir: &Path) -> Snapshot {
        let mut snapshot = Snapshot::new(name).unwrap();
        snapshot.add_directory("F1", dir).unwrap();
        snapshot
    }

    #[test]
    fn test_invalid_names_and_aliases() {
        assert!(matches!(Snapshot::new("  "), Err(SnapshotError::Config(_))));

        let temp = TempDir::new().unwrap();
        let mut snapshot = snapshot_of("snap1", temp.path());
        assert!(matches!(snapshot.add_directory("", temp.path()), Err(SnapshotError::Config(_))));

        let err = snapshot.add_directory("F1", temp.path()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "There is already a directory with alias 'F1' for snapshot 'snap1'"
        );

        let err = snapshot.skip_file("F9", "file.txt", &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "There is no directory snapshot with alias 'F9' for snapshot 'snap1'"
        );
    }

    #[test]
    fn test_compare_requires_capture() {
        let temp = TempDir::new().unwrap();
        let first = snapshot_of("snap1", temp.path());
        let second = snapshot_of("snap2", temp.path());
        assert!(matches!(first.compare(&second), Err(SnapshotError::NotCaptured(name)) if name == "snap1"));
    }

    #[test]
    fn test_same_name_rejected_before_capture_check() {
        let temp = TempDir::new().unwrap();
        let first = snapshot_of("snap1", temp.path());
        let second = snapshot_of("snap1", temp.path());
        let err = first.compare(&second).unwrap_err();
        assert_eq!(err.to_string(), "You are trying to compare snapshots with same name: snap1");
    }

    #[test]
    fn test_capture_is_all_or_nothing() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        let mut snapshot = snapshot_of("snap1", temp.path());
        snapshot
            .add_directory("F2", temp.path().join("not_existing_dir"))
            .unwrap();

        assert!(matches!(snapshot.capture(), Err(SnapshotError::DirectoryNotFound(_))));
        assert!(snapshot.directory("F1").unwrap().entries.is_empty());
        assert_eq!(snapshot.state(), SnapshotState::New);
    }

    #[test]
    fn test_capture_with_overrides_records_config() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.bin"), "a").unwrap();
        let mut snapshot = snapshot_of("snap1", temp.path());
        snapshot
            .capture_with(&CheckOverrides::default().attribute(FileAttribute::Md5, false))
            .unwrap();

        assert!(!snapshot.config().check_md5);
        assert!(snapshot.captured_at().is_some());
        let file = snapshot.directory("F1").unwrap().entry("a.bin").unwrap().as_file().unwrap();
        assert!(file.md5.is_none());
    }

    #[test]
    fn test_content_sub_apis_validate_input() {
        let temp = TempDir::new().unwrap();
        let mut snapshot = snapshot_of("snap1", temp.path());

        snapshot
            .properties()
            .skip_property_by_key("F1", "app.properties", "interval", MatchType::Contains)
            .unwrap();
        snapshot
            .ini()
            .skip_section("F1", "short_ini_file.ini", "[Mail]", MatchType::Equals)
            .unwrap();
        snapshot
            .xml()
            .skip_node_by_attribute("F1", "file1.xml", "//TABLE", "name", "Acc.*", MatchType::Regex)
            .unwrap();
        snapshot
            .text()
            .skip_line("F1", "notes.txt", "WRONG.*", MatchType::Regex)
            .unwrap();

        assert!(matches!(
            snapshot.text().skip_line("F1", "notes.txt", "(", MatchType::Regex),
            Err(SnapshotError::InvalidRegex { .. })
        ));
        assert!(matches!(
            snapshot.xml().skip_node_by_value("F1", "file1.xml", "", "x", MatchType::Equals),
            Err(SnapshotError::Config(_))
        ));
        assert!(matches!(
            snapshot.properties().skip_property_by_key("F9", "a.properties", "k", MatchType::Equals),
            Err(SnapshotError::NoSuchDirectoryAlias { .. })
        ));

        let rules = snapshot.directory("F1").unwrap().rules.describe();
        assert_eq!(rules.len(), 4);
    }

    #[test]
    fn test_new_snapshot_copies_rules_not_entries() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        let mut snapshot = snapshot_of("snap1", temp.path());
        snapshot.skip_file("F1", "a.txt", &[]).unwrap();
        snapshot.capture().unwrap();

        let copy = snapshot.new_snapshot("snap2").unwrap();
        assert_eq!(copy.state(), SnapshotState::New);
        let directory = copy.directory("F1").unwrap();
        assert!(directory.entries.is_empty());
        assert!(directory.rules.is_entity_skipped("a.txt", false));
    }

    #[test]
    fn test_display_lists_directories_and_rules() {
        let temp = TempDir::new().unwrap();
        let mut snapshot = snapshot_of("snap1", temp.path());
        snapshot.skip_directory("F1", "logs").unwrap();

        let text = snapshot.to_string();
        assert!(text.starts_with("Snapshot 'snap1' (not captured)"));
        assert!(text.contains("[F1]"));
        assert!(text.contains("skip directory 'logs'"));
    }
}
