use crate::rules::{normalize_pattern, normalize_relative, DirectoryRules};
use fssnap_common::{Entry, SnapshotError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One registered directory root: its rules and, once captured, its entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryCapture {
    pub alias: String,
    pub root: PathBuf,
    #[serde(default)]
    pub rules: DirectoryRules,
    /// Entries keyed by forward-slash relative path; the root itself is not an entry
    #[serde(default)]
    pub entries: BTreeMap<String, Entry>,
}

impl DirectoryCapture {
    pub fn new(alias: &str, root: &Path) -> Self {
        Self {
            alias: alias.to_string(),
            root: root.to_path_buf(),
            rules: DirectoryRules::default(),
            entries: BTreeMap::new(),
        }
    }

    /// Root path with forward slashes and no trailing separator
    pub fn root_display(&self) -> String {
        let text = self.root.to_string_lossy().replace('\\', "/");
        match text.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        }
    }

    /// Absolute path of an entry as shown in reports; directories end with '/'
    pub fn absolute_path(&self, relative_path: &str, is_dir: bool) -> String {
        let root = self.root_display();
        let mut path = if relative_path.is_empty() {
            root
        } else if root.ends_with('/') {
            format!("{}{}", root, relative_path)
        } else {
            format!("{}/{}", root, relative_path)
        };
        if is_dir && !path.ends_with('/') {
            path.push('/');
        }
        path
    }

    pub fn normalize(&self, raw: &str, what: &str) -> Result<String, SnapshotError> {
        normalize_relative(&self.root, raw, what)
    }

    /// Like [`normalize`](Self::normalize) for `parent/regex` rules
    pub fn normalize_pattern(&self, raw: &str, what: &str) -> Result<String, SnapshotError> {
        normalize_pattern(&self.root, raw, what)
    }

    pub fn entry(&self, relative_path: &str) -> Option<&Entry> {
        self.entries.get(relative_path)
    }

    pub fn file_count(&self) -> usize {
        self.entries.values().filter(|e| !e.is_dir()).count()
    }
}
