use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Placeholder shown for an attribute one side did not record
pub const NOT_RECORDED: &str = "not recorded";

/// Kind of a single difference between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceKind {
    DirectoryOnlyInOne,
    FileOnlyInOne,
    DifferentFiles,
}

/// Which of the two compared snapshots an entity belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    First,
    Second,
}

/// One recorded difference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub kind: DifferenceKind,
    pub alias: String,
    pub relative_path: String,
    pub first_snapshot: Option<String>,
    pub first_path: Option<String>,
    pub second_snapshot: Option<String>,
    pub second_path: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub first_differences: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub second_differences: BTreeMap<String, String>,
}

impl Discrepancy {
    /// An entity that exists in one snapshot only
    pub fn present_in_one(
        kind: DifferenceKind,
        alias: &str,
        relative_path: &str,
        side: Side,
        snapshot: &str,
        path: String,
    ) -> Self {
        let (first, second) = match side {
            Side::First => ((Some(snapshot.to_string()), Some(path)), (None, None)),
            Side::Second => ((None, None), (Some(snapshot.to_string()), Some(path))),
        };
        Self {
            kind,
            alias: alias.to_string(),
            relative_path: relative_path.to_string(),
            first_snapshot: first.0,
            first_path: first.1,
            second_snapshot: second.0,
            second_path: second.1,
            first_differences: BTreeMap::new(),
            second_differences: BTreeMap::new(),
        }
    }

    /// A file present in both snapshots whose recorded values differ
    pub fn different(
        alias: &str,
        relative_path: &str,
        first: (&str, String),
        second: (&str, String),
        first_differences: BTreeMap<String, String>,
        second_differences: BTreeMap<String, String>,
    ) -> Self {
        Self {
            kind: DifferenceKind::DifferentFiles,
            alias: alias.to_string(),
            relative_path: relative_path.to_string(),
            first_snapshot: Some(first.0.to_string()),
            first_path: Some(first.1),
            second_snapshot: Some(second.0.to_string()),
            second_path: Some(second.1),
            first_differences,
            second_differences,
        }
    }

    /// The snapshot name and entity path for an entity present in one snapshot only
    pub fn owner(&self) -> Option<(&str, &str)> {
        match (&self.first_snapshot, &self.first_path, &self.second_snapshot, &self.second_path) {
            (Some(name), Some(path), None, _) => Some((name.as_str(), path.as_str())),
            (None, _, Some(name), Some(path)) => Some((name.as_str(), path.as_str())),
            _ => None,
        }
    }

    fn render_different(&self) -> String {
        let first_name = self.first_snapshot.as_deref().unwrap_or("");
        let second_name = self.second_snapshot.as_deref().unwrap_or("");

        let mut out = format!("\"{}\":", self.first_path.as_deref().unwrap_or(&self.relative_path));
        let keys: BTreeSet<&String> = self
            .first_differences
            .keys()
            .chain(self.second_differences.keys())
            .collect();
        for key in keys {
            let first = self.first_differences.get(key).map(String::as_str).unwrap_or(NOT_RECORDED);
            let second = self.second_differences.get(key).map(String::as_str).unwrap_or(NOT_RECORDED);
            out.push_str(&format!(
                "\n\t{}: [{}] {}, [{}] {}",
                key, first_name, first, second_name, second
            ));
        }
        out
    }
}

/// Every discrepancy found while comparing two snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    first_snapshot: String,
    second_snapshot: String,
    differences: Vec<Discrepancy>,
}

impl ComparisonReport {
    pub fn new(first_snapshot: &str, second_snapshot: &str) -> Self {
        Self {
            first_snapshot: first_snapshot.to_string(),
            second_snapshot: second_snapshot.to_string(),
            differences: Vec::new(),
        }
    }

    pub fn first_snapshot(&self) -> &str {
        &self.first_snapshot
    }

    pub fn second_snapshot(&self) -> &str {
        &self.second_snapshot
    }

    pub fn push(&mut self, discrepancy: Discrepancy) {
        self.differences.push(discrepancy);
    }

    pub fn extend<I: IntoIterator<Item = Discrepancy>>(&mut self, items: I) {
        self.differences.extend(items);
    }

    /// Order by alias, then relative path
    pub fn sort(&mut self) {
        self.differences.sort_by(|a, b| {
            a.alias
                .cmp(&b.alias)
                .then_with(|| a.relative_path.cmp(&b.relative_path))
                .then_with(|| a.kind.cmp(&b.kind))
        });
    }

    pub fn is_empty(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn len(&self) -> usize {
        self.differences.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Discrepancy> {
        self.differences.iter()
    }

    pub fn differences(&self) -> &[Discrepancy] {
        &self.differences
    }

    /// Paths of directories present in the named snapshot only
    pub fn directories_only_in(&self, snapshot: &str) -> Vec<String> {
        self.only_in(DifferenceKind::DirectoryOnlyInOne, snapshot)
    }

    /// Paths of files present in the named snapshot only
    pub fn files_only_in(&self, snapshot: &str) -> Vec<String> {
        self.only_in(DifferenceKind::FileOnlyInOne, snapshot)
    }

    /// One rendered block per file present in both snapshots with differences
    pub fn different_files(&self) -> Vec<String> {
        self.differences
            .iter()
            .filter(|d| d.kind == DifferenceKind::DifferentFiles)
            .map(Discrepancy::render_different)
            .collect()
    }

    fn only_in(&self, kind: DifferenceKind, snapshot: &str) -> Vec<String> {
        self.differences
            .iter()
            .filter(|d| d.kind == kind)
            .filter_map(|d| d.owner())
            .filter(|(name, _)| *name == snapshot)
            .map(|(_, path)| path.to_string())
            .collect()
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Comparing [{}] and [{}] produced the following unexpected differences:",
            self.first_snapshot, self.second_snapshot
        )?;

        let sections = [
            ("Directory", DifferenceKind::DirectoryOnlyInOne, &self.first_snapshot),
            ("Directory", DifferenceKind::DirectoryOnlyInOne, &self.second_snapshot),
            ("File", DifferenceKind::FileOnlyInOne, &self.first_snapshot),
            ("File", DifferenceKind::FileOnlyInOne, &self.second_snapshot),
        ];
        for (label, kind, snapshot) in sections {
            let paths = self.only_in(kind, snapshot);
            if paths.is_empty() {
                continue;
            }
            write!(f, "\n{} is present in [{}] snapshot only:", label, snapshot)?;
            for path in paths {
                write!(f, "\n\t{}", path)?;
            }
        }

        let different = self.different_files();
        if !different.is_empty() {
            write!(f, "\nDifferent files:")?;
            for block in different {
                for line in block.lines() {
                    write!(f, "\n\t{}", line)?;
                }
            }
        }
        Ok(())
    }
}
