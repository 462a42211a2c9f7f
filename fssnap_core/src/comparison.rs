use crate::directory::DirectoryCapture;
use crate::inspectors;
use crate::rules::{ancestors, ContentRules, RuleAction};
use fssnap_common::{
    ComparisonReport, DifferenceKind, Discrepancy, Entry, FileAttribute, FileEntry, Side,
    NOT_RECORDED,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// One of the two snapshots taking part in a comparison
#[derive(Debug, Clone, Copy)]
pub struct SnapshotSide<'a> {
    pub name: &'a str,
    pub directories: &'a BTreeMap<String, DirectoryCapture>,
}

/// Comparison engine over two captured (or loaded) snapshots
pub struct ComparisonEngine<'a> {
    first: SnapshotSide<'a>,
    second: SnapshotSide<'a>,
}

impl<'a> ComparisonEngine<'a> {
    pub fn new(first: SnapshotSide<'a>, second: SnapshotSide<'a>) -> Self {
        Self { first, second }
    }

    /// Compare every alias of both snapshots, one alias per rayon task
    pub fn compare(&self) -> ComparisonReport {
        let aliases: Vec<&str> = self
            .first
            .directories
            .keys()
            .chain(self.second.directories.keys())
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let per_alias: Vec<Vec<Discrepancy>> = aliases
            .par_iter()
            .map(|alias| {
                match (self.first.directories.get(*alias), self.second.directories.get(*alias)) {
                    (Some(first), Some(second)) => self.compare_directories(alias, first, second),
                    (Some(first), None) => self.alias_in_one(alias, first, Side::First),
                    (None, Some(second)) => self.alias_in_one(alias, second, Side::Second),
                    (None, None) => Vec::new(),
                }
            })
            .collect();

        let mut report = ComparisonReport::new(self.first.name, self.second.name);
        report.extend(per_alias.into_iter().flatten());
        report.sort();
        debug!(
            "Compared [{}] and [{}]: {} difference(s)",
            self.first.name,
            self.second.name,
            report.len()
        );
        report
    }

    fn side(&self, side: Side) -> SnapshotSide<'a> {
        match side {
            Side::First => self.first,
            Side::Second => self.second,
        }
    }

    /// An alias registered in one snapshot only: its root and every entry the owner does not skip
    fn alias_in_one(&self, alias: &str, owner: &DirectoryCapture, side: Side) -> Vec<Discrepancy> {
        let name = self.side(side).name;
        debug!("Alias {} is present in [{}] only", alias, name);

        let mut out = vec![Discrepancy::present_in_one(
            DifferenceKind::DirectoryOnlyInOne,
            alias,
            "",
            side,
            name,
            owner.absolute_path("", true),
        )];
        for (relative_path, entry) in &owner.entries {
            if owner.rules.is_entity_skipped(relative_path, entry.is_dir()) {
                continue;
            }
            out.push(Discrepancy::present_in_one(
                kind_of(entry),
                alias,
                relative_path,
                side,
                name,
                owner.absolute_path(relative_path, entry.is_dir()),
            ));
        }
        out
    }

    fn compare_directories(
        &self,
        alias: &str,
        first: &DirectoryCapture,
        second: &DirectoryCapture,
    ) -> Vec<Discrepancy> {
        let skipped = |relative_path: &str, is_dir: bool| {
            first.rules.is_entity_skipped(relative_path, is_dir)
                || second.rules.is_entity_skipped(relative_path, is_dir)
        };

        let mut out = Vec::new();
        self.present_in_one(alias, first, second, Side::First, &skipped, &mut out);
        self.present_in_one(alias, second, first, Side::Second, &skipped, &mut out);

        for (relative_path, entry) in &first.entries {
            let (Entry::File(a), Some(Entry::File(b))) = (entry, second.entries.get(relative_path)) else {
                continue;
            };
            let checked = first.rules.file_rule(relative_path).has_check()
                || second.rules.file_rule(relative_path).has_check();
            if skipped(relative_path.as_str(), false) && !checked {
                continue;
            }
            if let Some(discrepancy) = self.compare_files(alias, relative_path, (first, a), (second, b)) {
                out.push(discrepancy);
            }
        }
        out
    }

    /// Entries of `owner` with no same-typed counterpart in `other`.
    /// A directory is reported once; its subtree is not expanded.
    fn present_in_one(
        &self,
        alias: &str,
        owner: &DirectoryCapture,
        other: &DirectoryCapture,
        side: Side,
        skipped: &dyn Fn(&str, bool) -> bool,
        out: &mut Vec<Discrepancy>,
    ) {
        let name = self.side(side).name;
        let mut reported_dirs: HashSet<&str> = HashSet::new();

        for (relative_path, entry) in &owner.entries {
            let is_dir = entry.is_dir();
            let counterpart = other.entries.get(relative_path).map(Entry::is_dir);
            if counterpart == Some(is_dir) || skipped(relative_path.as_str(), is_dir) {
                continue;
            }
            if ancestors(relative_path).any(|dir| reported_dirs.contains(dir)) {
                continue;
            }
            if is_dir {
                reported_dirs.insert(relative_path.as_str());
            }

            debug!("{} is present in [{}] only", relative_path, name);
            out.push(Discrepancy::present_in_one(
                kind_of(entry),
                alias,
                relative_path,
                side,
                name,
                owner.absolute_path(relative_path, is_dir),
            ));
        }
    }

    fn compare_files(
        &self,
        alias: &str,
        relative_path: &str,
        (first_dir, first): (&DirectoryCapture, &FileEntry),
        (second_dir, second): (&DirectoryCapture, &FileEntry),
    ) -> Option<Discrepancy> {
        let mut first_differences = BTreeMap::new();
        let mut second_differences = BTreeMap::new();

        let first_rule = first_dir.rules.file_rule(relative_path);
        let second_rule = second_dir.rules.file_rule(relative_path);
        let same_content_kind = match (&first.content, &second.content) {
            (Some(a), Some(b)) => a.content_type() == b.content_type(),
            _ => false,
        };

        for attribute in FileAttribute::ALL {
            let actions = [
                first_rule.effective_action(attribute),
                second_rule.effective_action(attribute),
            ];
            if !actions.contains(&Some(RuleAction::Check)) {
                if actions.contains(&Some(RuleAction::Skip)) {
                    continue;
                }
                // the inspector reports content changes for these files
                if same_content_kind && matches!(attribute, FileAttribute::Size | FileAttribute::Md5) {
                    continue;
                }
            }

            let (a, b) = (first.attribute(attribute), second.attribute(attribute));
            if a != b {
                let key = attribute.description().to_string();
                first_differences.insert(key.clone(), a.unwrap_or_else(|| NOT_RECORDED.to_string()));
                second_differences.insert(key, b.unwrap_or_else(|| NOT_RECORDED.to_string()));
            }
        }

        if let (Some(a), Some(b)) = (&first.content, &second.content) {
            let rules: Vec<&ContentRules> = [
                first_dir.rules.content_rules(relative_path),
                second_dir.rules.content_rules(relative_path),
            ]
            .into_iter()
            .flatten()
            .collect();

            for difference in inspectors::diff(a, b, &rules).unwrap_or_default() {
                let key = unique_key(&first_differences, difference.description);
                first_differences.insert(key.clone(), difference.first);
                second_differences.insert(key, difference.second);
            }
        }

        if first_differences.is_empty() {
            return None;
        }

        debug!("{} differs in {} value(s)", relative_path, first_differences.len());
        Some(Discrepancy::different(
            alias,
            relative_path,
            (self.first.name, first_dir.absolute_path(relative_path, false)),
            (self.second.name, second_dir.absolute_path(relative_path, false)),
            first_differences,
            second_differences,
        ))
    }
}

fn kind_of(entry: &Entry) -> DifferenceKind {
    if entry.is_dir() {
        DifferenceKind::DirectoryOnlyInOne
    } else {
        DifferenceKind::FileOnlyInOne
    }
}

/// Repeated descriptions (e.g. identical XML siblings) get a counter suffix
fn unique_key(existing: &BTreeMap<String, String>, description: String) -> String {
    if !existing.contains_key(&description) {
        return description;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{} ({})", description, n);
        if !existing.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
