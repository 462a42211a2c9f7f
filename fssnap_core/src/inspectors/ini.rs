use super::{same_value, ContentDifference, ABSENT, PRESENT};
use crate::rules::IniRule;
use fssnap_common::{IniSection, SnapshotConfig};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Section that collects pairs appearing before any section header
pub const DEFAULT_SECTION: &str = "[ATS_DEFAULT_INI_FILE_SECTION]";

pub fn parse_ini(text: &str, config: &SnapshotConfig) -> Vec<IniSection> {
    let mut sections: Vec<IniSection> = Vec::new();
    let mut current: Option<usize> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(config.ini_comment_char) {
            continue;
        }

        if line.starts_with(config.ini_section_start_char) {
            current = Some(section_index(&mut sections, line));
            continue;
        }

        let (key, value) = match line.find(config.ini_delimiter) {
            Some(pos) if pos >= 1 => (
                line[..pos].trim(),
                line[pos + config.ini_delimiter.len_utf8()..].trim(),
            ),
            _ => (line, ""),
        };

        let index = match current {
            Some(index) => index,
            None => {
                warn!("INI pair '{}' appears before any section, using {}", line, DEFAULT_SECTION);
                let index = section_index(&mut sections, DEFAULT_SECTION);
                current = Some(index);
                index
            }
        };
        sections[index]
            .properties
            .insert(key.to_string(), value.to_string());
    }

    sections
}

fn section_index(sections: &mut Vec<IniSection>, name: &str) -> usize {
    if let Some(index) = sections.iter().position(|s| s.name == name) {
        return index;
    }
    sections.push(IniSection {
        name: name.to_string(),
        properties: BTreeMap::new(),
    });
    sections.len() - 1
}

fn visible<'a>(
    sections: &'a [IniSection],
    rules: &[&IniRule],
) -> BTreeMap<&'a str, BTreeMap<&'a str, &'a str>> {
    let mut out = BTreeMap::new();
    for section in sections {
        let name = section.name.as_str();
        let section_skipped = rules.iter().any(|rule| match rule {
            IniRule::Section(matcher) => matcher.matches(name),
            _ => false,
        });
        if section_skipped {
            continue;
        }

        let properties = section
            .properties
            .iter()
            .filter(|(key, value)| {
                !rules.iter().any(|rule| match rule {
                    IniRule::Key { section, matcher } => section == name && matcher.matches(key),
                    IniRule::Value { section, matcher } => section == name && matcher.matches(value),
                    IniRule::Section(_) => false,
                })
            })
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        out.insert(name, properties);
    }
    out
}

pub(super) fn diff(
    first: &[IniSection],
    second: &[IniSection],
    rules: &[&IniRule],
) -> Vec<ContentDifference> {
    let first = visible(first, rules);
    let second = visible(second, rules);
    let names: BTreeSet<&str> = first.keys().chain(second.keys()).copied().collect();

    let mut differences = Vec::new();
    for name in names {
        let (a, b) = match (first.get(name), second.get(name)) {
            (Some(a), Some(b)) => (a, b),
            (Some(_), None) => {
                differences.push(ContentDifference::new(
                    format!("Presence of section {}", name),
                    PRESENT,
                    ABSENT,
                ));
                continue;
            }
            (None, Some(_)) => {
                differences.push(ContentDifference::new(
                    format!("Presence of section {}", name),
                    ABSENT,
                    PRESENT,
                ));
                continue;
            }
            (None, None) => continue,
        };

        let keys: BTreeSet<&str> = a.keys().chain(b.keys()).copied().collect();
        for key in keys {
            match (a.get(key), b.get(key)) {
                (Some(_), None) => differences.push(ContentDifference::new(
                    format!("Section {}, presence of key '{}'", name, key),
                    PRESENT,
                    ABSENT,
                )),
                (None, Some(_)) => differences.push(ContentDifference::new(
                    format!("Section {}, presence of key '{}'", name, key),
                    ABSENT,
                    PRESENT,
                )),
                (Some(va), Some(vb)) if !same_value(va, vb) => differences.push(ContentDifference::new(
                    format!("Section {}, key '{}'", name, key),
                    format!("'{}'", va),
                    format!("'{}'", vb),
                )),
                _ => {}
            }
        }
    }
    differences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::TextMatcher;
    use fssnap_common::MatchType;

    const FIRST: &str = "orphan=1\n\
        [Mail]\n\
        # comment\n\
        MAPI=1\n\
        OLEMessaging=1\n\
        \n\
        [Fonts]\n\
        justakey\n";

    const SECOND: &str = "orphan=1\n\
        [Mail]\n\
        MAPI=2\n\
        [Extensions]\n\
        a=b\n\
        [Fonts]\n\
        justakey\n";

    fn config() -> SnapshotConfig {
        SnapshotConfig::default()
    }

    #[test]
    fn test_parse_sections_and_default_section() {
        let sections = parse_ini(FIRST, &config());
        let names: Vec<&str> = sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![DEFAULT_SECTION, "[Mail]", "[Fonts]"]);
        assert_eq!(sections[1].properties["OLEMessaging"], "1");
        assert_eq!(sections[2].properties["justakey"], "");
    }

    #[test]
    fn test_delimiter_at_start_keeps_whole_line_as_key() {
        let sections = parse_ini("[S]\n=value\n", &config());
        assert_eq!(sections[0].properties["=value"], "");
    }

    #[test]
    fn test_section_key_and_value_differences() {
        let first = parse_ini(FIRST, &config());
        let second = parse_ini(SECOND, &config());

        let descriptions: Vec<String> = diff(&first, &second, &[])
            .into_iter()
            .map(|d| format!("{}={}|{}", d.description, d.first, d.second))
            .collect();
        assert_eq!(
            descriptions,
            vec![
                "Presence of section [Extensions]=NO|YES",
                "Section [Mail], key 'MAPI'='1'|'2'",
                "Section [Mail], presence of key 'OLEMessaging'=YES|NO",
            ]
        );
    }

    #[test]
    fn test_rules_scope_to_section() {
        let first = parse_ini(FIRST, &config());
        let second = parse_ini(SECOND, &config());

        let rules = [
            IniRule::Section(TextMatcher::new("extensions", MatchType::Contains).unwrap()),
            IniRule::Key {
                section: "[Mail]".to_string(),
                matcher: TextMatcher::new("OLEM", MatchType::Contains).unwrap(),
            },
            IniRule::Value {
                section: "[Mail]".to_string(),
                matcher: TextMatcher::new("[12]", MatchType::Regex).unwrap(),
            },
        ];
        let refs: Vec<&IniRule> = rules.iter().collect();
        assert!(diff(&first, &second, &refs).is_empty());

        let wrong_section = IniRule::Key {
            section: "[Fonts]".to_string(),
            matcher: TextMatcher::new("OLEMessaging", MatchType::Equals).unwrap(),
        };
        let diffs = diff(&first, &second, &[&wrong_section]);
        assert!(diffs.iter().any(|d| d.description.contains("OLEMessaging")));
    }

    #[test]
    fn test_values_differing_only_in_case_or_padding_are_equal() {
        let first = parse_ini("[Mail]\nMAPI=Yes\nCMC= 1 \n", &config());
        let second = parse_ini("[Mail]\nMAPI=yes\nCMC=1\n", &config());
        assert!(diff(&first, &second, &[]).is_empty());

        let third = parse_ini("[Mail]\nMAPI=No\nCMC=1\n", &config());
        let diffs = diff(&first, &third, &[]);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].description, "Section [Mail], key 'MAPI'");
    }
}
