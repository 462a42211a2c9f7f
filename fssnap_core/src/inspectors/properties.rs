use super::{same_value, ContentDifference, ABSENT, PRESENT};
use crate::rules::{PropertyRule, PropertyTarget};
use std::collections::{BTreeMap, BTreeSet};

/// Properties files are UTF-8 in practice, but fall back to ISO-8859-1
pub fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Parse `.properties` text. Later keys replace earlier ones.
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();

    for line in logical_lines(text) {
        let (key, value) = split_key_value(&line);
        properties.insert(unescape(&key), unescape(&value));
    }

    properties
}

/// Join continuation lines and drop comments and blanks
fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Option<String> = None;

    for raw in text.lines() {
        let trimmed = raw.trim_start();
        let line = match current.take() {
            Some(mut pending) => {
                pending.push_str(trimmed);
                pending
            }
            None => {
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                    continue;
                }
                trimmed.to_string()
            }
        };

        let trailing = line.chars().rev().take_while(|&c| c == '\\').count();
        if trailing % 2 == 1 {
            let mut pending = line;
            pending.pop();
            current = Some(pending);
        } else {
            lines.push(line);
        }
    }

    if let Some(pending) = current {
        lines.push(pending);
    }
    lines
}

fn split_key_value(line: &str) -> (String, String) {
    let chars: Vec<char> = line.chars().collect();
    let mut key_end = chars.len();
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
        } else if c == '=' || c == ':' || c.is_whitespace() {
            key_end = i;
            break;
        }
    }

    let key: String = chars[..key_end].iter().collect();
    let mut rest = chars[key_end..].iter().peekable();
    while rest.peek().map_or(false, |c| c.is_whitespace()) {
        rest.next();
    }
    if rest.peek().map_or(false, |&&c| c == '=' || c == ':') {
        rest.next();
    }
    while rest.peek().map_or(false, |c| c.is_whitespace()) {
        rest.next();
    }

    (key, rest.collect())
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{000C}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }

    out
}

fn is_skipped(key: &str, value: &str, rules: &[&PropertyRule]) -> bool {
    rules.iter().any(|rule| match rule.target {
        PropertyTarget::Key => rule.matcher.matches(key),
        PropertyTarget::Value => rule.matcher.matches(value),
    })
}

fn visible<'a>(
    properties: &'a BTreeMap<String, String>,
    rules: &[&PropertyRule],
) -> BTreeMap<&'a str, &'a str> {
    properties
        .iter()
        .filter(|(k, v)| !is_skipped(k, v, rules))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

pub(super) fn diff(
    first: &BTreeMap<String, String>,
    second: &BTreeMap<String, String>,
    rules: &[&PropertyRule],
) -> Vec<ContentDifference> {
    let first = visible(first, rules);
    let second = visible(second, rules);
    let keys: BTreeSet<&str> = first.keys().chain(second.keys()).copied().collect();

    let mut differences = Vec::new();
    for key in keys {
        match (first.get(key), second.get(key)) {
            (Some(_), None) => differences.push(ContentDifference::new(
                format!("Presence of {}", key),
                PRESENT,
                ABSENT,
            )),
            (None, Some(_)) => differences.push(ContentDifference::new(
                format!("Presence of {}", key),
                ABSENT,
                PRESENT,
            )),
            (Some(a), Some(b)) if !same_value(a, b) => {
                differences.push(ContentDifference::new(
                    format!("property key '{}'", key),
                    format!("'{}'", a),
                    format!("'{}'", b),
                ))
            }
            _ => {}
        }
    }
    differences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::TextMatcher;
    use fssnap_common::MatchType;

    const SAMPLE: &str = "# comment\n\
        ! another comment\n\
        actionlibrary.packageloader.defaultbox = messagesbox\n\
        actionlibrary.filetransfer.connection.attempts:5\n\
        path.with.spaces   C:\\\\Program Files\n\
        multi.line = first, \\\n    second\n\
        unicode=caf\\u00e9\n";

    #[test]
    fn test_parse_java_properties_syntax() {
        let props = parse_properties(SAMPLE);
        assert_eq!(props.len(), 5);
        assert_eq!(props["actionlibrary.packageloader.defaultbox"], "messagesbox");
        assert_eq!(props["actionlibrary.filetransfer.connection.attempts"], "5");
        assert_eq!(props["path.with.spaces"], "C:\\Program Files");
        assert_eq!(props["multi.line"], "first, second");
        assert_eq!(props["unicode"], "café");
    }

    #[test]
    fn test_presence_and_value_differences() {
        let first = parse_properties("a=1\nb=messagesboxessss\n");
        let second = parse_properties("b=messagesbox\nc=3\n");

        let diffs = diff(&first, &second, &[]);
        assert_eq!(
            diffs,
            vec![
                ContentDifference::new("Presence of a".to_string(), "YES", "NO"),
                ContentDifference::new("property key 'b'".to_string(), "'messagesboxessss'", "'messagesbox'"),
                ContentDifference::new("Presence of c".to_string(), "NO", "YES"),
            ]
        );
    }

    #[test]
    fn test_values_compare_trimmed_and_case_insensitive() {
        let first = parse_properties("key=Value \n");
        let second = parse_properties("key=value\n");
        assert!(diff(&first, &second, &[]).is_empty());
    }

    #[test]
    fn test_rules_apply_to_both_sides() {
        let first = parse_properties("interval=1000\ninterval.tmp=5\n");
        let second = parse_properties("interval=2000\n");

        let by_key = PropertyRule {
            target: PropertyTarget::Key,
            matcher: TextMatcher::new("interval", MatchType::Contains).unwrap(),
        };
        assert!(diff(&first, &second, &[&by_key]).is_empty());

        let by_value = PropertyRule {
            target: PropertyTarget::Value,
            matcher: TextMatcher::new("[0-9]+000", MatchType::Regex).unwrap(),
        };
        let diffs = diff(&first, &second, &[&by_value]);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].description, "Presence of interval.tmp");
    }

    #[test]
    fn test_latin1_fallback() {
        let text = decode(&[b'k', b'=', 0xE9]);
        assert_eq!(parse_properties(&text)["k"], "é");
    }
}
