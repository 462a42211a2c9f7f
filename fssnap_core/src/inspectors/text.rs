use super::{ContentDifference, ABSENT, PRESENT};
use crate::matcher::TextMatcher;
use similar::{capture_diff_slices, Algorithm, DiffTag};

pub fn parse_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

/// Lines surviving the skip rules, with their 1-based line numbers
fn visible<'a>(lines: &'a [String], rules: &[&TextMatcher]) -> (Vec<usize>, Vec<&'a str>) {
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| !rules.iter().any(|rule| rule.matches(line)))
        .map(|(i, line)| (i + 1, line.as_str()))
        .unzip()
}

pub(super) fn diff(first: &[String], second: &[String], rules: &[&TextMatcher]) -> Vec<ContentDifference> {
    let (first_numbers, first_lines) = visible(first, rules);
    let (second_numbers, second_lines) = visible(second, rules);

    let mut differences = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, &first_lines, &second_lines) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            continue;
        }

        for i in old_range {
            differences.push(ContentDifference::new(
                format!("Line {}: '{}'", first_numbers[i], first_lines[i]),
                PRESENT,
                ABSENT,
            ));
        }
        for i in new_range {
            differences.push(ContentDifference::new(
                format!("Line {}: '{}'", second_numbers[i], second_lines[i]),
                ABSENT,
                PRESENT,
            ));
        }
    }
    differences
}

#[cfg(test)]
mod tests {
    use super::*;
    use fssnap_common::MatchType;

    fn lines(text: &str) -> Vec<String> {
        parse_lines(text)
    }

    #[test]
    fn test_identical_text_has_no_differences() {
        let text = lines("one\r\ntwo\nthree");
        assert_eq!(text, vec!["one", "two", "three"]);
        assert!(diff(&text, &text, &[]).is_empty());
    }

    #[test]
    fn test_order_is_significant() {
        let first = lines("alpha\nbeta\n");
        let second = lines("beta\nalpha\n");
        assert!(!diff(&first, &second, &[]).is_empty());
    }

    #[test]
    fn test_reports_changed_line_on_each_side() {
        let first = lines("header\nname=certPath, type=BLOB\nfooter\n");
        let second = lines("header\nname=id, type=INT\nfooter\n");

        let diffs = diff(&first, &second, &[]);
        assert_eq!(
            diffs,
            vec![
                ContentDifference::new("Line 2: 'name=certPath, type=BLOB'".to_string(), "YES", "NO"),
                ContentDifference::new("Line 2: 'name=id, type=INT'".to_string(), "NO", "YES"),
            ]
        );
    }

    #[test]
    fn test_skip_rules_filter_both_files() {
        let first = lines("header\nname=certPath, type=BLOB\nfooter\n");
        let second = lines("header\nname=id, type=INT\nfooter\n");

        let rule = TextMatcher::new("name=.*", MatchType::Regex).unwrap();
        assert!(diff(&first, &second, &[&rule]).is_empty());

        let unrelated = TextMatcher::new("WRONG.*", MatchType::Regex).unwrap();
        assert_eq!(diff(&first, &second, &[&unrelated]).len(), 2);
    }
}
