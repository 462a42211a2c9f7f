//! A small XPath subset for selecting nodes in an [`XmlDocument`].
//!
//! Supported: absolute (`/`) and descendant (`//`) location steps, element
//! names or `*`, and the predicates `[@attr='value']`, `[@attr]` and `[n]`.

use fssnap_common::{SnapshotError, XmlDocument};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct XPath {
    expression: String,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    descendant: bool,
    name: Option<String>,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    AttributeEquals(String, String),
    HasAttribute(String),
    Position(usize),
}

impl XPath {
    pub fn parse(expression: &str) -> Result<Self, SnapshotError> {
        let expr = expression.trim();
        if !expr.starts_with('/') {
            return Err(invalid(expression, "it must start with '/'"));
        }

        let chars: Vec<char> = expr.chars().collect();
        let mut pos = 0;
        let mut steps = Vec::new();

        while pos < chars.len() {
            let descendant = if chars[pos] == '/' && chars.get(pos + 1) == Some(&'/') {
                pos += 2;
                true
            } else if chars[pos] == '/' {
                pos += 1;
                false
            } else {
                return Err(invalid(expression, "expected '/'"));
            };

            let start = pos;
            let mut depth = 0usize;
            let mut quote: Option<char> = None;
            while pos < chars.len() {
                let c = chars[pos];
                match quote {
                    Some(q) if c == q => quote = None,
                    Some(_) => {}
                    None => match c {
                        '\'' | '"' => quote = Some(c),
                        '[' => depth += 1,
                        ']' => depth = depth.saturating_sub(1),
                        '/' if depth == 0 => break,
                        _ => {}
                    },
                }
                pos += 1;
            }
            if quote.is_some() || depth != 0 {
                return Err(invalid(expression, "unbalanced quotes or brackets"));
            }

            let text: String = chars[start..pos].iter().collect();
            steps.push(parse_step(expression, &text, descendant)?);
        }

        if steps.is_empty() {
            return Err(invalid(expression, "no location steps"));
        }

        Ok(Self {
            expression: expr.to_string(),
            steps,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Indexes of the selected nodes, in document order
    pub fn select(&self, doc: &XmlDocument) -> Vec<usize> {
        let mut context: Vec<Option<usize>> = vec![None];

        for step in &self.steps {
            let mut next = BTreeSet::new();
            for ctx in &context {
                let parents = if step.descendant {
                    self_and_descendants(doc, *ctx)
                } else {
                    vec![*ctx]
                };

                for parent in parents {
                    let mut candidates: Vec<usize> = children(doc, parent)
                        .into_iter()
                        .filter(|&i| step.name.as_deref().map_or(true, |n| doc.node(i).name == n))
                        .collect();
                    for predicate in &step.predicates {
                        candidates = apply_predicate(doc, predicate, candidates);
                    }
                    next.extend(candidates);
                }
            }
            context = next.into_iter().map(Some).collect();
        }

        context.into_iter().flatten().collect()
    }
}

fn parse_step(expression: &str, text: &str, descendant: bool) -> Result<Step, SnapshotError> {
    let (name_part, mut rest) = match text.find('[') {
        Some(i) => (&text[..i], &text[i..]),
        None => (text, ""),
    };

    let name_part = name_part.trim();
    if name_part.is_empty() || name_part.chars().any(char::is_whitespace) {
        return Err(invalid(expression, "missing or malformed element name"));
    }
    let name = if name_part == "*" {
        None
    } else {
        Some(name_part.to_string())
    };

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(invalid(expression, "unexpected text after predicate"));
        }
        let end = predicate_end(rest).ok_or_else(|| invalid(expression, "unclosed predicate"))?;
        predicates.push(parse_predicate(expression, rest[1..end].trim())?);
        rest = rest[end + 1..].trim_start();
    }

    Ok(Step {
        descendant,
        name,
        predicates,
    })
}

fn predicate_end(text: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices().skip(1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                ']' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

fn parse_predicate(expression: &str, body: &str) -> Result<Predicate, SnapshotError> {
    if let Some(attr) = body.strip_prefix('@') {
        return match attr.split_once('=') {
            Some((key, value)) => {
                let value = value.trim();
                let unquoted = value
                    .strip_prefix('\'')
                    .and_then(|v| v.strip_suffix('\''))
                    .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
                    .ok_or_else(|| invalid(expression, "attribute value must be quoted"))?;
                Ok(Predicate::AttributeEquals(key.trim().to_string(), unquoted.to_string()))
            }
            None if !attr.trim().is_empty() => Ok(Predicate::HasAttribute(attr.trim().to_string())),
            None => Err(invalid(expression, "missing attribute name")),
        };
    }

    match body.parse::<usize>() {
        Ok(position) if position >= 1 => Ok(Predicate::Position(position)),
        _ => Err(invalid(expression, "unsupported predicate")),
    }
}

fn apply_predicate(doc: &XmlDocument, predicate: &Predicate, candidates: Vec<usize>) -> Vec<usize> {
    match predicate {
        Predicate::AttributeEquals(key, value) => candidates
            .into_iter()
            .filter(|&i| doc.node(i).attribute(key) == Some(value.as_str()))
            .collect(),
        Predicate::HasAttribute(key) => candidates
            .into_iter()
            .filter(|&i| doc.node(i).attribute(key).is_some())
            .collect(),
        Predicate::Position(n) => candidates.get(n - 1).copied().into_iter().collect(),
    }
}

fn children(doc: &XmlDocument, parent: Option<usize>) -> Vec<usize> {
    match parent {
        None => doc.root().into_iter().collect(),
        Some(i) => doc.node(i).children.clone(),
    }
}

fn self_and_descendants(doc: &XmlDocument, start: Option<usize>) -> Vec<Option<usize>> {
    let mut out = vec![start];
    let mut stack: Vec<usize> = children(doc, start);
    stack.reverse();
    while let Some(i) = stack.pop() {
        out.push(Some(i));
        stack.extend(doc.node(i).children.iter().rev());
    }
    out
}

fn invalid(expression: &str, reason: &str) -> SnapshotError {
    SnapshotError::Config(format!("Invalid XPath '{}': {}", expression, reason))
}

impl TryFrom<String> for XPath {
    type Error = SnapshotError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        XPath::parse(&value)
    }
}

impl From<XPath> for String {
    fn from(xpath: XPath) -> Self {
        xpath.expression
    }
}

impl PartialEq for XPath {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspectors::xml::parse_xml;

    const DOC: &str = r#"<DATABASE>
        <TABLE name="AccountLocalKey" primaryKey="alias">
            <column_descriptions>
                <column_description>name=alias, type=VARCHAR</column_description>
                <column_description>name=certPath, type=BLOB</column_description>
            </column_descriptions>
        </TABLE>
        <TABLE name="Other">
            <column_descriptions>
                <column_description>name=id, type=INT</column_description>
            </column_descriptions>
        </TABLE>
    </DATABASE>"#;

    fn names(doc: &XmlDocument, selected: &[usize]) -> Vec<String> {
        selected.iter().map(|&i| doc.node(i).signature()).collect()
    }

    #[test]
    fn test_descendant_with_attribute_predicate() {
        let doc = parse_xml(DOC).unwrap();
        let xpath = XPath::parse(
            "//TABLE[@name='AccountLocalKey']/column_descriptions/column_description",
        )
        .unwrap();

        let selected = xpath.select(&doc);
        assert_eq!(
            names(&doc, &selected),
            vec![
                "<column_description>name=alias, type=VARCHAR",
                "<column_description>name=certPath, type=BLOB"
            ]
        );
    }

    #[test]
    fn test_absolute_path_position_and_wildcard() {
        let doc = parse_xml(DOC).unwrap();

        let second_table = XPath::parse("/DATABASE/TABLE[2]").unwrap().select(&doc);
        assert_eq!(names(&doc, &second_table), vec!["<TABLE name=\"Other\">"]);

        let all = XPath::parse("//*[@primaryKey]").unwrap().select(&doc);
        assert_eq!(all.len(), 1);

        let none = XPath::parse("/TABLE").unwrap().select(&doc);
        assert!(none.is_empty(), "the root element is DATABASE");
    }

    #[test]
    fn test_positional_predicate_is_per_parent() {
        let doc = parse_xml(DOC).unwrap();
        let firsts = XPath::parse("//column_descriptions/column_description[1]")
            .unwrap()
            .select(&doc);
        assert_eq!(firsts.len(), 2);
    }

    #[test]
    fn test_rejects_malformed_expressions() {
        for bad in ["TABLE", "//TABLE[@name='x'", "//TABLE[last()]", "//", "/a/[1]"] {
            assert!(
                matches!(XPath::parse(bad), Err(SnapshotError::Config(_))),
                "expected '{}' to be rejected",
                bad
            );
        }
    }
}
