use super::{ContentDifference, ParseError, ABSENT, PRESENT};
use crate::rules::XmlNodeRule;
use fssnap_common::{XmlDocument, XmlNode};
use std::collections::HashSet;

/// Parse XML text into an element arena in document order
pub fn parse_xml(text: &str) -> Result<XmlDocument, ParseError> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    let parsed = roxmltree::Document::parse_with_options(text, options)
        .map_err(|e| ParseError::Xml(e.to_string()))?;
    let mut doc = XmlDocument::default();
    push_element(&mut doc, parsed.root_element(), None);
    Ok(doc)
}

fn push_element(doc: &mut XmlDocument, node: roxmltree::Node, parent: Option<usize>) -> usize {
    let index = doc.nodes.len();

    let text: String = node
        .children()
        .filter(|child| child.is_text())
        .filter_map(|child| child.text())
        .collect::<String>()
        .trim()
        .to_string();

    doc.nodes.push(XmlNode {
        name: node.tag_name().name().to_string(),
        attributes: node
            .attributes()
            .map(|attr| (attr.name().to_string(), attr.value().to_string()))
            .collect(),
        text,
        parent,
        children: Vec::new(),
    });

    for child in node.children().filter(|child| child.is_element()) {
        let child_index = push_element(doc, child, Some(index));
        doc.nodes[index].children.push(child_index);
    }

    index
}

/// Nodes removed by skip rules. Their subtrees are never visited.
fn skipped_nodes(doc: &XmlDocument, rules: &[&XmlNodeRule]) -> HashSet<usize> {
    let mut skipped = HashSet::new();
    for rule in rules {
        for index in rule.xpath.select(doc) {
            let node = doc.node(index);
            let value = match &rule.attribute {
                Some(attribute) => node.attribute(attribute),
                None => Some(node.text.as_str()),
            };
            if value.map_or(false, |v| rule.matcher.matches(v)) {
                skipped.insert(index);
            }
        }
    }
    skipped
}

pub(super) fn diff(
    first: &XmlDocument,
    second: &XmlDocument,
    rules: &[&XmlNodeRule],
) -> Vec<ContentDifference> {
    let first_skipped = skipped_nodes(first, rules);
    let second_skipped = skipped_nodes(second, rules);

    let roots = |doc: &XmlDocument, skipped: &HashSet<usize>| -> Vec<usize> {
        doc.root().into_iter().filter(|i| !skipped.contains(i)).collect()
    };

    let mut matcher = TreeMatcher {
        first,
        second,
        first_skipped: &first_skipped,
        second_skipped: &second_skipped,
        differences: Vec::new(),
    };
    matcher.match_level(roots(first, &first_skipped), roots(second, &second_skipped));
    matcher.differences
}

struct TreeMatcher<'a> {
    first: &'a XmlDocument,
    second: &'a XmlDocument,
    first_skipped: &'a HashSet<usize>,
    second_skipped: &'a HashSet<usize>,
    differences: Vec<ContentDifference>,
}

impl<'a> TreeMatcher<'a> {
    /// Pair sibling nodes by signature and recurse into matched pairs
    fn match_level(&mut self, first_nodes: Vec<usize>, second_nodes: Vec<usize>) {
        let mut unmatched_second: Vec<Option<usize>> = second_nodes.into_iter().map(Some).collect();
        let mut pairs = Vec::new();

        for a in first_nodes {
            let signature = self.first.node(a).signature();
            let found = unmatched_second.iter_mut().find(|slot| {
                slot.map_or(false, |b| self.second.node(b).signature() == signature)
            });
            match found.and_then(Option::take) {
                Some(b) => pairs.push((a, b)),
                None => self.differences.push(ContentDifference::new(
                    format!("Presence of XML node {}", self.first.full_signature(a)),
                    PRESENT,
                    ABSENT,
                )),
            }
        }

        for b in unmatched_second.into_iter().flatten() {
            self.differences.push(ContentDifference::new(
                format!("Presence of XML node {}", self.second.full_signature(b)),
                ABSENT,
                PRESENT,
            ));
        }

        for (a, b) in pairs {
            let first_children = self.visible_children(self.first, self.first_skipped, a);
            let second_children = self.visible_children(self.second, self.second_skipped, b);
            self.match_level(first_children, second_children);
        }
    }

    fn visible_children(&self, doc: &XmlDocument, skipped: &HashSet<usize>, index: usize) -> Vec<usize> {
        doc.node(index)
            .children
            .iter()
            .copied()
            .filter(|i| !skipped.contains(i))
            .collect()
    }
}
