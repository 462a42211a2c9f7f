use fssnap_common::{MatchType, SnapshotError};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Text predicate shared by every content skip rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MatcherRepr", into = "MatcherRepr")]
pub struct TextMatcher {
    text: String,
    match_type: MatchType,
    lowered: String,
    regex: Option<Regex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MatcherRepr {
    text: String,
    match_type: MatchType,
}

impl TextMatcher {
    /// Build a matcher. Empty text is rejected, and so is a regex that does not compile.
    pub fn new(text: &str, match_type: MatchType) -> Result<Self, SnapshotError> {
        if text.trim().is_empty() {
            return Err(SnapshotError::Config(format!(
                "Invalid text to match '{}': it must not be empty",
                text
            )));
        }

        let regex = match match_type {
            MatchType::Regex => Some(compile_full_match(text)?),
            MatchType::Equals | MatchType::Contains => None,
        };

        Ok(Self {
            text: text.to_string(),
            match_type,
            lowered: text.trim().to_lowercase(),
            regex,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    pub fn matches(&self, value: &str) -> bool {
        match self.match_type {
            MatchType::Equals => value.trim().to_lowercase() == self.lowered,
            MatchType::Contains => value.to_lowercase().contains(&self.lowered),
            MatchType::Regex => self.regex.as_ref().map_or(false, |re| re.is_match(value)),
        }
    }
}

impl PartialEq for TextMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text && self.match_type == other.match_type
    }
}

impl TryFrom<MatcherRepr> for TextMatcher {
    type Error = SnapshotError;

    fn try_from(repr: MatcherRepr) -> Result<Self, Self::Error> {
        TextMatcher::new(&repr.text, repr.match_type)
    }
}

impl From<TextMatcher> for MatcherRepr {
    fn from(matcher: TextMatcher) -> Self {
        MatcherRepr {
            text: matcher.text,
            match_type: matcher.match_type,
        }
    }
}

/// Compile a regex that must match the whole input
pub fn compile_full_match(pattern: &str) -> Result<Regex, SnapshotError> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| invalid_regex(pattern, e))
}

/// Compile a regex that may match anywhere in the input
pub fn compile_search(pattern: &str) -> Result<Regex, SnapshotError> {
    Regex::new(pattern).map_err(|e| invalid_regex(pattern, e))
}

fn invalid_regex(pattern: &str, err: regex::Error) -> SnapshotError {
    SnapshotError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    }
}
