pub mod comparison;
pub mod directory;
pub mod inspectors;
pub mod matcher;
pub mod persistence;
pub mod rules;
pub mod scanner;
pub mod snapshot;

pub use comparison::{ComparisonEngine, SnapshotSide};
pub use directory::DirectoryCapture;
pub use inspectors::{ContentDifference, Inspector, ParseError};
pub use matcher::TextMatcher;
pub use rules::{ContentRules, DirectoryRules, FileRule, RuleAction};
pub use scanner::FolderScanner;
pub use snapshot::{IniRules, PropertiesRules, Snapshot, SnapshotState, TextRules, XmlRules};

pub use fssnap_common::{
    CheckOverrides, ComparisonReport, DifferenceKind, Discrepancy, FileAttribute, MatchType,
    SnapshotConfig, SnapshotError,
};
