//! Snapshot documents on disk.
//!
//! A snapshot is stored as pretty-printed JSON:
//! `{ "format": "fssnap", "version": 1, "snapshot": { name, captured_at, config, directories } }`.
//! Every directory carries its root, rules and captured entries (including
//! structured content), so a loaded snapshot compares exactly like the original.

use crate::directory::DirectoryCapture;
use chrono::{DateTime, Utc};
use fssnap_common::{SnapshotConfig, SnapshotError, StructuredContent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const FORMAT: &str = "fssnap";
pub const VERSION: u32 = 1;

#[derive(Serialize)]
struct DocumentRef<'a> {
    format: &'a str,
    version: u32,
    snapshot: SnapshotRef<'a>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    name: &'a str,
    captured_at: Option<DateTime<Utc>>,
    config: &'a SnapshotConfig,
    directories: Vec<&'a DirectoryCapture>,
}

#[derive(Deserialize)]
struct Document {
    format: String,
    version: u32,
    snapshot: StoredSnapshot,
}

/// A snapshot as read back from disk
#[derive(Debug, Deserialize)]
pub struct StoredSnapshot {
    pub name: String,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub config: SnapshotConfig,
    #[serde(default)]
    pub directories: Vec<DirectoryCapture>,
}

impl StoredSnapshot {
    /// Directories keyed by alias; a repeated alias makes the file invalid
    pub fn into_directories(
        self,
        path: &Path,
    ) -> Result<BTreeMap<String, DirectoryCapture>, SnapshotError> {
        let mut directories = BTreeMap::new();
        for directory in self.directories {
            if directories.contains_key(&directory.alias) {
                return Err(bad_file(path, format!("alias '{}' appears twice", directory.alias)));
            }
            directories.insert(directory.alias.clone(), directory);
        }
        Ok(directories)
    }
}

/// Write a snapshot document next to `path`, then rename it into place
pub fn save(
    path: &Path,
    name: &str,
    captured_at: Option<DateTime<Utc>>,
    config: &SnapshotConfig,
    directories: &BTreeMap<String, DirectoryCapture>,
) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let document = DocumentRef {
        format: FORMAT,
        version: VERSION,
        snapshot: SnapshotRef {
            name,
            captured_at,
            config,
            directories: directories.values().collect(),
        },
    };

    let temp_file = temp_sibling(path);
    let written = write_document(&temp_file, &document).and_then(|_| {
        fs::rename(&temp_file, path)?;
        Ok(())
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_file);
        return Err(e);
    }

    info!("Saved snapshot '{}' to {}", name, path.display());
    Ok(())
}

fn write_document<T: Serialize>(temp_file: &Path, document: &T) -> Result<(), SnapshotError> {
    let mut writer = BufWriter::new(File::create(temp_file)?);
    serde_json::to_writer_pretty(&mut writer, document)
        .map_err(|e| SnapshotError::Serialization(e.to_string()))?;
    writer.flush()?;
    Ok(())
}

pub fn load(path: &Path) -> Result<StoredSnapshot, SnapshotError> {
    let reader = BufReader::new(File::open(path)?);
    let document: Document =
        serde_json::from_reader(reader).map_err(|e| bad_file(path, e.to_string()))?;

    if document.format != FORMAT {
        return Err(bad_file(path, format!("unexpected format '{}'", document.format)));
    }
    if document.version > VERSION {
        return Err(bad_file(
            path,
            format!("version {} is newer than supported version {}", document.version, VERSION),
        ));
    }

    check_content(path, &document.snapshot)?;

    info!("Loaded snapshot '{}' from {}", document.snapshot.name, path.display());
    Ok(document.snapshot)
}

/// Reject stored XML trees whose arena indices do not form a tree
fn check_content(path: &Path, snapshot: &StoredSnapshot) -> Result<(), SnapshotError> {
    for directory in &snapshot.directories {
        for (relative_path, entry) in &directory.entries {
            let Some(StructuredContent::Xml(doc)) = entry.as_file().and_then(|f| f.content.as_ref())
            else {
                continue;
            };
            doc.check_arena().map_err(|reason| {
                bad_file(path, format!("[{}] {}: {}", directory.alias, relative_path, reason))
            })?;
        }
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn bad_file(path: &Path, reason: String) -> SnapshotError {
    SnapshotError::Serialization(format!("Bad snapshot file {}: {}", path.display(), reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fssnap_common::{Entry, FileEntry, XmlDocument, XmlNode};
    use tempfile::TempDir;

    fn sample_directories() -> BTreeMap<String, DirectoryCapture> {
        let mut capture = DirectoryCapture::new("F1", Path::new("/data/dir1"));
        capture.rules.skip_file("file2.xml", &[]);
        capture.entries.insert(
            "file1.xml".to_string(),
            Entry::File(FileEntry {
                size: Some(12),
                md5: Some("abc".to_string()),
                ..FileEntry::default()
            }),
        );
        BTreeMap::from([("F1".to_string(), capture)])
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("snap1.json");
        let directories = sample_directories();

        save(&path, "snap1", Some(Utc::now()), &SnapshotConfig::default(), &directories).unwrap();
        assert!(path.exists());
        assert!(!temp_sibling(&path).exists());

        let stored = load(&path).unwrap();
        assert_eq!(stored.name, "snap1");
        assert!(stored.captured_at.is_some());

        let restored = stored.into_directories(&path).unwrap();
        let capture = &restored["F1"];
        assert_eq!(capture.root, PathBuf::from("/data/dir1"));
        assert_eq!(capture.entries, directories["F1"].entries);
        assert!(capture.rules.is_entity_skipped("file2.xml", false));
    }

    #[test]
    fn test_rejects_foreign_documents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("other.json");
        fs::write(&path, r#"{"format":"other","version":1,"snapshot":{"name":"x"}}"#).unwrap();

        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("unexpected format 'other'"));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(load(&path), Err(SnapshotError::Serialization(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(load(&temp.path().join("absent.json")), Err(SnapshotError::Io(_))));
    }

    fn xml_node(name: &str, parent: Option<usize>, children: Vec<usize>) -> XmlNode {
        XmlNode {
            name: name.to_string(),
            attributes: Vec::new(),
            text: String::new(),
            parent,
            children,
        }
    }

    #[test]
    fn test_rejects_broken_xml_arena() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("snap1.json");
        let mut directories = sample_directories();
        let capture = directories.get_mut("F1").unwrap();

        let valid = XmlDocument {
            nodes: vec![xml_node("root", None, vec![1]), xml_node("a", Some(0), vec![])],
        };
        capture.entries.insert(
            "good.xml".to_string(),
            Entry::File(FileEntry {
                content: Some(StructuredContent::Xml(valid)),
                ..FileEntry::default()
            }),
        );
        save(&path, "snap1", None, &SnapshotConfig::default(), &directories).unwrap();
        assert!(load(&path).is_ok());

        let broken = XmlDocument {
            nodes: vec![xml_node("root", None, vec![1, 7]), xml_node("a", Some(0), vec![])],
        };
        directories.get_mut("F1").unwrap().entries.insert(
            "bad.xml".to_string(),
            Entry::File(FileEntry {
                content: Some(StructuredContent::Xml(broken)),
                ..FileEntry::default()
            }),
        );
        save(&path, "snap1", None, &SnapshotConfig::default(), &directories).unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, SnapshotError::Serialization(_)));
        let message = err.to_string();
        assert!(message.contains("Bad snapshot file"));
        assert!(message.contains("bad.xml: XML node 0 has invalid child 7"));
    }

    #[test]
    fn test_rejects_cyclic_xml_parent() {
        let cyclic = XmlDocument {
            nodes: vec![xml_node("root", Some(1), vec![1]), xml_node("a", Some(0), vec![])],
        };
        assert_eq!(cyclic.check_arena().unwrap_err(), "XML node 0 has invalid parent 1");
    }

    #[test]
    fn test_failed_save_removes_temp_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("snap1.json");
        // A non-empty directory in the way makes the final rename fail
        fs::create_dir_all(path.join("occupied")).unwrap();

        let result = save(&path, "snap1", None, &SnapshotConfig::default(), &sample_directories());
        assert!(result.is_err());
        assert!(!temp_sibling(&path).exists());
        assert!(path.is_dir());
    }
}
