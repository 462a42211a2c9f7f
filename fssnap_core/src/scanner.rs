use crate::inspectors::Inspector;
use crate::rules::{ancestors, DirectoryRules};
use chrono::{DateTime, Utc};
use fssnap_common::{Entry, FileAttribute, FileEntry, SnapshotConfig, SnapshotError};
use jwalk::WalkDir;
use md5::{Digest, Md5};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, Metadata};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A file found by the walk, waiting for attribute computation
struct PendingFile {
    relative_path: String,
    path: PathBuf,
    hidden: bool,
}

/// Parallel folder scanner using jwalk for the walk and rayon for per-file work
pub struct FolderScanner {
    config: SnapshotConfig,
}

impl FolderScanner {
    pub fn new(config: SnapshotConfig) -> Self {
        Self { config }
    }

    /// Capture every entry under `root`. Rules are only consulted to learn which
    /// attributes a `check_file` rule forces on; rules never skip anything here.
    pub fn scan(
        &self,
        root: &Path,
        rules: &DirectoryRules,
    ) -> Result<BTreeMap<String, Entry>, SnapshotError> {
        if !root.is_dir() {
            return Err(SnapshotError::DirectoryNotFound(root.to_path_buf()));
        }

        let mut entries = BTreeMap::new();
        let mut pending = Vec::new();
        let mut hidden_dirs: HashSet<String> = HashSet::new();

        let mut walker = WalkDir::new(root)
            .follow_links(self.config.follow_symlinks)
            .skip_hidden(false)
            .sort(true);
        if !self.config.support_hidden {
            // Pruned here, hidden directories are never read
            walker = walker.process_read_dir(|_depth, _path, _state, children| {
                children.retain(|child| match child {
                    Ok(entry) => {
                        let hidden = is_hidden(&entry.file_name().to_string_lossy(), &entry.path());
                        if hidden {
                            debug!("Skipping hidden entry {}", entry.path().display());
                        }
                        !hidden
                    }
                    Err(_) => true,
                });
            });
        }

        for entry in walker {
            let entry = entry.map_err(|e| {
                SnapshotError::Io(io::Error::new(io::ErrorKind::Other, format!("Walk error: {}", e)))
            })?;

            let path = entry.path();
            let relative_path = match path.strip_prefix(root) {
                Ok(relative) => to_forward_slashes(relative),
                Err(e) => {
                    return Err(SnapshotError::Config(format!(
                        "Path {} escapes root {}: {}",
                        path.display(),
                        root.display(),
                        e
                    )))
                }
            };

            // Skip the synthetic root entry (empty path)
            if relative_path.is_empty() {
                continue;
            }

            let inside_hidden = ancestors(&relative_path).any(|dir| hidden_dirs.contains(dir));
            let file_type = entry.file_type();
            let hidden = inside_hidden || is_hidden(&entry.file_name().to_string_lossy(), &path);
            if hidden && file_type.is_dir() {
                hidden_dirs.insert(relative_path.clone());
            }

            if file_type.is_dir() {
                entries.insert(relative_path, Entry::Directory { hidden });
            } else if file_type.is_file() || (self.config.follow_symlinks && path.is_file()) {
                pending.push(PendingFile {
                    relative_path,
                    path,
                    hidden,
                });
            } else {
                debug!("Skipping special file {}", relative_path);
            }
        }

        let files = pending
            .par_iter()
            .map(|file| self.inspect_file(file, rules).map(|entry| (file.relative_path.clone(), entry)))
            .collect::<Result<Vec<_>, SnapshotError>>()?;

        for (relative_path, file) in files {
            entries.insert(relative_path, Entry::File(file));
        }

        debug!("Captured {} entries from {:?}", entries.len(), root);
        Ok(entries)
    }

    fn inspect_file(&self, file: &PendingFile, rules: &DirectoryRules) -> Result<FileEntry, SnapshotError> {
        let forced = rules.forced_attributes(&file.relative_path);
        let wanted = |attribute: FileAttribute| self.config.is_enabled(attribute) || forced.contains(&attribute);

        let metadata = fs::metadata(&file.path)?;
        let mut entry = FileEntry {
            hidden: file.hidden,
            ..FileEntry::default()
        };

        if wanted(FileAttribute::Size) {
            entry.size = Some(metadata.len());
        }
        if wanted(FileAttribute::ModificationTime) {
            let modified: DateTime<Utc> = metadata.modified()?.into();
            entry.modified = Some(modified.timestamp_millis());
        }
        if wanted(FileAttribute::Permissions) {
            entry.permissions = Some(permissions_of(&metadata));
        }
        if wanted(FileAttribute::Md5) {
            entry.md5 = Some(md5_file(&file.path)?);
        }

        let name = file.relative_path.rsplit('/').next().unwrap_or(&file.relative_path);
        if let Some(inspector) = Inspector::for_type(self.config.content_type_for(name)) {
            let bytes = fs::read(&file.path)?;
            match inspector.parse(&bytes, &self.config) {
                Ok(content) => entry.content = Some(content),
                Err(e) => warn!(
                    "Unable to parse {} as {:?}, its content will not be compared: {}",
                    file.path.display(),
                    inspector,
                    e
                ),
            }
        }

        Ok(entry)
    }
}

/// Lowercase hex MD5 of a file, streamed in 64KB chunks
pub fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(unix)]
fn permissions_of(metadata: &Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:03o}", metadata.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn permissions_of(metadata: &Metadata) -> String {
    if metadata.permissions().readonly() {
        "read-only".to_string()
    } else {
        "read-write".to_string()
    }
}

fn is_hidden(name: &str, path: &Path) -> bool {
    name.starts_with('.') || has_hidden_attribute(path)
}

#[cfg(windows)]
fn has_hidden_attribute(path: &Path) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    fs::symlink_metadata(path)
        .map(|m| m.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0)
        .unwrap_or(false)
}

#[cfg(not(windows))]
fn has_hidden_attribute(_path: &Path) -> bool {
    false
}

fn to_forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
