use crate::{AppConfig, SnapshotError};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "fssnap.toml";

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    pub exists: bool,
    pub portable: bool,
}

pub fn load_config(prefer_portable: bool) -> Result<LoadedConfig, SnapshotError> {
    let (path, portable) = resolve_config_path(prefer_portable)?;
    let exists = path.exists();

    let mut config = if exists {
        read_config(&path)?
    } else {
        AppConfig::default()
    };

    config.portable_mode = portable;

    Ok(LoadedConfig {
        config,
        path,
        exists,
        portable,
    })
}

pub fn ensure_config(prefer_portable: bool) -> Result<LoadedConfig, SnapshotError> {
    let loaded = load_config(prefer_portable)?;
    if !loaded.exists {
        save_config(&loaded.path, &loaded.config)?;
    }
    Ok(loaded)
}

pub fn read_config(path: &Path) -> Result<AppConfig, SnapshotError> {
    let data = fs::read_to_string(path)?;
    toml::from_str(&data).map_err(|e| {
        SnapshotError::Serialization(format!("Bad config file {}: {}", path.display(), e))
    })
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, render_config(config)?)?;
    Ok(())
}

/// The TOML text `save_config` would write
pub fn render_config(config: &AppConfig) -> Result<String, SnapshotError> {
    toml::to_string_pretty(config).map_err(|e| SnapshotError::Serialization(e.to_string()))
}

fn resolve_config_path(prefer_portable: bool) -> Result<(PathBuf, bool), SnapshotError> {
    if let Some(portable_path) = portable_config_path() {
        if prefer_portable || portable_path.exists() {
            return Ok((portable_path, true));
        }
    }

    let dirs = ProjectDirs::from("", "fssnap", "fssnap")
        .ok_or_else(|| SnapshotError::Config("Unable to determine config directory".to_string()))?;
    Ok((dirs.config_dir().join(CONFIG_FILE_NAME), false))
}

fn portable_config_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_read_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = AppConfig::default();
        config.snapshot.check_modification_time = false;
        config.snapshot.text_extensions.push(".log".to_string());
        save_config(&path, &config).unwrap();

        let loaded = read_config(&path).unwrap();
        assert!(!loaded.snapshot.check_modification_time);
        assert!(render_config(&loaded).unwrap().contains("check_modification_time = false"));
        assert_eq!(loaded.snapshot.text_extensions, vec![".txt", ".log"]);
    }

    #[test]
    fn test_bad_config_is_serialization_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[snapshot]\ncheck_size = \"maybe\"\n").unwrap();

        match read_config(&path) {
            Err(SnapshotError::Serialization(msg)) => assert!(msg.contains("Bad config file")),
            other => panic!("expected serialization error, got {:?}", other),
        }
    }
}
