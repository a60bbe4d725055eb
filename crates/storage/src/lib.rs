//! On-disk state outside of documents: engine settings and the per-file
//! reading history.

use directories::ProjectDirs;
use doc_model::EngineSettings;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettingsEnvelope {
    version: u32,
    settings: EngineSettings,
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("dev", "SmartDoc", "SmartDoc")
            .ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load_settings(&self) -> Result<EngineSettings, StorageError> {
        let path = self.settings_path();
        if !path.exists() {
            return Ok(EngineSettings::default());
        }

        let bytes = fs::read(path)?;
        let envelope: SettingsEnvelope = serde_json::from_slice(&bytes)?;

        Ok(envelope.settings)
    }

    pub fn save_settings(&self, settings: &EngineSettings) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;

        let envelope =
            SettingsEnvelope { version: SETTINGS_SCHEMA_VERSION, settings: settings.clone() };

        let bytes = serde_json::to_vec_pretty(&envelope)?;
        fs::write(self.settings_path(), bytes)?;
        Ok(())
    }

    pub fn history(&self) -> History {
        History::load(self.root.join("history.json"))
    }

    fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }
}

/// Last viewed page per document path.
///
/// A missing or unreadable file loads as an empty history. Writes are
/// last-write-wins.
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
    pages: BTreeMap<String, u32>,
}

impl History {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let pages = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!("ignoring unreadable history {}: {err}", path.display());
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        Self { path, pages }
    }

    /// 1 when `document` has no entry.
    pub fn last_page(&self, document: &Path) -> u32 {
        self.pages.get(&key(document)).copied().unwrap_or(1)
    }

    pub fn record_page(&mut self, document: &Path, page: u32) -> Result<(), StorageError> {
        self.pages.insert(key(document), page);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&self.pages)?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, u32)> {
        self.pages.iter().map(|(path, page)| (path.as_str(), *page))
    }
}

fn key(document: &Path) -> String {
    document.to_string_lossy().into_owned()
}
