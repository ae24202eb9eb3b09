use crate::entities::player::PlayerId;
use crate::error::StoreError;
use crate::sync::lock;
use crate::world::position::Location;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Per-player persisted state owned by the teleport core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDocument {
    pub player: PlayerId,
    /// Most recent first.
    #[serde(default)]
    pub back_history: Vec<Location>,
}

impl PlayerDocument {
    pub fn empty(player: PlayerId) -> Self {
        Self {
            player,
            back_history: Vec::new(),
        }
    }

    pub fn parse(data: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(data)
    }

    pub fn serialize(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Per-player document read/write.
pub trait PlayerDocumentStore: Send + Sync {
    fn load(&self, player: PlayerId) -> Result<Option<PlayerDocument>, StoreError>;

    fn save(&self, document: &PlayerDocument) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct StoreValidationReport {
    pub player_files: usize,
    pub parsed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub missing_dir: bool,
}

/// YAML files under `<root>/players/<uuid>.yml`.
#[derive(Debug, Clone)]
pub struct YamlDocumentStore {
    root: PathBuf,
}

impl YamlDocumentStore {
    pub fn from_root(root: &Path) -> Self {
        Self {
            root: root.join("players"),
        }
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn validate(&self) -> StoreValidationReport {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return StoreValidationReport {
                    missing_dir: true,
                    ..StoreValidationReport::default()
                };
            }
            Err(err) => {
                return StoreValidationReport {
                    errors: vec![format!(
                        "player dir read failed for {}: {}",
                        self.root.display(),
                        err
                    )],
                    ..StoreValidationReport::default()
                };
            }
        };

        let mut report = StoreValidationReport::default();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(err) => {
                    report.errors.push(format!(
                        "player dir entry failed for {}: {}",
                        self.root.display(),
                        err
                    ));
                    continue;
                }
            };
            let is_document = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| ext.eq_ignore_ascii_case("yml"));
            if !is_document {
                report.skipped += 1;
                continue;
            }
            report.player_files += 1;
            let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(PlayerId::parse)
            else {
                report
                    .errors
                    .push(format!("player file name is not a uuid: {}", path.display()));
                continue;
            };
            match read_document(&path, id) {
                Ok(Some(_)) => report.parsed += 1,
                Ok(None) => report.skipped += 1,
                Err(err) => report.errors.push(err.to_string()),
            }
        }
        report
    }

    fn document_path(&self, player: PlayerId) -> PathBuf {
        self.root.join(format!("{player}.yml"))
    }

    fn backup_path(&self, player: PlayerId) -> PathBuf {
        self.root.join(format!("{player}.yml.bak"))
    }
}

impl PlayerDocumentStore for YamlDocumentStore {
    fn load(&self, player: PlayerId) -> Result<Option<PlayerDocument>, StoreError> {
        let path = self.document_path(player);
        let backup_path = self.backup_path(player);
        match read_document(&path, player) {
            Ok(Some(document)) => Ok(Some(document)),
            Ok(None) => read_document(&backup_path, player),
            Err(err) => match read_document(&backup_path, player) {
                Ok(Some(fallback)) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "player document unreadable, using backup"
                    );
                    Ok(Some(fallback))
                }
                _ => Err(err),
            },
        }
    }

    fn save(&self, document: &PlayerDocument) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;
        let path = self.document_path(document.player);
        let backup_path = self.backup_path(document.player);
        let data = document.serialize().map_err(|source| StoreError::Yaml {
            path: path.clone(),
            source,
        })?;
        if path.exists() {
            fs::copy(&path, &backup_path).map_err(|source| StoreError::Io {
                path: backup_path.clone(),
                source,
            })?;
        }
        fs::write(&path, data).map_err(|source| StoreError::Io { path, source })
    }
}

fn read_document(path: &Path, player: PlayerId) -> Result<Option<PlayerDocument>, StoreError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let document = PlayerDocument::parse(&data).map_err(|source| StoreError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    if document.player != player {
        return Err(StoreError::IdMismatch {
            expected: player.to_string(),
            found: document.player.to_string(),
        });
    }
    Ok(Some(document))
}

/// In-memory store with write-failure injection.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<PlayerId, PlayerDocument>>,
    failing: Mutex<HashSet<PlayerId>>,
    saves: Mutex<usize>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every save for `player` fail until cleared.
    pub fn fail_saves(&self, player: PlayerId, failing: bool) {
        let mut set = lock(&self.failing);
        if failing {
            set.insert(player);
        } else {
            set.remove(&player);
        }
    }

    pub fn document(&self, player: PlayerId) -> Option<PlayerDocument> {
        lock(&self.documents).get(&player).cloned()
    }

    pub fn save_count(&self) -> usize {
        *lock(&self.saves)
    }
}

impl PlayerDocumentStore for MemoryDocumentStore {
    fn load(&self, player: PlayerId) -> Result<Option<PlayerDocument>, StoreError> {
        Ok(self.document(player))
    }

    fn save(&self, document: &PlayerDocument) -> Result<(), StoreError> {
        if lock(&self.failing).contains(&document.player) {
            return Err(StoreError::Io {
                path: PathBuf::from(format!("memory:{}", document.player)),
                source: std::io::Error::new(std::io::ErrorKind::Other, "injected failure"),
            });
        }
        *lock(&self.saves) += 1;
        lock(&self.documents).insert(document.player, document.clone());
        Ok(())
    }
}
