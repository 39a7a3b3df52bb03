use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;
use crate::models::{AuditConfig, StoredAudit, StoredRecording};

/// Read access to persisted audits, configs and authoritative transcripts
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn load_audit(&self, audit_id: &str) -> Result<StoredAudit, StoreError>;

    async fn load_config(&self, config_id: &str) -> Result<AuditConfig, StoreError>;

    /// Recordings of a case, in timeline order
    async fn load_recordings(&self, fiche_id: &str) -> Result<Vec<StoredRecording>, StoreError>;
}

/// Directory-backed store
///
/// Layout: `audits/<id>.json`, `configs/<id>.json`, `recordings/<fiche_id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, dir: &str, id: &str) -> PathBuf {
        self.root.join(dir).join(format!("{}.json", id))
    }

    async fn read<T: DeserializeOwned>(&self, kind: &'static str, dir: &str, id: &str) -> Result<T, StoreError> {
        let path = self.path(dir, id);
        debug!("Loading {} from {:?}", kind, path);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    kind,
                    id: id.to_string(),
                });
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    async fn write<T: Serialize + ?Sized>(&self, dir: &str, id: &str, value: &T) -> Result<(), StoreError> {
        let path = self.path(dir, id);
        debug!("Saving {:?}", path);
        let io_err = |source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tokio::fs::write(&path, json).await.map_err(io_err)
    }

    /// Write an audit so it can be rerun later
    pub async fn save_audit(&self, audit: &StoredAudit) -> Result<(), StoreError> {
        self.write("audits", &audit.id, audit).await
    }

    pub async fn save_config(&self, config: &AuditConfig) -> Result<(), StoreError> {
        self.write("configs", &config.id, config).await
    }

    /// Recordings of a case, in timeline order
    pub async fn save_recordings(&self, fiche_id: &str, recordings: &[StoredRecording]) -> Result<(), StoreError> {
        self.write("recordings", fiche_id, recordings).await
    }
}

#[async_trait]
impl AuditStore for JsonFileStore {
    async fn load_audit(&self, audit_id: &str) -> Result<StoredAudit, StoreError> {
        self.read("audit", "audits", audit_id).await
    }

    async fn load_config(&self, config_id: &str) -> Result<AuditConfig, StoreError> {
        self.read("audit config", "configs", config_id).await
    }

    async fn load_recordings(&self, fiche_id: &str) -> Result<Vec<StoredRecording>, StoreError> {
        self.read("recordings", "recordings", fiche_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_audit_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        let err = store.load_audit("a_404").await.unwrap_err();

        assert!(matches!(err, StoreError::NotFound { kind: "audit", .. }));
    }

    #[tokio::test]
    async fn test_save_and_load_audit() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let audit = StoredAudit {
            id: "a_1".to_string(),
            fiche_id: "f_1".to_string(),
            config_id: "cfg_1".to_string(),
            chunk_size: Some(5),
            steps: vec![],
        };

        store.save_audit(&audit).await.unwrap();
        let loaded = store.load_audit("a_1").await.unwrap();

        assert_eq!(loaded.fiche_id, "f_1");
        assert!(dir.path().join("audits/a_1.json").exists());
    }

    #[tokio::test]
    async fn test_saved_case_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let config = AuditConfig {
            id: "cfg_1".to_string(),
            name: "Vente".to_string(),
            system_prompt: String::new(),
            steps: vec![],
        };
        let recordings = vec![StoredRecording {
            transcript_text: Some("Bonjour madame".to_string()),
            ..Default::default()
        }];

        store.save_config(&config).await.unwrap();
        store.save_recordings("f_1", &recordings).await.unwrap();

        assert_eq!(store.load_config("cfg_1").await.unwrap(), config);
        assert_eq!(store.load_recordings("f_1").await.unwrap(), recordings);
    }

    #[tokio::test]
    async fn test_parse_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("configs")).unwrap();
        std::fs::write(dir.path().join("configs/cfg.json"), "{not json").unwrap();
        let store = JsonFileStore::new(dir.path());

        let err = store.load_config("cfg").await.unwrap_err();

        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_load_recordings_with_flattened_metadata() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("recordings")).unwrap();
        std::fs::write(
            dir.path().join("recordings/f_1.json"),
            r#"[{"call_id": "c1", "recording_date": "2024-03-12", "duration_seconds": 30.0,
                 "transcript_text": "Bonjour madame"}]"#,
        )
        .unwrap();
        let store = JsonFileStore::new(dir.path());

        let recordings = store.load_recordings("f_1").await.unwrap();

        assert_eq!(recordings[0].metadata.call_id, "c1");
        assert_eq!(recordings[0].metadata.duration_seconds, Some(30.0));
        assert!(recordings[0].words.is_none());
    }
}
