//! Versioned JSON persistence under a `.storage/` directory

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("version mismatch for {key}: expected {expected}, found {found}")]
    VersionMismatch {
        key: String,
        expected: u32,
        found: u32,
    },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Data types that know their storage key and schema version
pub trait Storable: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const VERSION: u32;
    const MINOR_VERSION: u32;
}

/// Storage file wrapper with version tracking
///
/// JSON format:
/// ```json
/// {
///   "version": 1,
///   "minor_version": 1,
///   "key": "espdash.config_entries",
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    pub version: u32,
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

/// Storage manager for a `.storage/` directory
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    /// Create a storage manager rooted at `config_dir/.storage`.
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    /// Load a storage file; `None` when the key has never been written.
    pub async fn load<T: Storable>(&self) -> StorageResult<Option<T>> {
        let path = self.file_path(T::KEY);
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path).await?;
        let file: StorageFile<T> = serde_json::from_str(&contents)?;

        if file.version != T::VERSION {
            return Err(StorageError::VersionMismatch {
                key: T::KEY.to_string(),
                expected: T::VERSION,
                found: file.version,
            });
        }

        debug!(key = T::KEY, "loaded storage file");
        Ok(Some(file.data))
    }

    /// Persist data under its key, creating the directory on first write.
    pub async fn save<T: Storable>(&self, data: &T) -> StorageResult<()> {
        if !self.storage_dir.exists() {
            fs::create_dir_all(&self.storage_dir).await?;
        }

        let file = StorageFile {
            version: T::VERSION,
            minor_version: T::MINOR_VERSION,
            key: T::KEY.to_string(),
            data,
        };

        let contents = serde_json::to_string_pretty(&file)?;
        fs::write(self.file_path(T::KEY), contents).await?;
        debug!(key = T::KEY, "saved storage file");
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.file_path(key).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct TestData {
        items: Vec<String>,
    }

    impl Storable for TestData {
        const KEY: &'static str = "espdash.test";
        const VERSION: u32 = 1;
        const MINOR_VERSION: u32 = 1;
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        assert_eq!(storage.load::<TestData>().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());

        let data = TestData {
            items: vec!["a".into(), "b".into()],
        };
        storage.save(&data).await.unwrap();

        let loaded = storage.load::<TestData>().await.unwrap().unwrap();
        assert_eq!(loaded, data);
        assert!(storage.exists("espdash.test").await);
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());

        storage.save(&TestData::default()).await.unwrap();

        // Rewrite the envelope with a newer major version.
        let path = storage.storage_dir().join("espdash.test");
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, contents.replace("\"version\": 1", "\"version\": 2")).unwrap();

        assert!(matches!(
            storage.load::<TestData>().await,
            Err(StorageError::VersionMismatch { found: 2, .. })
        ));
    }
}
