//! Filesystem backends for the durable tier and for blobs.
//!
//! Writes go to a temporary sibling file and are renamed into place, so a
//! crash mid-write leaves either the old record or the new one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::blob::{validate_blob_key, BlobStore};
use crate::error::StoreError;
use crate::kv::KeyValueStore;

/// Reference scheme used by [`FsBlobStore`].
pub const FILE_SCHEME: &str = "file://";

/// Suffix of every record file written by [`FsKvStore`].
const RECORD_SUFFIX: &str = ".json";

/// Temporary suffix used during atomic writes.
const TMP_SUFFIX: &str = ".tmp";

async fn write_atomic(path: &Path, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(key, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::io(key, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(key, e))
}

async fn remove_if_exists(path: &Path, key: &str) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(key, e)),
    }
}

// ---------------------------------------------------------------------------
// Key encoding
// ---------------------------------------------------------------------------

/// Encode a key as a single safe filename component.
///
/// Only `%`, `/`, `\` and `:` are escaped; everything else is kept so the
/// data directory stays readable.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            ':' => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    out
}

fn decode_key(name: &str) -> String {
    name.replace("%3A", ":")
        .replace("%5C", "\\")
        .replace("%2F", "/")
        .replace("%25", "%")
}

// ---------------------------------------------------------------------------
// FsKvStore
// ---------------------------------------------------------------------------

/// One JSON file per key inside a single directory.
#[derive(Debug, Clone)]
pub struct FsKvStore {
    root: PathBuf,
}

impl FsKvStore {
    /// Open (and create if missing) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io(root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{RECORD_SUFFIX}", encode_key(key)))
    }
}

#[async_trait]
impl KeyValueStore for FsKvStore {
    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        write_atomic(&self.path_for(key), key, value.as_bytes()).await
    }

    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Ok(Some(text)),
                // Non-UTF-8 content is surfaced as a corrupt JSON record.
                Err(e) => Err(StoreError::Corrupt {
                    key: key.to_string(),
                    source: serde::de::Error::custom(e),
                }),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.path_for(key), key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let root_key = self.root.display().to_string();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io(&root_key, e))?;
        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&root_key, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(encoded) = name.strip_suffix(RECORD_SUFFIX) else {
                continue;
            };
            let key = decode_key(encoded);
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// FsBlobStore
// ---------------------------------------------------------------------------

/// Blobs stored as files, keys mapping to relative paths under `root`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (and create if missing) a blob directory.
    ///
    /// The root is canonicalized so that returned `file://` references are
    /// absolute.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let display = root.display().to_string();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io(&display, e))?;
        let root = fs::canonicalize(&root)
            .await
            .map_err(|e| StoreError::io(&display, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_blob_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }

    fn ref_for(&self, path: &Path) -> String {
        format!("{FILE_SCHEME}{}", path.display())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _mime_type: &str) -> Result<String, StoreError> {
        let path = self.path_for(key)?;
        write_atomic(&path, key, &bytes).await?;
        Ok(self.ref_for(&path))
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, StoreError> {
        let key = self
            .key_for_ref(blob_ref)
            .ok_or_else(|| StoreError::InvalidKey(blob_ref.to_string()))?;
        let path = self.path_for(&key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(blob_ref.to_string()))
            }
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        remove_if_exists(&path, key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let dir_key = dir.display().to_string();
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(dir_key, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(&dir_key, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::io(&dir_key, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().is_some_and(|ext| ext == "tmp") {
                    continue;
                }
                if let Some(key) = self.key_for_ref(&self.ref_for(&path)) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn key_for_ref(&self, blob_ref: &str) -> Option<String> {
        let Some(path) = blob_ref.strip_prefix(FILE_SCHEME) else {
            return (!blob_ref.contains("://")).then(|| blob_ref.to_string());
        };
        let relative = Path::new(path).strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect();
        Some(segments?.join("/"))
    }
}
