//! Filesystem-backed object store.
//!
//! Each object is one file in a flat root directory. The file name is the
//! form-urlencoded key plus an `.obj` suffix, so `/` separators never turn
//! into directories and listing is a single directory scan.
//!
//! This backend has no entity tags and therefore no conditional writes:
//! concurrent read-modify-write cycles on the same key are last-writer-wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreResult;
use crate::object::{ListPage, ObjectStore, StoredObject, validate_key, validate_prefix};

const OBJECT_SUFFIX: &str = ".obj";
const TEMP_SUFFIX: &str = ".tmp";

/// Persistent object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`](crate::StoreError::Io) if the directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "opened filesystem object store");
        Ok(Self { root })
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{OBJECT_SUFFIX}", escape(key)))
    }
}

/// Escape a key into a single path component.
fn escape(key: &str) -> String {
    url::form_urlencoded::byte_serialize(key.as_bytes()).collect()
}

/// Recover a key from a file name produced by [`escape`].
fn unescape(file_name: &str) -> Option<String> {
    let escaped = file_name.strip_suffix(OBJECT_SUFFIX)?;
    url::form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        validate_key(key)?;
        let path = self.object_path(key);
        let temp = self.root.join(format!(
            "{}{OBJECT_SUFFIX}.{:016x}{TEMP_SUFFIX}",
            escape(key),
            fastrand::u64(..)
        ));
        tokio::fs::write(&temp, &value).await?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        validate_key(key)?;
        match tokio::fs::read(self.object_path(key)).await {
            Ok(data) => Ok(Some(StoredObject::untagged(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        match tokio::fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<ListPage> {
        validate_prefix(prefix)?;
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(key) = unescape(name) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            if start_after.is_some_and(|after| key.as_str() <= after) {
                continue;
            }
            keys.push(key);
        }
        keys.sort_unstable();

        let next = if keys.len() > limit {
            keys.truncate(limit);
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn make_store() -> (FsObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_escape_round_trip() {
        for key in ["users/.records/1", "a b/c+d", "..", "x%2Fy", "ümlaut/ß"] {
            let name = format!("{}{OBJECT_SUFFIX}", escape(key));
            assert!(!name.contains('/'));
            assert_eq!(unescape(&name).as_deref(), Some(key));
        }
    }

    #[test]
    fn test_unescape_ignores_temp_files() {
        assert!(unescape("users%2F1.obj.00ff.tmp").is_none());
    }

    #[tokio::test]
    async fn test_fs_get_put() {
        let (store, _dir) = make_store();
        store.put("users/1", b"hello".to_vec()).await.unwrap();
        let obj = store.get("users/1").await.unwrap().unwrap();
        assert_eq!(obj.data, b"hello".to_vec());
        assert!(obj.etag.is_none());
    }

    #[tokio::test]
    async fn test_fs_overwrite_and_delete() {
        let (store, _dir) = make_store();
        store.put("k", b"v1".to_vec()).await.unwrap();
        store.put("k", b"v2".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().data, b"v2".to_vec());
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_list_prefix() {
        let (store, _dir) = make_store();
        for key in ["a/2", "a/1", "b/1", "ab"] {
            store.put(key, b"x".to_vec()).await.unwrap();
        }
        assert_eq!(store.list("a/").await.unwrap(), vec!["a/1", "a/2"]);

        let page = store.list_page("a", Some("a/1"), 10).await.unwrap();
        assert_eq!(page.keys, vec!["a/2", "ab"]);
    }

    #[tokio::test]
    async fn test_fs_has_no_conditional_writes() {
        let (store, _dir) = make_store();
        assert!(!store.supports_conditional_writes());
        let err = store
            .put_if("k", vec![], crate::object::WriteCondition::IfAbsent)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unsupported));
    }

    #[tokio::test]
    async fn test_fs_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsObjectStore::open(dir.path()).unwrap();
            store.put("users/1", b"kept".to_vec()).await.unwrap();
        }
        let store = FsObjectStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get("users/1").await.unwrap().unwrap().data,
            b"kept".to_vec()
        );
    }
}
