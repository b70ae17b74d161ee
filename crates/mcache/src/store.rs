//! # Content Store
//!
//! Persists the bytes of one resource and its index descriptor.
//!
//! Layout of a resource directory:
//!
//! ```text
//! <root>/<identity>/data        sparse file, byte N of the resource at offset N
//! <root>/<identity>/index.json  serialized ContentIndex
//! ```
//!
//! Every write opens its own file handle, so writers of disjoint spans never
//! share a cursor. Data is synced before `write` returns; the caller commits
//! the index entry only afterwards, which keeps the descriptor from ever
//! claiming bytes that are not on disk.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tokio::fs;
use tokio::io::{self, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identity::ResourceIdentity;
use crate::index::ContentIndex;
use crate::range::ContentRange;

const DATA_FILE: &str = "data";
const INDEX_FILE: &str = "index.json";

#[derive(Debug)]
pub struct ContentStore {
    dir: PathBuf,
    data_path: PathBuf,
    index_path: PathBuf,
    /// Serializes descriptor writes so an older snapshot never lands last
    persist_lock: Mutex<()>,
}

impl ContentStore {
    /// Open (creating if needed) the directory for `identity` under `root`.
    pub async fn open(root: &Path, identity: &ResourceIdentity) -> Result<Self> {
        let dir = root.join(identity.as_str());
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            data_path: dir.join(DATA_FILE),
            index_path: dir.join(INDEX_FILE),
            dir,
            persist_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the persisted index, repairing or discarding it as needed.
    ///
    /// A missing descriptor yields an empty index. An unreadable one is
    /// discarded with a warning. Ranges extending past the physical data
    /// file are clipped.
    pub async fn load_index(&self) -> Result<ContentIndex> {
        let raw = match fs::read(&self.index_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ContentIndex::new()),
            Err(e) => return Err(e.into()),
        };

        let index: ContentIndex = match serde_json::from_slice(&raw) {
            Ok(index) => index,
            Err(e) => {
                warn!(path = ?self.index_path, error = %e, "Failed to parse index descriptor, starting empty");
                let _ = fs::remove_file(&self.index_path).await;
                return Ok(ContentIndex::new());
            }
        };

        let physical_len = self.physical_len().await?;
        let index = index.normalized(physical_len);
        debug!(
            path = ?self.index_path,
            ranges = index.ranges().len(),
            cached_bytes = index.cached_bytes(),
            "Loaded index descriptor"
        );
        Ok(index)
    }

    /// Size of the data file on disk, zero when it does not exist yet.
    pub async fn physical_len(&self) -> Result<u64> {
        match fs::metadata(&self.data_path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `bytes` at `offset` and sync them to disk.
    pub async fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.data_path)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Read exactly the bytes of `range`.
    ///
    /// The caller is responsible for checking that `range` is committed in
    /// the index; a data file too short to hold the range is reported as
    /// corruption.
    pub async fn read(&self, range: ContentRange) -> Result<Bytes> {
        let mut file = fs::File::open(&self.data_path).await?;
        let physical_len = file.metadata().await?.len();
        if physical_len < range.end() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "data file holds {physical_len} bytes, range [{}, {}) is missing",
                    range.offset,
                    range.end()
                ),
            )
            .into());
        }

        file.seek(SeekFrom::Start(range.offset)).await?;
        let len = usize::try_from(range.length).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "range too large to read at once")
        })?;
        let mut buf = BytesMut::zeroed(len);
        file.read_exact(&mut buf).await?;
        Ok(buf.freeze())
    }

    /// Persist `index` atomically (temp file, then rename).
    pub async fn persist_index(&self, index: &ContentIndex) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        self.write_descriptor(index).await
    }

    /// Persist whatever `snapshot` returns once the persist lock is held.
    ///
    /// Taking the snapshot under the lock guarantees descriptors land in
    /// the order they were taken.
    pub async fn persist_with<F>(&self, snapshot: F) -> Result<()>
    where
        F: FnOnce() -> ContentIndex,
    {
        let _guard = self.persist_lock.lock().await;
        let index = snapshot();
        self.write_descriptor(&index).await
    }

    async fn write_descriptor(&self, index: &ContentIndex) -> Result<()> {
        let json = serde_json::to_vec(index).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to serialize index descriptor: {e}"),
            )
        })?;

        let temp_path = self.index_path.with_extension("tmp");
        if let Err(e) = fs::write(&temp_path, &json).await {
            warn!(path = ?temp_path, error = %e, "Failed to write index descriptor");
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&temp_path, &self.index_path).await {
            warn!(
                from = ?temp_path,
                to = ?self.index_path,
                error = %e,
                "Failed to rename temporary index descriptor"
            );
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(path = ?self.index_path, ranges = index.ranges().len(), "Persisted index descriptor");
        Ok(())
    }

    /// Drop all stored bytes and the descriptor.
    pub async fn discard(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        match fs::remove_file(&self.index_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match fs::OpenOptions::new().write(true).open(&self.data_path).await {
            Ok(file) => file.set_len(0).await?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(dir = ?self.dir, "Discarded stored content");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    fn identity() -> ResourceIdentity {
        ResourceIdentity::from_raw("store-test")
    }

    #[tokio::test]
    async fn test_write_then_read_at_offsets() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path(), &identity()).await.unwrap();

        store.write(100, b"world").await.unwrap();
        store.write(0, b"hello").await.unwrap();

        let hello = store.read(ContentRange::new(0, 5).unwrap()).await.unwrap();
        let world = store
            .read(ContentRange::new(100, 5).unwrap())
            .await
            .unwrap();
        assert_eq!(&hello[..], b"hello");
        assert_eq!(&world[..], b"world");
        assert_eq!(store.physical_len().await.unwrap(), 105);
    }

    #[tokio::test]
    async fn test_read_past_data_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path(), &identity()).await.unwrap();
        store.write(0, b"abc").await.unwrap();

        let err = store
            .read(ContentRange::new(0, 10).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));
    }

    #[tokio::test]
    async fn test_read_without_data_file_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path(), &identity()).await.unwrap();
        let err = store
            .read(ContentRange::new(0, 1).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));
    }

    #[tokio::test]
    async fn test_index_round_trip_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = ContentStore::open(tmp.path(), &identity()).await.unwrap();
            store.write(0, &[7u8; 64]).await.unwrap();
            let mut index = ContentIndex::new();
            index.set_total_length(128).unwrap();
            index.set_validator(Some("\"abc\"".into()));
            index.insert(ContentRange::new(0, 64).unwrap()).unwrap();
            store.persist_index(&index).await.unwrap();
        }

        let store = ContentStore::open(tmp.path(), &identity()).await.unwrap();
        let index = store.load_index().await.unwrap();
        assert_eq!(index.ranges(), &[ContentRange::new(0, 64).unwrap()]);
        assert_eq!(index.total_length(), Some(128));
        assert_eq!(index.validator(), Some("\"abc\""));
    }

    #[tokio::test]
    async fn test_descriptor_claiming_missing_bytes_is_clipped() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path(), &identity()).await.unwrap();
        store.write(0, &[1u8; 10]).await.unwrap();

        let mut index = ContentIndex::new();
        index.insert(ContentRange::new(0, 50).unwrap()).unwrap();
        store.persist_index(&index).await.unwrap();

        let loaded = store.load_index().await.unwrap();
        assert_eq!(loaded.ranges(), &[ContentRange::new(0, 10).unwrap()]);
    }

    #[tokio::test]
    async fn test_corrupt_descriptor_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path(), &identity()).await.unwrap();
        fs::write(store.dir().join(INDEX_FILE), b"{not json")
            .await
            .unwrap();

        let index = store.load_index().await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_discard_truncates_data() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path(), &identity()).await.unwrap();
        store.write(0, b"stale").await.unwrap();
        store.persist_index(&ContentIndex::new()).await.unwrap();

        store.discard().await.unwrap();
        assert_eq!(store.physical_len().await.unwrap(), 0);
        assert!(store.load_index().await.unwrap().is_empty());
    }
}
