//! Durable block store backends
//!
//! - [`FileBlockStore`]: one file per block in a directory sharded by hash prefix
//! - [`RocksBlockStore`]: RocksDB column family keyed by hash (feature `rocksdb`)

use crate::graph::{BlockStore, ContentHash, StorageError, StorageResult};
use bytes::Bytes;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, trace};

/// Block store laid out as `<root>/<first two hex chars>/<full hex>`
///
/// Writes go to a per-writer temporary file that is moved into place, so a
/// reader never observes a partial block. Reads re-hash the bytes and reject mismatches.
pub struct FileBlockStore {
    root: PathBuf,
}

impl FileBlockStore {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!("Opening file block store at: {:?}", root);
        Ok(Self { root })
    }

    fn block_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }
}

impl BlockStore for FileBlockStore {
    fn put(&self, bytes: Bytes) -> StorageResult<ContentHash> {
        let hash = ContentHash::of(&bytes);
        let path = self.block_path(&hash);
        if path.exists() {
            return Ok(hash);
        }
        let Some(shard) = path.parent() else {
            return Err(StorageError::Corrupt(format!("block path {:?} has no parent", path)));
        };
        fs::create_dir_all(shard)?;
        // Each writer stages its own file; concurrent writers of one hash all succeed
        let mut staged = NamedTempFile::new_in(shard)?;
        staged.write_all(&bytes)?;
        staged.as_file().sync_data()?;
        match staged.persist_noclobber(&path) {
            Ok(_) => {}
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                trace!("Block {} already stored by a concurrent writer", hash.short());
                return Ok(hash);
            }
            Err(e) => return Err(e.error.into()),
        }
        trace!("Stored block {} ({} bytes)", hash.short(), bytes.len());
        Ok(hash)
    }

    fn get(&self, hash: &ContentHash) -> StorageResult<Bytes> {
        let bytes = match fs::read(self.block_path(hash)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StorageError::NotFound(*hash)),
            Err(e) => return Err(e.into()),
        };
        if ContentHash::of(&bytes) != *hash {
            return Err(StorageError::Corrupt(format!("block {} fails hash verification", hash)));
        }
        Ok(Bytes::from(bytes))
    }

    fn contains(&self, hash: &ContentHash) -> StorageResult<bool> {
        Ok(self.block_path(hash).exists())
    }
}

#[cfg(feature = "rocksdb")]
pub use rocks::RocksBlockStore;

#[cfg(feature = "rocksdb")]
mod rocks {
    use super::*;
    use rocksdb::{ColumnFamilyDescriptor, Options, DB};
    use std::sync::Arc;

    const BLOCKS_CF: &str = "blocks";

    /// RocksDB-backed block store
    pub struct RocksBlockStore {
        db: Arc<DB>,
    }

    impl RocksBlockStore {
        /// Open or create the database at `path`
        pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
            info!("Opening RocksDB block store at: {:?}", path.as_ref());

            let mut opts = Options::default();
            opts.create_if_missing(true);
            opts.create_missing_column_families(true);

            // Performance tuning
            opts.set_write_buffer_size(64 * 1024 * 1024); // 64 MB
            opts.set_max_write_buffer_number(3);
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            opts.set_wal_recovery_mode(rocksdb::DBRecoveryMode::PointInTime);

            let cf_descriptors = vec![
                ColumnFamilyDescriptor::new("default", Options::default()),
                ColumnFamilyDescriptor::new(BLOCKS_CF, Self::blocks_cf_options()),
            ];
            let db = DB::open_cf_descriptors(&opts, path.as_ref(), cf_descriptors)?;

            Ok(Self { db: Arc::new(db) })
        }

        /// Blocks are written once and read often; compress the bottom levels harder
        fn blocks_cf_options() -> Options {
            let mut opts = Options::default();
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
            opts
        }

        fn cf(&self) -> StorageResult<&rocksdb::ColumnFamily> {
            self.db
                .cf_handle(BLOCKS_CF)
                .ok_or_else(|| StorageError::Corrupt(format!("missing column family {}", BLOCKS_CF)))
        }

        pub fn flush(&self) -> StorageResult<()> {
            self.db.flush()?;
            Ok(())
        }
    }

    impl BlockStore for RocksBlockStore {
        fn put(&self, bytes: Bytes) -> StorageResult<ContentHash> {
            let hash = ContentHash::of(&bytes);
            let cf = self.cf()?;
            if self.db.get_pinned_cf(cf, hash.as_bytes())?.is_none() {
                self.db.put_cf(cf, hash.as_bytes(), &bytes)?;
            }
            Ok(hash)
        }

        fn get(&self, hash: &ContentHash) -> StorageResult<Bytes> {
            match self.db.get_cf(self.cf()?, hash.as_bytes())? {
                Some(value) => Ok(Bytes::from(value)),
                None => Err(StorageError::NotFound(*hash)),
            }
        }

        fn contains(&self, hash: &ContentHash) -> StorageResult<bool> {
            Ok(self.db.get_pinned_cf(self.cf()?, hash.as_bytes())?.is_some())
        }

        fn get_many(&self, hashes: &[ContentHash]) -> StorageResult<Vec<Bytes>> {
            let cf = self.cf()?;
            let keys = hashes.iter().map(|h| (cf, h.as_bytes().to_vec()));
            self.db
                .multi_get_cf(keys)
                .into_iter()
                .zip(hashes)
                .map(|(result, hash)| match result? {
                    Some(value) => Ok(Bytes::from(value)),
                    None => Err(StorageError::NotFound(*hash)),
                })
                .collect()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use tempfile::TempDir;

        #[test]
        fn test_rocks_put_get() {
            let temp_dir = TempDir::new().unwrap();
            let store = RocksBlockStore::open(temp_dir.path()).unwrap();
            let hash = store.put(Bytes::from_static(b"block")).unwrap();
            assert_eq!(store.get(&hash).unwrap(), Bytes::from_static(b"block"));
            assert_eq!(store.get_many(&[hash, hash]).unwrap().len(), 2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileBlockStore::open(temp_dir.path()).unwrap();

        let hash = store.put(Bytes::from_static(b"hello")).unwrap();
        assert!(store.contains(&hash).unwrap());
        assert_eq!(store.get(&hash).unwrap(), Bytes::from_static(b"hello"));

        // Idempotent
        assert_eq!(store.put(Bytes::from_static(b"hello")).unwrap(), hash);
    }

    #[test]
    fn test_file_store_sharding() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileBlockStore::open(temp_dir.path()).unwrap();
        let hash = store.put(Bytes::from_static(b"sharded")).unwrap();

        let hex = hash.to_hex();
        assert!(temp_dir.path().join(&hex[..2]).join(&hex).is_file());
    }

    #[test]
    fn test_file_store_missing_and_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileBlockStore::open(temp_dir.path()).unwrap();

        let missing = ContentHash::of(b"nothing");
        assert!(matches!(store.get(&missing), Err(StorageError::NotFound(h)) if h == missing));

        let hash = store.put(Bytes::from_static(b"original")).unwrap();
        fs::write(store.block_path(&hash), b"tampered").unwrap();
        assert!(matches!(store.get(&hash), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_concurrent_puts_of_one_block() {
        let temp_dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(FileBlockStore::open(temp_dir.path()).unwrap());
        let block = Bytes::from(vec![7u8; 1 << 20]);
        let expected = ContentHash::of(&block);

        for _ in 0..5 {
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = store.clone();
                    let block = block.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        store.put(block)
                    })
                })
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap().unwrap(), expected);
            }
            assert_eq!(store.get(&expected).unwrap(), block);
            fs::remove_file(store.block_path(&expected)).unwrap();
        }

        // No staged files are left behind in the shard
        let hex = expected.to_hex();
        assert_eq!(fs::read_dir(temp_dir.path().join(&hex[..2])).unwrap().count(), 0);
    }

    #[test]
    fn test_file_store_get_many_parallel() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileBlockStore::open(temp_dir.path()).unwrap();
        let hashes: Vec<ContentHash> = (0..40u32)
            .map(|i| store.put(Bytes::from(i.to_le_bytes().to_vec())).unwrap())
            .collect();

        let blocks = store.get_many(&hashes).unwrap();
        assert_eq!(blocks.len(), 40);
        assert_eq!(blocks[7], Bytes::from(7u32.to_le_bytes().to_vec()));
    }
}
