//! Write-Ahead Log (WAL) for commit durability
//!
//! The log never carries graph data: all data lives in immutable blocks. A
//! record only says which candidate root a transaction intends to publish and
//! whether it did. Records are length-prefixed bincode frames with a checksum.
//!
//! A crash can leave a partially written frame at the end of a file. Replay
//! treats such a torn tail as the end of that file and moves on.

use crate::graph::{ContentHash, GraphId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// WAL errors
#[derive(Error, Debug)]
pub enum WalError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A complete record whose checksum does not match
    #[error("WAL corruption detected at sequence {0}")]
    Corruption(u64),
}

pub type WalResult<T> = Result<T, WalError>;

/// Write-Ahead Log entry types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntry {
    /// A transaction built `candidate_root` and is about to validate
    Intent {
        tx_id: u64,
        base_version: u64,
        write_set: Vec<GraphId>,
        candidate_root: ContentHash,
    },
    /// Written before the root swap; recovery rolls forward to `root`
    Commit {
        tx_id: u64,
        root: ContentHash,
        version: u64,
    },
    /// The intent of `tx_id` will never be published
    Abort { tx_id: u64, reason: String },
    /// Everything before this record is settled
    Checkpoint {
        root: ContentHash,
        version: u64,
        timestamp: i64,
    },
}

impl WalEntry {
    /// Entries that must reach the OS before the caller proceeds
    fn is_barrier(&self) -> bool {
        matches!(self, WalEntry::Commit { .. } | WalEntry::Checkpoint { .. })
    }
}

/// WAL record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalRecord {
    /// Sequence number (monotonically increasing)
    sequence: u64,
    /// Entry data
    entry: WalEntry,
    /// First four bytes of the SHA-256 of the encoded entry
    checksum: u32,
}

impl WalRecord {
    fn new(sequence: u64, entry: WalEntry) -> WalResult<Self> {
        let checksum = Self::checksum_of(&entry)?;
        Ok(Self {
            sequence,
            entry,
            checksum,
        })
    }

    fn checksum_of(entry: &WalEntry) -> WalResult<u32> {
        let digest = Sha256::digest(bincode::serialize(entry)?);
        Ok(u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]))
    }

    fn verify_checksum(&self) -> bool {
        Self::checksum_of(&self.entry).is_ok_and(|c| c == self.checksum)
    }
}

enum Backend {
    File {
        dir: PathBuf,
        current: Option<BufWriter<File>>,
    },
    /// Frames kept in memory, for databases without a directory
    Memory { frames: Vec<u8> },
}

/// Write-Ahead Log manager
pub struct Wal {
    backend: Backend,
    /// Last sequence number written
    sequence: u64,
    /// Flush and fsync after every append
    sync_mode: bool,
}

impl Wal {
    /// Open (or create) a WAL in `path`
    pub fn open(path: impl AsRef<Path>) -> WalResult<Self> {
        let dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut wal = Self {
            backend: Backend::File { dir, current: None },
            sequence: 0,
            sync_mode: false,
        };
        // The last sequence comes from the records themselves, not the file names
        wal.sequence = wal.replay(0, |_, _| Ok(()))?;

        info!("Initializing WAL at {:?}, sequence: {}", path.as_ref(), wal.sequence);
        Ok(wal)
    }

    /// WAL that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory { frames: Vec::new() },
            sequence: 0,
            sync_mode: false,
        }
    }

    /// Set sync mode
    pub fn set_sync_mode(&mut self, sync: bool) {
        self.sync_mode = sync;
        debug!("WAL sync mode: {}", sync);
    }

    pub fn current_sequence(&self) -> u64 {
        self.sequence
    }

    /// Append an entry, returning its sequence number
    ///
    /// Commit and checkpoint entries are always flushed before returning.
    pub fn append(&mut self, entry: WalEntry) -> WalResult<u64> {
        let sequence = self.sequence + 1;
        let barrier = entry.is_barrier();
        let data = bincode::serialize(&WalRecord::new(sequence, entry)?)?;

        if let Backend::File { current: None, .. } = self.backend {
            self.open_new_file(sequence)?;
        }

        match &mut self.backend {
            Backend::File {
                current: Some(file), ..
            } => {
                file.write_all(&(data.len() as u32).to_le_bytes())?;
                file.write_all(&data)?;
                if barrier || self.sync_mode {
                    file.flush()?;
                }
                if self.sync_mode {
                    file.get_ref().sync_data()?;
                }
            }
            Backend::File { current: None, .. } => {
                return Err(WalError::Io(io::Error::new(io::ErrorKind::Other, "WAL file not open")))
            }
            Backend::Memory { frames } => {
                frames.extend_from_slice(&(data.len() as u32).to_le_bytes());
                frames.extend_from_slice(&data);
            }
        }

        self.sequence = sequence;
        Ok(sequence)
    }

    /// Force flush the WAL
    pub fn flush(&mut self) -> WalResult<()> {
        if let Backend::File {
            current: Some(file), ..
        } = &mut self.backend
        {
            file.flush()?;
        }
        Ok(())
    }

    /// Replay entries with sequence >= `from_sequence`, oldest first
    ///
    /// Returns the last sequence seen. A torn frame ends its file with a warning.
    pub fn replay<F>(&self, from_sequence: u64, mut callback: F) -> WalResult<u64>
    where
        F: FnMut(u64, &WalEntry) -> WalResult<()>,
    {
        let mut last_sequence = from_sequence.saturating_sub(1);
        let mut replayed = 0u64;

        let mut visit = |record: WalRecord| -> WalResult<()> {
            last_sequence = last_sequence.max(record.sequence);
            if record.sequence >= from_sequence {
                callback(record.sequence, &record.entry)?;
                replayed += 1;
            }
            Ok(())
        };

        match &self.backend {
            Backend::File { dir, .. } => {
                for file_path in Self::wal_files(dir)? {
                    let reader = BufReader::new(File::open(&file_path)?);
                    read_frames(reader, &file_path.display().to_string(), &mut visit)?;
                }
            }
            Backend::Memory { frames } => {
                read_frames(frames.as_slice(), "memory", &mut visit)?;
            }
        }

        debug!("Replayed {} WAL entries, last sequence: {}", replayed, last_sequence);
        Ok(last_sequence)
    }

    /// Start a new log segment that begins with a checkpoint, then drop the old segments
    pub fn checkpoint(&mut self, root: ContentHash, version: u64) -> WalResult<u64> {
        info!("Creating WAL checkpoint at root {} (version {})", root.short(), version);
        self.flush()?;

        let old_files = match &mut self.backend {
            Backend::File { dir, current } => {
                *current = None;
                Self::wal_files(dir)?
            }
            Backend::Memory { frames } => {
                frames.clear();
                Vec::new()
            }
        };

        let sequence = self.append(WalEntry::Checkpoint {
            root,
            version,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })?;
        self.flush()?;

        for path in old_files {
            std::fs::remove_file(&path)?;
            debug!("Removed WAL segment {:?}", path);
        }
        Ok(sequence)
    }

    /// Open a new segment whose first record will carry `first_sequence`
    fn open_new_file(&mut self, first_sequence: u64) -> WalResult<()> {
        if let Backend::File { dir, current } = &mut self.backend {
            let file_path = dir.join(format!("wal-{:016x}.log", first_sequence));
            debug!("Opening new WAL file: {:?}", file_path);

            let file = OpenOptions::new().create(true).append(true).open(file_path)?;
            *current = Some(BufWriter::new(file));
        }
        Ok(())
    }

    /// All WAL segments in sequence order
    fn wal_files(dir: &Path) -> WalResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)?.flatten() {
            if let Some(filename) = entry.file_name().to_str() {
                if filename.starts_with("wal-") && filename.ends_with(".log") {
                    files.push(entry.path());
                }
            }
        }
        // Zero-padded hex names sort by sequence
        files.sort();
        Ok(files)
    }
}

/// Decode frames from one segment until EOF or a torn tail
fn read_frames<R, F>(mut reader: R, source: &str, visit: &mut F) -> WalResult<()>
where
    R: Read,
    F: FnMut(WalRecord) -> WalResult<()>,
{
    let mut buf = Vec::new();
    loop {
        let mut len_bytes = [0u8; 4];
        match read_full(&mut reader, &mut len_bytes)? {
            0 => return Ok(()),
            4 => {}
            _ => {
                warn!("Torn WAL tail in {} (partial length prefix)", source);
                return Ok(());
            }
        }

        let len = u32::from_le_bytes(len_bytes) as usize;
        buf.resize(len, 0);
        if read_full(&mut reader, &mut buf)? < len {
            warn!("Torn WAL tail in {} (partial record)", source);
            return Ok(());
        }

        let record: WalRecord = match bincode::deserialize(&buf) {
            Ok(record) => record,
            Err(e) => {
                warn!("Torn WAL tail in {} (undecodable record: {})", source, e);
                return Ok(());
            }
        };
        if !record.verify_checksum() {
            warn!("WAL corruption detected at sequence {}", record.sequence);
            return Err(WalError::Corruption(record.sequence));
        }
        visit(record)?;
    }
}

/// Like `read_exact`, but reports how many bytes were available instead of failing at EOF
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
