//! Append-only mutation journal.
//!
//! # File Format
//! ```text
//! [MAGIC "RSTR": 4 bytes][VERSION: 1 byte]
//! [FRAME 1: JournalEntry]
//! [FRAME 2: JournalEntry]
//! ...
//! ```
//!
//! The file only ever holds acknowledged entries. An append that fails part
//! way is cut back to the last acknowledged length before the error is
//! returned, and a torn or corrupt tail left by a crash is cut off on open.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::storage::traits::{Mutation, MutationLog, StorageError};

use super::codec::{self, FrameError};

/// Magic bytes identifying a rosterdb journal.
pub const MAGIC: [u8; 4] = *b"RSTR";

/// On-disk format version.
pub const FORMAT_VERSION: u8 = 2;

/// Length of the file header.
pub const HEADER_LEN: u64 = 5;

/// A single entry in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonically increasing sequence number, starting at 1.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The recorded state change.
    pub mutation: Mutation,
}

struct Tail {
    file: File,
    /// File length up to the end of the last acknowledged entry.
    committed: u64,
    sequence: u64,
    /// A failed append could not be cut back; nothing more may be written.
    broken: bool,
    #[cfg(test)]
    fail_next_sync: bool,
}

/// Write-ahead journal. Thread-safe via an internal mutex.
pub struct Journal {
    path: PathBuf,
    tail: Mutex<Tail>,
    sync_on_write: bool,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.path)
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

impl Journal {
    /// Open or create a journal, returning it with every intact entry on disk.
    ///
    /// # Errors
    /// I/O failures, or `InvalidData` when the file is not a rosterdb journal.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Vec<JournalEntry>)> {
        let has_header = path.exists() && std::fs::metadata(path)?.len() >= HEADER_LEN;
        let (entries, committed) = if has_header {
            Self::recover(path)?
        } else {
            Self::create(path, sync_on_write)?;
            (Vec::new(), HEADER_LEN)
        };

        let file = OpenOptions::new().append(true).open(path)?;
        let sequence = entries.last().map_or(0, |e| e.sequence);
        let journal = Self {
            path: path.to_path_buf(),
            tail: Mutex::new(Tail {
                file,
                committed,
                sequence,
                broken: false,
                #[cfg(test)]
                fail_next_sync: false,
            }),
            sync_on_write,
        };
        Ok((journal, entries))
    }

    fn create(path: &Path, sync_on_write: bool) -> IoResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&MAGIC)?;
        file.write_all(&[FORMAT_VERSION])?;
        if sync_on_write {
            file.sync_all()?;
        }
        Ok(())
    }

    fn check_header(reader: &mut impl Read) -> IoResult<()> {
        let mut header = [0u8; 5];
        reader.read_exact(&mut header)?;
        if header[..4] != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("not a rosterdb journal (magic {:?})", &header[..4]),
            ));
        }
        if header[4] != FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported journal version {}", header[4]),
            ));
        }
        Ok(())
    }

    /// Read entries up to the first damaged frame and cut the file there.
    /// Returns the entries and the intact length.
    fn recover(path: &Path) -> IoResult<(Vec<JournalEntry>, u64)> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        Self::check_header(&mut reader)?;

        let mut entries = Vec::new();
        let mut intact = HEADER_LEN;
        loop {
            match codec::decode::<JournalEntry>(&mut reader) {
                Ok(Some(entry)) => {
                    intact = reader.stream_position()?;
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(FrameError::Io(e)) => return Err(e),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        offset = intact,
                        dropped_bytes = file_len - intact,
                        error = %e,
                        "journal tail damaged, truncating"
                    );
                    OpenOptions::new().write(true).open(path)?.set_len(intact)?;
                    break;
                }
            }
        }
        Ok((entries, intact))
    }

    /// Append a mutation, returning its sequence number.
    ///
    /// On error nothing of the entry remains in the file.
    pub fn append(&self, mutation: &Mutation) -> Result<u64, StorageError> {
        let mut tail = self
            .tail
            .lock()
            .map_err(|_| StorageError::BackendError("poisoned lock: journal.append".to_string()))?;
        if tail.broken {
            return Err(StorageError::BackendError(format!(
                "journal {} refuses writes after a failed rollback",
                self.path.display()
            )));
        }

        let entry = JournalEntry {
            sequence: tail.sequence + 1,
            timestamp: Utc::now(),
            mutation: mutation.clone(),
        };
        let frame = codec::encode(&entry)?;

        if let Err(e) = self.write_frame(&mut tail, &frame) {
            self.roll_back(&mut tail);
            return Err(e.into());
        }

        tail.committed += u64::try_from(frame.len()).unwrap_or(u64::MAX);
        tail.sequence = entry.sequence;
        Ok(entry.sequence)
    }

    fn write_frame(&self, tail: &mut Tail, frame: &[u8]) -> IoResult<()> {
        tail.file.write_all(frame)?;
        #[cfg(test)]
        {
            if std::mem::take(&mut tail.fail_next_sync) {
                return Err(io::Error::other("injected sync failure"));
            }
        }
        if self.sync_on_write {
            tail.file.sync_data()?;
        }
        Ok(())
    }

    /// Cut the file back to the last acknowledged entry.
    fn roll_back(&self, tail: &mut Tail) {
        let committed = tail.committed;
        let restored = tail.file.set_len(committed).and_then(|()| {
            if self.sync_on_write {
                tail.file.sync_data()
            } else {
                Ok(())
            }
        });
        match restored {
            Ok(()) => warn!(
                path = %self.path.display(),
                offset = committed,
                "journal append failed, entry rolled back"
            ),
            Err(e) => {
                tail.broken = true;
                error!(
                    path = %self.path.display(),
                    offset = committed,
                    error = %e,
                    "journal rollback failed, further writes refused"
                );
            }
        }
    }

    /// Make the next append fail after its frame reached the file.
    #[cfg(test)]
    pub(crate) fn fail_next_sync(&self) {
        if let Ok(mut tail) = self.tail.lock() {
            tail.fail_next_sync = true;
        }
    }

    /// Sequence number of the last appended entry (0 when empty).
    pub fn sequence(&self) -> Result<u64, StorageError> {
        self.tail
            .lock()
            .map(|t| t.sequence)
            .map_err(|_| StorageError::BackendError("poisoned lock: journal.sequence".to_string()))
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MutationLog for Journal {
    fn record(&self, mutation: &Mutation) -> Result<(), StorageError> {
        self.append(mutation).map(|_| ())
    }
}
