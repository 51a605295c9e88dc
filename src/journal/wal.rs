//! File-backed journal store
//!
//! The journal file is an append-only sequence of frames:
//!
//! ```text
//! +-------------+----------------+---------------------------+
//! | len: u32 LE | checksum: [u8;4] | payload: bincode(record) |
//! +-------------+----------------+---------------------------+
//! ```
//!
//! The checksum is the first four bytes of the SHA-256 of the payload. Every append is
//! written with a single `write_all`, flushed and `sync_data`'d before it returns, so a
//! record that was acknowledged survives a crash. A crash in the middle of an append
//! leaves a torn frame at the tail; it is detected by the length/checksum check and cut
//! off when the file is next opened.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::error::{Result, SagaError};
use super::log::JournalRecord;
use super::store::JournalStore;

/// Frames larger than this are treated as corruption rather than allocated
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const HEADER_BYTES: usize = 8;

/// Result of scanning a journal file
#[derive(Debug)]
pub(crate) struct ScanResult {
    pub records: Vec<JournalRecord>,
    /// Byte offset just past the last intact frame
    pub valid_len: u64,
    pub file_len: u64,
}

/// Journal store backed by a single append-only file
pub struct FileStore {
    path: PathBuf,
    writer: Mutex<FrameWriter>,
}

struct FrameWriter {
    file: File,
    /// Byte offset just past the last frame this store knows is intact
    end: u64,
    /// Set once the file may hold bytes after `end` that cannot be trimmed
    poisoned: bool,
}

impl FileStore {
    /// Open (or create) the journal file, cutting off any torn tail
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let existed = path.exists();
        let mut end = 0;
        if existed {
            let scan = scan_file(&path)?;
            if scan.valid_len < scan.file_len {
                log::warn!(
                    "Journal '{}' has a torn tail: keeping {} of {} bytes ({} records)",
                    path.display(),
                    scan.valid_len,
                    scan.file_len,
                    scan.records.len()
                );
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(scan.valid_len)?;
                file.sync_all()?;
            }
            end = scan.valid_len;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        if !existed {
            file.sync_all()?;
            sync_parent_dir(&path)?;
            log::info!("Created journal at '{}'", path.display());
        }

        Ok(Self {
            path,
            writer: Mutex::new(FrameWriter {
                file,
                end,
                poisoned: false,
            }),
        })
    }

    fn refuse(&self, why: &str) -> SagaError {
        SagaError::Journal(format!(
            "journal '{}' refuses appends: {}",
            self.path.display(),
            why
        ))
    }
}

impl JournalStore for FileStore {
    fn append(&self, record: &JournalRecord) -> Result<()> {
        let frame = encode_frame(record)?;
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| SagaError::Internal("journal file lock poisoned".to_string()))?;
        let writer = &mut *guard;

        if writer.poisoned {
            return Err(self.refuse("an earlier partial frame could not be trimmed"));
        }

        // Anything past the last intact frame would hide every later record from replay
        let start = writer.file.metadata()?.len();
        if start != writer.end {
            writer.poisoned = true;
            log::error!(
                "Journal '{}' is {} bytes but its last intact frame ends at {}",
                self.path.display(),
                start,
                writer.end
            );
            return Err(self.refuse("unexpected bytes after the last intact frame"));
        }

        let file = &mut writer.file;
        let written = file
            .write_all(&frame)
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_data());

        if let Err(e) = written {
            if let Err(trunc) = writer.file.set_len(start) {
                writer.poisoned = true;
                log::error!(
                    "Failed to trim partial journal frame in '{}': {}",
                    self.path.display(),
                    trunc
                );
            }
            return Err(SagaError::Journal(format!(
                "append to '{}' failed: {}",
                self.path.display(),
                e
            )));
        }
        writer.end = start + frame.len() as u64;
        Ok(())
    }

    fn load(&self) -> Result<Vec<JournalRecord>> {
        Ok(scan_file(&self.path)?.records)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Encode one record as a length-prefixed, checksummed frame
pub(crate) fn encode_frame(record: &JournalRecord) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(SagaError::Journal(format!(
            "record of {} bytes exceeds frame limit",
            payload.len()
        )));
    }
    let mut frame = Vec::with_capacity(HEADER_BYTES + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&checksum(&payload));
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read every intact frame. Stops at the first short, oversized, mismatched or
/// undecodable frame.
pub(crate) fn scan_file(path: &Path) -> Result<ScanResult> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ScanResult {
                records: Vec::new(),
                valid_len: 0,
                file_len: 0,
            })
        }
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut valid_len: u64 = 0;

    loop {
        let mut header = [0u8; HEADER_BYTES];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len > MAX_FRAME_BYTES {
            log::warn!("Journal frame at offset {} claims {} bytes; stopping", valid_len, len);
            break;
        }

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        if checksum(&payload) != header[4..8] {
            log::warn!("Journal frame at offset {} failed its checksum; stopping", valid_len);
            break;
        }

        let record: JournalRecord = match bincode::deserialize(&payload) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Undecodable journal frame at offset {}: {}", valid_len, e);
                break;
            }
        };

        records.push(record);
        valid_len += (HEADER_BYTES + len) as u64;
    }

    Ok(ScanResult {
        records,
        valid_len,
        file_len,
    })
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        let dir = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}
