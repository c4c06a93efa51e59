//! Append-only element timeline log.
//!
//! Frame layout (little endian):
//!
//! ```text
//! magic "ELT\0" | version u8 | flags u8 | sequence u64 | timestamp i64
//! | payload_len u32 | payload (MessagePack ElementEvent) | crc32(payload) u32
//! ```

use crate::error::{LoomError, Result};
use crate::types::{ElementEvent, Timestamp};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for element log frames.
const LOG_MAGIC: &[u8; 4] = b"ELT\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Fixed part of a frame before the payload.
const FRAME_HEADER_SIZE: u64 = 4 + 1 + 1 + 8 + 8 + 4;

/// Checksum trailer.
const FRAME_TRAILER_SIZE: u64 = 4;

#[derive(Debug)]
struct LogInner {
    file: File,
    next_sequence: u64,
    file_size: u64,
    writes_since_sync: u64,
}

/// Durable, exclusively locked log of element changes.
#[derive(Debug)]
pub struct ElementLog {
    path: PathBuf,
    inner: Mutex<LogInner>,
    /// Sync every N writes.
    sync_interval: u64,
}

/// One decoded frame.
struct Frame {
    sequence: u64,
    payload: Vec<u8>,
}

impl ElementLog {
    const DEFAULT_SYNC_INTERVAL: u64 = 16;

    /// Open or create a log with the default sync interval.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(path, Self::DEFAULT_SYNC_INTERVAL)
    }

    /// Open or create a log. `sync_interval = 0` syncs every write.
    ///
    /// A frame cut short by a crash at the end of the file is dropped; any
    /// other damage is reported.
    pub fn open_with_sync_interval(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        file.try_lock_exclusive().map_err(|_| LoomError::Locked)?;

        let (count, valid_end) = Self::scan(&file)?;
        let file_size = file.metadata()?.len();
        if valid_end < file_size {
            if !Self::tail_is_frame_start(&file, valid_end)? {
                return Err(LoomError::InvalidFormat(
                    "Trailing bytes are not an element log frame".into(),
                ));
            }
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = file_size - valid_end,
                "truncating torn frame at end of element log"
            );
            file.set_len(valid_end)?;
        }

        Ok(Self {
            path,
            inner: Mutex::new(LogInner {
                file,
                next_sequence: count + 1,
                file_size: valid_end,
                writes_since_sync: 0,
            }),
            sync_interval: sync_interval.max(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. Returns its sequence number (1-based).
    pub fn append(&self, event: &ElementEvent) -> Result<u64> {
        let payload = rmp_serde::to_vec_named(event)?;
        let mut inner = self.inner.lock();

        let sequence = inner.next_sequence;
        let offset = inner.file_size;
        inner.file.seek(SeekFrom::Start(offset))?;

        let frame = encode_frame(sequence, Timestamp::now(), &payload);
        inner.file.write_all(&frame)?;

        inner.file_size = offset + frame.len() as u64;
        inner.next_sequence += 1;

        inner.writes_since_sync += 1;
        if inner.writes_since_sync >= self.sync_interval {
            inner.file.sync_data()?;
            inner.writes_since_sync = 0;
        }

        Ok(sequence)
    }

    /// Append events in order. Stops at the first failure.
    pub fn append_all(&self, events: &[ElementEvent]) -> Result<()> {
        for event in events {
            self.append(event)?;
        }
        Ok(())
    }

    /// Decode every event with its sequence number, verifying checksums.
    pub fn read_all(&self) -> Result<Vec<(u64, ElementEvent)>> {
        let mut inner = self.inner.lock();
        let end = inner.file_size;
        inner.file.seek(SeekFrom::Start(0))?;

        let mut reader = BufReader::new(&inner.file);
        let mut position = 0u64;
        let mut events = Vec::new();

        while position < end {
            let frame = read_frame(&mut reader)?;
            position += frame_len(&frame.payload);
            let event: ElementEvent = rmp_serde::from_slice(&frame.payload)?;
            events.push((frame.sequence, event));
        }

        Ok(events)
    }

    /// Number of events in the log.
    pub fn len(&self) -> u64 {
        self.inner.lock().next_sequence - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current file size in bytes.
    pub fn size(&self) -> u64 {
        self.inner.lock().file_size
    }

    /// Force pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.sync_data()?;
        inner.writes_since_sync = 0;
        Ok(())
    }

    /// Whether the bytes from `offset` begin like a frame, so a short tail
    /// can be told apart from a foreign file.
    fn tail_is_frame_start(file: &File, offset: u64) -> Result<bool> {
        let mut file = file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut head = Vec::with_capacity(LOG_MAGIC.len());
        file.take(LOG_MAGIC.len() as u64).read_to_end(&mut head)?;
        Ok(LOG_MAGIC.starts_with(&head))
    }

    /// Count complete frames and find where the last one ends.
    fn scan(file: &File) -> Result<(u64, u64)> {
        let mut file = file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        let file_size = file.metadata()?.len();

        let mut reader = BufReader::new(file);
        let mut count = 0u64;
        let mut valid_end = 0u64;

        while valid_end < file_size {
            match read_frame(&mut reader) {
                Ok(frame) => {
                    count += 1;
                    valid_end += frame_len(&frame.payload);
                }
                Err(LoomError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }

        Ok((count, valid_end))
    }
}

impl Drop for ElementLog {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

fn frame_len(payload: &[u8]) -> u64 {
    FRAME_HEADER_SIZE + payload.len() as u64 + FRAME_TRAILER_SIZE
}

fn encode_frame(sequence: u64, timestamp: Timestamp, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(frame_len(payload) as usize);
    buf.extend_from_slice(LOG_MAGIC);
    buf.push(LOG_VERSION);
    // Flags (reserved)
    buf.push(0u8);
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(&timestamp.0.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buf
}

fn read_frame(reader: &mut impl Read) -> Result<Frame> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != LOG_MAGIC {
        return Err(LoomError::InvalidFormat("Invalid element log magic".into()));
    }

    let mut version_and_flags = [0u8; 2];
    reader.read_exact(&mut version_and_flags)?;
    if version_and_flags[0] != LOG_VERSION {
        return Err(LoomError::InvalidFormat(format!(
            "Unsupported element log version: {}",
            version_and_flags[0]
        )));
    }

    let mut u64_bytes = [0u8; 8];
    reader.read_exact(&mut u64_bytes)?;
    let sequence = u64::from_le_bytes(u64_bytes);

    // Timestamp is informational only.
    reader.read_exact(&mut u64_bytes)?;

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let payload_len = u32::from_le_bytes(len_bytes) as usize;

    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload)?;

    let mut checksum_bytes = [0u8; 4];
    reader.read_exact(&mut checksum_bytes)?;
    let stored = u32::from_le_bytes(checksum_bytes);
    let computed = crc32fast::hash(&payload);
    if stored != computed {
        return Err(LoomError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    Ok(Frame { sequence, payload })
}
