//! Metron WAL - Point Log
//!
//! Write-ahead log of store mutations. Every mutation is appended as one
//! checksummed record before it is applied in memory, so a batch insert or a
//! retention chunk is either fully replayed after a crash or not at all.
//!
//! Record layout:
//! lsn(8) + type(1) + payload_len(4) + payload + crc32(4)
//!
//! The payload is the JSON encoding of a [`Mutation`]. Recovery stops at the
//! first short or corrupt record and truncates the file there. A failed
//! append is cut back out of the file before the error is returned, so a
//! write the caller saw fail is never replayed.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::backend::PointKey;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use metron_common::utils::crc32;
use metron_common::{Lsn, Metric, MetricId, MetronError, Point, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Constants
// =============================================================================

pub const LOG_FILE_NAME: &str = "points.log";
const LOG_TEMP_FILE_NAME: &str = "points.log.tmp";
/// lsn(8) + type(1) + payload_len(4)
pub const RECORD_HEADER_SIZE: usize = 13;
const RECORD_CHECKSUM_SIZE: usize = 4;

// =============================================================================
// Mutations
// =============================================================================

/// A store mutation, applied atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    CreateMetric { metric: Metric },
    InsertPoints { points: Vec<Point> },
    DeletePoints { keys: Vec<PointKey> },
    DeleteMetric { metric_id: MetricId },
}

/// Type tag written in the record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    CreateMetric = 1,
    InsertPoints = 2,
    DeletePoints = 3,
    DeleteMetric = 4,
}

impl TryFrom<u8> for LogRecordType {
    type Error = MetronError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(LogRecordType::CreateMetric),
            2 => Ok(LogRecordType::InsertPoints),
            3 => Ok(LogRecordType::DeletePoints),
            4 => Ok(LogRecordType::DeleteMetric),
            other => Err(MetronError::Corruption(format!("unknown record type {}", other))),
        }
    }
}

impl Mutation {
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Mutation::CreateMetric { .. } => LogRecordType::CreateMetric,
            Mutation::InsertPoints { .. } => LogRecordType::InsertPoints,
            Mutation::DeletePoints { .. } => LogRecordType::DeletePoints,
            Mutation::DeleteMetric { .. } => LogRecordType::DeleteMetric,
        }
    }
}

// =============================================================================
// Record Encoding
// =============================================================================

fn encode_record(lsn: Lsn, mutation: &Mutation) -> Result<Bytes> {
    let payload =
        serde_json::to_vec(mutation).map_err(|e| MetronError::Storage(e.to_string()))?;

    let mut buf =
        BytesMut::with_capacity(RECORD_HEADER_SIZE + payload.len() + RECORD_CHECKSUM_SIZE);
    buf.put_u64_le(lsn.0);
    buf.put_u8(mutation.record_type() as u8);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&payload);

    let checksum = crc32(&buf);
    buf.put_u32_le(checksum);
    Ok(buf.freeze())
}

/// Decode the record at the start of `data`, returning it and its length.
fn decode_record(data: &[u8]) -> Result<(Lsn, Mutation, usize)> {
    if data.len() < RECORD_HEADER_SIZE + RECORD_CHECKSUM_SIZE {
        return Err(MetronError::Corruption("log record too small".to_string()));
    }

    let mut buf = data;
    let lsn = Lsn(buf.get_u64_le());
    let record_type = LogRecordType::try_from(buf.get_u8())?;
    let payload_len = buf.get_u32_le() as usize;

    let total = RECORD_HEADER_SIZE + payload_len + RECORD_CHECKSUM_SIZE;
    if data.len() < total {
        return Err(MetronError::Corruption("log record truncated".to_string()));
    }

    let body_end = RECORD_HEADER_SIZE + payload_len;
    let mut trailer = &data[body_end..total];
    let stored_checksum = trailer.get_u32_le();
    if crc32(&data[..body_end]) != stored_checksum {
        return Err(MetronError::Corruption("log record checksum mismatch".to_string()));
    }

    let mutation: Mutation = serde_json::from_slice(&data[RECORD_HEADER_SIZE..body_end])
        .map_err(|e| MetronError::Corruption(e.to_string()))?;
    if mutation.record_type() != record_type {
        return Err(MetronError::Corruption(
            "log record type does not match payload".to_string(),
        ));
    }

    Ok((lsn, mutation, total))
}

// =============================================================================
// Point Log
// =============================================================================

/// Append-only mutation log backing a durable store.
pub struct PointLog {
    path: PathBuf,
    file: Mutex<LogFile>,
    next_lsn: AtomicU64,
    sync_writes: bool,
    /// Serializes compactions.
    compaction: Mutex<()>,
    #[cfg(test)]
    failpoint: Mutex<Option<Failpoint>>,
}

struct LogFile {
    file: File,
    /// Length of the intact records in the file.
    len: u64,
    /// Bumped each time the file is replaced by compaction.
    generation: u64,
    /// Set when a failed append could not be rolled back.
    poisoned: bool,
}

/// A position in the log, valid until the next compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
    generation: u64,
    offset: u64,
}

/// Result of replaying the log at open.
#[derive(Debug, Default)]
pub struct RecoveryResult {
    pub mutations: Vec<Mutation>,
    pub max_lsn: Option<Lsn>,
    /// Bytes discarded from a torn or corrupt tail.
    pub discarded_bytes: u64,
}

impl PointLog {
    /// Open the log in `dir`, replaying every intact record.
    pub fn open(dir: &Path, sync_writes: bool) -> Result<(Self, RecoveryResult)> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);

        let recovery = Self::recover(&path)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let len = file.metadata()?.len();
        let next_lsn = recovery.max_lsn.map_or(1, |lsn| lsn.0 + 1);

        Ok((
            Self {
                path,
                file: Mutex::new(LogFile {
                    file,
                    len,
                    generation: 0,
                    poisoned: false,
                }),
                next_lsn: AtomicU64::new(next_lsn),
                sync_writes,
                compaction: Mutex::new(()),
                #[cfg(test)]
                failpoint: Mutex::new(None),
            },
            recovery,
        ))
    }

    fn recover(path: &Path) -> Result<RecoveryResult> {
        let mut result = RecoveryResult::default();
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(result),
            Err(e) => return Err(e.into()),
        };

        let mut offset = 0usize;
        while offset < data.len() {
            match decode_record(&data[offset..]) {
                Ok((lsn, mutation, len)) => {
                    result.max_lsn = Some(lsn);
                    result.mutations.push(mutation);
                    offset += len;
                }
                Err(e) => {
                    tracing::warn!(
                        "Point log {} damaged at offset {}: {}; discarding tail",
                        path.display(),
                        offset,
                        e
                    );
                    break;
                }
            }
        }

        if offset < data.len() {
            result.discarded_bytes = (data.len() - offset) as u64;
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(offset as u64)?;
            file.sync_all()?;
        }

        Ok(result)
    }

    /// Append one mutation. Returns once the record is written (and synced,
    /// when configured). A failed append leaves the file as it was before
    /// the call; if that cannot be restored, every later append fails.
    pub fn append(&self, mutation: &Mutation) -> Result<Lsn> {
        let mut log = self.file.lock();
        if log.poisoned {
            return Err(MetronError::Storage(format!(
                "point log {} is unusable after a failed write",
                self.path.display()
            )));
        }

        let lsn = Lsn(self.next_lsn.load(Ordering::SeqCst));
        let record = encode_record(lsn, mutation)?;
        let start = log.len;

        if let Err(e) = self.write_record(&mut log.file, &record) {
            self.roll_back(&mut log, start);
            return Err(e.into());
        }

        log.len = start + record.len() as u64;
        self.next_lsn.store(lsn.0 + 1, Ordering::SeqCst);
        Ok(lsn)
    }

    fn write_record(&self, file: &mut File, record: &[u8]) -> std::io::Result<()> {
        #[cfg(test)]
        if let Some(failpoint) = *self.failpoint.lock() {
            return failpoint.write(file, record);
        }

        file.write_all(record)?;
        if self.sync_writes {
            file.sync_data()?;
        }
        Ok(())
    }

    fn roll_back(&self, log: &mut LogFile, len: u64) {
        match self.truncate(&log.file, len) {
            Ok(()) => tracing::warn!(
                "Point log {} rolled back to {} bytes after a failed append",
                self.path.display(),
                len
            ),
            Err(e) => {
                tracing::error!(
                    "Point log {} could not be rolled back, refusing further writes: {}",
                    self.path.display(),
                    e
                );
                log.poisoned = true;
            }
        }
    }

    fn truncate(&self, file: &File, len: u64) -> std::io::Result<()> {
        #[cfg(test)]
        if matches!(*self.failpoint.lock(), Some(Failpoint::StuckWrite(_))) {
            return Err(std::io::Error::other("injected truncate failure"));
        }

        file.set_len(len)?;
        file.sync_all()
    }

    /// Current end of the log. Taken together with a snapshot of the state
    /// it describes, it marks where [`compact_from`](Self::compact_from)
    /// picks up records appended later.
    pub fn position(&self) -> LogPosition {
        let log = self.file.lock();
        LogPosition {
            generation: log.generation,
            offset: log.len,
        }
    }

    /// Replace the log with `snapshot`, the state as of `mark`, followed by
    /// every record appended since. The snapshot is written without blocking
    /// appends; only copying the tail and the swap do. Returns false, leaving
    /// the log untouched, if it was replaced after `mark` was taken.
    pub fn compact_from(&self, snapshot: &[Mutation], mark: LogPosition) -> Result<bool> {
        let _compacting = self.compaction.lock();
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let temp_path = dir.join(LOG_TEMP_FILE_NAME);

        let mut temp = BufWriter::new(File::create(&temp_path)?);
        let mut lsn = 1u64;
        let mut written = 0u64;
        for mutation in snapshot {
            let record = encode_record(Lsn(lsn), mutation)?;
            temp.write_all(&record)?;
            written += record.len() as u64;
            lsn += 1;
        }
        temp.flush()?;
        temp.get_ref().sync_data()?;

        let mut log = self.file.lock();
        if log.generation != mark.generation {
            drop(log);
            let _ = std::fs::remove_file(&temp_path);
            return Ok(false);
        }

        let tail = read_range(&self.path, mark.offset, log.len)?;
        let mut offset = 0usize;
        while offset < tail.len() {
            let (_, mutation, len) = decode_record(&tail[offset..])?;
            let record = encode_record(Lsn(lsn), &mutation)?;
            temp.write_all(&record)?;
            written += record.len() as u64;
            lsn += 1;
            offset += len;
        }
        let temp = temp.into_inner().map_err(|e| e.into_error())?;
        temp.sync_all()?;
        drop(temp);

        std::fs::rename(&temp_path, &self.path)?;
        match OpenOptions::new().append(true).open(&self.path) {
            Ok(file) => {
                log.file = file;
                log.len = written;
                log.generation += 1;
                log.poisoned = false;
                self.next_lsn.store(lsn, Ordering::SeqCst);
            }
            Err(e) => {
                log.poisoned = true;
                return Err(e.into());
            }
        }

        tracing::debug!(
            "Compacted point log to {} records ({} bytes appended during compaction)",
            lsn - 1,
            tail.len()
        );
        Ok(true)
    }

    /// Flush written records to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_lsn(&self) -> Lsn {
        Lsn(self.next_lsn.load(Ordering::SeqCst))
    }

    #[cfg(test)]
    fn set_failpoint(&self, failpoint: Option<Failpoint>) {
        *self.failpoint.lock() = failpoint;
    }
}

fn read_range(path: &Path, start: u64, end: u64) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; end.saturating_sub(start) as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

// =============================================================================
// Fault Injection
// =============================================================================

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failpoint {
    /// Write the first bytes of the record, then fail.
    ShortWrite(usize),
    /// Write the whole record, then fail the sync.
    SyncFailure,
    /// A short write whose rollback fails too.
    StuckWrite(usize),
}

#[cfg(test)]
impl Failpoint {
    fn write(self, file: &mut File, record: &[u8]) -> std::io::Result<()> {
        match self {
            Failpoint::ShortWrite(n) | Failpoint::StuckWrite(n) => {
                file.write_all(&record[..n.min(record.len())])?
            }
            Failpoint::SyncFailure => file.write_all(record)?,
        }
        Err(std::io::Error::other("injected write failure"))
    }
}

// =============================================================================
// Tests
// =============================================================================
