use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{KvError, KvResult};
use crate::traits::{
    order_and_limit, CompactionReport, OrderedKv, ScanIter, ScanOptions, ScanRecord,
};

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Flush/sync strategy applied after every write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    EveryWrite,
    /// Hand the write to the OS page cache only.
    #[default]
    OsDefault,
}

/// Configuration for [`LogKv`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogKvConfig {
    pub sync_mode: SyncMode,
}

/// A single log record.
///
/// On-disk framing:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized LogRecord)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum LogRecord {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

/// Where the live record for a key sits in the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct EntryLocation {
    offset: u64,
    len: u32,
}

/// Append target of the log. A frame is written with one `write_all`, so
/// nothing is buffered between appends.
trait LogSink: Write + Send {
    /// Cut the file back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LogSink for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

struct LogWriter {
    sink: Box<dyn LogSink>,
    /// Current end of the log.
    offset: u64,
    /// Set when a failed append could not be cut off the file.
    failed: bool,
}

/// Index and the read handle its offsets refer to. Compaction swaps both
/// under one write lock.
struct LogState {
    index: BTreeMap<String, EntryLocation>,
    reader: Arc<Mutex<File>>,
}

/// Append-only, log-structured ordered store.
///
/// Every put or delete is appended to a single file as a CRC-framed record.
/// A sorted in-memory index maps each live key to its record. On open the
/// file is replayed front to back to rebuild the index; a torn tail left by
/// a crash is cut off. Scans snapshot the index range and read each value
/// from disk only when the caller pulls it, re-checking the CRC and the key.
///
/// An append that fails is cut off the file before the error is returned,
/// so the log never holds a record its caller was told had failed. If that
/// cut itself fails the engine refuses further writes.
pub struct LogKv {
    path: PathBuf,
    state: RwLock<LogState>,
    writer: Mutex<LogWriter>,
    config: LogKvConfig,
}

impl LogKv {
    /// Open (or create) the log at `path` and rebuild the index.
    pub fn open(path: &Path, config: LogKvConfig) -> KvResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (index, valid_len) = replay(path)?;
        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "discarding torn log tail"
            );
            file.set_len(valid_len)?;
        }

        let reader = File::open(path)?;
        info!(path = %path.display(), keys = index.len(), bytes = valid_len, "log kv opened");

        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(LogState {
                index,
                reader: Arc::new(Mutex::new(reader)),
            }),
            writer: Mutex::new(LogWriter {
                sink: Box::new(file),
                offset: valid_len,
                failed: false,
            }),
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.index.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current size of the log file in bytes.
    pub fn size_bytes(&self) -> KvResult<u64> {
        Ok(self.lock_writer()?.offset)
    }

    /// Rewrite the log so it holds only the live record of each key.
    ///
    /// Writers are blocked for the duration. Reads and scans started earlier
    /// keep using the previous file through their own handle.
    fn rewrite(&self) -> KvResult<CompactionReport> {
        let mut w = self.lock_writer()?;
        if w.failed {
            return Err(KvError::WriterFailed { offset: w.offset });
        }
        let bytes_before = w.offset;

        let (snapshot, reader): (Vec<(String, EntryLocation)>, _) = {
            let state = self.read_state()?;
            (
                state.index.iter().map(|(k, loc)| (k.clone(), *loc)).collect(),
                Arc::clone(&state.reader),
            )
        };

        let tmp_path = self.path.with_extension("compact");
        let mut out = BufWriter::new(File::create(&tmp_path)?);
        let mut new_index = BTreeMap::new();
        let mut offset = 0u64;
        {
            let mut file = reader.lock().map_err(|_| KvError::Poisoned("log reader"))?;
            for (key, loc) in snapshot {
                let payload = read_payload(&mut file, loc)?;
                let len = write_frame(&mut out, &payload)?;
                new_index.insert(key, EntryLocation { offset, len });
                offset += HEADER_SIZE as u64 + u64::from(len);
            }
        }
        out.flush()?;
        out.get_ref().sync_all()?;
        drop(out);

        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        let reader = File::open(&self.path)?;
        w.sink = Box::new(file);
        w.offset = offset;

        let live_keys = new_index.len();
        *self.state.write().map_err(|_| KvError::Poisoned("log index"))? = LogState {
            index: new_index,
            reader: Arc::new(Mutex::new(reader)),
        };

        info!(live_keys, bytes_before, bytes_after = offset, "log kv compacted");
        Ok(CompactionReport {
            live_keys,
            bytes_before,
            bytes_after: offset,
        })
    }

    fn lock_writer(&self) -> KvResult<MutexGuard<'_, LogWriter>> {
        self.writer.lock().map_err(|_| KvError::Poisoned("log writer"))
    }

    fn read_state(&self) -> KvResult<RwLockReadGuard<'_, LogState>> {
        self.state.read().map_err(|_| KvError::Poisoned("log index"))
    }

    /// Append one record and return its location.
    fn append(&self, w: &mut LogWriter, record: &LogRecord) -> KvResult<EntryLocation> {
        if w.failed {
            return Err(KvError::WriterFailed { offset: w.offset });
        }
        let payload =
            bincode::serialize(record).map_err(|e| KvError::Serialization(e.to_string()))?;
        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        let len = write_frame(&mut frame, &payload)?;
        let offset = w.offset;

        if let Err(e) = self.write_out(w.sink.as_mut(), &frame) {
            match w.sink.truncate(offset) {
                Ok(()) => warn!(offset, error = %e, "log append failed; partial record removed"),
                Err(cut) => {
                    w.failed = true;
                    error!(offset, error = %e, cut_error = %cut, "log append failed and could not be undone; writes disabled");
                }
            }
            return Err(e.into());
        }

        w.offset += frame.len() as u64;
        debug!(offset, len, "log append");
        Ok(EntryLocation { offset, len })
    }

    fn write_out(&self, sink: &mut dyn LogSink, frame: &[u8]) -> io::Result<()> {
        sink.write_all(frame)?;
        sink.flush()?;
        if self.config.sync_mode == SyncMode::EveryWrite {
            sink.sync()?;
        }
        Ok(())
    }
}

impl OrderedKv for LogKv {
    fn get(&self, key: &str) -> KvResult<Option<Bytes>> {
        let (loc, reader) = {
            let state = self.read_state()?;
            match state.index.get(key) {
                Some(loc) => (*loc, Arc::clone(&state.reader)),
                None => return Ok(None),
            }
        };
        read_value(&reader, key, loc).map(Some)
    }

    fn put(&self, key: &str, value: Bytes) -> KvResult<()> {
        let record = LogRecord::Put {
            key: key.to_string(),
            value: value.to_vec(),
        };
        let mut w = self.lock_writer()?;
        let loc = self.append(&mut w, &record)?;
        self.state
            .write()
            .map_err(|_| KvError::Poisoned("log index"))?
            .index
            .insert(key.to_string(), loc);
        Ok(())
    }

    fn delete(&self, key: &str) -> KvResult<bool> {
        let mut w = self.lock_writer()?;
        if !self.read_state()?.index.contains_key(key) {
            return Ok(false);
        }
        self.append(
            &mut w,
            &LogRecord::Delete {
                key: key.to_string(),
            },
        )?;
        self.state
            .write()
            .map_err(|_| KvError::Poisoned("log index"))?
            .index
            .remove(key);
        Ok(true)
    }

    fn scan(&self, options: &ScanOptions) -> KvResult<ScanIter> {
        let Some(bounds) = options.bounds() else {
            return Ok(Box::new(std::iter::empty()));
        };
        let (snapshot, reader): (Vec<(String, EntryLocation)>, _) = {
            let state = self.read_state()?;
            (
                state
                    .index
                    .range::<str, _>(bounds)
                    .map(|(k, loc)| (k.clone(), *loc))
                    .collect(),
                Arc::clone(&state.reader),
            )
        };
        let snapshot = order_and_limit(snapshot, options);

        if !options.values {
            return Ok(Box::new(snapshot.into_iter().map(|(key, _)| {
                Ok(ScanRecord {
                    key: Some(key),
                    value: None,
                })
            })));
        }

        Ok(Box::new(LogScan {
            items: snapshot.into_iter(),
            reader,
            keys: options.keys,
        }))
    }

    fn flush(&self) -> KvResult<()> {
        let mut w = self.lock_writer()?;
        w.sink.flush()?;
        w.sink.sync()?;
        Ok(())
    }

    fn compact(&self) -> KvResult<Option<CompactionReport>> {
        self.rewrite().map(Some)
    }
}

impl std::fmt::Debug for LogKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogKv")
            .field("path", &self.path)
            .field("key_count", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Lazy value scan over a snapshot of index locations.
struct LogScan {
    items: std::vec::IntoIter<(String, EntryLocation)>,
    reader: Arc<Mutex<File>>,
    keys: bool,
}

impl Iterator for LogScan {
    type Item = KvResult<ScanRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, loc) = self.items.next()?;
        Some(read_value(&self.reader, &key, loc).map(|value| ScanRecord {
            key: self.keys.then_some(key),
            value: Some(value),
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

fn write_frame<W: Write>(out: &mut W, payload: &[u8]) -> KvResult<u32> {
    let len = u32::try_from(payload.len())
        .map_err(|_| KvError::Serialization(format!("record of {} bytes too large", payload.len())))?;
    let crc = crc32fast::hash(payload);
    out.write_all(&len.to_le_bytes())?;
    out.write_all(&crc.to_le_bytes())?;
    out.write_all(payload)?;
    Ok(len)
}

/// Read and CRC-check the payload of the record at `loc`.
fn read_payload(file: &mut File, loc: EntryLocation) -> KvResult<Vec<u8>> {
    file.seek(SeekFrom::Start(loc.offset))?;
    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header)?;
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if length != loc.len {
        return Err(KvError::InvalidEntryLength {
            offset: loc.offset,
            length,
        });
    }

    let mut payload = vec![0u8; length as usize];
    file.read_exact(&mut payload)?;
    let actual = crc32fast::hash(&payload);
    if actual != expected {
        return Err(KvError::CrcMismatch {
            offset: loc.offset,
            expected,
            actual,
        });
    }
    Ok(payload)
}

fn read_value(reader: &Mutex<File>, key: &str, loc: EntryLocation) -> KvResult<Bytes> {
    let payload = {
        let mut file = reader.lock().map_err(|_| KvError::Poisoned("log reader"))?;
        read_payload(&mut file, loc)?
    };
    match bincode::deserialize::<LogRecord>(&payload) {
        Ok(LogRecord::Put { key: found, value }) if found == key => Ok(Bytes::from(value)),
        Ok(LogRecord::Put { key: found, .. }) => Err(KvError::MisdirectedIndex {
            key: key.to_string(),
            found,
        }),
        Ok(LogRecord::Delete { .. }) => Err(KvError::DanglingIndex {
            key: key.to_string(),
        }),
        Err(e) => Err(KvError::Serialization(e.to_string())),
    }
}

/// Rebuild the index from the log. Returns the index and the length of the
/// valid prefix of the file; anything after it is a torn write.
fn replay(path: &Path) -> KvResult<(BTreeMap<String, EntryLocation>, u64)> {
    let mut file = BufReader::new(File::open(path)?);
    let file_len = file.get_ref().metadata()?.len();
    let mut index = BTreeMap::new();
    let mut offset: u64 = 0;
    let mut records = 0usize;

    while offset + HEADER_SIZE as u64 <= file_len {
        let mut header = [0u8; HEADER_SIZE];
        match file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE as u64 + u64::from(length) > file_len {
            warn!(offset, length, file_len, "invalid log entry length; stopping replay");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        match file.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(offset, "truncated log entry; stopping replay");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let actual = crc32fast::hash(&payload);
        if actual != expected {
            warn!(offset, expected, actual, "CRC mismatch; stopping replay");
            break;
        }

        match bincode::deserialize::<LogRecord>(&payload) {
            Ok(LogRecord::Put { key, .. }) => {
                index.insert(key, EntryLocation { offset, len: length });
            }
            Ok(LogRecord::Delete { key }) => {
                index.remove(&key);
            }
            Err(e) => {
                warn!(offset, error = %e, "undecodable log record; stopping replay");
                break;
            }
        }

        records += 1;
        offset += HEADER_SIZE as u64 + u64::from(length);
    }

    debug!(records, keys = index.len(), "log replay complete");
    Ok((index, offset))
}
