use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Encode a single record to [len][bincode][crc32] format.
fn encode_record<E: Serialize>(writer: &mut impl Write, record: &E) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Result of scanning a log: every valid record plus the byte length of the
/// valid prefix.
pub struct Replay<E> {
    pub records: Vec<E>,
    pub valid_len: u64,
    pub file_len: u64,
}

impl<E> Replay<E> {
    pub fn has_torn_tail(&self) -> bool {
        self.valid_len < self.file_len
    }
}

/// Storage a [`Wal`] appends to.
pub trait LogFile: Write {
    fn sync(&self) -> io::Result<()>;
    fn truncate(&self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append-only write-ahead log of `E` records.
///
/// Format per entry: `[u32: len][bincode: E][u32: crc32]`. A torn or corrupt
/// tail left by a crash is cut off when the log is opened, so new appends
/// never land behind unreadable bytes.
///
/// Records are buffered until [`Wal::flush_sync`]. A failed flush drops the
/// buffered records and cuts the file back to the last synced length; they are
/// never written by a later flush.
pub struct Wal<E, F = File> {
    file: F,
    pending: Vec<u8>,
    durable_len: u64,
    /// Set when a failed flush could not be rolled back. Every later append
    /// fails until the log is reopened.
    poisoned: bool,
    path: PathBuf,
    appends_since_compact: u64,
    _record: PhantomData<fn() -> E>,
}

impl<E: Serialize + DeserializeOwned> Wal<E> {
    /// Replay the log at `path`, truncate any torn tail, and open it for appending.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<E>)> {
        let replay = Self::replay(path)?;
        if replay.has_torn_tail() {
            warn!(
                path = %path.display(),
                valid_len = replay.valid_len,
                file_len = replay.file_len,
                "truncating torn WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut wal = Self::with_file(file, path);
        wal.durable_len = replay.valid_len;
        Ok((wal, replay.records))
    }

    /// Write a compacted log to a sibling temp file and fsync it.
    pub fn write_compact_file(path: &Path, records: &[E]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            encode_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the log and reopen it for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.flush_sync()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.file = file;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, records: &[E]) -> io::Result<()> {
        Self::write_compact_file(&self.path, records)?;
        self.swap_compact_file()
    }

    /// Scan the log, stopping at the first truncated or corrupt entry.
    pub fn replay(path: &Path) -> io::Result<Replay<E>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Replay { records: Vec::new(), valid_len: 0, file_len: 0 });
            }
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut valid_len = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if (valid_len + 8 + len as u64) > file_len {
                break; // length runs past EOF
            }

            let mut payload = vec![0u8; len];
            if !read_or_eof(&mut reader, &mut payload)? {
                break;
            }
            let mut crc_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }
            match bincode::deserialize::<E>(&payload) {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
            valid_len += 8 + len as u64;
        }

        Ok(Replay { records, valid_len, file_len })
    }
}

impl<E: Serialize, F: LogFile> Wal<E, F> {
    /// Wrap an empty log file.
    pub fn with_file(file: F, path: &Path) -> Self {
        Self {
            file,
            pending: Vec::new(),
            durable_len: 0,
            poisoned: false,
            path: path.to_path_buf(),
            appends_since_compact: 0,
            _record: PhantomData,
        }
    }

    /// Append and fsync a single record. Production code batches through
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, record: &E) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record without flushing. Call `flush_sync()` after the batch.
    pub fn append_buffered(&mut self, record: &E) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(
                "WAL rejected append: an earlier failed flush could not be rolled back",
            ));
        }
        encode_record(&mut self.pending, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Write every buffered record and fsync. On failure the buffered records
    /// are discarded.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        let result = self
            .file
            .write_all(&self.pending)
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync());
        match result {
            Ok(()) => {
                self.durable_len += self.pending.len() as u64;
                self.pending.clear();
                Ok(())
            }
            Err(e) => {
                self.discard_pending();
                Err(e)
            }
        }
    }

    /// Drop buffered records and cut off whatever part of them reached the
    /// file.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        let rolled_back = self
            .file
            .truncate(self.durable_len)
            .and_then(|()| self.file.sync());
        if let Err(e) = rolled_back {
            warn!(
                path = %self.path.display(),
                durable_len = self.durable_len,
                "could not roll back failed WAL flush, refusing further appends: {e}"
            );
            self.poisoned = true;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

/// `Ok(false)` on a clean or partial EOF.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
