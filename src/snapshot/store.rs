use crate::fs_util;
use crate::peer::{Checksum, SegmentId};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

const EXTENSION: &str = "snapshot";
const TEMP_EXTENSION: &str = "snapshot.tmp";
const MAGIC: &[u8; 4] = b"MSNP";
const FORMAT_VERSION: u8 = 1;
// magic + format + snapshot id + prev record count + checksum + data length
const HEADER_LEN: usize = 4 + 1 + 4 + 4 + 4 + 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Size of the serialized state, not counting the file header.
    pub length: u64,
    /// Records in the segment that this snapshot sealed.
    pub prev_record_count: u32,
    pub checksum: Checksum,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum SnapshotError {
    #[error("Snapshot {0} does not exist")]
    NoSuchSnapshot(SegmentId),
    #[error("Snapshot {id} is corrupt: {reason}")]
    Corrupt { id: SegmentId, reason: String },
    #[error("Snapshot {id} checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        id: SegmentId,
        expected: Checksum,
        computed: Checksum,
    },
    #[error("IO failure on snapshot: {0}")]
    Io(#[from] io::Error),
}

/// Snapshot files, one per id. Files only appear under their final name once fully written.
pub(crate) struct SnapshotStore {
    logger: slog::Logger,
    directory: PathBuf,
}

impl SnapshotStore {
    /// Leftover temp files from an interrupted write are deleted.
    pub(crate) fn new(logger: slog::Logger, directory: PathBuf) -> Result<Self, SnapshotError> {
        fs::create_dir_all(&directory)?;

        for id in fs_util::numbered_files(&directory, TEMP_EXTENSION)? {
            slog::warn!(logger, "Removing incomplete snapshot {}", id);
            fs_util::remove_file_if_exists(&directory.join(fs_util::numbered_file_name(id, TEMP_EXTENSION)))?;
        }

        Ok(SnapshotStore { logger, directory })
    }

    pub(crate) fn snapshot_ids(&self) -> Result<Vec<SegmentId>, SnapshotError> {
        Ok(fs_util::numbered_files(&self.directory, EXTENSION)?)
    }

    pub(crate) fn max_snapshot_id(&self) -> Result<Option<SegmentId>, SnapshotError> {
        Ok(self.snapshot_ids()?.last().copied())
    }

    /// Newest snapshot whose id is at most `max_id`.
    pub(crate) fn latest_snapshot_id_at_most(&self, max_id: SegmentId) -> Result<Option<SegmentId>, SnapshotError> {
        Ok(self.snapshot_ids()?.into_iter().filter(|id| *id <= max_id).last())
    }

    pub(crate) fn info(&self, id: SegmentId) -> Result<SnapshotInfo, SnapshotError> {
        let mut file = self.open(id)?;
        read_header(&mut file, id)
    }

    /// Reads up to `length` bytes of serialized state at `offset`. Short or empty past the end.
    pub(crate) fn read(&self, id: SegmentId, offset: u64, length: u32) -> Result<Bytes, SnapshotError> {
        let mut file = self.open(id)?;
        let info = read_header(&mut file, id)?;
        if offset >= info.length {
            return Ok(Bytes::new());
        }

        let to_read = (info.length - offset).min(u64::from(length)) as usize;
        file.seek(SeekFrom::Start(HEADER_LEN as u64 + offset))?;
        let mut buf = vec![0u8; to_read];
        file.read_exact(&mut buf)?;

        Ok(Bytes::from(buf))
    }

    /// Reads the whole snapshot and verifies its checksum.
    pub(crate) fn load(&self, id: SegmentId) -> Result<(SnapshotInfo, Bytes), SnapshotError> {
        let mut file = self.open(id)?;
        let info = read_header(&mut file, id)?;

        let stored = file.metadata()?.len().saturating_sub(HEADER_LEN as u64);
        if stored != info.length {
            return Err(SnapshotError::Corrupt {
                id,
                reason: format!("expected {} bytes of state, file holds {}", info.length, stored),
            });
        }

        let mut data = Vec::with_capacity(stored as usize);
        file.read_to_end(&mut data)?;
        if data.len() as u64 != info.length {
            return Err(SnapshotError::Corrupt {
                id,
                reason: format!("expected {} bytes of state, found {}", info.length, data.len()),
            });
        }
        let computed = crc32fast::hash(&data);
        if computed != info.checksum {
            return Err(SnapshotError::ChecksumMismatch {
                id,
                expected: info.checksum,
                computed,
            });
        }

        Ok((info, Bytes::from(data)))
    }

    pub(crate) fn write(
        &self,
        id: SegmentId,
        prev_record_count: u32,
        data: &[u8],
    ) -> Result<SnapshotInfo, SnapshotError> {
        let info = SnapshotInfo {
            length: data.len() as u64,
            prev_record_count,
            checksum: crc32fast::hash(data),
        };

        let mut writer = self.writer(id, info)?;
        writer.append(data)?;
        writer.finish()?;

        Ok(info)
    }

    /// Starts writing a snapshot whose header is already known, e.g. one downloaded in blocks
    /// from another peer. Nothing is visible until `finish()` verifies the content.
    pub(crate) fn writer(&self, id: SegmentId, info: SnapshotInfo) -> Result<SnapshotWriter, SnapshotError> {
        let temp_path = self.path(id, TEMP_EXTENSION);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&encode_header(id, &info))?;

        Ok(SnapshotWriter {
            id,
            expected: info,
            file,
            temp_path,
            final_path: self.path(id, EXTENSION),
            hasher: crc32fast::Hasher::new(),
            written: 0,
            finished: false,
        })
    }

    pub(crate) fn remove(&self, id: SegmentId) -> Result<(), SnapshotError> {
        fs_util::remove_file_if_exists(&self.path(id, EXTENSION))?;
        slog::info!(self.logger, "Removed snapshot {}", id);
        Ok(())
    }

    fn open(&self, id: SegmentId) -> Result<File, SnapshotError> {
        match File::open(self.path(id, EXTENSION)) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SnapshotError::NoSuchSnapshot(id)),
            Err(e) => Err(e.into()),
        }
    }

    fn path(&self, id: SegmentId, extension: &str) -> PathBuf {
        self.directory.join(fs_util::numbered_file_name(id, extension))
    }
}

pub(crate) struct SnapshotWriter {
    id: SegmentId,
    expected: SnapshotInfo,
    file: File,
    temp_path: PathBuf,
    final_path: PathBuf,
    hasher: crc32fast::Hasher,
    written: u64,
    finished: bool,
}

impl SnapshotWriter {
    pub(crate) fn append(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        self.file.write_all(data)?;
        self.hasher.update(data);
        self.written += data.len() as u64;
        Ok(())
    }

    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    pub(crate) fn finish(mut self) -> Result<(), SnapshotError> {
        if self.written != self.expected.length {
            return Err(SnapshotError::Corrupt {
                id: self.id,
                reason: format!("expected {} bytes of state, got {}", self.expected.length, self.written),
            });
        }
        let computed = self.hasher.clone().finalize();
        if computed != self.expected.checksum {
            return Err(SnapshotError::ChecksumMismatch {
                id: self.id,
                expected: self.expected.checksum,
                computed,
            });
        }

        self.file.sync_all()?;
        fs::rename(&self.temp_path, &self.final_path)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs_util::remove_file_if_exists(&self.temp_path);
        }
    }
}

fn encode_header(id: SegmentId, info: &SnapshotInfo) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    buf.put_slice(MAGIC);
    buf.put_u8(FORMAT_VERSION);
    buf.put_u32(id);
    buf.put_u32(info.prev_record_count);
    buf.put_u32(info.checksum);
    buf.put_u64(info.length);
    buf.freeze()
}

fn read_header(file: &mut File, id: SegmentId) -> Result<SnapshotInfo, SnapshotError> {
    let corrupt = |reason: &str| SnapshotError::Corrupt {
        id,
        reason: reason.to_string(),
    };

    let mut raw = [0u8; HEADER_LEN];
    match file.read_exact(&mut raw) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(corrupt("truncated header")),
        Err(e) => return Err(e.into()),
    }

    let mut buf = &raw[..];
    if &buf[..4] != MAGIC {
        return Err(corrupt("bad header magic"));
    }
    buf.advance(4);
    if buf.get_u8() != FORMAT_VERSION {
        return Err(corrupt("unknown format version"));
    }
    if buf.get_u32() != id {
        return Err(corrupt("snapshot id in header doesn't match file name"));
    }
    let prev_record_count = buf.get_u32();
    let checksum = buf.get_u32();
    let length = buf.get_u64();

    Ok(SnapshotInfo {
        length,
        prev_record_count,
        checksum,
    })
}
