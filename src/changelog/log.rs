use crate::peer::{ChangeLogInfo, Epoch, SegmentId};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::convert::TryFrom;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const MAGIC: &[u8; 4] = b"MCLG";
const FORMAT_VERSION: u8 = 1;
// magic + format + segment id + prev record count + epoch
const HEADER_LEN: usize = 4 + 1 + 4 + 4 + 16;
// length + crc32
const FRAME_HEADER_LEN: usize = 4 + 4;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ChangeLogError {
    #[error("Changelog {0} does not exist")]
    NoSuchChangeLog(SegmentId),
    #[error("Changelog {0} already exists")]
    AlreadyExists(SegmentId),
    #[error("Changelog {id} is corrupt: {reason}")]
    Corrupt { id: SegmentId, reason: String },
    #[error("IO failure on changelog: {0}")]
    Io(#[from] io::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ChangeLogHeader {
    pub(crate) segment_id: SegmentId,
    pub(crate) prev_record_count: u32,
    pub(crate) epoch: Epoch,
}

impl ChangeLogHeader {
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_slice(MAGIC);
        buf.put_u8(FORMAT_VERSION);
        buf.put_u32(self.segment_id);
        buf.put_u32(self.prev_record_count);
        buf.put_slice(self.epoch.as_bytes());
        buf.freeze()
    }

    fn decode(mut buf: &[u8], expected_id: SegmentId) -> Result<Self, ChangeLogError> {
        let corrupt = |reason: &str| ChangeLogError::Corrupt {
            id: expected_id,
            reason: reason.to_string(),
        };

        if buf.len() != HEADER_LEN || &buf[..4] != MAGIC {
            return Err(corrupt("bad header magic"));
        }
        buf.advance(4);
        if buf.get_u8() != FORMAT_VERSION {
            return Err(corrupt("unknown format version"));
        }
        let segment_id = buf.get_u32();
        if segment_id != expected_id {
            return Err(corrupt("segment id in header doesn't match file name"));
        }
        let prev_record_count = buf.get_u32();
        let epoch = Epoch::try_from(buf).map_err(|_| corrupt("bad epoch"))?;

        Ok(ChangeLogHeader {
            segment_id,
            prev_record_count,
            epoch,
        })
    }
}

/// One segment of the replicated history, stored as a single append-only file.
///
/// Readers take the shared lock and read through their own file handle, so they only wait on
/// appends and truncations of this segment.
pub(crate) struct ChangeLog {
    path: PathBuf,
    header: ChangeLogHeader,
    inner: RwLock<Inner>,
}

struct Inner {
    file: File,
    // File offset of each record's frame.
    offsets: Vec<u64>,
    end_offset: u64,
}

impl ChangeLog {
    /// Fails with `AlreadyExists` rather than touching an existing file.
    pub(crate) fn create(path: &Path, header: ChangeLogHeader) -> Result<Self, ChangeLogError> {
        let mut file = match OpenOptions::new().read(true).write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ChangeLogError::AlreadyExists(header.segment_id))
            }
            Err(e) => return Err(e.into()),
        };

        file.write_all(&header.encode())?;
        file.sync_all()?;

        Ok(ChangeLog {
            path: path.to_path_buf(),
            header,
            inner: RwLock::new(Inner {
                file,
                offsets: Vec::new(),
                end_offset: HEADER_LEN as u64,
            }),
        })
    }

    /// Opens an existing segment and indexes its records. A torn final record (short frame or
    /// checksum mismatch) is cut off.
    pub(crate) fn open(logger: &slog::Logger, path: &Path, id: SegmentId) -> Result<Self, ChangeLogError> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ChangeLogError::NoSuchChangeLog(id)),
            Err(e) => return Err(e.into()),
        };

        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file.try_clone()?);
        let mut header_buf = [0u8; HEADER_LEN];
        if !read_exact_or_eof(&mut reader, &mut header_buf)? {
            return Err(ChangeLogError::Corrupt {
                id,
                reason: "truncated header".to_string(),
            });
        }
        let header = ChangeLogHeader::decode(&header_buf, id)?;

        let mut offsets = Vec::new();
        let mut end_offset = HEADER_LEN as u64;
        loop {
            let available = file_len.saturating_sub(end_offset + FRAME_HEADER_LEN as u64);
            match read_frame(&mut reader, available)? {
                Frame::Record(data) => {
                    offsets.push(end_offset);
                    end_offset += (FRAME_HEADER_LEN + data.len()) as u64;
                }
                Frame::End => break,
                Frame::Torn => {
                    slog::warn!(
                        logger,
                        "Changelog {} has a torn tail after record {}, truncating at offset {}",
                        id,
                        offsets.len(),
                        end_offset
                    );
                    file.set_len(end_offset)?;
                    file.sync_all()?;
                    break;
                }
            }
        }

        Ok(ChangeLog {
            path: path.to_path_buf(),
            header,
            inner: RwLock::new(Inner {
                file,
                offsets,
                end_offset,
            }),
        })
    }

    /// Swaps the file handle for one that can't be written, so appends fail like a bad disk.
    #[cfg(test)]
    pub(crate) fn reopen_read_only(&self) -> io::Result<()> {
        let mut inner = self.inner.write().expect("ChangeLog lock poisoned");
        inner.file = File::open(&self.path)?;
        Ok(())
    }

    pub(crate) fn id(&self) -> SegmentId {
        self.header.segment_id
    }

    pub(crate) fn prev_record_count(&self) -> u32 {
        self.header.prev_record_count
    }

    pub(crate) fn epoch(&self) -> Epoch {
        self.header.epoch
    }

    pub(crate) fn record_count(&self) -> u32 {
        let inner = self.inner.read().expect("ChangeLog lock poisoned");
        inner.offsets.len() as u32
    }

    pub(crate) fn info(&self) -> ChangeLogInfo {
        ChangeLogInfo {
            record_count: self.record_count(),
            prev_record_count: self.header.prev_record_count,
            epoch: self.header.epoch,
        }
    }

    /// Appends `records` and flushes them to disk before returning.
    pub(crate) fn append(&self, records: &[Bytes]) -> Result<(), ChangeLogError> {
        if records.is_empty() {
            return Ok(());
        }

        let frames_len: usize = records.iter().map(|r| FRAME_HEADER_LEN + r.len()).sum();
        let mut buf = BytesMut::with_capacity(frames_len);
        for record in records {
            buf.put_u32(record.len() as u32);
            buf.put_u32(crc32fast::hash(record));
            buf.put_slice(record);
        }

        let mut inner = self.inner.write().expect("ChangeLog lock poisoned");
        let start_offset = inner.end_offset;
        if let Err(e) = write_durably(&mut inner.file, start_offset, &buf) {
            // Don't leave a partial frame behind for the next append to build on.
            let _ = inner.file.set_len(start_offset);
            return Err(e.into());
        }

        let mut offset = start_offset;
        for record in records {
            inner.offsets.push(offset);
            offset += (FRAME_HEADER_LEN + record.len()) as u64;
        }
        inner.end_offset = offset;

        Ok(())
    }

    /// Reads up to `count` records starting at `start`. Returns fewer (possibly none) if the
    /// segment is shorter.
    pub(crate) fn read(&self, start: u32, count: u32) -> Result<Vec<Bytes>, ChangeLogError> {
        let inner = self.inner.read().expect("ChangeLog lock poisoned");
        let record_count = inner.offsets.len();
        let start = start as usize;
        let end = start.saturating_add(count as usize).min(record_count);
        if start >= end {
            return Ok(Vec::new());
        }

        let start_offset = inner.offsets[start];
        let end_offset = if end == record_count {
            inner.end_offset
        } else {
            inner.offsets[end]
        };

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start_offset))?;
        let mut raw = vec![0u8; (end_offset - start_offset) as usize];
        file.read_exact(&mut raw)?;
        drop(inner);

        let mut raw = Bytes::from(raw);
        let mut records = Vec::with_capacity(end - start);
        while raw.has_remaining() {
            let len = raw.get_u32() as usize;
            let checksum = raw.get_u32();
            let data = raw.split_to(len);
            if crc32fast::hash(&data) != checksum {
                return Err(ChangeLogError::Corrupt {
                    id: self.id(),
                    reason: format!("checksum mismatch at record {}", start + records.len()),
                });
            }
            records.push(data);
        }

        Ok(records)
    }

    /// Drops every record at index `record_count` and beyond.
    pub(crate) fn truncate(&self, record_count: u32) -> Result<(), ChangeLogError> {
        let mut inner = self.inner.write().expect("ChangeLog lock poisoned");
        let record_count = record_count as usize;
        if record_count >= inner.offsets.len() {
            return Ok(());
        }

        let new_end = inner.offsets[record_count];
        inner.file.set_len(new_end)?;
        inner.file.sync_all()?;
        inner.offsets.truncate(record_count);
        inner.end_offset = new_end;

        Ok(())
    }
}

fn write_durably(file: &mut File, offset: u64, buf: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buf)?;
    file.sync_data()
}

enum Frame {
    Record(Bytes),
    End,
    Torn,
}

/// `available` is what's left of the file after the frame header; a longer length is garbage.
fn read_frame<R: Read>(reader: &mut R, available: u64) -> io::Result<Frame> {
    let mut frame_header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        match reader.read(&mut frame_header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    if filled == 0 {
        return Ok(Frame::End);
    }
    if filled < FRAME_HEADER_LEN {
        return Ok(Frame::Torn);
    }

    let mut frame_header = &frame_header[..];
    let len = frame_header.get_u32() as usize;
    let checksum = frame_header.get_u32();
    if len as u64 > available {
        return Ok(Frame::Torn);
    }

    let mut data = vec![0u8; len];
    if !read_exact_or_eof(reader, &mut data)? {
        return Ok(Frame::Torn);
    }
    if crc32fast::hash(&data) != checksum {
        return Ok(Frame::Torn);
    }

    Ok(Frame::Record(Bytes::from(data)))
}

/// Like `read_exact`, but reports running out of input as `false` instead of an error.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
