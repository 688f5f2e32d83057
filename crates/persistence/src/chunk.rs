// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Chunk file format.
//!
//! ```text
//! [Header: 24 bytes][Frame][Frame]...[Seal trailer: 28 bytes]
//! ```
//!
//! Header: magic `u32`, version `u32`, chunk id `u64`, created-at `i64` (ns).
//!
//! Frame: `[len: u32][crc64: u64][payload: len bytes]`, the checksum covering
//! the length bytes and the payload. The payload is one bincode record.
//!
//! Seal trailer: `[0xFFFF_FFFF: u32][record_count: u64][data_bytes: u64][crc64: u64]`.
//! The all-ones length can never start a record frame, so a reader tells the
//! two apart from the first four bytes.
//!
//! An unsealed chunk may end in a torn frame after a crash. `recover` truncates
//! the file back to the last complete frame.

use crate::error::{PersistenceError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc64fast::Digest;
use logpulse_kernel::codec::{decode_record, encode_record};
use logpulse_kernel::{ChunkId, LogRecord, Timestamp};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const CHUNK_MAGIC: u32 = 0x4C50_434B; // LPCK
pub const CHUNK_VERSION: u32 = 1;
pub const CHUNK_EXTENSION: &str = "chunk";

/// Bytes a frame adds around its payload.
pub const FRAME_OVERHEAD: u64 = 4 + 8;

const SEAL_TAG: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_id: ChunkId,
    pub created_at: Timestamp,
}

impl ChunkHeader {
    pub const SIZE: usize = 4 + 4 + 8 + 8;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&CHUNK_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&CHUNK_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.chunk_id.0.to_le_bytes());
        buf[16..24].copy_from_slice(&self.created_at.0.to_le_bytes());
        buf
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                PersistenceError::InvalidFormat("truncated chunk header".into())
            }
            _ => PersistenceError::Io(e),
        })?;

        let mut cursor = &buf[..];
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != CHUNK_MAGIC {
            return Err(PersistenceError::InvalidMagic);
        }
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != CHUNK_VERSION {
            return Err(PersistenceError::InvalidFormat(format!(
                "unsupported chunk version {}",
                version
            )));
        }
        let chunk_id = ChunkId(cursor.read_u64::<LittleEndian>()?);
        let created_at = Timestamp(cursor.read_i64::<LittleEndian>()?);

        Ok(Self { chunk_id, created_at })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealTrailer {
    pub record_count: u64,
    pub data_bytes: u64,
}

impl SealTrailer {
    pub const SIZE: usize = 4 + 8 + 8 + 8;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&SEAL_TAG.to_le_bytes());
        buf[4..12].copy_from_slice(&self.record_count.to_le_bytes());
        buf[12..20].copy_from_slice(&self.data_bytes.to_le_bytes());
        let mut digest = Digest::new();
        digest.write(&buf[0..20]);
        buf[20..28].copy_from_slice(&digest.sum64().to_le_bytes());
        buf
    }

    /// `None` unless the bytes are a well-formed trailer.
    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Option<Self> {
        let mut cursor = &buf[..];
        let tag = cursor.read_u32::<LittleEndian>().ok()?;
        let record_count = cursor.read_u64::<LittleEndian>().ok()?;
        let data_bytes = cursor.read_u64::<LittleEndian>().ok()?;
        let stored = cursor.read_u64::<LittleEndian>().ok()?;

        let mut digest = Digest::new();
        digest.write(&buf[0..20]);
        if tag != SEAL_TAG || digest.sum64() != stored {
            return None;
        }
        Some(Self { record_count, data_bytes })
    }
}

/// Chunk metadata as reported by `ChunkStore::list_chunks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    pub id: ChunkId,
    pub created_at: Timestamp,
    /// Framed record bytes; the quantity bounded by the chunk size limit.
    pub data_bytes: u64,
    pub record_count: u64,
    pub sealed: bool,
    /// Whole file length including header and trailer.
    pub disk_bytes: u64,
}

pub fn chunk_file_name(id: ChunkId) -> String {
    format!("{}.{}", id, CHUNK_EXTENSION)
}

pub fn parse_chunk_file_name(name: &str) -> Option<ChunkId> {
    let stem = name.strip_suffix(CHUNK_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok().map(ChunkId)
}

fn frame_checksum(len_bytes: &[u8; 4], payload: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(len_bytes);
    digest.write(payload);
    digest.sum64()
}

/// Serialize one record into a complete frame.
pub fn encode_frame(record: &LogRecord) -> Result<Vec<u8>> {
    let payload = encode_record(record)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len != SEAL_TAG)
        .ok_or_else(|| {
            PersistenceError::InvalidFormat(format!("record too large: {} bytes", payload.len()))
        })?;
    let len_bytes = len.to_le_bytes();

    let mut frame = Vec::with_capacity(FRAME_OVERHEAD as usize + payload.len());
    frame.write_u32::<LittleEndian>(len)?;
    frame.write_u64::<LittleEndian>(frame_checksum(&len_bytes, &payload))?;
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Size a record occupies in a chunk's data region.
pub fn frame_len(record: &LogRecord) -> Result<u64> {
    Ok(FRAME_OVERHEAD + encode_record(record)?.len() as u64)
}

enum Frame {
    Record(Vec<u8>),
    Seal(SealTrailer),
    End,
    Torn,
    Corrupt { expected: u64, found: u64 },
}

// Read until `buf` is full or EOF; returns bytes read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

struct FrameCursor<R> {
    reader: R,
    offset: u64,
    file_len: u64,
}

impl<R: Read> FrameCursor<R> {
    fn next_frame(&mut self) -> Result<Frame> {
        let mut len_bytes = [0u8; 4];
        match read_up_to(&mut self.reader, &mut len_bytes)? {
            0 => return Ok(Frame::End),
            4 => {}
            _ => return Ok(Frame::Torn),
        }
        let len = u32::from_le_bytes(len_bytes);

        if len == SEAL_TAG {
            let mut buf = [0u8; SealTrailer::SIZE];
            buf[0..4].copy_from_slice(&len_bytes);
            if read_up_to(&mut self.reader, &mut buf[4..])? != SealTrailer::SIZE - 4 {
                return Ok(Frame::Torn);
            }
            return Ok(match SealTrailer::from_bytes(&buf) {
                Some(trailer) => {
                    self.offset += SealTrailer::SIZE as u64;
                    Frame::Seal(trailer)
                }
                None => Frame::Torn,
            });
        }

        let frame_end = self.offset + FRAME_OVERHEAD + len as u64;
        if frame_end > self.file_len {
            return Ok(Frame::Torn);
        }

        let mut crc_bytes = [0u8; 8];
        if read_up_to(&mut self.reader, &mut crc_bytes)? != crc_bytes.len() {
            return Ok(Frame::Torn);
        }
        let expected = u64::from_le_bytes(crc_bytes);

        let mut payload = vec![0u8; len as usize];
        if read_up_to(&mut self.reader, &mut payload)? != payload.len() {
            return Ok(Frame::Torn);
        }

        let found = frame_checksum(&len_bytes, &payload);
        if found != expected {
            return Ok(Frame::Corrupt { expected, found });
        }

        self.offset = frame_end;
        Ok(Frame::Record(payload))
    }
}

/// Result of walking a chunk file frame by frame.
#[derive(Debug, Clone)]
pub struct ChunkScan {
    pub header: ChunkHeader,
    pub record_count: u64,
    pub data_bytes: u64,
    /// Offset just past the last complete frame (or the trailer).
    pub valid_len: u64,
    pub file_len: u64,
    pub trailer: Option<SealTrailer>,
    pub torn: bool,
}

impl ChunkScan {
    pub fn meta(&self) -> ChunkMeta {
        ChunkMeta {
            id: self.header.chunk_id,
            created_at: self.header.created_at,
            data_bytes: self.data_bytes,
            record_count: self.record_count,
            sealed: self.trailer.is_some(),
            disk_bytes: self.valid_len,
        }
    }
}

pub fn scan_chunk(path: &Path) -> Result<ChunkScan> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let header = ChunkHeader::read_from(&mut reader)?;

    let mut cursor = FrameCursor {
        reader,
        offset: ChunkHeader::SIZE as u64,
        file_len,
    };
    let mut record_count = 0;
    let mut data_bytes = 0;
    let mut trailer = None;
    let mut torn = false;

    loop {
        match cursor.next_frame()? {
            Frame::Record(payload) => {
                record_count += 1;
                data_bytes += FRAME_OVERHEAD + payload.len() as u64;
            }
            Frame::Seal(t) => {
                if t.record_count != record_count || t.data_bytes != data_bytes {
                    return Err(PersistenceError::InvalidFormat(format!(
                        "seal trailer of chunk {} disagrees with contents",
                        header.chunk_id
                    )));
                }
                trailer = Some(t);
                break;
            }
            Frame::End => break,
            Frame::Torn | Frame::Corrupt { .. } => {
                torn = true;
                break;
            }
        }
    }

    Ok(ChunkScan {
        header,
        record_count,
        data_bytes,
        valid_len: cursor.offset,
        file_len,
        trailer,
        torn,
    })
}

/// Scan and truncate a torn tail back to the last complete frame.
pub fn recover(path: &Path) -> Result<ChunkScan> {
    let scan = scan_chunk(path)?;
    if scan.torn || (scan.trailer.is_none() && scan.valid_len < scan.file_len) {
        tracing::warn!(
            "Truncating torn tail of {:?}: {} -> {} bytes",
            path,
            scan.file_len,
            scan.valid_len
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(scan.valid_len)?;
        file.sync_all()?;
    }
    Ok(ChunkScan {
        file_len: scan.valid_len,
        ..scan
    })
}

/// Seal a chunk file that is not held open by a store. Idempotent.
pub fn seal_file(path: &Path) -> Result<SealTrailer> {
    let scan = recover(path)?;
    if let Some(trailer) = scan.trailer {
        return Ok(trailer);
    }

    let trailer = SealTrailer {
        record_count: scan.record_count,
        data_bytes: scan.data_bytes,
    };
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(&trailer.to_bytes())?;
    file.sync_all()?;
    Ok(trailer)
}

/// Read metadata, using the trailer directly when the chunk is sealed.
pub fn read_meta(path: &Path) -> Result<ChunkMeta> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let header = ChunkHeader::read_from(&mut file)?;

    if file_len >= (ChunkHeader::SIZE + SealTrailer::SIZE) as u64 {
        let mut buf = [0u8; SealTrailer::SIZE];
        file.seek(SeekFrom::End(-(SealTrailer::SIZE as i64)))?;
        file.read_exact(&mut buf)?;
        if let Some(trailer) = SealTrailer::from_bytes(&buf) {
            return Ok(ChunkMeta {
                id: header.chunk_id,
                created_at: header.created_at,
                data_bytes: trailer.data_bytes,
                record_count: trailer.record_count,
                sealed: true,
                disk_bytes: file_len,
            });
        }
    }

    Ok(scan_chunk(path)?.meta())
}

/// Sequential record reader over one chunk file.
pub struct ChunkReader {
    header: ChunkHeader,
    cursor: FrameCursor<BufReader<File>>,
    done: bool,
}

impl ChunkReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let header = ChunkHeader::read_from(&mut reader)?;
        Ok(Self {
            header,
            cursor: FrameCursor {
                reader,
                offset: ChunkHeader::SIZE as u64,
                file_len,
            },
            done: false,
        })
    }

    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }
}

impl Iterator for ChunkReader {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match self.cursor.next_frame() {
            Ok(Frame::Record(payload)) => return Some(decode_record(&payload).map_err(Into::into)),
            Ok(Frame::Seal(_)) | Ok(Frame::End) => None,
            Ok(Frame::Torn) => Some(Err(PersistenceError::InvalidFormat(format!(
                "torn frame at offset {}",
                self.cursor.offset
            )))),
            Ok(Frame::Corrupt { expected, found }) => {
                Some(Err(PersistenceError::ChecksumMismatch { expected, found }))
            }
            Err(e) => Some(Err(e)),
        };
        self.done = true;
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpulse_kernel::LabelSet;
    use tempfile::tempdir;

    fn record(i: u32) -> LogRecord {
        let labels = LabelSet::from_pairs(vec![("app", "test")]).unwrap();
        LogRecord::new(Timestamp(1_000 + i as i64), labels, format!("line {}", i))
    }

    fn write_chunk(path: &Path, records: &[LogRecord], sealed: bool) {
        let header = ChunkHeader {
            chunk_id: ChunkId(3),
            created_at: Timestamp(99),
        };
        let mut bytes = header.to_bytes().to_vec();
        let mut data_bytes = 0;
        for r in records {
            let frame = encode_frame(r).unwrap();
            data_bytes += frame.len() as u64;
            bytes.extend_from_slice(&frame);
        }
        if sealed {
            let trailer = SealTrailer {
                record_count: records.len() as u64,
                data_bytes,
            };
            bytes.extend_from_slice(&trailer.to_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_file_names() {
        assert_eq!(chunk_file_name(ChunkId(7)), "00000000000000000007.chunk");
        assert_eq!(parse_chunk_file_name("00000000000000000007.chunk"), Some(ChunkId(7)));
        assert_eq!(parse_chunk_file_name("7.chunk"), Some(ChunkId(7)));
        assert_eq!(parse_chunk_file_name("00000000000000000007.chunk.tmp"), None);
        assert_eq!(parse_chunk_file_name("notes.chunk"), None);
        assert_eq!(parse_chunk_file_name(".chunk"), None);
    }

    #[test]
    fn test_frame_len_matches_encoding() {
        let r = record(1);
        assert_eq!(frame_len(&r).unwrap(), encode_frame(&r).unwrap().len() as u64);
    }

    #[test]
    fn test_trailer_rejects_bit_flip() {
        let trailer = SealTrailer { record_count: 5, data_bytes: 1000 };
        let mut bytes = trailer.to_bytes();
        assert_eq!(SealTrailer::from_bytes(&bytes), Some(trailer));

        bytes[6] ^= 0x01;
        assert_eq!(SealTrailer::from_bytes(&bytes), None);
    }

    #[test]
    fn test_sealed_chunk_meta_from_trailer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(chunk_file_name(ChunkId(3)));
        let records: Vec<_> = (0..4).map(record).collect();
        write_chunk(&path, &records, true);

        let meta = read_meta(&path).unwrap();
        assert!(meta.sealed);
        assert_eq!(meta.id, ChunkId(3));
        assert_eq!(meta.created_at, Timestamp(99));
        assert_eq!(meta.record_count, 4);

        let scanned = scan_chunk(&path).unwrap().meta();
        assert_eq!(scanned, meta);
    }

    #[test]
    fn test_recover_truncates_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(chunk_file_name(ChunkId(3)));
        let records: Vec<_> = (0..3).map(record).collect();
        write_chunk(&path, &records, false);
        let intact_len = std::fs::metadata(&path).unwrap().len();

        // Half of a fourth frame, as if the process died mid-write.
        let frame = encode_frame(&record(3)).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&frame[..frame.len() / 2]).unwrap();
        drop(file);

        let scan = recover(&path).unwrap();
        assert!(scan.torn);
        assert_eq!(scan.record_count, 3);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact_len);

        let read: Vec<_> = ChunkReader::open(&path).unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(read, records);
    }

    #[test]
    fn test_recover_truncates_corrupt_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(chunk_file_name(ChunkId(3)));
        let records: Vec<_> = (0..2).map(record).collect();
        write_chunk(&path, &records, false);

        // Flip a payload byte of the last frame.
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let reader_err = ChunkReader::open(&path).unwrap().nth(1).unwrap();
        assert!(matches!(reader_err, Err(PersistenceError::ChecksumMismatch { .. })));

        let scan = recover(&path).unwrap();
        assert!(scan.torn);
        assert_eq!(scan.record_count, 1);
    }

    #[test]
    fn test_seal_file_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(chunk_file_name(ChunkId(3)));
        let records: Vec<_> = (0..2).map(record).collect();
        write_chunk(&path, &records, false);

        let first = seal_file(&path).unwrap();
        let len_after_first = std::fs::metadata(&path).unwrap().len();
        let second = seal_file(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.record_count, 2);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len_after_first);
        assert!(read_meta(&path).unwrap().sealed);
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.chunk");
        std::fs::write(&path, [0u8; ChunkHeader::SIZE]).unwrap();
        assert!(matches!(read_meta(&path), Err(PersistenceError::InvalidMagic)));

        std::fs::write(&path, [0u8; 5]).unwrap();
        assert!(matches!(read_meta(&path), Err(PersistenceError::InvalidFormat(_))));
    }
}
