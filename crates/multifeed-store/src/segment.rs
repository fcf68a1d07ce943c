use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::BlockStorage;

/// Flush/sync strategy for segment files.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// `fsync` after every append (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Configuration for segment files.
#[derive(Clone, Debug, Default)]
pub struct SegmentConfig {
    pub sync_mode: SyncMode,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: u64 = 8;

/// Largest payload a frame header can describe.
const MAX_BLOCK_SIZE: usize = u32::MAX as usize;

#[derive(Clone, Copy, Debug)]
struct BlockLocation {
    /// Offset of the payload (just past the header).
    offset: u64,
    length: u32,
    crc: u32,
}

/// Append-only block file for one feed.
///
/// On-disk format, one frame per block:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload]
/// ```
///
/// On open the file is scanned front-to-back to rebuild the block index. A
/// frame whose length runs past the end of the file is a torn write: it and
/// everything after it is truncated away. A frame whose CRC does not match
/// keeps its slot, so later block indices stay stable, and reading it fails
/// with [`StoreError::CorruptBlock`].
pub struct SegmentFile {
    path: PathBuf,
    writer: BufWriter<File>,
    reader: Mutex<File>,
    index: Vec<BlockLocation>,
    write_offset: u64,
    config: SegmentConfig,
}

impl SegmentFile {
    /// Open (or create) a segment file and recover its block index.
    pub fn open(path: &Path, config: SegmentConfig) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let file_len = file.metadata()?.len();

        let (index, valid_len) = Self::scan(path, file_len)?;
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "torn tail in segment; truncating"
            );
            file.set_len(valid_len)?;
        }

        let reader = File::open(path)?;
        debug!(path = %path.display(), blocks = index.len(), "segment opened");

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            reader: Mutex::new(reader),
            index,
            write_offset: valid_len,
            config,
        })
    }

    fn scan(path: &Path, file_len: u64) -> StoreResult<(Vec<BlockLocation>, u64)> {
        let mut file = BufReader::new(File::open(path)?);
        let mut index = Vec::new();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE <= file_len {
            let mut header = [0u8; HEADER_SIZE as usize];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            let payload_offset = offset + HEADER_SIZE;
            if payload_offset + length as u64 > file_len {
                break;
            }

            let mut payload = vec![0u8; length as usize];
            file.read_exact(&mut payload)?;
            if crc32fast::hash(&payload) != crc {
                warn!(
                    path = %path.display(),
                    block = index.len(),
                    offset,
                    "CRC mismatch in segment; block will be unreadable"
                );
            }

            index.push(BlockLocation {
                offset: payload_offset,
                length,
                crc,
            });
            offset = payload_offset + length as u64;
        }

        Ok((index, offset))
    }

    /// Path to the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, length: u32, crc: u32, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(&length.to_le_bytes())?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(data)?;
        self.writer.flush()?;
        if self.config.sync_mode == SyncMode::EveryWrite {
            self.writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Discard buffered bytes and cut the file back to the end of the last
    /// indexed frame.
    fn truncate_to_last_frame(&mut self) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (file, _unwritten) = stale.into_parts();
        file.set_len(self.write_offset)
    }

    /// Bytes of valid frames in the file.
    pub fn size_bytes(&self) -> u64 {
        self.write_offset
    }
}

impl BlockStorage for SegmentFile {
    fn len(&self) -> u64 {
        self.index.len() as u64
    }

    fn read(&self, index: u64) -> StoreResult<Option<Bytes>> {
        let Some(location) = usize::try_from(index)
            .ok()
            .and_then(|i| self.index.get(i))
            .copied()
        else {
            return Ok(None);
        };

        let mut payload = vec![0u8; location.length as usize];
        {
            let mut reader = self.reader.lock().expect("segment reader poisoned");
            reader.seek(SeekFrom::Start(location.offset))?;
            reader.read_exact(&mut payload)?;
        }

        let actual = crc32fast::hash(&payload);
        if actual != location.crc {
            return Err(StoreError::CorruptBlock {
                path: self.path.clone(),
                index,
                reason: format!("expected crc {:#010x}, got {actual:#010x}", location.crc),
            });
        }
        Ok(Some(Bytes::from(payload)))
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        if data.len() > MAX_BLOCK_SIZE {
            return Err(StoreError::BlockTooLarge {
                size: data.len(),
                max: MAX_BLOCK_SIZE,
            });
        }
        let length = data.len() as u32;
        let crc = crc32fast::hash(data);

        if let Err(e) = self.write_frame(length, crc, data) {
            if let Err(rollback) = self.truncate_to_last_frame() {
                warn!(path = %self.path.display(), error = %rollback, "failed to drop partial frame");
            }
            return Err(e.into());
        }

        let index = self.index.len() as u64;
        self.index.push(BlockLocation {
            offset: self.write_offset + HEADER_SIZE,
            length,
            crc,
        });
        self.write_offset += HEADER_SIZE + length as u64;
        Ok(index)
    }

    fn flush(&mut self) -> StoreResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFile")
            .field("path", &self.path)
            .field("blocks", &self.index.len())
            .field("size_bytes", &self.write_offset)
            .finish()
    }
}
