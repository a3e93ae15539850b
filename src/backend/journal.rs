//! Append-only journal that makes [`super::FileBackend`] durable.
//!
//! Every backend write is encoded as one frame before it is applied to the
//! in-memory tables, so replaying the journal rebuilds the tables and a
//! multi-item transaction is either fully present or fully absent after a
//! crash.
//!
//! Layout: `magic (4) | version (1)` followed by frames of
//! `len (u32 LE) | rmp-serde payload | crc32 (u32 LE)`.

use super::tables::Mutation;
use crate::error::{CourierError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Magic bytes for journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"CJL\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

const HEADER_LEN: usize = 5;

/// 64MB sanity limit per frame.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Mutations written per frame when compacting.
const COMPACT_FRAME_ITEMS: usize = 256;

pub(crate) struct Journal {
    path: PathBuf,
    file: JournalFile,
    sync_writes: bool,
    frames: u64,
    /// Length of the intact prefix: header plus every acknowledged frame.
    len: u64,
    /// Set when a failed append could not be rolled back.
    failed: bool,
}

impl Journal {
    /// Open or create a journal, returning the frames to replay.
    ///
    /// A torn or corrupt tail is discarded and the file truncated to the last
    /// intact frame.
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> Result<(Self, Vec<Vec<Mutation>>)> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            drop(Self::create_empty(&path)?);
            let journal = Self {
                file: JournalFile::open_append(&path)?,
                path,
                sync_writes,
                frames: 0,
                len: HEADER_LEN as u64,
                failed: false,
            };
            return Ok((journal, Vec::new()));
        }

        let bytes = fs::read(&path)?;
        if bytes.len() < HEADER_LEN || &bytes[0..4] != JOURNAL_MAGIC {
            return Err(CourierError::InvalidFormat("Invalid journal magic".into()));
        }
        if bytes[4] != JOURNAL_VERSION {
            return Err(CourierError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                bytes[4]
            )));
        }

        let mut frames = Vec::new();
        let mut offset = HEADER_LEN;
        while offset < bytes.len() {
            match Self::decode_frame(&bytes[offset..]) {
                Ok((frame, consumed)) => {
                    frames.push(frame);
                    offset += consumed;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        offset,
                        discarded = bytes.len() - offset,
                        error = %e,
                        "discarding damaged journal tail"
                    );
                    break;
                }
            }
        }

        let mut file = JournalFile::open_append(&path)?;
        if offset < bytes.len() {
            file.truncate(offset as u64)?;
        }
        info!(path = %path.display(), frames = frames.len(), "journal opened");

        let journal = Self {
            path,
            file,
            sync_writes,
            frames: frames.len() as u64,
            len: offset as u64,
            failed: false,
        };
        Ok((journal, frames))
    }

    /// Append one frame.
    ///
    /// On error the file is cut back to the last acknowledged frame, so a
    /// failed append never reappears on replay. If even that fails, every
    /// later append is refused.
    pub fn append(&mut self, mutations: &[Mutation]) -> Result<()> {
        if self.failed {
            return Err(CourierError::Corruption(format!(
                "journal {} has an unrecoverable partial frame",
                self.path.display()
            )));
        }

        let encoded = Self::encode_frame(mutations)?;
        if let Err(e) = self.write_frame(&encoded) {
            self.roll_back();
            return Err(e);
        }
        self.len += encoded.len() as u64;
        self.frames += 1;
        Ok(())
    }

    fn write_frame(&mut self, encoded: &[u8]) -> Result<()> {
        self.file.write_all(encoded)?;
        if self.sync_writes {
            self.file.sync()?;
        }
        Ok(())
    }

    fn roll_back(&mut self) {
        match self.file.truncate(self.len) {
            Ok(()) => warn!(
                path = %self.path.display(),
                len = self.len,
                "failed journal append rolled back"
            ),
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %e,
                    "journal rollback failed, refusing further writes"
                );
                self.failed = true;
            }
        }
    }

    /// Replace the journal with `snapshot`, written to a side file and renamed
    /// into place.
    pub fn rewrite(&mut self, snapshot: Vec<Mutation>) -> Result<()> {
        let tmp_path = self.path.with_extension("compact");
        let mut frames = 0u64;
        let mut len = HEADER_LEN as u64;
        {
            let mut tmp = BufWriter::new(Self::create_empty(&tmp_path)?);
            for chunk in snapshot.chunks(COMPACT_FRAME_ITEMS) {
                let encoded = Self::encode_frame(chunk)?;
                tmp.write_all(&encoded)?;
                len += encoded.len() as u64;
                frames += 1;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        self.file = JournalFile::open_append(&self.path)?;
        self.frames = frames;
        self.len = len;
        self.failed = false;
        Ok(())
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    fn create_empty(path: &Path) -> Result<File> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(JOURNAL_MAGIC)?;
        file.write_all(&[JOURNAL_VERSION])?;
        file.sync_all()?;
        Ok(file)
    }

    fn encode_frame(mutations: &[Mutation]) -> Result<Vec<u8>> {
        let payload = rmp_serde::to_vec_named(mutations)?;
        if payload.len() > MAX_FRAME_LEN {
            return Err(CourierError::InvalidRequest("journal frame too large".into()));
        }

        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        Ok(frame)
    }

    /// Decode the frame at the start of `bytes`, returning it and its length.
    fn decode_frame(bytes: &[u8]) -> Result<(Vec<Mutation>, usize)> {
        if bytes.len() < 4 {
            return Err(CourierError::Corruption("truncated frame header".into()));
        }
        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(CourierError::Corruption("journal frame too large".into()));
        }

        let end = 4 + len + 4;
        if bytes.len() < end {
            return Err(CourierError::Corruption("truncated frame".into()));
        }

        let payload = &bytes[4..4 + len];
        let stored = u32::from_le_bytes([
            bytes[4 + len],
            bytes[5 + len],
            bytes[6 + len],
            bytes[7 + len],
        ]);
        let computed = crc32fast::hash(payload);
        if stored != computed {
            return Err(CourierError::Corruption("journal checksum mismatch".into()));
        }

        Ok((rmp_serde::from_slice(payload)?, end))
    }
}

/// Append handle on the journal file.
struct JournalFile {
    file: File,
    /// Bytes the file still accepts before writes fail, like a file size
    /// limit.
    #[cfg(test)]
    accept: Option<usize>,
}

impl JournalFile {
    fn open_append(path: &Path) -> Result<Self> {
        Ok(Self {
            file: OpenOptions::new().append(true).open(path)?,
            #[cfg(test)]
            accept: None,
        })
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)?;
        self.file.sync_all()
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

impl Write for JournalFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        #[cfg(test)]
        if let Some(accept) = self.accept.as_mut() {
            if *accept == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "file too large"));
            }
            let n = self.file.write(&buf[..buf.len().min(*accept)])?;
            *accept -= n;
            return Ok(n);
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
