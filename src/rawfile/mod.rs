//! Raw block files
//!
//! A raw file is a plain stream of data blocks, each written as
//! little-endian `u32` words with no framing of its own. Block boundaries
//! come from the `POS_NWORDS` word of each RawHeader.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ Block 1  (nwords x u32 LE)   │
//! ├──────────────────────────────┤
//! │ Block 2                      │
//! ├──────────────────────────────┤
//! │ ...                          │
//! └──────────────────────────────┘
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use tracing::debug;

use crate::common::error::{CopperError, CopperResult, Corruption};
use crate::format::layout::{raw_header, raw_trailer};

/// Largest block accepted from a file (64 MiB of words)
pub const MAX_BLOCK_NWORDS: usize = 16 * 1024 * 1024;

/// Smallest block accepted from a file
pub const MIN_BLOCK_NWORDS: usize = raw_header::RAWHEADER_NWORDS + raw_trailer::RAWTRAILER_NWORDS;

/// Iterates over the blocks of a raw file
pub struct RawFileReader<R> {
    reader: R,
    /// Words consumed so far
    pos: usize,
    blocks_read: usize,
    done: bool,
}

impl RawFileReader<BufReader<File>> {
    /// Open a raw file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> CopperResult<Self> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "Opened raw file");
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> RawFileReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pos: 0,
            blocks_read: 0,
            done: false,
        }
    }

    pub fn blocks_read(&self) -> usize {
        self.blocks_read
    }

    /// Words consumed so far
    pub fn words_read(&self) -> usize {
        self.pos
    }

    /// Read into `buf` until it is full or the stream ends, returning the bytes read
    fn fill(&mut self, buf: &mut [u8]) -> CopperResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    /// First word of the next block, `None` at a clean end of stream
    fn read_length_word(&mut self) -> CopperResult<Option<u32>> {
        let mut bytes = [0u8; 4];
        match self.fill(&mut bytes)? {
            0 => Ok(None),
            4 => Ok(Some(u32::from_le_bytes(bytes))),
            partial => Err(CopperError::corrupted(
                self.blocks_read,
                Corruption::PartialWord {
                    pos: self.pos,
                    bytes: partial,
                },
                self.pos,
                &[],
            )),
        }
    }

    /// Read the next block
    pub fn read_block(&mut self) -> CopperResult<Option<Vec<u32>>> {
        let first = match self.read_length_word()? {
            Some(word) => word,
            None => return Ok(None),
        };
        let nwords = first as usize;
        let block = self.blocks_read;

        if nwords == 0 {
            return Err(CopperError::corrupted(
                block,
                Corruption::ZeroLengthBlock { pos: self.pos },
                self.pos,
                &[first],
            ));
        }
        if nwords < MIN_BLOCK_NWORDS {
            return Err(CopperError::corrupted(
                block,
                Corruption::TruncatedBlock {
                    needed: MIN_BLOCK_NWORDS,
                    available: nwords,
                },
                self.pos,
                &[first],
            ));
        }
        if nwords > MAX_BLOCK_NWORDS {
            return Err(CopperError::corrupted(
                block,
                Corruption::BlockTooLarge {
                    nwords,
                    max: MAX_BLOCK_NWORDS,
                },
                self.pos,
                &[first],
            ));
        }

        let mut bytes = vec![0u8; (nwords - 1) * 4];
        let filled = self.fill(&mut bytes)?;
        let mut words = vec![0u32; 1 + filled / 4];
        words[0] = first;
        LittleEndian::read_u32_into(&bytes[..filled / 4 * 4], &mut words[1..]);

        if words.len() < nwords {
            return Err(CopperError::corrupted(
                block,
                Corruption::TruncatedBlock {
                    needed: nwords,
                    available: words.len(),
                },
                self.pos,
                &words,
            ));
        }

        self.pos += nwords;
        self.blocks_read += 1;
        Ok(Some(words))
    }
}

impl<R: Read> Iterator for RawFileReader<R> {
    type Item = CopperResult<Vec<u32>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_block() {
            Ok(Some(words)) => Some(Ok(words)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Appends blocks to a raw file
pub struct RawFileWriter<W: Write> {
    writer: W,
    blocks_written: usize,
    words_written: usize,
}

impl RawFileWriter<BufWriter<File>> {
    /// Create (or truncate) a raw file for writing
    pub fn create<P: AsRef<Path>>(path: P) -> CopperResult<Self> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "Created raw file");
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> RawFileWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            blocks_written: 0,
            words_written: 0,
        }
    }

    /// Append one block (or several already concatenated blocks)
    pub fn write_block(&mut self, words: &[u32]) -> CopperResult<()> {
        for &word in words {
            self.writer.write_u32::<LittleEndian>(word)?;
        }
        self.blocks_written += 1;
        self.words_written += words.len();
        Ok(())
    }

    pub fn blocks_written(&self) -> usize {
        self.blocks_written
    }

    pub fn words_written(&self) -> usize {
        self.words_written
    }

    pub fn flush(&mut self) -> CopperResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer
    pub fn into_inner(mut self) -> CopperResult<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Read a whole stream as little-endian words
pub fn read_words<R: Read>(mut reader: R) -> CopperResult<Vec<u32>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    if bytes.len() % 4 != 0 {
        return Err(CopperError::corrupted(
            0,
            Corruption::PartialWord {
                pos: bytes.len() / 4,
                bytes: bytes.len() % 4,
            },
            0,
            &[],
        ));
    }

    let mut words = vec![0u32; bytes.len() / 4];
    LittleEndian::read_u32_into(&bytes, &mut words);
    Ok(words)
}

/// Write words as a little-endian stream
pub fn write_words<W: Write>(mut writer: W, words: &[u32]) -> CopperResult<()> {
    for &word in words {
        writer.write_u32::<LittleEndian>(word)?;
    }
    writer.flush()?;
    Ok(())
}
