//! Pre-format to reduced-format conversion
//!
//! Reduction keeps the RawHeader, the HSLB header word, the `B2L_CTIME`
//! word, the detector payload and the CRC word of every populated FINESSE
//! buffer. The COPPER header/trailer, the first four FEE header words and
//! the HSLB trailer are dropped, then the RawHeader length, the FINESSE
//! offset table and the RawTrailer checksum are restamped.

use tracing::{debug, warn};

use super::checksum::xor_checksum;
use super::dump::format_words;
use super::layout::{b2l, raw_header, raw_trailer, reduced, NUM_FINESSE};
use super::navigator::PreRawCopper;
use super::validator::check_b2lhslb_magic;
use crate::common::error::{CopperResult, Corruption};

/// Reducer configuration
#[derive(Debug, Clone, Default)]
pub struct ReducerConfig {
    /// Verify the B2L CRC-16 of every source channel before copying
    pub verify_crc16: bool,
    /// Print source and reduced blocks for debugging
    pub dump_enabled: bool,
}

/// Converts pre-format blocks into the reduced format
#[derive(Debug, Clone)]
pub struct Reducer {
    config: ReducerConfig,
}

impl Reducer {
    pub fn new(config: ReducerConfig) -> Self {
        Self { config }
    }

    /// Create a reducer with default configuration
    pub fn with_defaults() -> Self {
        Self::new(ReducerConfig::default())
    }

    pub fn set_dump_enabled(&mut self, enabled: bool) {
        self.config.dump_enabled = enabled;
    }

    pub fn config(&self) -> &ReducerConfig {
        &self.config
    }

    /// Length of block `n` after reduction
    pub fn reduced_nwords(&self, raw: &PreRawCopper<'_>, n: usize) -> CopperResult<usize> {
        let mut nwords = raw_header::RAWHEADER_NWORDS;
        for ch in 0..NUM_FINESSE {
            let finesse = raw.finesse_nwords(n, ch)?;
            if finesse > 0 {
                // Shorter buffers are rejected when copied.
                nwords = nwords.saturating_add(finesse.saturating_sub(reduced::REDUCTION_NWORDS));
            }
        }
        Ok(nwords.saturating_add(raw_trailer::RAWTRAILER_NWORDS))
    }

    /// Append the reduced form of block `n` to `dest` and return the words written
    ///
    /// On failure `dest` is left as it was.
    pub fn copy_reduced_buffer(
        &self,
        raw: &PreRawCopper<'_>,
        n: usize,
        dest: &mut Vec<u32>,
    ) -> CopperResult<usize> {
        let start = dest.len();
        let result = self.write_reduced_block(raw, n, dest);
        if result.is_err() {
            dest.truncate(start);
        }
        result
    }

    fn write_reduced_block(
        &self,
        raw: &PreRawCopper<'_>,
        n: usize,
        dest: &mut Vec<u32>,
    ) -> CopperResult<usize> {
        let expected = self.reduced_nwords(raw, n)?;
        let block = raw.block(n)?;
        let start = dest.len();
        // Channel lengths are unchecked until finesse_buffer; a reduced block never outgrows its source.
        dest.reserve(expected.min(block.len()));

        // RawHeader with the pre-format flag cleared
        let header = raw.raw_header(n)?;
        dest.extend_from_slice(&block[..raw_header::RAWHEADER_NWORDS]);
        dest[start + raw_header::POS_VERSION_HDRNWORDS] &= !raw_header::PRE_FORMAT_BIT;

        let mut offsets = [0usize; NUM_FINESSE];
        let mut populated = 0usize;
        for (ch, offset) in offsets.iter_mut().enumerate() {
            *offset = dest.len() - start;
            let finesse = raw.finesse_buffer(n, ch)?;
            if finesse.is_empty() {
                continue;
            }
            populated += 1;

            check_b2lhslb_magic(finesse).map_err(|kind| raw.corrupted(n, kind))?;
            if finesse.len() < b2l::OVERHEAD_NWORDS {
                return Err(raw.corrupted(
                    n,
                    Corruption::FinesseTooSmall {
                        channel: ch,
                        nwords: finesse.len(),
                        minimum: b2l::OVERHEAD_NWORDS,
                    },
                ));
            }
            if self.config.verify_crc16 {
                raw.check_crc16(n, ch)?;
            }

            let ctime = b2l::SIZE_B2LHSLB_HEADER + b2l::POS_B2L_CTIME;
            let fee_trailer = finesse.len() - b2l::SIZE_B2LHSLB_TRAILER - b2l::SIZE_B2LFEE_TRAILER;

            dest.push(finesse[b2l::POS_MAGIC_B2LHSLB]);
            dest.extend_from_slice(&finesse[ctime..fee_trailer]);
            dest.push(finesse[fee_trailer + b2l::POS_CHKSUM_B2LFEE]);
        }

        if populated == 0 {
            return Err(raw.corrupted(n, Corruption::NoFinesseData));
        }

        dest.extend_from_slice(&block[block.len() - raw_trailer::RAWTRAILER_NWORDS..]);

        let written = dest.len() - start;
        if written != expected {
            return Err(raw.corrupted(
                n,
                Corruption::ReducedLengthMismatch { written, expected },
            ));
        }

        let out = &mut dest[start..];
        out[raw_header::POS_NWORDS] = written as u32;
        for (ch, &offset) in offsets.iter().enumerate() {
            out[raw_header::POS_OFFSET_FINESSE[ch]] = offset as u32;
        }
        let trailer = written - raw_trailer::RAWTRAILER_NWORDS;
        out[trailer + raw_trailer::POS_CHKSUM] = xor_checksum(&out[..trailer]);

        debug!(
            block = n,
            eve = header.eve_no,
            from = block.len(),
            to = written,
            channels = populated,
            "Reduced COPPER block"
        );
        if self.config.dump_enabled {
            println!("[Reducer] block {} source:\n{}", n, format_words(block, 0, 10, None));
            println!("[Reducer] block {} reduced:\n{}", n, format_words(out, 0, 10, None));
        }

        Ok(written)
    }

    /// Total length of a multi-block buffer after reduction
    ///
    /// FTSW and TLU blocks keep their size.
    pub fn calc_reduced_data_size(
        &self,
        words: &[u32],
        num_events: usize,
        num_nodes: usize,
    ) -> CopperResult<usize> {
        let raw = PreRawCopper::new(words, num_events, num_nodes)?;
        let mut total = 0usize;
        for n in 0..raw.num_blocks() {
            total += if raw.is_ftsw(n)? || raw.is_tlu(n)? {
                raw.block_nwords(n)?
            } else {
                self.reduced_nwords(&raw, n)?
            };
        }
        Ok(total)
    }

    /// Reduce every block of a multi-block buffer
    ///
    /// FTSW and TLU blocks are copied unchanged.
    pub fn copy_reduced_data(
        &self,
        words: &[u32],
        num_events: usize,
        num_nodes: usize,
    ) -> CopperResult<Vec<u32>> {
        let raw = PreRawCopper::new(words, num_events, num_nodes)?;
        let mut out = Vec::with_capacity(words.len());

        for n in 0..raw.num_blocks() {
            if raw.is_ftsw(n)? || raw.is_tlu(n)? {
                warn!(
                    block = n,
                    node_id = %format!("0x{:08x}", raw.node_id(n)?),
                    "Synchronization block passed through without reduction"
                );
                out.extend_from_slice(raw.block(n)?);
            } else {
                self.copy_reduced_buffer(&raw, n, &mut out)?;
            }
        }

        debug!(
            blocks = raw.num_blocks(),
            from = words.len(),
            to = out.len(),
            "Reduced COPPER buffer"
        );
        Ok(out)
    }
}

impl Default for Reducer {
    fn default() -> Self {
        Self::with_defaults()
    }
}
