//! Read-only view of reduced-format blocks
//!
//! In the reduced format FINESSE buffers are located through the RawHeader
//! offset table, and each populated buffer is
//! `HSLB header | B2L_CTIME | payload | CRC word`.

use super::checksum::{crc16_words, xor_checksum, CRC16_INIT};
use super::layout::{raw_header, raw_trailer, reduced, RawHeader, RawTrailer, NUM_FINESSE};
use super::navigator::BlockIndex;
use crate::common::error::{CopperError, CopperResult, Corruption};

/// Reduced-format counterpart of [`PreRawCopper`](super::navigator::PreRawCopper)
#[derive(Debug, Clone)]
pub struct PostRawCopper<'a> {
    buf: &'a [u32],
    index: BlockIndex,
}

impl<'a> PostRawCopper<'a> {
    pub fn new(words: &'a [u32], num_events: usize, num_nodes: usize) -> CopperResult<Self> {
        let index = BlockIndex::build(words, BlockIndex::block_count(num_events, num_nodes)?)?;
        Ok(Self { buf: words, index })
    }

    pub fn single(words: &'a [u32]) -> CopperResult<Self> {
        Self::new(words, 1, 1)
    }

    pub fn num_blocks(&self) -> usize {
        self.index.len()
    }

    pub fn block_offset(&self, n: usize) -> CopperResult<usize> {
        self.index.offset(n).ok_or(CopperError::InvalidBlock {
            index: n,
            count: self.index.len(),
        })
    }

    pub fn block_nwords(&self, n: usize) -> CopperResult<usize> {
        self.index.nwords(n).ok_or(CopperError::InvalidBlock {
            index: n,
            count: self.index.len(),
        })
    }

    pub fn block(&self, n: usize) -> CopperResult<&'a [u32]> {
        let start = self.block_offset(n)?;
        Ok(&self.buf[start..start + self.block_nwords(n)?])
    }

    fn corrupted(&self, n: usize, kind: Corruption) -> CopperError {
        match (self.block_offset(n), self.block(n)) {
            (Ok(offset), Ok(words)) => CopperError::corrupted(n, kind, offset, words),
            _ => CopperError::corrupted(n, kind, 0, &[]),
        }
    }

    pub fn raw_header(&self, n: usize) -> CopperResult<RawHeader> {
        let block = self.block(n)?;
        if block.len() < raw_header::RAWHEADER_NWORDS + raw_trailer::RAWTRAILER_NWORDS {
            return Err(self.corrupted(
                n,
                Corruption::TruncatedBlock {
                    needed: raw_header::RAWHEADER_NWORDS + raw_trailer::RAWTRAILER_NWORDS,
                    available: block.len(),
                },
            ));
        }
        RawHeader::from_words(block).ok_or(CopperError::InvalidBlock {
            index: n,
            count: self.index.len(),
        })
    }

    pub fn raw_trailer(&self, n: usize) -> CopperResult<RawTrailer> {
        self.raw_header(n)?;
        RawTrailer::from_block(self.block(n)?).ok_or(CopperError::InvalidBlock {
            index: n,
            count: self.index.len(),
        })
    }

    pub fn eve_no(&self, n: usize) -> CopperResult<u32> {
        Ok(self.raw_header(n)?.eve_no)
    }

    pub fn node_id(&self, n: usize) -> CopperResult<u32> {
        Ok(self.raw_header(n)?.node_id)
    }

    pub fn is_pre_format(&self, n: usize) -> CopperResult<bool> {
        Ok(self.raw_header(n)?.is_pre_format())
    }

    /// Block-relative (offset, length) of FINESSE buffer `ch` from the offset table
    fn finesse_span(&self, n: usize, ch: usize) -> CopperResult<(usize, usize)> {
        if ch >= NUM_FINESSE {
            return Err(CopperError::InvalidChannel(ch));
        }
        let header = self.raw_header(n)?;
        let block_nwords = self.block_nwords(n)?;
        let offset = header.finesse_offsets[ch] as usize;
        let end = match header.finesse_offsets.get(ch + 1) {
            Some(&next) => next as usize,
            None => block_nwords - raw_trailer::RAWTRAILER_NWORDS,
        };

        if offset < raw_header::RAWHEADER_NWORDS
            || end < offset
            || end > block_nwords - raw_trailer::RAWTRAILER_NWORDS
        {
            return Err(self.corrupted(
                n,
                Corruption::FinesseOverrun {
                    channel: ch,
                    offset,
                    nwords: end.saturating_sub(offset),
                    block_nwords,
                },
            ));
        }
        Ok((offset, end - offset))
    }

    /// Offset of FINESSE buffer `ch` in the whole buffer
    pub fn finesse_offset(&self, n: usize, ch: usize) -> CopperResult<usize> {
        Ok(self.block_offset(n)? + self.finesse_span(n, ch)?.0)
    }

    pub fn finesse_nwords(&self, n: usize, ch: usize) -> CopperResult<usize> {
        Ok(self.finesse_span(n, ch)?.1)
    }

    pub fn finesse_buffer(&self, n: usize, ch: usize) -> CopperResult<&'a [u32]> {
        let (offset, nwords) = self.finesse_span(n, ch)?;
        Ok(&self.block(n)?[offset..offset + nwords])
    }

    pub fn detector_nwords(&self, n: usize, ch: usize) -> CopperResult<usize> {
        let nwords = self.finesse_nwords(n, ch)?;
        if nwords == 0 {
            return Ok(0);
        }
        nwords.checked_sub(reduced::OVERHEAD_NWORDS).ok_or_else(|| {
            self.corrupted(
                n,
                Corruption::FinesseTooSmall {
                    channel: ch,
                    nwords,
                    minimum: reduced::OVERHEAD_NWORDS,
                },
            )
        })
    }

    pub fn detector_buffer(&self, n: usize, ch: usize) -> CopperResult<&'a [u32]> {
        let nwords = self.detector_nwords(n, ch)?;
        if nwords == 0 {
            return Ok(&[]);
        }
        let start = reduced::SIZE_B2LHSLB_HEADER + reduced::SIZE_B2LFEE_HEADER;
        Ok(&self.finesse_buffer(n, ch)?[start..start + nwords])
    }

    /// Verify the B2L CRC-16 of FINESSE buffer `ch`
    ///
    /// The FEE header words dropped by reduction are taken from the RawHeader.
    pub fn check_crc16(&self, n: usize, ch: usize) -> CopperResult<()> {
        let finesse = self.finesse_buffer(n, ch)?;
        if finesse.is_empty() {
            return Ok(());
        }
        self.detector_nwords(n, ch)?;

        let header = self.raw_header(n)?;
        let crc_word = finesse.len() - reduced::SIZE_B2LFEE_TRAILER;
        let seed = [
            header.ttctime_trgtype,
            header.eve_no,
            header.ttutime,
            header.exp_run,
        ];
        let crc = crc16_words(CRC16_INIT, &seed);
        let calculated = crc16_words(crc, &finesse[reduced::SIZE_B2LHSLB_HEADER..crc_word]);
        let stored = (finesse[crc_word] & 0xFFFF) as u16;

        if stored != calculated {
            return Err(self.corrupted(
                n,
                Corruption::Crc16Mismatch {
                    channel: ch,
                    stored,
                    calculated,
                },
            ));
        }
        Ok(())
    }

    pub fn calc_block_checksum(&self, n: usize) -> CopperResult<u32> {
        let block = self.block(n)?;
        let end = block.len().saturating_sub(raw_trailer::RAWTRAILER_NWORDS);
        Ok(xor_checksum(&block[..end]))
    }

    pub fn check_block_checksum(&self, n: usize) -> CopperResult<()> {
        let calculated = self.calc_block_checksum(n)?;
        let stored = self.raw_trailer(n)?.chksum;
        if stored != calculated {
            return Err(self.corrupted(n, Corruption::BlockChecksum { stored, calculated }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::navigator::PreRawCopper;
    use crate::format::packer::{pack_detector_buf, PackerInfo};
    use crate::format::reducer::Reducer;

    fn reduce(channels: [&[u32]; 4]) -> Vec<u32> {
        let info = PackerInfo {
            exp_num: 3,
            run_subrun_num: (100 << 8) | 2,
            eve_num: 0x0001_0005,
            tt_ctime: 0x3_0000,
            tt_utime: 0x6200_0000,
            node_id: 0x0200_0003,
            b2l_ctime: 0x4_0000,
        };
        let block = pack_detector_buf(channels, &info);
        let raw = PreRawCopper::single(block.as_slice()).unwrap();
        let mut out = Vec::new();
        Reducer::with_defaults()
            .copy_reduced_buffer(&raw, 0, &mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_reduced_lengths_and_payloads() {
        let words = reduce([&[1, 2], &[], &[3, 4, 5], &[6]]);
        let post = PostRawCopper::single(&words).unwrap();

        assert!(!post.is_pre_format(0).unwrap());
        assert_eq!(post.eve_no(0).unwrap(), 0x0001_0005);
        assert_eq!(post.finesse_nwords(0, 0).unwrap(), 5);
        assert_eq!(post.finesse_nwords(0, 1).unwrap(), 0);
        assert_eq!(post.finesse_nwords(0, 2).unwrap(), 6);
        assert_eq!(post.finesse_nwords(0, 3).unwrap(), 4);
        assert_eq!(post.detector_buffer(0, 0).unwrap(), &[1, 2]);
        assert!(post.detector_buffer(0, 1).unwrap().is_empty());
        assert_eq!(post.detector_buffer(0, 2).unwrap(), &[3, 4, 5]);
        assert_eq!(post.detector_buffer(0, 3).unwrap(), &[6]);
    }

    #[test]
    fn test_reduced_crc16_and_checksum() {
        let words = reduce([&[0x11, 0x22, 0x33], &[0x44], &[], &[]]);
        let post = PostRawCopper::single(&words).unwrap();
        for ch in 0..NUM_FINESSE {
            post.check_crc16(0, ch).unwrap();
        }
        post.check_block_checksum(0).unwrap();
    }

    #[test]
    fn test_reduced_crc16_detects_change() {
        let mut words = reduce([&[0x11, 0x22], &[], &[], &[]]);
        let pos = {
            let post = PostRawCopper::single(&words).unwrap();
            post.finesse_offset(0, 0).unwrap() + 2
        };
        words[pos] ^= 1;

        let post = PostRawCopper::single(&words).unwrap();
        assert!(matches!(
            post.check_crc16(0, 0).unwrap_err().corruption(),
            Some(Corruption::Crc16Mismatch { channel: 0, .. })
        ));
        assert!(post.check_block_checksum(0).is_err());
    }

    #[test]
    fn test_bad_offset_table() {
        let mut words = reduce([&[1], &[], &[], &[]]);
        words[raw_header::POS_OFFSET_2ND_FINESSE] = 1000;
        let post = PostRawCopper::single(&words).unwrap();
        assert!(matches!(
            post.finesse_nwords(0, 1).unwrap_err().corruption(),
            Some(Corruption::FinesseOverrun { channel: 1, .. })
        ));
        assert!(matches!(
            post.finesse_nwords(0, 4),
            Err(CopperError::InvalidChannel(4))
        ));
    }
}
