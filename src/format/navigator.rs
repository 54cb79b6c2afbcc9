//! Block navigation over a pre-format COPPER buffer
//!
//! A buffer holds `num_events * num_nodes` data blocks concatenated without
//! padding. Block boundaries are found once through each block's
//! `POS_NWORDS` word and cached in a [`BlockIndex`], so every later lookup
//! is O(1).

use tracing::{debug, warn};

use super::layout::{
    b2l, copper, raw_header, raw_trailer, RawHeader, RawTrailer, MIN_COPPER_BLOCK_NWORDS,
    NUM_FINESSE,
};
use crate::common::error::{CopperError, CopperResult, Corruption};

/// Start offsets of every data block in a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIndex {
    offsets: Vec<usize>,
    nwords: Vec<usize>,
}

impl BlockIndex {
    /// Number of blocks in a buffer of `num_events` events from `num_nodes` nodes
    pub fn block_count(num_events: usize, num_nodes: usize) -> CopperResult<usize> {
        num_events
            .checked_mul(num_nodes)
            .ok_or(CopperError::InvalidBlock {
                index: num_events.saturating_mul(num_nodes),
                count: usize::MAX,
            })
    }

    /// Walk `words` once and record `num_blocks` block boundaries
    pub fn build(words: &[u32], num_blocks: usize) -> CopperResult<Self> {
        // Every block holds at least one word.
        let capacity = num_blocks.min(words.len());
        let mut offsets = Vec::with_capacity(capacity);
        let mut nwords = Vec::with_capacity(capacity);
        let mut pos = 0usize;

        for block in 0..num_blocks {
            if pos >= words.len() {
                return Err(CopperError::corrupted(
                    block,
                    Corruption::BlockCountMismatch {
                        expected: num_blocks,
                        found: block,
                    },
                    0,
                    words,
                ));
            }

            let len = words[pos + raw_header::POS_NWORDS] as usize;
            if len == 0 {
                return Err(CopperError::corrupted(
                    block,
                    Corruption::ZeroLengthBlock { pos },
                    pos,
                    &words[pos..],
                ));
            }
            if len > words.len() - pos {
                return Err(CopperError::corrupted(
                    block,
                    Corruption::BufferOverrun {
                        pos,
                        nwords: len,
                        available: words.len() - pos,
                    },
                    pos,
                    &words[pos..],
                ));
            }

            offsets.push(pos);
            nwords.push(len);
            pos += len;
        }

        if pos != words.len() {
            warn!(
                used = pos,
                total = words.len(),
                "Trailing words after the last data block"
            );
        }

        Ok(Self { offsets, nwords })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Word offset of block `n`
    pub fn offset(&self, n: usize) -> Option<usize> {
        self.offsets.get(n).copied()
    }

    /// Declared word count of block `n`
    pub fn nwords(&self, n: usize) -> Option<usize> {
        self.nwords.get(n).copied()
    }

    /// Total words covered by all indexed blocks
    pub fn total_nwords(&self) -> usize {
        self.nwords.iter().sum()
    }
}

/// Read-only view of a pre-format COPPER buffer
#[derive(Debug, Clone)]
pub struct PreRawCopper<'a> {
    buf: &'a [u32],
    num_events: usize,
    num_nodes: usize,
    index: BlockIndex,
}

impl<'a> PreRawCopper<'a> {
    /// Wrap a buffer of `num_events * num_nodes` blocks
    pub fn new(words: &'a [u32], num_events: usize, num_nodes: usize) -> CopperResult<Self> {
        let index = BlockIndex::build(words, BlockIndex::block_count(num_events, num_nodes)?)?;
        debug!(
            nwords = words.len(),
            num_events = num_events,
            num_nodes = num_nodes,
            "Indexed COPPER buffer"
        );
        Ok(Self {
            buf: words,
            num_events,
            num_nodes,
            index,
        })
    }

    /// Wrap a buffer holding exactly one block
    pub fn single(words: &'a [u32]) -> CopperResult<Self> {
        Self::new(words, 1, 1)
    }

    pub fn num_events(&self) -> usize {
        self.num_events
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_blocks(&self) -> usize {
        self.index.len()
    }

    pub fn whole_buffer(&self) -> &'a [u32] {
        self.buf
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    // =========================================================================
    // Block level
    // =========================================================================

    /// Word offset of block `n` in the whole buffer
    pub fn block_offset(&self, n: usize) -> CopperResult<usize> {
        self.index.offset(n).ok_or(CopperError::InvalidBlock {
            index: n,
            count: self.index.len(),
        })
    }

    /// Declared length of block `n`
    pub fn block_nwords(&self, n: usize) -> CopperResult<usize> {
        self.index.nwords(n).ok_or(CopperError::InvalidBlock {
            index: n,
            count: self.index.len(),
        })
    }

    /// Words of block `n`
    pub fn block(&self, n: usize) -> CopperResult<&'a [u32]> {
        let start = self.block_offset(n)?;
        let len = self.block_nwords(n)?;
        Ok(&self.buf[start..start + len])
    }

    /// Corruption error for block `n` with a dump of the whole block
    pub(crate) fn corrupted(&self, n: usize, kind: Corruption) -> CopperError {
        match (self.block_offset(n), self.block(n)) {
            (Ok(offset), Ok(words)) => CopperError::corrupted(n, kind, offset, words),
            _ => CopperError::corrupted(n, kind, 0, &[]),
        }
    }

    /// Block `n`, required to be large enough for the COPPER framing
    fn copper_block(&self, n: usize) -> CopperResult<&'a [u32]> {
        let block = self.block(n)?;
        if block.len() < MIN_COPPER_BLOCK_NWORDS {
            return Err(self.corrupted(
                n,
                Corruption::TruncatedBlock {
                    needed: MIN_COPPER_BLOCK_NWORDS,
                    available: block.len(),
                },
            ));
        }
        Ok(block)
    }

    // =========================================================================
    // RawHeader / RawTrailer
    // =========================================================================

    pub fn raw_header(&self, n: usize) -> CopperResult<RawHeader> {
        let block = self.block(n)?;
        RawHeader::from_words(block).ok_or_else(|| {
            self.corrupted(
                n,
                Corruption::TruncatedBlock {
                    needed: raw_header::RAWHEADER_NWORDS,
                    available: block.len(),
                },
            )
        })
    }

    pub fn raw_trailer(&self, n: usize) -> CopperResult<RawTrailer> {
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
        RawTrailer::from_block(block).ok_or(CopperError::InvalidBlock {
            index: n,
            count: self.index.len(),
        })
    }

    pub fn eve_no(&self, n: usize) -> CopperResult<u32> {
        Ok(self.raw_header(n)?.eve_no)
    }

    pub fn exp_no(&self, n: usize) -> CopperResult<u32> {
        Ok(self.raw_header(n)?.exp_no())
    }

    pub fn run_no(&self, n: usize) -> CopperResult<u32> {
        Ok(self.raw_header(n)?.run_no())
    }

    pub fn subrun_no(&self, n: usize) -> CopperResult<u32> {
        Ok(self.raw_header(n)?.subrun_no())
    }

    pub fn exp_run_subrun_word(&self, n: usize) -> CopperResult<u32> {
        Ok(self.raw_header(n)?.exp_run)
    }

    pub fn node_id(&self, n: usize) -> CopperResult<u32> {
        Ok(self.raw_header(n)?.node_id)
    }

    pub fn tt_ctime(&self, n: usize) -> CopperResult<u32> {
        Ok(self.raw_header(n)?.tt_ctime())
    }

    pub fn trg_type(&self, n: usize) -> CopperResult<u32> {
        Ok(self.raw_header(n)?.trg_type())
    }

    pub fn tt_utime(&self, n: usize) -> CopperResult<u32> {
        Ok(self.raw_header(n)?.ttutime)
    }

    /// FTSW synchronization block (no FINESSE structure)
    pub fn is_ftsw(&self, n: usize) -> CopperResult<bool> {
        Ok(self.raw_header(n)?.is_ftsw())
    }

    /// TLU synchronization block (no FINESSE structure)
    pub fn is_tlu(&self, n: usize) -> CopperResult<bool> {
        Ok(self.raw_header(n)?.is_tlu())
    }

    // =========================================================================
    // COPPER header / trailer
    // =========================================================================

    fn copper_header_word(&self, n: usize, pos: usize) -> CopperResult<u32> {
        Ok(self.copper_block(n)?[raw_header::RAWHEADER_NWORDS + pos])
    }

    fn copper_trailer_word(&self, n: usize, pos: usize) -> CopperResult<u32> {
        let block = self.copper_block(n)?;
        let start = block.len() - raw_trailer::RAWTRAILER_NWORDS - copper::SIZE_COPPER_TRAILER;
        Ok(block[start + pos])
    }

    pub fn magic_driver_header(&self, n: usize) -> CopperResult<u32> {
        self.copper_header_word(n, copper::POS_MAGIC_COPPER_1)
    }

    pub fn magic_fpga_header(&self, n: usize) -> CopperResult<u32> {
        self.copper_header_word(n, copper::POS_MAGIC_COPPER_2)
    }

    pub fn magic_fpga_trailer(&self, n: usize) -> CopperResult<u32> {
        self.copper_trailer_word(n, copper::POS_MAGIC_COPPER_3)
    }

    pub fn magic_driver_trailer(&self, n: usize) -> CopperResult<u32> {
        self.copper_trailer_word(n, copper::POS_MAGIC_COPPER_4)
    }

    /// Event counter kept by the COPPER board
    pub fn copper_counter(&self, n: usize) -> CopperResult<u32> {
        self.copper_header_word(n, copper::POS_EVE_NUM_COPPER)
    }

    pub fn subsystem_id(&self, n: usize) -> CopperResult<u32> {
        self.copper_header_word(n, copper::POS_SUBSYSTEM_ID)
    }

    pub fn crate_id(&self, n: usize) -> CopperResult<u32> {
        self.copper_header_word(n, copper::POS_CRATE_ID)
    }

    pub fn slot_id(&self, n: usize) -> CopperResult<u32> {
        self.copper_header_word(n, copper::POS_SLOT_ID)
    }

    /// FPGA-level payload length from the COPPER header
    pub fn copper_data_length(&self, n: usize) -> CopperResult<u32> {
        self.copper_header_word(n, copper::POS_DATA_LENGTH)
    }

    /// Checksum written by the COPPER driver
    pub fn driver_checksum(&self, n: usize) -> CopperResult<u32> {
        self.copper_trailer_word(n, copper::POS_CHKSUM_COPPER)
    }

    // =========================================================================
    // FINESSE buffers
    // =========================================================================

    fn check_channel(ch: usize) -> CopperResult<()> {
        if ch >= NUM_FINESSE {
            return Err(CopperError::InvalidChannel(ch));
        }
        Ok(())
    }

    /// Length of FINESSE buffer `ch` (0 = slot empty)
    ///
    /// The COPPER magic words must be valid before the length fields are trusted.
    pub fn finesse_nwords(&self, n: usize, ch: usize) -> CopperResult<usize> {
        Self::check_channel(ch)?;
        self.require_copper_magic(n)?;
        Ok(self.copper_header_word(n, copper::POS_CH_DATA_LENGTH[ch])? as usize)
    }

    /// Lengths of all four FINESSE buffers
    pub fn finesse_nwords_all(&self, n: usize) -> CopperResult<[usize; NUM_FINESSE]> {
        let mut out = [0usize; NUM_FINESSE];
        for (ch, slot) in out.iter_mut().enumerate() {
            *slot = self.finesse_nwords(n, ch)?;
        }
        Ok(out)
    }

    /// Offset of FINESSE buffer `ch` relative to the start of block `n`
    fn finesse_block_offset(&self, n: usize, ch: usize) -> CopperResult<usize> {
        Self::check_channel(ch)?;
        let mut pos = raw_header::RAWHEADER_NWORDS + copper::SIZE_COPPER_HEADER;
        for prev in 0..ch {
            pos = pos.saturating_add(self.finesse_nwords(n, prev)?);
        }
        Ok(pos)
    }

    /// Offset of FINESSE buffer `ch` in the whole buffer
    pub fn finesse_offset(&self, n: usize, ch: usize) -> CopperResult<usize> {
        Ok(self.block_offset(n)?.saturating_add(self.finesse_block_offset(n, ch)?))
    }

    /// Words of FINESSE buffer `ch` (empty when the slot is unused)
    pub fn finesse_buffer(&self, n: usize, ch: usize) -> CopperResult<&'a [u32]> {
        let nwords = self.finesse_nwords(n, ch)?;
        let offset = self.finesse_block_offset(n, ch)?;
        let block = self.copper_block(n)?;
        let limit = block.len() - copper::SIZE_COPPER_TRAILER - raw_trailer::RAWTRAILER_NWORDS;

        if offset > limit || nwords > limit - offset {
            return Err(self.corrupted(
                n,
                Corruption::FinesseOverrun {
                    channel: ch,
                    offset,
                    nwords,
                    block_nwords: block.len(),
                },
            ));
        }
        Ok(&block[offset..offset + nwords])
    }

    /// Number of populated FINESSE slots
    pub fn num_populated_finesse(&self, n: usize) -> CopperResult<usize> {
        Ok(self
            .finesse_nwords_all(n)?
            .iter()
            .filter(|&&nw| nw > 0)
            .count())
    }

    /// Length of the detector payload in FINESSE buffer `ch`
    pub fn detector_nwords(&self, n: usize, ch: usize) -> CopperResult<usize> {
        let nwords = self.finesse_nwords(n, ch)?;
        if nwords == 0 {
            return Ok(0);
        }
        nwords.checked_sub(b2l::OVERHEAD_NWORDS).ok_or_else(|| {
            self.corrupted(
                n,
                Corruption::FinesseTooSmall {
                    channel: ch,
                    nwords,
                    minimum: b2l::OVERHEAD_NWORDS,
                },
            )
        })
    }

    /// Detector payload words of FINESSE buffer `ch`
    pub fn detector_buffer(&self, n: usize, ch: usize) -> CopperResult<&'a [u32]> {
        let nwords = self.detector_nwords(n, ch)?;
        if nwords == 0 {
            return Ok(&[]);
        }
        let finesse = self.finesse_buffer(n, ch)?;
        let start = b2l::SIZE_B2LHSLB_HEADER + b2l::SIZE_B2LFEE_HEADER;
        Ok(&finesse[start..start + nwords])
    }

    /// Word `pos` of the B2L-FEE header in FINESSE buffer `ch`, `None` for an empty slot
    pub fn fee_header_word(&self, n: usize, ch: usize, pos: usize) -> CopperResult<Option<u32>> {
        let finesse = self.finesse_buffer(n, ch)?;
        if finesse.is_empty() {
            return Ok(None);
        }
        match finesse.get(b2l::SIZE_B2LHSLB_HEADER + pos) {
            Some(&word) => Ok(Some(word)),
            None => Err(self.corrupted(
                n,
                Corruption::FinesseTooSmall {
                    channel: ch,
                    nwords: finesse.len(),
                    minimum: b2l::OVERHEAD_NWORDS,
                },
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::packer::{pack_detector_buf, PackerInfo};

    fn info(eve_num: u32) -> PackerInfo {
        PackerInfo {
            exp_num: 1,
            run_subrun_num: 5 << 8,
            eve_num,
            tt_ctime: 0x123_4567,
            tt_utime: 0x6000_0000,
            node_id: 0x1234,
            b2l_ctime: 0x765_4321,
        }
    }

    #[test]
    fn test_block_index_walks_lengths() {
        let words = vec![3, 0, 0, 2, 0, 4, 0, 0, 0];
        let index = BlockIndex::build(&words, 3).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.offset(0), Some(0));
        assert_eq!(index.offset(1), Some(3));
        assert_eq!(index.offset(2), Some(5));
        assert_eq!(index.nwords(2), Some(4));
        assert_eq!(index.total_nwords(), 9);
        assert_eq!(index.offset(3), None);
    }

    #[test]
    fn test_block_index_overrun() {
        let words = vec![3, 0, 0, 10, 0];
        let err = BlockIndex::build(&words, 2).unwrap_err();
        assert!(matches!(
            err.corruption(),
            Some(Corruption::BufferOverrun {
                pos: 3,
                nwords: 10,
                available: 2
            })
        ));
    }

    #[test]
    fn test_block_index_zero_length() {
        let words = vec![0, 1, 2];
        let err = BlockIndex::build(&words, 1).unwrap_err();
        assert!(matches!(
            err.corruption(),
            Some(Corruption::ZeroLengthBlock { pos: 0 })
        ));
    }

    #[test]
    fn test_block_index_too_few_blocks() {
        let words = vec![2, 0];
        let err = BlockIndex::build(&words, 2).unwrap_err();
        assert!(matches!(
            err.corruption(),
            Some(Corruption::BlockCountMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn test_invalid_block_index() {
        let block = pack_detector_buf([&[1, 2, 3], &[], &[], &[]], &info(1));
        let raw = PreRawCopper::single(block.as_slice()).unwrap();
        assert!(matches!(
            raw.block_offset(1),
            Err(CopperError::InvalidBlock { index: 1, count: 1 })
        ));
    }

    #[test]
    fn test_invalid_channel() {
        let block = pack_detector_buf([&[1, 2, 3], &[], &[], &[]], &info(1));
        let raw = PreRawCopper::single(block.as_slice()).unwrap();
        assert!(matches!(
            raw.finesse_nwords(0, 4),
            Err(CopperError::InvalidChannel(4))
        ));
    }

    #[test]
    fn test_finesse_offsets_follow_lengths() {
        let a = [1u32; 4];
        let c = [3u32; 2];
        let block = pack_detector_buf([&a, &[], &c, &[]], &info(7));
        let raw = PreRawCopper::single(block.as_slice()).unwrap();

        let base = raw_header::RAWHEADER_NWORDS + copper::SIZE_COPPER_HEADER;
        assert_eq!(raw.finesse_offset(0, 0).unwrap(), base);
        assert_eq!(raw.finesse_offset(0, 1).unwrap(), base + 12);
        assert_eq!(raw.finesse_offset(0, 2).unwrap(), base + 12);
        assert_eq!(raw.finesse_offset(0, 3).unwrap(), base + 22);
        assert_eq!(raw.finesse_nwords_all(0).unwrap(), [12, 0, 10, 0]);
        assert_eq!(raw.num_populated_finesse(0).unwrap(), 2);
    }

    #[test]
    fn test_detector_buffers() {
        let a = [0xA0, 0xA1, 0xA2];
        let d = [0xD0];
        let block = pack_detector_buf([&a, &[], &[], &d], &info(9));
        let raw = PreRawCopper::single(block.as_slice()).unwrap();

        assert_eq!(raw.detector_buffer(0, 0).unwrap(), &a);
        assert!(raw.detector_buffer(0, 1).unwrap().is_empty());
        assert_eq!(raw.detector_nwords(0, 2).unwrap(), 0);
        assert_eq!(raw.detector_buffer(0, 3).unwrap(), &d);
    }

    #[test]
    fn test_second_block_offsets() {
        let first = pack_detector_buf([&[1, 2], &[], &[], &[]], &info(1));
        let second = pack_detector_buf([&[3, 4, 5], &[], &[], &[]], &info(2));
        let mut words = first.as_slice().to_vec();
        words.extend_from_slice(second.as_slice());

        let raw = PreRawCopper::new(&words, 2, 1).unwrap();
        assert_eq!(raw.num_blocks(), 2);
        assert_eq!(raw.block_offset(1).unwrap(), first.nwords());
        assert_eq!(
            raw.finesse_offset(1, 0).unwrap(),
            first.nwords() + raw_header::RAWHEADER_NWORDS + copper::SIZE_COPPER_HEADER
        );
        assert_eq!(raw.detector_buffer(1, 0).unwrap(), &[3, 4, 5]);
        assert_eq!(raw.eve_no(1).unwrap(), 2);
    }

    #[test]
    fn test_header_accessors() {
        let block = pack_detector_buf([&[1], &[], &[], &[]], &info(42));
        let raw = PreRawCopper::single(block.as_slice()).unwrap();
        assert_eq!(raw.exp_no(0).unwrap(), 1);
        assert_eq!(raw.run_no(0).unwrap(), 5);
        assert_eq!(raw.subrun_no(0).unwrap(), 0);
        assert_eq!(raw.node_id(0).unwrap(), 0x1234);
        assert_eq!(raw.tt_ctime(0).unwrap(), 0x123_4567);
        assert_eq!(raw.tt_utime(0).unwrap(), 0x6000_0000);
        assert_eq!(raw.copper_counter(0).unwrap(), 42);
        assert!(!raw.is_ftsw(0).unwrap());
        assert!(!raw.is_tlu(0).unwrap());
    }

    #[test]
    fn test_fee_header_word() {
        let block = pack_detector_buf([&[], &[7, 8], &[], &[]], &info(42));
        let raw = PreRawCopper::single(block.as_slice()).unwrap();
        assert_eq!(raw.fee_header_word(0, 0, b2l::POS_TT_TAG).unwrap(), None);
        assert_eq!(raw.fee_header_word(0, 1, b2l::POS_TT_TAG).unwrap(), Some(42));
    }

    #[test]
    fn test_truncated_block_rejected() {
        let words = vec![5, 0, 0, 0, 0];
        let raw = PreRawCopper::single(&words).unwrap();
        let err = raw.magic_driver_header(0).unwrap_err();
        assert!(matches!(
            err.corruption(),
            Some(Corruption::TruncatedBlock { .. })
        ));
    }

    #[test]
    fn test_block_count_overflow() {
        assert_eq!(BlockIndex::block_count(3, 4).unwrap(), 12);
        let err = BlockIndex::block_count(usize::MAX, 2).unwrap_err();
        assert!(matches!(err, CopperError::InvalidBlock { .. }));

        let words = vec![3, 0, 0];
        assert!(matches!(
            PreRawCopper::new(&words, usize::MAX, usize::MAX),
            Err(CopperError::InvalidBlock { .. })
        ));
    }

    #[test]
    fn test_block_index_huge_count() {
        let words = vec![3, 0, 0];
        let err = BlockIndex::build(&words, usize::MAX / 2).unwrap_err();
        assert!(matches!(
            err.corruption(),
            Some(Corruption::BlockCountMismatch { found: 1, .. })
        ));
    }

    #[test]
    fn test_channel_length_out_of_range() {
        let mut words = pack_detector_buf([&[1, 2], &[3], &[], &[4]], &info(42)).into_words();
        words[raw_header::RAWHEADER_NWORDS + copper::POS_CH_DATA_LENGTH[0]] = u32::MAX;
        let raw = PreRawCopper::single(&words).unwrap();

        for ch in 0..NUM_FINESSE {
            let err = raw.finesse_buffer(0, ch).unwrap_err();
            assert!(
                matches!(err.corruption(), Some(Corruption::FinesseOverrun { .. })),
                "channel {}",
                ch
            );
        }
        // Slot 2 is empty but sits behind the oversized slot 0.
        assert_eq!(raw.finesse_nwords(0, 2).unwrap(), 0);
        assert!(raw.detector_buffer(0, 0).is_err());
        assert!(raw.detector_buffer(0, 3).is_err());
        assert!(raw.fee_header_word(0, 2, b2l::POS_TT_TAG).is_err());
    }
}
